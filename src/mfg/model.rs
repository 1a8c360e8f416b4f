//! The finite-horizon MDP a single agent faces against a frozen flow.
//!
//! Once the population flow is fixed, the mean-field game collapses to an
//! ordinary finite-horizon MDP: a reward per `(t, s, a)` and a next-state
//! distribution per `(t, s, a)` for `t < Tf`. The equilibrium solver builds
//! one from each propagated flow, and the deviation benchmark builds one from
//! the finite-population deviated rewards.

use serde::{Deserialize, Serialize};

use crate::mfg::env::{
    checked_individual_reward, checked_transition, ActionLayout, MeanFieldEnv,
    TRANSITION_TOLERANCE,
};
use crate::mfg::error::{MfgError, Result};

/// Reward table `[t][s][a]` over `t in 0..=Tf`.
pub type RewardTable = Vec<Vec<Vec<f64>>>;

/// Transition rows `[t][s][a][s']` over `t in 0..Tf`.
pub type TransitionTable = Vec<Vec<Vec<Vec<f64>>>>;

/// A validated finite-horizon MDP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InducedModel {
    layout: ActionLayout,
    horizon: usize,
    gamma: f64,
    rewards: RewardTable,
    transitions: TransitionTable,
}

impl InducedModel {
    /// Build a model from explicit tables.
    ///
    /// `rewards` must cover `horizon + 1` steps and `transitions` exactly
    /// `horizon` steps, both shaped by `n_actions`. Every transition row must
    /// be a probability vector.
    pub fn new(
        n_actions: &[usize],
        horizon: usize,
        gamma: f64,
        rewards: RewardTable,
        transitions: TransitionTable,
    ) -> Result<Self> {
        let model = Self {
            layout: ActionLayout::new(n_actions)?,
            horizon,
            gamma,
            rewards,
            transitions,
        };
        model.validate()?;
        Ok(model)
    }

    /// Project a state-action flow into the MDP it induces for one agent.
    ///
    /// Rewards come from `individual_reward(s, a, nu_t, t)` and transitions
    /// from `transition(s, a, mu_t)` with `mu_t = nu2mu(nu_t)`.
    pub fn from_flow<E: MeanFieldEnv + ?Sized>(env: &E, nu: &[Vec<f64>]) -> Result<Self> {
        let layout = ActionLayout::of(env)?;
        let horizon = env.horizon();
        if nu.len() != horizon + 1 {
            return Err(MfgError::shape("nu time steps", horizon + 1, nu.len()));
        }

        let mut rewards = Vec::with_capacity(horizon + 1);
        let mut transitions = Vec::with_capacity(horizon);
        for (t, nu_t) in nu.iter().enumerate() {
            let mu_t = layout.nu2mu(nu_t)?;
            let mut reward_t = Vec::with_capacity(layout.n_states());
            let mut trans_t = Vec::with_capacity(layout.n_states());
            for s in 0..layout.n_states() {
                let n = layout.n_actions()[s];
                let mut reward_s = Vec::with_capacity(n);
                let mut trans_s = Vec::with_capacity(n);
                for a in 0..n {
                    reward_s.push(checked_individual_reward(env, s, a, nu_t, t)?);
                    if t < horizon {
                        trans_s.push(checked_transition(env, s, a, &mu_t)?);
                    }
                }
                reward_t.push(reward_s);
                trans_t.push(trans_s);
            }
            rewards.push(reward_t);
            if t < horizon {
                transitions.push(trans_t);
            }
        }

        Self::new(layout.n_actions(), horizon, env.gamma(), rewards, transitions)
    }

    /// Check every table against the layout and horizon.
    pub fn validate(&self) -> Result<()> {
        let n_states = self.layout.n_states();
        let n_actions = self.layout.n_actions();

        if self.rewards.len() != self.horizon + 1 {
            return Err(MfgError::shape("reward time steps", self.horizon + 1, self.rewards.len()));
        }
        for reward_t in &self.rewards {
            if reward_t.len() != n_states {
                return Err(MfgError::shape("reward states", n_states, reward_t.len()));
            }
            for (s, reward_s) in reward_t.iter().enumerate() {
                if reward_s.len() != n_actions[s] {
                    return Err(MfgError::shape(
                        format!("reward actions at state {}", s),
                        n_actions[s],
                        reward_s.len(),
                    ));
                }
            }
        }

        if self.transitions.len() != self.horizon {
            return Err(MfgError::shape(
                "transition time steps",
                self.horizon,
                self.transitions.len(),
            ));
        }
        for trans_t in &self.transitions {
            if trans_t.len() != n_states {
                return Err(MfgError::shape("transition states", n_states, trans_t.len()));
            }
            for (s, trans_s) in trans_t.iter().enumerate() {
                if trans_s.len() != n_actions[s] {
                    return Err(MfgError::shape(
                        format!("transition actions at state {}", s),
                        n_actions[s],
                        trans_s.len(),
                    ));
                }
                for (a, row) in trans_s.iter().enumerate() {
                    if row.len() != n_states {
                        return Err(MfgError::TransitionLength {
                            state: s,
                            action: a,
                            got: row.len(),
                            expected: n_states,
                        });
                    }
                    let sum: f64 = row.iter().sum();
                    if row.iter().any(|&p| p < 0.0) || (sum - 1.0).abs() > TRANSITION_TOLERANCE {
                        return Err(MfgError::MalformedTransition {
                            state: s,
                            action: a,
                            sum,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// State-action layout of the model.
    pub fn layout(&self) -> &ActionLayout {
        &self.layout
    }

    /// Number of states.
    pub fn n_states(&self) -> usize {
        self.layout.n_states()
    }

    /// Per-state action counts.
    pub fn n_actions(&self) -> &[usize] {
        self.layout.n_actions()
    }

    /// Terminal time `Tf`.
    pub fn horizon(&self) -> usize {
        self.horizon
    }

    /// Discount factor.
    pub fn gamma(&self) -> f64 {
        self.gamma
    }

    /// Full reward table.
    pub fn rewards(&self) -> &RewardTable {
        &self.rewards
    }

    /// Full transition table.
    pub fn transitions(&self) -> &TransitionTable {
        &self.transitions
    }

    /// Rewards of every action at `(t, s)`.
    pub fn rewards_at(&self, t: usize, s: usize) -> Result<&[f64]> {
        if t > self.horizon {
            return Err(MfgError::TimeOutOfRange {
                t,
                horizon: self.horizon,
            });
        }
        self.rewards[t]
            .get(s)
            .map(|r| r.as_slice())
            .ok_or(MfgError::InvalidAction {
                state: s,
                action: 0,
                available: 0,
            })
    }

    /// Next-state distribution from `s` under `a` at `t < Tf`.
    pub fn transition_row(&self, t: usize, s: usize, a: usize) -> Result<&[f64]> {
        if t >= self.horizon {
            return Err(MfgError::TimeOutOfRange {
                t,
                horizon: self.horizon,
            });
        }
        let available = self.n_actions().get(s).copied().unwrap_or(0);
        if a >= available {
            return Err(MfgError::InvalidAction {
                state: s,
                action: a,
                available,
            });
        }
        Ok(&self.transitions[t][s][a])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::games::stay_or_move::{StayOrMove, MOVE, STAY};

    #[test]
    fn test_from_flow_shapes() {
        let game = StayOrMove::new(2, [1.0, 0.0], [0.0, 1.0]).with_congestion(0.5);
        let nu = vec![vec![0.5, 0.5, 0.0, 0.0], vec![0.25, 0.25, 0.25, 0.25], vec![0.0, 0.0, 1.0, 0.0]];
        let model = InducedModel::from_flow(&game, &nu).unwrap();

        assert_eq!(model.horizon(), 2);
        assert_eq!(model.rewards().len(), 3);
        assert_eq!(model.transitions().len(), 2);
        assert_eq!(model.transition_row(0, 0, MOVE).unwrap(), &[0.0, 1.0]);

        // Everyone sits in state 1 at the end: reward 1 - 0.5 * 1
        let terminal = model.rewards_at(2, 1).unwrap();
        assert!((terminal[STAY] - 0.5).abs() < 1e-12);
        assert_eq!(model.rewards_at(0, 1).unwrap(), &[0.0, 0.0]);
    }

    #[test]
    fn test_from_flow_rejects_wrong_length() {
        let game = StayOrMove::new(2, [1.0, 0.0], [0.0, 1.0]);
        let nu = vec![vec![0.25; 4]; 2];
        assert!(matches!(
            InducedModel::from_flow(&game, &nu),
            Err(MfgError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_new_rejects_malformed_rows() {
        let rewards = vec![vec![vec![0.0]], vec![vec![1.0]]];
        let transitions = vec![vec![vec![vec![0.9]]]];
        let err = InducedModel::new(&[1], 1, 1.0, rewards, transitions).unwrap_err();
        assert!(matches!(err, MfgError::MalformedTransition { .. }));
    }

    #[test]
    fn test_transition_row_bounds() {
        let rewards = vec![vec![vec![0.0, 0.0]], vec![vec![1.0, 2.0]]];
        let transitions = vec![vec![vec![vec![1.0], vec![1.0]]]];
        let model = InducedModel::new(&[2], 1, 1.0, rewards, transitions).unwrap();
        assert!(model.transition_row(0, 0, 1).is_ok());
        assert!(matches!(
            model.transition_row(0, 0, 2),
            Err(MfgError::InvalidAction { .. })
        ));
        assert!(matches!(
            model.transition_row(1, 0, 0),
            Err(MfgError::TimeOutOfRange { .. })
        ));
        assert!(matches!(
            model.rewards_at(2, 0),
            Err(MfgError::TimeOutOfRange { .. })
        ));
    }
}
