//! Forward propagation of the population under a fixed policy.
//!
//! Starting from `mu_0`, each step expands state mass into state-action mass
//! with the policy, builds the controlled transition matrix
//!
//! ```text
//! T_c[s][s'] = sum_a T(s, a, mu_t)[s'] * pi_t[s][a]
//! ```
//!
//! and pushes the distribution forward with `mu_{t+1} = mu_t * T_c`. A
//! horizon `Tf` gives `Tf + 1` snapshots and `Tf` transitions.

use serde::{Deserialize, Serialize};

use crate::mfg::env::{
    checked_transition, validate_distribution, ActionLayout, MeanFieldEnv, PolicyStep,
    TRANSITION_TOLERANCE,
};
use crate::mfg::error::{MfgError, Result};

/// One snapshot of the population flow.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowStep {
    /// Time index.
    pub t: usize,
    /// State distribution `mu_t`.
    pub mu: Vec<f64>,
    /// State-action distribution `nu_t`.
    pub nu: Vec<f64>,
}

/// A complete population flow over `0..=Tf`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeanFieldFlow {
    /// State distributions `[t][s]`.
    pub mu: Vec<Vec<f64>>,
    /// State-action distributions `[t][offset(s) + a]`.
    pub nu: Vec<Vec<f64>>,
}

impl FromIterator<FlowStep> for MeanFieldFlow {
    fn from_iter<I: IntoIterator<Item = FlowStep>>(iter: I) -> Self {
        let mut flow = MeanFieldFlow::default();
        for step in iter {
            flow.mu.push(step.mu);
            flow.nu.push(step.nu);
        }
        flow
    }
}

/// Summed L1 distance between two flows of the same shape.
pub fn flow_l1(a: &[Vec<f64>], b: &[Vec<f64>]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| x.iter().zip(y).map(|(p, q)| (p - q).abs()).sum::<f64>())
        .sum()
}

/// Forward simulator of the population state distribution.
#[derive(Debug)]
pub struct MeanFieldPropagator<'a, E: MeanFieldEnv + ?Sized> {
    env: &'a E,
    layout: ActionLayout,
}

impl<'a, E: MeanFieldEnv + ?Sized> MeanFieldPropagator<'a, E> {
    /// Create a propagator, validating the action layout and `mu_0`.
    pub fn new(env: &'a E) -> Result<Self> {
        let layout = ActionLayout::of(env)?;
        validate_distribution(env.mu0(), env.n_states(), "mu0")?;
        Ok(Self { env, layout })
    }

    /// State-action layout of the environment.
    pub fn layout(&self) -> &ActionLayout {
        &self.layout
    }

    /// Controlled transition matrix at time `t` under `pi_t` and `mu_t`.
    ///
    /// Every row must sum to one within `1e-5`; a violation means the
    /// transitions or the policy are malformed and is reported, not repaired.
    pub fn controlled_transition(
        &self,
        t: usize,
        pi_t: &[Vec<f64>],
        mu_t: &[f64],
    ) -> Result<Vec<Vec<f64>>> {
        self.layout.check_policy_step(pi_t)?;
        let n_states = self.layout.n_states();
        let mut t_c = vec![vec![0.0; n_states]; n_states];

        for (s, row) in t_c.iter_mut().enumerate() {
            for (a, &p) in pi_t[s].iter().enumerate() {
                let next = checked_transition(self.env, s, a, mu_t)?;
                for (cell, q) in row.iter_mut().zip(next) {
                    *cell += q * p;
                }
            }
            let sum: f64 = row.iter().sum();
            if (sum - 1.0).abs() >= TRANSITION_TOLERANCE {
                return Err(MfgError::NonStochasticControl { t, state: s, sum });
            }
        }
        Ok(t_c)
    }

    /// Lazily propagate `policy` from `mu_0`.
    ///
    /// Each call starts over from `mu_0`; nothing carries over between calls.
    pub fn propagate<'p>(&'p self, policy: &'p [PolicyStep]) -> Result<Propagation<'p, 'a, E>> {
        self.layout.check_policy_flow(policy, self.env.horizon())?;
        Ok(Propagation {
            propagator: self,
            policy,
            t: 0,
            mu: Some(self.env.mu0().to_vec()),
        })
    }

    /// Propagate `policy` and collect the whole flow.
    pub fn flow(&self, policy: &[PolicyStep]) -> Result<MeanFieldFlow> {
        self.propagate(policy)?.collect()
    }
}

/// Iterator over the `Tf + 1` snapshots of a propagation.
///
/// Stops after the first error.
#[derive(Debug)]
pub struct Propagation<'p, 'a, E: MeanFieldEnv + ?Sized> {
    propagator: &'p MeanFieldPropagator<'a, E>,
    policy: &'p [PolicyStep],
    t: usize,
    mu: Option<Vec<f64>>,
}

impl<E: MeanFieldEnv + ?Sized> Propagation<'_, '_, E> {
    fn step(&mut self, mu_t: Vec<f64>) -> Result<FlowStep> {
        let t = self.t;
        let pi_t = &self.policy[t];
        let nu_t = self.propagator.layout.mu2nu(&mu_t, pi_t)?;

        if t < self.propagator.env.horizon() {
            let t_c = self.propagator.controlled_transition(t, pi_t, &mu_t)?;
            let mut next = vec![0.0; mu_t.len()];
            for (s, &mass) in mu_t.iter().enumerate() {
                for (cell, &q) in next.iter_mut().zip(&t_c[s]) {
                    *cell += mass * q;
                }
            }
            self.mu = Some(next);
        }
        self.t += 1;

        Ok(FlowStep {
            t,
            mu: mu_t,
            nu: nu_t,
        })
    }
}

impl<E: MeanFieldEnv + ?Sized> Iterator for Propagation<'_, '_, E> {
    type Item = Result<FlowStep>;

    fn next(&mut self) -> Option<Self::Item> {
        let mu_t = self.mu.take()?;
        Some(self.step(mu_t))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.mu.is_none() {
            return (0, Some(0));
        }
        let remaining = self.propagator.env.horizon() + 1 - self.t;
        (0, Some(remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::games::blotto::BlottoGame;
    use crate::games::stay_or_move::StayOrMove;

    fn uniform_policy(n_actions: &[usize], horizon: usize) -> Vec<PolicyStep> {
        let step: PolicyStep = n_actions.iter().map(|&n| vec![1.0 / n as f64; n]).collect();
        vec![step; horizon + 1]
    }

    #[test]
    fn test_flow_length_and_mass() {
        let game = BlottoGame::default();
        let policy = uniform_policy(game.n_actions(), game.horizon());
        let propagator = MeanFieldPropagator::new(&game).unwrap();

        let flow = propagator.flow(&policy).unwrap();
        assert_eq!(flow.mu.len(), game.horizon() + 1);
        assert_eq!(flow.nu.len(), game.horizon() + 1);

        for (mu_t, nu_t) in flow.mu.iter().zip(&flow.nu) {
            let mass: f64 = mu_t.iter().sum();
            assert!((mass - 1.0).abs() < 1e-9);
            let back = propagator.layout().nu2mu(nu_t).unwrap();
            for (x, y) in back.iter().zip(mu_t) {
                assert!((x - y).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_controlled_transition_rows_are_stochastic() {
        let game = BlottoGame::default();
        let policy = uniform_policy(game.n_actions(), game.horizon());
        let propagator = MeanFieldPropagator::new(&game).unwrap();
        let flow = propagator.flow(&policy).unwrap();

        for t in 0..game.horizon() {
            let t_c = propagator
                .controlled_transition(t, &policy[t], &flow.mu[t])
                .unwrap();
            for row in &t_c {
                let sum: f64 = row.iter().sum();
                assert!((sum - 1.0).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_propagation_is_restartable() {
        let game = StayOrMove::new(3, [0.6, 0.4], [0.0, 1.0]);
        let policy = vec![vec![vec![0.5, 0.5], vec![1.0, 0.0]]; 4];
        let propagator = MeanFieldPropagator::new(&game).unwrap();

        let first: Vec<FlowStep> = propagator
            .propagate(&policy)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        let second: Vec<FlowStep> = propagator
            .propagate(&policy)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(first.len(), 4);
        assert_eq!(first, second);
        assert_eq!(first[0].mu, vec![0.6, 0.4]);
        assert!((first[1].mu[0] - 0.3).abs() < 1e-12);
        assert!((first[3].mu[0] - 0.075).abs() < 1e-12);
    }

    #[test]
    fn test_horizon_zero_has_one_snapshot() {
        let game = StayOrMove::new(0, [0.5, 0.5], [0.0, 1.0]);
        let policy = vec![vec![vec![1.0, 0.0], vec![0.0, 1.0]]];
        let propagator = MeanFieldPropagator::new(&game).unwrap();
        let flow = propagator.flow(&policy).unwrap();
        assert_eq!(flow.mu, vec![vec![0.5, 0.5]]);
        assert_eq!(flow.nu, vec![vec![0.5, 0.0, 0.0, 0.5]]);
    }

    #[test]
    fn test_unnormalized_policy_is_rejected() {
        let game = StayOrMove::new(1, [0.5, 0.5], [0.0, 1.0]);
        let policy = vec![vec![vec![0.5, 0.4], vec![1.0, 0.0]]; 2];
        let propagator = MeanFieldPropagator::new(&game).unwrap();

        let steps: Vec<Result<FlowStep>> = propagator.propagate(&policy).unwrap().collect();
        assert_eq!(steps.len(), 1);
        assert!(matches!(
            steps[0],
            Err(MfgError::NonStochasticControl { t: 0, state: 0, .. })
        ));
    }

    #[test]
    fn test_invalid_mu0_is_rejected() {
        let game = StayOrMove::new(1, [0.5, 0.6], [0.0, 1.0]);
        assert!(matches!(
            MeanFieldPropagator::new(&game),
            Err(MfgError::InvalidDistribution { .. })
        ));
    }

    #[test]
    fn test_flow_l1() {
        let a = vec![vec![1.0, 0.0], vec![0.5, 0.5]];
        let b = vec![vec![0.0, 1.0], vec![0.5, 0.5]];
        assert_eq!(flow_l1(&a, &b), 2.0);
        assert_eq!(flow_l1(&a, &a), 0.0);
    }
}
