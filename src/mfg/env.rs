//! Mean-field environment trait and the state-action layout.
//!
//! Any game that implements `MeanFieldEnv` can be handed to the equilibrium
//! solver and the deviation benchmark. This is the only extension point: new
//! games are added by implementing the trait, never by touching the solvers.

use serde::{Deserialize, Serialize};

use crate::mfg::error::{MfgError, Result};

/// Tolerance used when checking that transition rows sum to one.
pub const TRANSITION_TOLERANCE: f64 = 1e-5;

/// Tolerance used when checking that priors and initial distributions sum to one.
pub const DISTRIBUTION_TOLERANCE: f64 = 1e-6;

/// Action probabilities for every state at one time step: `[s][a]`.
pub type PolicyStep = Vec<Vec<f64>>;

/// A policy over the whole horizon: `[t][s][a]`.
pub type PolicyFlow = Vec<PolicyStep>;

/// A value function over the whole horizon: `[t][s]`.
pub type ValueFlow = Vec<Vec<f64>>;

/// The interface every mean-field game implements.
///
/// # Example
/// ```ignore
/// struct MyGame { /* ... */ }
///
/// impl MeanFieldEnv for MyGame {
///     fn n_states(&self) -> usize { 3 }
///     fn n_actions(&self) -> &[usize] { &self.n_actions }
///     fn horizon(&self) -> usize { 4 }
///     fn mu0(&self) -> &[f64] { &self.mu0 }
///     fn transition(&self, s: usize, a: usize, mu: &[f64]) -> Vec<f64> { /* ... */ }
///     fn pairwise_reward(&self, s: usize, a: usize, s_prime: usize, t: usize) -> f64 { /* ... */ }
/// }
/// ```
pub trait MeanFieldEnv {
    /// Number of states.
    fn n_states(&self) -> usize;

    /// Number of valid actions at each state.
    fn n_actions(&self) -> &[usize];

    /// Terminal time `Tf`. Time indices run over `0..=Tf`.
    fn horizon(&self) -> usize;

    /// Discount factor. Finite-horizon games are undiscounted by default.
    fn gamma(&self) -> f64 {
        1.0
    }

    /// Initial population distribution.
    fn mu0(&self) -> &[f64];

    /// Next-state distribution from `s` under action `a` when the population
    /// is distributed as `mu`.
    ///
    /// Games with population-independent dynamics may ignore `mu`. Only called
    /// with `a < n_actions()[s]`; the solvers go through [`checked_transition`].
    fn transition(&self, s: usize, a: usize, mu: &[f64]) -> Vec<f64>;

    /// Reward contribution from interacting with one other agent in `s_prime`.
    fn pairwise_reward(&self, s: usize, a: usize, s_prime: usize, t: usize) -> f64;

    /// Scalar shaping applied to the aggregated pairwise reward.
    fn theta(&self, x: f64, _t: usize) -> f64 {
        x
    }

    /// Reward to a single agent given the population state-action distribution.
    ///
    /// The default is the mean-field limit of the finite-population deviated
    /// reward: `theta(sum_s' pairwise_reward(s, a, s', t) * mu_t[s'], t)`.
    fn individual_reward(&self, s: usize, a: usize, nu_t: &[f64], t: usize) -> f64 {
        let mu_t = aggregate_nu(self.n_actions(), nu_t);
        let l: f64 = mu_t
            .iter()
            .enumerate()
            .map(|(s_prime, &mass)| self.pairwise_reward(s, a, s_prime, t) * mass)
            .sum();
        self.theta(l, t)
    }

    /// Whether rewards are zero everywhere except at `t = Tf`.
    ///
    /// Lets the deviation benchmark skip empirical distributions at
    /// intermediate steps.
    fn terminal_reward_only(&self) -> bool {
        false
    }

    /// Entropy regularization toward a prior, if the game uses it.
    fn regularization(&self) -> Option<&EntropyRegularization> {
        None
    }
}

/// Prior and inverse temperature for entropy-regularized best responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntropyRegularization {
    /// Reference action distribution: `[t][s][a]`.
    pub prior: PolicyFlow,
    /// Inverse temperature. Large values approach the greedy policy.
    pub beta: f64,
}

impl EntropyRegularization {
    /// Create a regularization from a prior flow and inverse temperature.
    pub fn new(prior: PolicyFlow, beta: f64) -> Self {
        Self { prior, beta }
    }

    /// Uniform prior over the valid actions of every state.
    pub fn uniform(n_actions: &[usize], horizon: usize, beta: f64) -> Self {
        let step: PolicyStep = n_actions
            .iter()
            .map(|&n| vec![1.0 / n.max(1) as f64; n])
            .collect();
        Self {
            prior: vec![step; horizon + 1],
            beta,
        }
    }

    /// Prior at time `t` and state `s`.
    pub fn prior_at(&self, t: usize, s: usize) -> &[f64] {
        &self.prior[t][s]
    }

    /// Validate against the shape of a game.
    pub fn validate(&self, n_actions: &[usize], horizon: usize) -> Result<()> {
        if !(self.beta > 0.0) || !self.beta.is_finite() {
            return Err(MfgError::InvalidParameter {
                name: "beta",
                value: self.beta,
                message: "inverse temperature must be positive and finite".to_string(),
            });
        }
        if self.prior.len() != horizon + 1 {
            return Err(MfgError::shape("prior time steps", horizon + 1, self.prior.len()));
        }
        for (t, step) in self.prior.iter().enumerate() {
            if step.len() != n_actions.len() {
                return Err(MfgError::shape("prior states", n_actions.len(), step.len()));
            }
            for (s, row) in step.iter().enumerate() {
                if row.len() != n_actions[s] {
                    return Err(MfgError::InvalidPrior {
                        t,
                        state: s,
                        message: format!("{} entries for {} actions", row.len(), n_actions[s]),
                    });
                }
                if row.iter().any(|&p| !(p > 0.0)) {
                    return Err(MfgError::InvalidPrior {
                        t,
                        state: s,
                        message: "entries must be strictly positive".to_string(),
                    });
                }
                let sum: f64 = row.iter().sum();
                if (sum - 1.0).abs() > DISTRIBUTION_TOLERANCE {
                    return Err(MfgError::InvalidPrior {
                        t,
                        state: s,
                        message: format!("entries sum to {}", sum),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Layout of the flattened state-action vector `nu`.
///
/// `nu` is the concatenation, state by state, of that state's action masses,
/// so state `s` occupies `offset(s)..offset(s) + n_actions[s]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionLayout {
    n_actions: Vec<usize>,
    offsets: Vec<usize>,
    dim_nu: usize,
}

impl ActionLayout {
    /// Build a layout, rejecting empty state spaces and states without actions.
    pub fn new(n_actions: &[usize]) -> Result<Self> {
        if n_actions.is_empty() {
            return Err(MfgError::shape("state space", 1, 0));
        }
        let mut offsets = Vec::with_capacity(n_actions.len());
        let mut pointer = 0;
        for (s, &n) in n_actions.iter().enumerate() {
            if n == 0 {
                return Err(MfgError::NoActions { state: s });
            }
            offsets.push(pointer);
            pointer += n;
        }
        Ok(Self {
            n_actions: n_actions.to_vec(),
            offsets,
            dim_nu: pointer,
        })
    }

    /// Layout for an environment.
    pub fn of<E: MeanFieldEnv + ?Sized>(env: &E) -> Result<Self> {
        if env.n_actions().len() != env.n_states() {
            return Err(MfgError::shape("n_actions", env.n_states(), env.n_actions().len()));
        }
        Self::new(env.n_actions())
    }

    /// Number of states.
    pub fn n_states(&self) -> usize {
        self.n_actions.len()
    }

    /// Per-state action counts.
    pub fn n_actions(&self) -> &[usize] {
        &self.n_actions
    }

    /// Largest action count over all states.
    pub fn max_actions(&self) -> usize {
        self.n_actions.iter().copied().max().unwrap_or(0)
    }

    /// Length of a state-action vector.
    pub fn dim_nu(&self) -> usize {
        self.dim_nu
    }

    /// Index of `(s, 0)` in a state-action vector.
    pub fn offset(&self, s: usize) -> usize {
        self.offsets[s]
    }

    /// Expand state mass into state-action mass: `nu[(s, a)] = mu[s] * pi[s][a]`.
    pub fn mu2nu(&self, mu_t: &[f64], pi_t: &[Vec<f64>]) -> Result<Vec<f64>> {
        self.check_state_vector("mu", mu_t)?;
        self.check_policy_step(pi_t)?;
        let mut nu_t = Vec::with_capacity(self.dim_nu);
        for (s, row) in pi_t.iter().enumerate() {
            nu_t.extend(row.iter().map(|&p| mu_t[s] * p));
        }
        debug_assert_eq!(nu_t.len(), self.dim_nu);
        Ok(nu_t)
    }

    /// Aggregate state-action mass back to state mass.
    pub fn nu2mu(&self, nu_t: &[f64]) -> Result<Vec<f64>> {
        if nu_t.len() != self.dim_nu {
            return Err(MfgError::shape("nu", self.dim_nu, nu_t.len()));
        }
        Ok(aggregate_nu(&self.n_actions, nu_t))
    }

    /// Check that a policy step has one row per state with the right width.
    pub fn check_policy_step(&self, pi_t: &[Vec<f64>]) -> Result<()> {
        if pi_t.len() != self.n_states() {
            return Err(MfgError::shape("policy states", self.n_states(), pi_t.len()));
        }
        for (s, row) in pi_t.iter().enumerate() {
            if row.len() != self.n_actions[s] {
                return Err(MfgError::shape(
                    format!("policy actions at state {}", s),
                    self.n_actions[s],
                    row.len(),
                ));
            }
        }
        Ok(())
    }

    /// Check that a policy flow covers `horizon + 1` steps of the right shape.
    pub fn check_policy_flow(&self, policy: &[PolicyStep], horizon: usize) -> Result<()> {
        if policy.len() != horizon + 1 {
            return Err(MfgError::shape("policy time steps", horizon + 1, policy.len()));
        }
        policy.iter().try_for_each(|pi_t| self.check_policy_step(pi_t))
    }

    fn check_state_vector(&self, what: &str, v: &[f64]) -> Result<()> {
        if v.len() != self.n_states() {
            return Err(MfgError::shape(what, self.n_states(), v.len()));
        }
        Ok(())
    }
}

fn aggregate_nu(n_actions: &[usize], nu_t: &[f64]) -> Vec<f64> {
    let mut mu = vec![0.0; n_actions.len()];
    let mut pointer = 0;
    for (s, &n) in n_actions.iter().enumerate() {
        for _ in 0..n {
            mu[s] += nu_t.get(pointer).copied().unwrap_or(0.0);
            pointer += 1;
        }
    }
    mu
}

/// Check that `p` is a probability vector of length `n`.
pub fn validate_distribution(p: &[f64], n: usize, what: &str) -> Result<()> {
    if p.len() != n {
        return Err(MfgError::shape(what, n, p.len()));
    }
    if p.iter().any(|&x| x < 0.0 || !x.is_finite()) {
        return Err(MfgError::InvalidDistribution {
            message: format!("{} has negative or non-finite entries", what),
        });
    }
    let sum: f64 = p.iter().sum();
    if (sum - 1.0).abs() > DISTRIBUTION_TOLERANCE {
        return Err(MfgError::InvalidDistribution {
            message: format!("{} sums to {}", what, sum),
        });
    }
    Ok(())
}

pub(crate) fn check_action<E: MeanFieldEnv + ?Sized>(env: &E, s: usize, a: usize) -> Result<()> {
    let available = env.n_actions().get(s).copied().unwrap_or(0);
    if s >= env.n_states() || a >= available {
        return Err(MfgError::InvalidAction {
            state: s,
            action: a,
            available,
        });
    }
    Ok(())
}

fn check_time<E: MeanFieldEnv + ?Sized>(env: &E, t: usize) -> Result<()> {
    if t > env.horizon() {
        return Err(MfgError::TimeOutOfRange {
            t,
            horizon: env.horizon(),
        });
    }
    Ok(())
}

/// Evaluate the transition kernel and verify it is a probability vector.
///
/// Fails loudly on invalid actions and malformed rows; never renormalizes.
pub fn checked_transition<E: MeanFieldEnv + ?Sized>(
    env: &E,
    s: usize,
    a: usize,
    mu: &[f64],
) -> Result<Vec<f64>> {
    check_action(env, s, a)?;
    let row = env.transition(s, a, mu);
    if row.len() != env.n_states() {
        return Err(MfgError::TransitionLength {
            state: s,
            action: a,
            got: row.len(),
            expected: env.n_states(),
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
    Ok(row)
}

/// Evaluate `individual_reward` after checking indices and the time step.
pub fn checked_individual_reward<E: MeanFieldEnv + ?Sized>(
    env: &E,
    s: usize,
    a: usize,
    nu_t: &[f64],
    t: usize,
) -> Result<f64> {
    check_time(env, t)?;
    check_action(env, s, a)?;
    Ok(env.individual_reward(s, a, nu_t, t))
}

/// Evaluate `pairwise_reward` after checking indices and the time step.
pub fn checked_pairwise_reward<E: MeanFieldEnv + ?Sized>(
    env: &E,
    s: usize,
    a: usize,
    s_prime: usize,
    t: usize,
) -> Result<f64> {
    check_time(env, t)?;
    check_action(env, s, a)?;
    if s_prime >= env.n_states() {
        return Err(MfgError::InvalidAction {
            state: s_prime,
            action: 0,
            available: 0,
        });
    }
    Ok(env.pairwise_reward(s, a, s_prime, t))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::games::stay_or_move::StayOrMove;

    #[test]
    fn test_layout_offsets() {
        let layout = ActionLayout::new(&[3, 2, 1]).unwrap();
        assert_eq!(layout.dim_nu(), 6);
        assert_eq!(layout.offset(0), 0);
        assert_eq!(layout.offset(1), 3);
        assert_eq!(layout.offset(2), 5);
        assert_eq!(layout.max_actions(), 3);
    }

    #[test]
    fn test_layout_rejects_state_without_actions() {
        let err = ActionLayout::new(&[2, 0, 1]).unwrap_err();
        assert!(matches!(err, MfgError::NoActions { state: 1 }));
    }

    #[test]
    fn test_nu_mu_round_trip() {
        let layout = ActionLayout::new(&[3, 2, 1]).unwrap();
        let mu = vec![0.2, 0.5, 0.3];
        let pi = vec![vec![0.1, 0.6, 0.3], vec![0.5, 0.5], vec![1.0]];

        let nu = layout.mu2nu(&mu, &pi).unwrap();
        let total: f64 = nu.iter().sum();
        assert!((total - 1.0).abs() < 1e-12);

        let back = layout.nu2mu(&nu).unwrap();
        for (x, y) in back.iter().zip(mu.iter()) {
            assert!((x - y).abs() < 1e-12);
        }
    }

    #[test]
    fn test_mu2nu_rejects_wrong_policy_width() {
        let layout = ActionLayout::new(&[2, 2]).unwrap();
        let err = layout
            .mu2nu(&[0.5, 0.5], &[vec![1.0], vec![0.5, 0.5]])
            .unwrap_err();
        assert!(matches!(err, MfgError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_checked_transition_rejects_invalid_action() {
        let game = StayOrMove::new(1, [0.5, 0.5], [0.0, 1.0]);
        let err = checked_transition(&game, 0, 2, &[0.5, 0.5]).unwrap_err();
        assert!(matches!(
            err,
            MfgError::InvalidAction {
                state: 0,
                action: 2,
                available: 2
            }
        ));
    }

    #[test]
    fn test_checked_reward_rejects_time_past_horizon() {
        let game = StayOrMove::new(1, [0.5, 0.5], [0.0, 1.0]);
        let nu = vec![0.25; 4];
        let err = checked_individual_reward(&game, 0, 0, &nu, 2).unwrap_err();
        assert!(matches!(err, MfgError::TimeOutOfRange { t: 2, horizon: 1 }));

        let err = checked_pairwise_reward(&game, 0, 0, 1, 5).unwrap_err();
        assert!(matches!(err, MfgError::TimeOutOfRange { t: 5, horizon: 1 }));
    }

    #[test]
    fn test_malformed_transition_is_not_renormalized() {
        struct Leaky;
        impl MeanFieldEnv for Leaky {
            fn n_states(&self) -> usize {
                2
            }
            fn n_actions(&self) -> &[usize] {
                &[1, 1]
            }
            fn horizon(&self) -> usize {
                1
            }
            fn mu0(&self) -> &[f64] {
                &[1.0, 0.0]
            }
            fn transition(&self, _s: usize, _a: usize, _mu: &[f64]) -> Vec<f64> {
                vec![0.4, 0.4]
            }
            fn pairwise_reward(&self, _s: usize, _a: usize, _sp: usize, _t: usize) -> f64 {
                0.0
            }
        }

        let err = checked_transition(&Leaky, 0, 0, &[1.0, 0.0]).unwrap_err();
        match err {
            MfgError::MalformedTransition { sum, .. } => assert!((sum - 0.8).abs() < 1e-12),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_default_individual_reward_uses_population() {
        let game = StayOrMove::new(1, [0.5, 0.5], [0.0, 1.0]).with_congestion(0.5);
        // nu: state 0 holds 0.75, state 1 holds 0.25
        let nu = vec![0.5, 0.25, 0.0, 0.25];
        let r = game.individual_reward(1, 0, &nu, 1);
        assert!((r - game.terminal_reward(1, &[0.75, 0.25])).abs() < 1e-12);
        assert!((r - (1.0 - 0.5 * 0.25)).abs() < 1e-12);
        assert_eq!(game.individual_reward(1, 0, &nu, 0), 0.0);
    }

    #[test]
    fn test_regularization_validation() {
        let n_actions = [2, 3];
        let ok = EntropyRegularization::uniform(&n_actions, 2, 1.5);
        assert!(ok.validate(&n_actions, 2).is_ok());

        let short = EntropyRegularization::uniform(&n_actions, 1, 1.5);
        assert!(short.validate(&n_actions, 2).is_err());

        let cold = EntropyRegularization::uniform(&n_actions, 2, 0.0);
        assert!(matches!(
            cold.validate(&n_actions, 2),
            Err(MfgError::InvalidParameter { name: "beta", .. })
        ));

        let mut zero = EntropyRegularization::uniform(&n_actions, 2, 1.0);
        zero.prior[1][1] = vec![0.0, 0.5, 0.5];
        assert!(matches!(
            zero.validate(&n_actions, 2),
            Err(MfgError::InvalidPrior { t: 1, state: 1, .. })
        ));
    }
}
