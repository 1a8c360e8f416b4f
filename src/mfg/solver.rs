//! Fixed-point iteration between best response and propagation.
//!
//! Each round propagates the current policy to obtain a population flow,
//! freezes that flow into an [`InducedModel`], solves it for a best response,
//! and then either replaces the current iterate or blends toward the new one.
//! The loop stops when the flow stops moving or the iteration budget runs out.

use std::time::Instant;

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::mfg::best_response::BestResponseSolver;
use crate::mfg::config::{IterationDiagnostics, SolveStats, SolverConfig};
use crate::mfg::env::{ActionLayout, MeanFieldEnv, PolicyFlow, ValueFlow};
use crate::mfg::error::Result;
use crate::mfg::model::InducedModel;
use crate::mfg::propagation::{flow_l1, MeanFieldPropagator};
use crate::mfg::solution::EquilibriumSolution;

/// One iterate of the fixed-point loop.
///
/// Every iterate owns its storage; blending builds a new one.
#[derive(Debug, Clone, PartialEq)]
pub struct Iterate {
    /// Policy `[t][s][a]`.
    pub policy: PolicyFlow,
    /// Value flow, absent until the first best response.
    pub value: Option<ValueFlow>,
    /// State flow `[t][s]`, absent until the first propagation.
    pub mu: Option<Vec<Vec<f64>>>,
    /// State-action flow `[t][i]`, absent until the first propagation.
    pub nu: Option<Vec<Vec<f64>>>,
}

/// Soft update `x <- (1 - eta) * old + eta * new` over a whole iterate.
///
/// Policies are blended per `(t, s)`, so blended rows stay distributions.
/// An absent old value or flow adopts the new one, so flows never mix with
/// missing mass.
pub fn blend(old: &Iterate, new: &Iterate, eta: f64) -> Iterate {
    let mix = |x: &[f64], y: &[f64]| -> Vec<f64> {
        x.iter()
            .zip(y)
            .map(|(&a, &b)| (1.0 - eta) * a + eta * b)
            .collect()
    };
    let mix_flow = |x: &[Vec<f64>], y: &[Vec<f64>]| -> Vec<Vec<f64>> {
        x.iter().zip(y).map(|(a, b)| mix(a, b)).collect()
    };

    let mix_optional = |x: &Option<Vec<Vec<f64>>>, y: &Option<Vec<Vec<f64>>>| match (x, y) {
        (Some(x), Some(y)) => Some(mix_flow(x, y)),
        (None, y) => y.clone(),
        (x, None) => x.clone(),
    };

    Iterate {
        policy: old
            .policy
            .iter()
            .zip(&new.policy)
            .map(|(pi_old, pi_new)| mix_flow(pi_old, pi_new))
            .collect(),
        value: mix_optional(&old.value, &new.value),
        mu: mix_optional(&old.mu, &new.mu),
        nu: mix_optional(&old.nu, &new.nu),
    }
}

/// Random initial policy: i.i.d. uniform weights per action, normalized.
pub fn random_policy<R: Rng>(layout: &ActionLayout, horizon: usize, rng: &mut R) -> PolicyFlow {
    (0..=horizon)
        .map(|_| {
            layout
                .n_actions()
                .iter()
                .map(|&n| {
                    let weights: Vec<f64> = (0..n).map(|_| rng.gen::<f64>()).collect();
                    let total: f64 = weights.iter().sum();
                    if total > 0.0 {
                        weights.iter().map(|&w| w / total).collect()
                    } else {
                        vec![1.0 / n as f64; n]
                    }
                })
                .collect()
        })
        .collect()
}

/// The equilibrium solver.
///
/// # Example
/// ```ignore
/// use mean_field_solver::games::blotto::BlottoGame;
/// use mean_field_solver::mfg::{EquilibriumSolver, SolverConfig};
///
/// let solver = EquilibriumSolver::new(BlottoGame::default(), SolverConfig::damped(0.2));
/// let solution = solver.solve()?;
/// println!("converged: {}", solution.stats.converged);
/// ```
#[derive(Debug, Clone)]
pub struct EquilibriumSolver<E: MeanFieldEnv> {
    env: E,
    config: SolverConfig,
}

impl<E: MeanFieldEnv> EquilibriumSolver<E> {
    /// Create a solver for `env`.
    pub fn new(env: E, config: SolverConfig) -> Self {
        Self { env, config }
    }

    /// The game being solved.
    pub fn env(&self) -> &E {
        &self.env
    }

    /// Solver configuration.
    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Run the fixed-point iteration.
    pub fn solve(&self) -> Result<EquilibriumSolution> {
        self.solve_with_callback(|_| {})
    }

    /// Run the fixed-point iteration, reporting each round to `callback`.
    ///
    /// Exhausting the iteration budget is not an error; the returned bundle
    /// has `stats.converged == false` and carries the last diagnostics.
    pub fn solve_with_callback<F>(&self, mut callback: F) -> Result<EquilibriumSolution>
    where
        F: FnMut(&IterationDiagnostics),
    {
        self.config.validate()?;
        let start_time = Instant::now();

        let horizon = self.env.horizon();
        let propagator = MeanFieldPropagator::new(&self.env)?;
        let layout = propagator.layout().clone();
        let regularization = self.env.regularization();

        if regularization.is_some() && self.config.damping.is_some() {
            warn!("damping is combined with entropy regularization; both smooth the iteration");
        }

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut current = Iterate {
            policy: random_policy(&layout, horizon, &mut rng),
            value: None,
            mu: None,
            nu: None,
        };
        // The first round's diagnostics are measured against empty flows.
        let zero_mu = vec![vec![0.0; layout.n_states()]; horizon + 1];
        let zero_nu = vec![vec![0.0; layout.dim_nu()]; horizon + 1];
        let mut induced_model = None;
        let mut stats = SolveStats::new();

        for iteration in 0..self.config.n_ittr {
            let flow = propagator.flow(&current.policy)?;
            let model = InducedModel::from_flow(&self.env, &flow.nu)?;
            let br = BestResponseSolver::new(&model, self.config.best_response.clone())
                .solve(regularization)?;

            let diagnostics = IterationDiagnostics {
                iteration,
                diff_nu: flow_l1(&flow.nu, current.nu.as_deref().unwrap_or(zero_nu.as_slice())),
                diff_mu: flow_l1(&flow.mu, current.mu.as_deref().unwrap_or(zero_mu.as_slice())),
                best_response_passes: br.passes,
            };
            info!("iteration {}: difference in mu is {:.6}", iteration, diagnostics.diff_mu);
            debug!(
                "iteration {}: difference in nu is {:.6}, {} backward passes",
                iteration, diagnostics.diff_nu, br.passes
            );

            let candidate = Iterate {
                policy: br.policy,
                value: Some(br.value),
                mu: Some(flow.mu),
                nu: Some(flow.nu),
            };
            current = match self.config.damping {
                Some(eta) => blend(&current, &candidate, eta),
                None => candidate,
            };
            induced_model = Some(model);

            stats.record(diagnostics);
            callback(&diagnostics);

            if diagnostics.diff_nu < self.config.eps || diagnostics.diff_mu < self.config.eps {
                stats.converged = true;
                break;
            }
        }

        stats.elapsed_seconds = start_time.elapsed().as_secs_f64();
        if stats.converged {
            info!(
                "converged after {} iterations in {:.3}s",
                stats.iterations, stats.elapsed_seconds
            );
        } else {
            warn!(
                "stopped after {} iterations without reaching eps = {}",
                stats.iterations, self.config.eps
            );
        }

        // Without a single round the bundle still carries the flow of its policy.
        let (mu, nu) = match (current.mu, current.nu) {
            (Some(mu), Some(nu)) => (mu, nu),
            _ => {
                let flow = propagator.flow(&current.policy)?;
                (flow.mu, flow.nu)
            }
        };

        Ok(EquilibriumSolution {
            policy: current.policy,
            value: current.value,
            mu,
            nu,
            induced_model,
            stats,
            config: self.config.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::games::blotto::BlottoGame;
    use crate::games::stay_or_move::{StayOrMove, MOVE};
    use crate::mfg::error::MfgError;

    fn assert_valid_policy(policy: &PolicyFlow) {
        for pi_t in policy {
            for row in pi_t {
                let sum: f64 = row.iter().sum();
                assert!((sum - 1.0).abs() < 1e-9, "row {:?} does not sum to 1", row);
                assert!(row.iter().all(|&p| p >= 0.0));
            }
        }
    }

    #[test]
    fn test_population_independent_game_converges() {
        let game = StayOrMove::new(1, [0.5, 0.5], [0.0, 1.0]);
        let solver = EquilibriumSolver::new(game, SolverConfig::default());
        let solution = solver.solve().unwrap();

        assert!(solution.stats.converged);
        assert!(solution.stats.iterations <= 3);
        assert_eq!(solution.policy[0][0][MOVE], 1.0);
        assert_eq!(solution.mu[1], vec![0.0, 1.0]);

        let value = solution.value.as_ref().unwrap();
        assert_eq!(value[0], vec![1.0, 1.0]);
        assert!(solution.induced_model.is_some());
    }

    #[test]
    fn test_diagnostics_are_non_negative() {
        let game = StayOrMove::new(2, [1.0, 0.0], [0.0, 1.0]).with_congestion(1.5);
        let config = SolverConfig::damped(0.3).with_iterations(25);
        let solution = EquilibriumSolver::new(game, config).solve().unwrap();

        assert!(!solution.stats.history.is_empty());
        for d in &solution.stats.history {
            assert!(d.diff_nu >= 0.0);
            assert!(d.diff_mu >= 0.0);
        }
        assert_valid_policy(&solution.policy);
        for mu_t in &solution.mu {
            let mass: f64 = mu_t.iter().sum();
            assert!((mass - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_same_seed_is_deterministic() {
        let config = SolverConfig::default().with_seed(11).with_iterations(4);
        let a = EquilibriumSolver::new(BlottoGame::default(), config.clone())
            .solve()
            .unwrap();
        let b = EquilibriumSolver::new(BlottoGame::default(), config)
            .solve()
            .unwrap();
        assert_eq!(a.policy, b.policy);
        assert_eq!(a.mu, b.mu);
        assert_eq!(a.stats.history, b.stats.history);
    }

    #[test]
    fn test_random_policy_depends_on_seed() {
        let layout = ActionLayout::new(&[3, 2]).unwrap();
        let a = random_policy(&layout, 2, &mut StdRng::seed_from_u64(1));
        let b = random_policy(&layout, 2, &mut StdRng::seed_from_u64(1));
        let c = random_policy(&layout, 2, &mut StdRng::seed_from_u64(2));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_valid_policy(&a);
    }

    #[test]
    fn test_blend() {
        let old = Iterate {
            policy: vec![vec![vec![1.0, 0.0]]],
            value: None,
            mu: Some(vec![vec![1.0]]),
            nu: Some(vec![vec![1.0, 0.0]]),
        };
        let new = Iterate {
            policy: vec![vec![vec![0.0, 1.0]]],
            value: Some(vec![vec![2.0]]),
            mu: Some(vec![vec![1.0]]),
            nu: Some(vec![vec![0.0, 1.0]]),
        };

        let half = blend(&old, &new, 0.5);
        assert_eq!(half.policy, vec![vec![vec![0.5, 0.5]]]);
        assert_eq!(half.nu, Some(vec![vec![0.5, 0.5]]));
        assert_eq!(half.value, Some(vec![vec![2.0]]));

        let again = blend(&half, &new, 0.5);
        assert_eq!(again.policy, vec![vec![vec![0.25, 0.75]]]);
        assert_eq!(again.value, Some(vec![vec![2.0]]));

        assert_eq!(blend(&old, &new, 1.0), new);
    }

    #[test]
    fn test_zero_budget_is_not_an_error() {
        let game = StayOrMove::new(1, [0.5, 0.5], [0.0, 1.0]);
        let solution = EquilibriumSolver::new(game, SolverConfig::default().with_iterations(0))
            .solve()
            .unwrap();
        assert!(!solution.stats.converged);
        assert_eq!(solution.stats.iterations, 0);
        assert!(solution.value.is_none());
        assert!(solution.induced_model.is_none());
        assert_eq!(solution.mu.len(), 2);
        assert_eq!(solution.mu[0], vec![0.5, 0.5]);
    }

    #[test]
    fn test_first_damped_round_keeps_full_mass() {
        let game = StayOrMove::new(1, [0.5, 0.5], [0.0, 1.0]);
        let config = SolverConfig::damped(0.5).with_iterations(1);
        let solution = EquilibriumSolver::new(game, config).solve().unwrap();

        assert_eq!(solution.stats.iterations, 1);
        // Measured against the empty starting flow: one unit of mass per step.
        assert!((solution.stats.history[0].diff_mu - 2.0).abs() < 1e-12);
        for (mu_t, nu_t) in solution.mu.iter().zip(&solution.nu) {
            assert!((mu_t.iter().sum::<f64>() - 1.0).abs() < 1e-12);
            assert!((nu_t.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        }
        assert_eq!(solution.mu[0], vec![0.5, 0.5]);
    }

    #[test]
    fn test_blend_adopts_missing_flow() {
        let old = Iterate {
            policy: vec![vec![vec![1.0, 0.0]]],
            value: None,
            mu: None,
            nu: None,
        };
        let new = Iterate {
            policy: vec![vec![vec![0.0, 1.0]]],
            value: Some(vec![vec![2.0]]),
            mu: Some(vec![vec![1.0]]),
            nu: Some(vec![vec![0.0, 1.0]]),
        };
        let mixed = blend(&old, &new, 0.25);
        assert_eq!(mixed.policy, vec![vec![vec![0.75, 0.25]]]);
        assert_eq!(mixed.mu, new.mu);
        assert_eq!(mixed.nu, new.nu);
    }

    #[test]
    fn test_exhausted_budget_reports_diagnostics() {
        let game = BlottoGame::default();
        let config = SolverConfig::default().with_iterations(2).with_eps(1e-12);
        let solution = EquilibriumSolver::new(game, config).solve().unwrap();
        assert!(!solution.stats.converged);
        assert_eq!(solution.stats.iterations, 2);
        assert!(solution.stats.diff_mu.is_some());
    }

    #[test]
    fn test_invalid_damping_aborts() {
        let game = StayOrMove::new(1, [0.5, 0.5], [0.0, 1.0]);
        let err = EquilibriumSolver::new(game, SolverConfig::damped(0.0))
            .solve()
            .unwrap_err();
        assert!(matches!(err, MfgError::InvalidParameter { name: "damping", .. }));
    }

    #[test]
    fn test_regularized_blotto_policy_is_mixed() {
        let config = SolverConfig::damped(0.5).with_iterations(30);
        let solution = EquilibriumSolver::new(BlottoGame::default(), config)
            .solve()
            .unwrap();
        assert_valid_policy(&solution.policy);
        // Soft best responses keep every action in play.
        assert!(solution.policy[0][0].iter().all(|&p| p > 0.0));
    }
}
