//! Finite-horizon Mean Field Game solver.
//!
//! This module computes approximate Nash equilibria of mean-field games: games
//! with a continuum of identical agents where each agent's reward depends on
//! its own state and action and on the distribution of the population.
//!
//! # Overview
//!
//! The solver is a fixed-point iteration over the population flow:
//! 1. Propagate the current policy forward from `mu_0` to get the state flow
//!    `mu_t` and the state-action flow `nu_t`
//! 2. Freeze the flow and build the MDP a single agent faces against it
//! 3. Solve that MDP by backward induction (greedy or entropy-regularized)
//! 4. Adopt the best response, optionally blended with the previous iterate,
//!    and repeat until the flow stops moving
//!
//! # Usage
//!
//! 1. Implement the [`MeanFieldEnv`] trait for your game
//! 2. Create an [`EquilibriumSolver`] with the game and a [`SolverConfig`]
//! 3. Call `solve()` to get an [`EquilibriumSolution`]
//! 4. Optionally check the policy against a finite population with
//!    [`DeviationBenchmark`]
//!
//! # Example
//!
//! ```ignore
//! use mean_field_solver::mfg::{DeviationBenchmark, EquilibriumSolver, MultinomialEnumerator, SolverConfig};
//! use mean_field_solver::games::blotto::BlottoGame;
//!
//! let solver = EquilibriumSolver::new(BlottoGame::default(), SolverConfig::damped(0.5));
//! let solution = solver.solve()?;
//! println!("converged: {}", solution.converged());
//!
//! let bench = DeviationBenchmark::new(solver.env(), &solution.policy, 10, &MultinomialEnumerator)?;
//! let report = bench.check(&solver.config().best_response)?;
//! println!("exploitability with 10 agents: {:.4}", report.exploitability);
//! ```
//!
//! # Theory
//!
//! **Induced reward**: with the flow frozen, the reward of `(s, a)` at `t` is
//! ```text
//! r(t, s, a) = theta( sum_s' pairwise(s, a, s', t) * mu_t(s'), t )
//! ```
//!
//! **Damping**: with `eta` in `(0, 1]`, each round moves the iterate only
//! part of the way to the best response:
//! ```text
//! x_{k+1} = (1 - eta) * x_k + eta * BR(x_k)
//! ```
//!
//! **Convergence**: the iteration stops when the L1 change of either `nu` or
//! `mu` between consecutive rounds falls below `eps`.

pub mod best_response;
pub mod config;
pub mod deviation;
pub mod empirical;
pub mod env;
pub mod error;
pub mod model;
pub mod propagation;
pub mod solution;
pub mod solver;

// Re-export main types for convenient access
pub use best_response::{evaluate_policy, BestResponse, BestResponseSolver};
pub use config::{BestResponseConfig, IterationDiagnostics, SolveStats, SolverConfig, TieBreak};
pub use deviation::{DeviationBenchmark, DeviationReport};
pub use empirical::{EmpiricalDistribution, EmpiricalNode, MultinomialEnumerator};
pub use env::{ActionLayout, EntropyRegularization, MeanFieldEnv, PolicyFlow, PolicyStep, ValueFlow};
pub use error::{MfgError, Result};
pub use model::InducedModel;
pub use propagation::{flow_l1, FlowStep, MeanFieldFlow, MeanFieldPropagator, Propagation};
pub use solution::EquilibriumSolution;
pub use solver::{blend, random_policy, EquilibriumSolver, Iterate};
