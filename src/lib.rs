//! # Mean Field Solver
//!
//! A finite-horizon Mean Field Game (MFG) equilibrium solver, with an exact
//! finite-population deviation benchmark.
//!
//! ## Features
//!
//! - **Generic Engine**: Works with any game implementing the `MeanFieldEnv` trait
//! - **Greedy or Regularized**: Backward induction with optional entropy regularization
//! - **Damped Fixed Point**: Optional blending between iterates
//! - **Persistence**: Save and load solution bundles as JSON
//! - **Deviation Benchmark**: Measure what one agent gains among `N`
//!
//! ## Quick Start
//!
//! ```ignore
//! use mean_field_solver::mfg::{EquilibriumSolver, SolverConfig};
//!
//! // 1. Implement the MeanFieldEnv trait for your game
//! // 2. Create a solver
//! let solver = EquilibriumSolver::new(my_game, SolverConfig::default());
//!
//! // 3. Solve
//! let solution = solver.solve()?;
//!
//! // 4. Inspect the equilibrium
//! println!("{:?}", solution.policy[0]);
//! ```
//!
//! ## Modules
//!
//! - [`mfg`]: Core solver, best response and deviation benchmark
//! - [`games`]: Example games (stay-or-move, Blotto)
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                  Equilibrium Solver (Generic)                   │
//! │  - Flow propagation       - Backward induction                  │
//! │  - Damped fixed point     - Deviation benchmark                 │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               │ implements MeanFieldEnv trait
//!                               ▼
//!               ┌───────────────┴───────────────┐
//!               │                               │
//!               ▼                               ▼
//!        ┌──────────────┐               ┌──────────────┐
//!        │ Stay or Move │               │    Blotto    │
//!        └──────────────┘               └──────────────┘
//! ```

#![warn(missing_docs)]

/// Mean Field Game solver module.
///
/// This is the core module containing the generic equilibrium algorithm.
pub mod mfg;

/// Game implementations module.
///
/// Contains small games for testing and validation.
pub mod games;

// Re-export commonly used types at crate root for convenience
pub use mfg::{
    DeviationBenchmark, EquilibriumSolution, EquilibriumSolver, MeanFieldEnv, MfgError,
    SolverConfig,
};
