//! Game implementations for the mean-field solver.
//!
//! These serve as:
//!
//! 1. **Validation**: small games whose equilibria can be worked out by hand
//!    check the propagation, best response and fixed point.
//!
//! 2. **Examples**: demonstrate how to implement the `MeanFieldEnv` trait.
//!
//! 3. **Benchmarks**: standardized games for performance testing.
//!
//! ## Available Games
//!
//! - [`stay_or_move`]: two states, two actions, terminal reward only
//! - [`blotto`]: graph-connectivity game with crowding at the terminal step
//!
//! ## Adding New Games
//!
//! 1. Create a new module under `src/games/`
//! 2. Implement the `MeanFieldEnv` trait (states, actions, transitions and
//!    the pairwise reward)
//! 3. Add tests that verify expected behavior

pub mod blotto;
pub mod stay_or_move;
