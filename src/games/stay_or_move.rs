//! Two-state stay/move game.
//!
//! The smallest useful mean-field game: agents sit in state 0 or 1 and at
//! each step either stay (action 0) or move to state 1 (action 1). Rewards
//! are paid only at the terminal step and can penalize crowding:
//!
//! ```text
//! r(s) = terminal[s] - congestion * mu_Tf[s]
//! ```
//!
//! With `congestion = 0` the game is population-independent and plain best
//! response alternation converges in a few iterations.

use crate::mfg::env::MeanFieldEnv;

/// Action index for staying put.
pub const STAY: usize = 0;

/// Action index for moving to state 1.
pub const MOVE: usize = 1;

/// The two-state stay/move game.
#[derive(Debug, Clone)]
pub struct StayOrMove {
    horizon: usize,
    mu0: [f64; 2],
    terminal: [f64; 2],
    congestion: f64,
}

impl StayOrMove {
    /// Create a game with the given horizon, initial distribution and
    /// terminal rewards per state.
    pub fn new(horizon: usize, mu0: [f64; 2], terminal: [f64; 2]) -> Self {
        Self {
            horizon,
            mu0,
            terminal,
            congestion: 0.0,
        }
    }

    /// Builder method: penalize agents for sharing a terminal state.
    pub fn with_congestion(mut self, congestion: f64) -> Self {
        self.congestion = congestion;
        self
    }

    /// Terminal reward of state `s` when the population is at `mu`.
    pub fn terminal_reward(&self, s: usize, mu: &[f64]) -> f64 {
        let mass: f64 = mu.iter().sum();
        self.terminal[s] * mass - self.congestion * mu[s]
    }
}

impl MeanFieldEnv for StayOrMove {
    fn n_states(&self) -> usize {
        2
    }

    fn n_actions(&self) -> &[usize] {
        &[2, 2]
    }

    fn horizon(&self) -> usize {
        self.horizon
    }

    fn mu0(&self) -> &[f64] {
        &self.mu0
    }

    fn transition(&self, s: usize, a: usize, _mu: &[f64]) -> Vec<f64> {
        let next = if a == MOVE { 1 } else { s };
        let mut row = vec![0.0; 2];
        row[next] = 1.0;
        row
    }

    fn pairwise_reward(&self, s: usize, _a: usize, s_prime: usize, t: usize) -> f64 {
        if t < self.horizon {
            return 0.0;
        }
        let crowding = if s == s_prime { self.congestion } else { 0.0 };
        self.terminal[s] - crowding
    }

    fn terminal_reward_only(&self) -> bool {
        true
    }
}
