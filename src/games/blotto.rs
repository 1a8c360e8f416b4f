//! Graph-connectivity "Blotto" game.
//!
//! Agents move over a directed graph. At every step an agent picks one of the
//! edges leaving its current node (self-loops included) and moves along it
//! deterministically. Rewards are paid only at the terminal step: some nodes
//! carry a bonus, and sharing a node with other agents costs a crowding
//! penalty. The aggregated pairwise reward is shaped by a quadratic `theta`.
//!
//! ```text
//! pairwise(s, s', Tf) = bonus[s] - penalty * [s == s']
//! theta(x, Tf)        = scale * x^2
//! ```
//!
//! The default configuration is a 5-node graph with a 5-step horizon, all
//! mass starting at node 0, and a prior-regularized best response.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::mfg::env::{
    validate_distribution, EntropyRegularization, MeanFieldEnv, PolicyStep,
};
use crate::mfg::error::{MfgError, Result};

/// Prior and temperature as written in a config file.
///
/// The prior is per state and repeated for every time step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegularizationConfig {
    /// Action prior per state.
    pub prior: PolicyStep,
    /// Inverse temperature.
    pub beta: f64,
}

/// Configuration of a Blotto game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlottoConfig {
    /// Adjacency matrix; `connectivity[s][g] > 0` means `s` can move to `g`.
    pub connectivity: Vec<Vec<u8>>,
    /// Terminal time.
    pub horizon: usize,
    /// Initial distribution.
    pub mu0: Vec<f64>,
    /// Terminal bonus per node.
    pub bonus: Vec<f64>,
    /// Cost of sharing a node, per unit of population mass.
    #[serde(default = "default_penalty")]
    pub crowding_penalty: f64,
    /// Coefficient of the quadratic shaping function.
    #[serde(default = "default_theta_scale")]
    pub theta_scale: f64,
    /// Optional entropy regularization.
    #[serde(default)]
    pub regularization: Option<RegularizationConfig>,
}

fn default_penalty() -> f64 {
    1.0
}

fn default_theta_scale() -> f64 {
    0.6
}

impl Default for BlottoConfig {
    fn default() -> Self {
        Self {
            connectivity: vec![
                vec![1, 1, 0, 0, 1],
                vec![0, 1, 1, 1, 0],
                vec![0, 0, 1, 1, 0],
                vec![0, 0, 1, 1, 1],
                vec![1, 0, 0, 0, 1],
            ],
            horizon: 5,
            mu0: vec![1.0, 0.0, 0.0, 0.0, 0.0],
            bonus: vec![0.0, 0.0, 1.5, 1.0, 0.0],
            crowding_penalty: default_penalty(),
            theta_scale: default_theta_scale(),
            regularization: Some(RegularizationConfig {
                prior: vec![
                    vec![0.01, 0.98, 0.01],
                    vec![0.02, 0.49, 0.49],
                    vec![0.5, 0.5],
                    vec![0.5, 0.49, 0.01],
                    vec![0.99, 0.01],
                ],
                beta: 2.0,
            }),
        }
    }
}

impl BlottoConfig {
    /// Load a game configuration from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            MfgError::io(format!("read game config {}", path.as_ref().display()), e)
        })?;
        Self::from_json_str(&content)
    }

    /// Parse a game configuration from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// The Blotto game.
#[derive(Debug, Clone)]
pub struct BlottoGame {
    n_actions: Vec<usize>,
    targets: Vec<Vec<usize>>,
    horizon: usize,
    mu0: Vec<f64>,
    bonus: Vec<f64>,
    crowding_penalty: f64,
    theta_scale: f64,
    regularization: Option<EntropyRegularization>,
}

impl Default for BlottoGame {
    fn default() -> Self {
        Self::from_config(BlottoConfig::default()).expect("default Blotto config is valid")
    }
}

impl BlottoGame {
    /// Build a game from its configuration.
    ///
    /// Action `k` at node `s` moves to the `k`-th reachable node in index order.
    pub fn from_config(config: BlottoConfig) -> Result<Self> {
        let n_states = config.connectivity.len();
        if n_states == 0 {
            return Err(MfgError::shape("connectivity", 1, 0));
        }

        let mut targets = Vec::with_capacity(n_states);
        for (s, row) in config.connectivity.iter().enumerate() {
            if row.len() != n_states {
                return Err(MfgError::shape(format!("connectivity row {}", s), n_states, row.len()));
            }
            let reachable: Vec<usize> = row
                .iter()
                .enumerate()
                .filter(|(_, edge)| **edge > 0)
                .map(|(g, _)| g)
                .collect();
            if reachable.is_empty() {
                return Err(MfgError::NoActions { state: s });
            }
            targets.push(reachable);
        }
        let n_actions: Vec<usize> = targets.iter().map(Vec::len).collect();

        validate_distribution(&config.mu0, n_states, "mu0")?;
        if config.bonus.len() != n_states {
            return Err(MfgError::shape("bonus", n_states, config.bonus.len()));
        }

        let regularization = match config.regularization {
            Some(reg) => {
                let expanded =
                    EntropyRegularization::new(vec![reg.prior; config.horizon + 1], reg.beta);
                expanded.validate(&n_actions, config.horizon)?;
                Some(expanded)
            }
            None => None,
        };

        Ok(Self {
            n_actions,
            targets,
            horizon: config.horizon,
            mu0: config.mu0,
            bonus: config.bonus,
            crowding_penalty: config.crowding_penalty,
            theta_scale: config.theta_scale,
            regularization,
        })
    }

    /// Builder method: replace the inverse temperature.
    ///
    /// Has no effect on an unregularized game; attach a prior with
    /// [`with_regularization`](Self::with_regularization) first.
    pub fn with_beta(mut self, beta: f64) -> Self {
        if let Some(reg) = self.regularization.as_mut() {
            reg.beta = beta;
        }
        self
    }

    /// Builder method: replace or drop the regularization.
    pub fn with_regularization(mut self, regularization: Option<EntropyRegularization>) -> Self {
        self.regularization = regularization;
        self
    }

    /// Node reached from `s` under action `a`.
    pub fn target(&self, s: usize, a: usize) -> usize {
        self.targets[s][a]
    }
}

impl MeanFieldEnv for BlottoGame {
    fn n_states(&self) -> usize {
        self.targets.len()
    }

    fn n_actions(&self) -> &[usize] {
        &self.n_actions
    }

    fn horizon(&self) -> usize {
        self.horizon
    }

    fn mu0(&self) -> &[f64] {
        &self.mu0
    }

    fn transition(&self, s: usize, a: usize, _mu: &[f64]) -> Vec<f64> {
        let mut row = vec![0.0; self.n_states()];
        row[self.targets[s][a]] = 1.0;
        row
    }

    fn pairwise_reward(&self, s: usize, _a: usize, s_prime: usize, t: usize) -> f64 {
        if t < self.horizon {
            return 0.0;
        }
        let crowding = if s == s_prime { self.crowding_penalty } else { 0.0 };
        self.bonus[s] - crowding
    }

    fn theta(&self, x: f64, t: usize) -> f64 {
        if t == self.horizon {
            self.theta_scale * x * x
        } else {
            0.0
        }
    }

    fn terminal_reward_only(&self) -> bool {
        true
    }

    fn regularization(&self) -> Option<&EntropyRegularization> {
        self.regularization.as_ref()
    }
}
