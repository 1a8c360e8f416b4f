//! Configuration options for the equilibrium and best-response solvers.
//!
//! Configs are plain serde structs so they can be loaded from JSON files and
//! stored next to the solution they produced.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::mfg::error::{MfgError, Result};

/// How the greedy best response picks among actions with equal Q-values.
///
/// Equilibria can be sensitive to this choice, so it is explicit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// The first maximal action wins.
    #[default]
    LowestIndex,
    /// The last maximal action wins.
    HighestIndex,
}

/// Configuration for the backward-induction best-response solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestResponseConfig {
    /// Maximum number of backward-induction passes.
    ///
    /// A single pass is exact for plain backward induction; the extra passes
    /// only matter when the value flow does not settle after one sweep.
    #[serde(default = "default_br_iterations")]
    pub n_ittr: usize,

    /// Stop refining once the L1 change of the value flow drops below this.
    #[serde(default = "default_eps")]
    pub eps: f64,

    /// Tie-breaking rule for the greedy policy.
    #[serde(default)]
    pub tie_break: TieBreak,
}

fn default_br_iterations() -> usize {
    20
}

fn default_eps() -> f64 {
    0.01
}

impl Default for BestResponseConfig {
    fn default() -> Self {
        Self {
            n_ittr: default_br_iterations(),
            eps: default_eps(),
            tie_break: TieBreak::default(),
        }
    }
}

impl BestResponseConfig {
    /// Builder method: set the tie-breaking rule.
    pub fn with_tie_break(mut self, tie_break: TieBreak) -> Self {
        self.tie_break = tie_break;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.n_ittr == 0 {
            return Err(MfgError::InvalidParameter {
                name: "best_response.n_ittr",
                value: 0.0,
                message: "at least one backward pass is required".to_string(),
            });
        }
        if !(self.eps > 0.0) {
            return Err(MfgError::InvalidParameter {
                name: "best_response.eps",
                value: self.eps,
                message: "threshold must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Configuration for the outer fixed-point iteration.
///
/// # Example
/// ```
/// use mean_field_solver::mfg::SolverConfig;
///
/// let config = SolverConfig::default().with_damping(0.3).with_seed(7);
/// assert!(config.validate().is_ok());
/// assert_eq!(config.damping, Some(0.3));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Maximum number of best-response / propagation rounds.
    #[serde(default = "default_iterations")]
    pub n_ittr: usize,

    /// Convergence threshold on the summed L1 change of `nu` or `mu`.
    #[serde(default = "default_eps")]
    pub eps: f64,

    /// Soft-update rate `eta` in (0, 1]. `None` replaces iterates outright.
    #[serde(default)]
    pub damping: Option<f64>,

    /// Seed for the random initial policy.
    #[serde(default)]
    pub seed: u64,

    /// Settings passed to every best-response solve.
    #[serde(default)]
    pub best_response: BestResponseConfig,
}

fn default_iterations() -> usize {
    50
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            n_ittr: default_iterations(),
            eps: default_eps(),
            damping: None,
            seed: 0,
            best_response: BestResponseConfig::default(),
        }
    }
}

impl SolverConfig {
    /// Create a new SolverConfig with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a configuration with soft updates at rate `eta`.
    pub fn damped(eta: f64) -> Self {
        Self::default().with_damping(eta)
    }

    /// Builder method: set the iteration budget.
    pub fn with_iterations(mut self, n_ittr: usize) -> Self {
        self.n_ittr = n_ittr;
        self
    }

    /// Builder method: set the convergence threshold.
    pub fn with_eps(mut self, eps: f64) -> Self {
        self.eps = eps;
        self
    }

    /// Builder method: enable soft updates.
    pub fn with_damping(mut self, eta: f64) -> Self {
        self.damping = Some(eta);
        self
    }

    /// Builder method: set random seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Builder method: replace the best-response settings.
    pub fn with_best_response(mut self, best_response: BestResponseConfig) -> Self {
        self.best_response = best_response;
        self
    }

    /// Load configuration from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            MfgError::io(format!("read config {}", path.as_ref().display()), e)
        })?;
        Self::from_json_str(&content)
    }

    /// Parse configuration from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration and return any errors.
    pub fn validate(&self) -> Result<()> {
        if !(self.eps > 0.0) {
            return Err(MfgError::InvalidParameter {
                name: "eps",
                value: self.eps,
                message: "threshold must be positive".to_string(),
            });
        }
        if let Some(eta) = self.damping {
            if !(eta > 0.0 && eta <= 1.0) {
                return Err(MfgError::InvalidParameter {
                    name: "damping",
                    value: eta,
                    message: "soft-update rate must lie in (0, 1]".to_string(),
                });
            }
        }
        self.best_response.validate()
    }
}

/// Convergence diagnostics of one outer iteration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IterationDiagnostics {
    /// Zero-based iteration index.
    pub iteration: usize,
    /// Summed L1 change of the state-action flow.
    pub diff_nu: f64,
    /// Summed L1 change of the state flow.
    pub diff_mu: f64,
    /// Backward-induction passes used by the best response.
    pub best_response_passes: usize,
}

/// Statistics of a complete equilibrium solve.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SolveStats {
    /// Number of outer iterations run.
    pub iterations: usize,

    /// Whether either diagnostic dropped below `eps`.
    pub converged: bool,

    /// Last `diff_nu`, if any iteration ran.
    pub diff_nu: Option<f64>,

    /// Last `diff_mu`, if any iteration ran.
    pub diff_mu: Option<f64>,

    /// Wall-clock time of the solve.
    pub elapsed_seconds: f64,

    /// Diagnostics of every iteration, in order.
    pub history: Vec<IterationDiagnostics>,
}

impl SolveStats {
    /// Create new empty stats.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an iteration's diagnostics.
    pub fn record(&mut self, diagnostics: IterationDiagnostics) {
        self.iterations = diagnostics.iteration + 1;
        self.diff_nu = Some(diagnostics.diff_nu);
        self.diff_mu = Some(diagnostics.diff_mu);
        self.history.push(diagnostics);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SolverConfig::default();
        assert_eq!(config.n_ittr, 50);
        assert_eq!(config.eps, 0.01);
        assert_eq!(config.damping, None);
        assert_eq!(config.seed, 0);
        assert_eq!(config.best_response.n_ittr, 20);
        assert_eq!(config.best_response.tie_break, TieBreak::LowestIndex);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_damping_range() {
        assert!(SolverConfig::damped(1.0).validate().is_ok());
        assert!(SolverConfig::damped(0.0).validate().is_err());
        assert!(SolverConfig::damped(1.5).validate().is_err());
    }

    #[test]
    fn test_parse_json_config() {
        let json = r#"{
            "n_ittr": 120,
            "eps": 0.001,
            "damping": 0.25,
            "seed": 9,
            "best_response": { "tie_break": "highest_index" }
        }"#;
        let config = SolverConfig::from_json_str(json).unwrap();
        assert_eq!(config.n_ittr, 120);
        assert_eq!(config.damping, Some(0.25));
        assert_eq!(config.seed, 9);
        assert_eq!(config.best_response.n_ittr, 20);
        assert_eq!(config.best_response.tie_break, TieBreak::HighestIndex);
    }

    #[test]
    fn test_parse_rejects_invalid_values() {
        let err = SolverConfig::from_json_str(r#"{ "damping": 2.0 }"#).unwrap_err();
        assert!(matches!(err, MfgError::InvalidParameter { name: "damping", .. }));

        let err = SolverConfig::from_json_str(r#"{ "eps": "small" }"#).unwrap_err();
        assert!(matches!(err, MfgError::Serialization(_)));
    }

    #[test]
    fn test_stats_record() {
        let mut stats = SolveStats::new();
        stats.record(IterationDiagnostics {
            iteration: 0,
            diff_nu: 2.0,
            diff_mu: 1.5,
            best_response_passes: 2,
        });
        stats.record(IterationDiagnostics {
            iteration: 1,
            diff_nu: 0.5,
            diff_mu: 0.25,
            best_response_passes: 2,
        });
        assert_eq!(stats.iterations, 2);
        assert_eq!(stats.diff_mu, Some(0.25));
        assert_eq!(stats.history.len(), 2);
    }

    #[test]
    fn test_shipped_solver_config() {
        let config = SolverConfig::from_json_str(include_str!("../../configs/solver_damped.json"))
            .unwrap();
        assert_eq!(config.damping, Some(0.5));
        assert_eq!(config.best_response, BestResponseConfig::default());
    }
}
