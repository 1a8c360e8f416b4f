//! The equilibrium solution bundle and its persistence.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::mfg::config::{SolveStats, SolverConfig};
use crate::mfg::env::{PolicyFlow, ValueFlow};
use crate::mfg::error::{MfgError, Result};
use crate::mfg::model::InducedModel;

/// Everything a solve produces.
///
/// Created once per solve and handed to the caller; nothing inside the
/// solver keeps a reference to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquilibriumSolution {
    /// Equilibrium policy `[t][s][a]`.
    pub policy: PolicyFlow,
    /// Value flow `[t][s]`; absent if no iteration ran.
    pub value: Option<ValueFlow>,
    /// State flow `[t][s]`.
    pub mu: Vec<Vec<f64>>,
    /// State-action flow `[t][i]`.
    pub nu: Vec<Vec<f64>>,
    /// The best-response MDP induced by the last propagated flow.
    pub induced_model: Option<InducedModel>,
    /// Convergence diagnostics.
    pub stats: SolveStats,
    /// Configuration that produced this solution.
    pub config: SolverConfig,
}

impl EquilibriumSolution {
    /// Whether the fixed-point iteration met its threshold.
    pub fn converged(&self) -> bool {
        self.stats.converged
    }

    /// Save the bundle as pretty-printed JSON.
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path)
            .map_err(|e| MfgError::io(format!("create {}", path.display()), e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer
            .flush()
            .map_err(|e| MfgError::io(format!("write {}", path.display()), e))
    }

    /// Load a bundle saved with [`save_json`](Self::save_json).
    ///
    /// The induced model is re-validated after loading.
    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file =
            File::open(path).map_err(|e| MfgError::io(format!("open {}", path.display()), e))?;
        let solution: Self = serde_json::from_reader(BufReader::new(file))?;
        if let Some(model) = &solution.induced_model {
            model.validate()?;
        }
        Ok(solution)
    }
}
