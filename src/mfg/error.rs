//! Error types for the mean-field solver.

use thiserror::Error;

/// Errors raised by environments, solvers and the deviation benchmark.
///
/// Configuration and usage errors abort the current solve. Running out of
/// iterations is not an error and never shows up here.
#[derive(Error, Debug)]
#[non_exhaustive]
#[allow(missing_docs)]
pub enum MfgError {
    /// A state offers no actions.
    #[error("state {state} has no available actions")]
    NoActions { state: usize },

    /// Action index outside `0..n_actions[state]`, or state out of range.
    #[error("action {action} is not available at state {state} (state has {available} actions)")]
    InvalidAction {
        state: usize,
        action: usize,
        available: usize,
    },

    /// Time index past the terminal step.
    #[error("time step {t} is outside the horizon [0, {horizon}]")]
    TimeOutOfRange { t: usize, horizon: usize },

    /// Transition vector of the wrong length.
    #[error("transition from state {state} under action {action} has length {got}, expected {expected}")]
    TransitionLength {
        state: usize,
        action: usize,
        got: usize,
        expected: usize,
    },

    /// Transition row with negative entries or not summing to one.
    #[error("transition from state {state} under action {action} is not a distribution (sum = {sum})")]
    MalformedTransition { state: usize, action: usize, sum: f64 },

    /// Policy-weighted transition row not summing to one.
    #[error("controlled transition row {state} at t={t} sums to {sum}")]
    NonStochasticControl { t: usize, state: usize, sum: f64 },

    /// A table, vector or policy has the wrong dimensions.
    #[error("shape mismatch in {what}: expected {expected}, got {got}")]
    ShapeMismatch {
        what: String,
        expected: usize,
        got: usize,
    },

    /// Regularization prior row of the wrong width, non-positive or not normalized.
    #[error("invalid prior at t={t}, state {state}: {message}")]
    InvalidPrior {
        t: usize,
        state: usize,
        message: String,
    },

    /// Numeric parameter outside its allowed range.
    #[error("invalid parameter {name} = {value}: {message}")]
    InvalidParameter {
        name: &'static str,
        value: f64,
        message: String,
    },

    /// Vector expected to be a probability distribution is not one.
    #[error("invalid distribution: {message}")]
    InvalidDistribution { message: String },

    /// File system failure.
    #[error("failed to {operation}: {source}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    /// JSON encoding or decoding failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, MfgError>;

impl MfgError {
    pub(crate) fn shape(what: impl Into<String>, expected: usize, got: usize) -> Self {
        MfgError::ShapeMismatch {
            what: what.into(),
            expected,
            got,
        }
    }

    pub(crate) fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        MfgError::Io {
            operation: operation.into(),
            source,
        }
    }
}
