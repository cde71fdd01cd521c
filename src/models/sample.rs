//! Sample and generation record types.
//!
//! A sample is one point in variable space, proposed by a solver strategy,
//! evaluated by the conduit, and consumed read-only by the solver on the next
//! step. Its identity is the (generation, id) pair; the conduit preserves it
//! regardless of completion order.

use serde::{Deserialize, Serialize};

/// One proposed point plus the fields the model writes back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Index within its generation.
    pub id: usize,

    /// Generation this sample belongs to.
    pub generation: u64,

    /// Variable values, in declared variable order.
    pub variables: Vec<f64>,

    /// Objective value (direct evaluation problems).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<f64>,

    /// Log-likelihood (Bayesian problems).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_likelihood: Option<f64>,

    /// Gradient vector (gradient problems).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gradient: Option<Vec<f64>>,

    /// False once the sample failed evaluation or violated constraints.
    pub feasible: bool,

    /// Failure detail when evaluation did not complete.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Sample {
    /// Create a fresh, unevaluated sample.
    pub fn new(id: usize, generation: u64, variables: Vec<f64>) -> Self {
        Self {
            id,
            generation,
            variables,
            result: None,
            log_likelihood: None,
            gradient: None,
            feasible: true,
            error: None,
        }
    }

    /// Read a variable value by index. Out-of-range reads return NaN rather
    /// than panic; the model contract check catches the resulting garbage.
    pub fn variable(&self, index: usize) -> f64 {
        self.variables.get(index).copied().unwrap_or(f64::NAN)
    }

    /// Model interface: record the objective value.
    pub fn add_result(&mut self, value: f64) {
        self.result = Some(value);
    }

    /// Model interface: record the log-likelihood.
    pub fn set_log_likelihood(&mut self, value: f64) {
        self.log_likelihood = Some(value);
    }

    /// Model interface: record the gradient vector.
    pub fn set_gradient(&mut self, gradient: Vec<f64>) {
        self.gradient = Some(gradient);
    }

    /// Mark the sample failed; a failed sample is infeasible for the solver.
    pub fn mark_failed(&mut self, detail: impl Into<String>) {
        self.feasible = false;
        self.error = Some(detail.into());
    }

    /// Whether the sample completed evaluation and is usable by the solver.
    pub fn is_usable(&self) -> bool {
        self.feasible && self.error.is_none()
    }
}

/// Immutable record of one committed generation, kept for reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationReport {
    /// Generation index (monotonically increasing from 0).
    pub index: u64,

    /// Samples evaluated in this generation.
    pub evaluated: usize,

    /// Samples that failed or were infeasible.
    pub failed: usize,

    /// Best objective value seen so far, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_value: Option<f64>,
}
