//! Error types for generon.
//!
//! The taxonomy separates fatal configuration/compatibility errors (abort the
//! run before any generation state is mutated) from per-sample evaluation
//! errors (recovered locally inside the conduit) and best-effort durability
//! errors (logged, run continues in memory).

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for generon.
#[derive(Debug, Error)]
pub enum GeneronError {
    // ─── Configuration (fatal at Initializing) ─────────────────────────────

    #[error("Key not found: {path}")]
    KeyNotFound { path: String },

    #[error("Type mismatch at {path}: expected {expected}, found {found}")]
    TypeMismatch {
        path: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Schema validation failed at {path}: {detail}")]
    SchemaValidation { path: String, detail: String },

    #[error("Unknown solver type: {0}")]
    UnknownSolver(String),

    #[error("Unknown problem type: {0}")]
    UnknownProblem(String),

    // ─── Evaluation (recovered locally, never unwinds past the conduit) ────

    #[error("Model evaluation failed for sample {sample}: {detail}")]
    ModelEvaluation { sample: usize, detail: String },

    #[error("Model contract violation: model did not populate {expected}")]
    ModelContractViolation { expected: &'static str },

    #[error("All samples infeasible in generation {generation}")]
    InfeasibleBatch { generation: u64 },

    // ─── Checkpointing ─────────────────────────────────────────────────────

    #[error("Incompatible checkpoint: expected {expected}, found {found}")]
    IncompatibleCheckpoint { expected: String, found: String },

    #[error("Checkpoint write failed for {path}")]
    CheckpointWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No result files found in {0}")]
    NoResults(PathBuf),

    // ─── Infrastructure ────────────────────────────────────────────────────

    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GeneronError {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Whether this error aborts the run.
    ///
    /// Checkpoint write failures and per-sample evaluation errors are
    /// non-fatal; everything else stops the state machine.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::CheckpointWrite { .. }
                | Self::ModelEvaluation { .. }
                | Self::ModelContractViolation { .. }
        )
    }
}

/// Result type alias for generon.
pub type Result<T> = std::result::Result<T, GeneronError>;
