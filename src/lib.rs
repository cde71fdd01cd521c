//! generon - generational optimization and sampling engine.
//!
//! ## Architecture
//!
//! An experiment is one configuration tree (path-addressable, canonically
//! serialized) paired with a computational model. The engine drives it
//! through generations:
//!
//! - **Solver strategies** propose a batch of samples and incorporate the
//!   evaluated batch (`Optimizer/Population`, `Optimizer/Rprop`,
//!   `Sampler/Annealed`)
//! - **Conduits** dispatch each batch to the model, sequentially or with
//!   bounded concurrency, preserving batch identity
//! - **Termination criteria** are checked between generations in a fixed
//!   priority order
//! - **Checkpoints** snapshot the full tree every saved generation
//!   (`s00000.json`, `s00001.json`, ...), so any snapshot can seed a resumed
//!   run that behaves as if never interrupted

pub mod conduit;
pub mod config;
pub mod engine;
pub mod models;
pub mod solver;

// Re-exports for convenience
pub use conduit::{Conduit, Model};
pub use config::{ConfigTree, Schema};
pub use engine::{
    latest_result, read_checkpoint, CancelHandle, CheckpointManager, Engine, Experiment,
    RunState, RunSummary,
};
pub use models::{GeneronError, ProblemType, Result, Sample};
pub use solver::{SolverStrategy, StopReason, TerminationCriteria};
