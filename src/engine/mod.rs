//! Run engine.
//!
//! Provides:
//! - `Experiment`: one configuration tree paired with its model
//! - `CheckpointManager`: per-generation result files and the final marker
//! - `Engine`: the run state machine, cancellation, and multi-run dispatch

mod checkpoint;
mod controller;
mod experiment;

pub use checkpoint::*;
pub use controller::*;
pub use experiment::*;
