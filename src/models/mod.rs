//! Core data models for generon.
//!
//! Errors, samples, and problem-type tags shared by every layer above.

mod error;
mod problem;
mod sample;

pub use error::*;
pub use problem::*;
pub use sample::*;
