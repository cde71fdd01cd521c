//! Evaluation conduit - dispatches a solver's sample batch to the model.
//!
//! Variants are enum-dispatched from the `Conduit/Type` tag. Whatever the
//! internal execution order, the returned batch carries the same samples in
//! the same caller-visible order, and a failure inside one sample's
//! evaluation never corrupts its siblings or unwinds past this boundary.

mod concurrent;
mod sequential;

pub(crate) use concurrent::evaluate_concurrent;
pub(crate) use sequential::evaluate_sequential;

use crate::config::ConfigTree;
use crate::models::{GeneronError, ProblemType, Result, Sample};
use std::sync::Arc;

/// The computational model: an opaque callable invoked once per sample.
///
/// Depending on the problem type it must call `add_result`,
/// `set_log_likelihood`, or `set_gradient` before returning; the conduit
/// enforces that contract.
pub trait Model: Send + Sync {
    fn evaluate(&self, sample: &mut Sample) -> Result<()>;
}

impl<F> Model for F
where
    F: Fn(&mut Sample) -> Result<()> + Send + Sync,
{
    fn evaluate(&self, sample: &mut Sample) -> Result<()> {
        self(sample)
    }
}

/// Evaluation transport, selected once at initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conduit {
    /// Single thread of control, in batch order.
    Sequential,
    /// Worker fan-out on the runtime, bounded by `jobs`.
    Concurrent { jobs: usize },
}

impl Conduit {
    /// Resolve the `Conduit` branch of a validated tree.
    pub fn from_tree(tree: &ConfigTree) -> Result<Self> {
        match tree.get_str("Conduit/Type")? {
            "Sequential" => Ok(Self::Sequential),
            "Concurrent" => {
                let jobs = tree.get_u64("Conduit/Concurrent Jobs")? as usize;
                if jobs == 0 {
                    return Err(GeneronError::SchemaValidation {
                        path: "Conduit/Concurrent Jobs".to_string(),
                        detail: "must be at least 1".to_string(),
                    });
                }
                Ok(Self::Concurrent { jobs })
            }
            other => Err(GeneronError::SchemaValidation {
                path: "Conduit/Type".to_string(),
                detail: format!("expected Sequential or Concurrent, found {other}"),
            }),
        }
    }

    /// Evaluate a batch, preserving sample identity and order.
    pub async fn evaluate(
        &self,
        model: &Arc<dyn Model>,
        problem: ProblemType,
        samples: Vec<Sample>,
    ) -> Result<Vec<Sample>> {
        match self {
            Self::Sequential => Ok(evaluate_sequential(model.as_ref(), problem, samples)),
            Self::Concurrent { jobs } => {
                evaluate_concurrent(Arc::clone(model), problem, samples, *jobs).await
            }
        }
    }
}

/// Run the model on one sample and enforce the problem-type contract.
/// Failures are recorded on the sample, never propagated.
pub(crate) fn evaluate_one(model: &dyn Model, problem: ProblemType, sample: &mut Sample) {
    if !sample.feasible {
        return; // rejected at proposal time, nothing to evaluate
    }
    if let Err(e) = model.evaluate(sample) {
        sample.mark_failed(e.to_string());
        return;
    }
    if let Err(e) = problem.check_contract(sample) {
        sample.mark_failed(e.to_string());
    }
}
