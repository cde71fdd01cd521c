//! Sequential conduit: one sample at a time, batch order.

use crate::conduit::{evaluate_one, Model};
use crate::models::{ProblemType, Sample};
use tracing::debug;

pub(crate) fn evaluate_sequential(
    model: &dyn Model,
    problem: ProblemType,
    mut samples: Vec<Sample>,
) -> Vec<Sample> {
    for sample in &mut samples {
        evaluate_one(model, problem, sample);
        if let Some(err) = &sample.error {
            debug!(sample = sample.id, generation = sample.generation, error = %err, "sample evaluation failed");
        }
    }
    samples
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GeneronError, Result};
    use std::sync::Arc;

    #[test]
    fn failures_are_isolated_per_sample() {
        let model: Arc<dyn Model> = Arc::new(|s: &mut Sample| -> Result<()> {
            if s.id == 1 {
                return Err(GeneronError::ModelEvaluation {
                    sample: s.id,
                    detail: "synthetic failure".to_string(),
                });
            }
            s.add_result(s.variable(0) * 2.0);
            Ok(())
        });

        let batch: Vec<Sample> = (0..3).map(|i| Sample::new(i, 1, vec![i as f64])).collect();
        let out = evaluate_sequential(model.as_ref(), ProblemType::Direct, batch);

        assert_eq!(out.len(), 3);
        assert_eq!(out[0].result, Some(0.0));
        assert!(!out[1].is_usable());
        assert_eq!(out[2].result, Some(4.0));
    }

    #[test]
    fn already_failed_samples_are_skipped() {
        let model: Arc<dyn Model> = Arc::new(|s: &mut Sample| -> Result<()> {
            s.add_result(1.0);
            Ok(())
        });
        let mut sample = Sample::new(0, 1, vec![0.0]);
        sample.mark_failed("infeasible after bounded resampling");
        let out = evaluate_sequential(model.as_ref(), ProblemType::Direct, vec![sample]);
        assert_eq!(out[0].result, None);
        assert!(!out[0].is_usable());
    }
}
