//! Concurrent conduit: bounded fan-out over the tokio blocking pool.
//!
//! Each sample is evaluated on its own blocking task, gated by a semaphore
//! sized to the configured job count. Results are collected back in batch
//! order, so callers observe the same batch identity the sequential conduit
//! produces. A panicking model poisons only its own sample.

use crate::conduit::{evaluate_one, Model};
use crate::models::{ProblemType, Result, Sample};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

pub(crate) async fn evaluate_concurrent(
    model: Arc<dyn Model>,
    problem: ProblemType,
    samples: Vec<Sample>,
    jobs: usize,
) -> Result<Vec<Sample>> {
    let semaphore = Arc::new(Semaphore::new(jobs));
    let mut handles = Vec::with_capacity(samples.len());
    // Retained so a lost task can still be reported under its own identity.
    let originals: Vec<Sample> = samples.clone();

    for sample in samples {
        let model = Arc::clone(&model);
        let semaphore = Arc::clone(&semaphore);
        handles.push(tokio::spawn(async move {
            // Semaphore lives for the whole run; acquire cannot fail.
            let _permit = semaphore.acquire_owned().await;
            tokio::task::spawn_blocking(move || {
                let mut sample = sample;
                evaluate_one(model.as_ref(), problem, &mut sample);
                sample
            })
            .await
        }));
    }

    let mut evaluated = Vec::with_capacity(handles.len());
    for (handle, original) in handles.into_iter().zip(originals) {
        match handle.await {
            Ok(Ok(sample)) => {
                if let Some(err) = &sample.error {
                    debug!(sample = sample.id, generation = sample.generation, error = %err, "sample evaluation failed");
                }
                evaluated.push(sample);
            }
            Ok(Err(join_err)) | Err(join_err) => {
                warn!(sample = original.id, error = %join_err, "evaluation task aborted");
                let mut sample = original;
                sample.mark_failed(format!("evaluation task aborted: {join_err}"));
                evaluated.push(sample);
            }
        }
    }
    Ok(evaluated)
}
