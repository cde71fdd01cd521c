//! Run controller: the generational state machine.
//!
//! A run moves `Initializing -> Running`, detours through `Checkpointing`
//! whenever a generation falls on the save cadence, and ends in `Terminated`
//! once a criterion fires or an external cancellation is observed. One
//! generation is an indivisible step (propose, evaluate, incorporate,
//! commit); cancellation and criteria are only consulted between steps.

use crate::conduit::Conduit;
use crate::config::Schema;
use crate::engine::checkpoint::CheckpointManager;
use crate::engine::experiment::Experiment;
use crate::models::{GenerationReport, GeneronError, ProblemType, Result};
use crate::solver::{self, SolverStrategy, StopReason, TerminationCriteria};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Lifecycle phase of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Initializing,
    Running,
    Checkpointing,
    Terminated,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Initializing => "initializing",
            Self::Running => "running",
            Self::Checkpointing => "checkpointing",
            Self::Terminated => "terminated",
        })
    }
}

/// Outcome of one completed run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: String,
    pub generations: u64,
    pub stop_reason: StopReason,
    pub best_value: Option<f64>,
    pub runtime_secs: f64,
    /// One report per generation executed by this call (a resumed run only
    /// reports the generations it ran itself).
    pub reports: Vec<GenerationReport>,
}

/// Shared cancellation flag, honored at generation boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    /// Request cancellation; the in-flight generation still completes.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Drives experiments through the run state machine.
#[derive(Clone, Default)]
pub struct Engine {
    cancel: CancelHandle,
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for cancelling every run driven by this engine.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Run one experiment to termination.
    ///
    /// A fresh run (no `Solver/Internal` branch yet) validates the
    /// configuration, pins a random seed and run id, and writes the
    /// `s00000.json` snapshot; a run resumed from a snapshot restores the
    /// solver from `Solver/Internal` and leaves earlier snapshot files
    /// untouched, including `s00000.json` itself.
    pub async fn run(&self, experiment: &mut Experiment) -> Result<RunSummary> {
        let started = Instant::now();
        let mut state = RunState::Initializing;
        debug!(state = %state, "run state");

        let problem = ProblemType::from_tag(experiment.tree().get_str("Problem/Type")?)?;
        let solver_tag = experiment.tree().get_str("Solver/Type")?.to_string();
        let schema = Schema::for_pair(problem, &solver_tag)?;
        schema.validate(experiment.tree_mut())?;

        {
            let tree = experiment.tree_mut();
            tree.set_default("Random Seed", rand::random::<u32>())?;
            tree.set_default("General/Current Generation", 0u64)?;
            tree.set_default("General/Run ID", Uuid::new_v4().to_string())?;
        }

        let mut solver = solver::build(experiment.tree(), problem)?;
        let mut current_generation = experiment.tree().get_u64("General/Current Generation")?;
        // Every snapshot carries `Solver/Internal`, so its presence (not the
        // counter) distinguishes a resumed run from a fresh one; resuming
        // from `s00000.json` must not re-initialize or rewrite anything.
        let fresh = !experiment.tree().contains("Solver/Internal");
        if fresh {
            let internal = solver.internal_state()?;
            let tree = experiment.tree_mut();
            tree.overwrite("Solver/Internal", internal)?;
            tree.overwrite("General/Timestamp", Utc::now().to_rfc3339())?;
        } else {
            let internal = experiment.tree().get("Solver/Internal")?.clone();
            solver.restore(&internal)?;
            info!(generation = current_generation, "resuming from restored state");
        }

        let conduit = Conduit::from_tree(experiment.tree())?;
        let criteria = TerminationCriteria::from_tree(experiment.tree())?;
        let console_frequency = experiment.tree().get_u64("Console Output/Frequency")?;
        let results_frequency = experiment.tree().get_u64("Results Output/Frequency")?;
        let results_path = experiment.tree().get_str("Results Output/Path")?.to_string();
        let run_id = experiment.tree().get_str("General/Run ID")?.to_string();

        let checkpoints = if results_frequency > 0 {
            Some(CheckpointManager::new(&results_path, results_frequency)?)
        } else {
            None
        };
        if fresh {
            if let Some(cp) = &checkpoints {
                if let Err(e) = cp.save_generation(experiment.tree()) {
                    warn!(error = %e, "initial checkpoint failed; run continues in memory");
                }
            }
        }

        let model = experiment.model();
        let tolerate_infeasible = criteria.max_infeasible_resamplings > 0;
        let mut reports: Vec<GenerationReport> = Vec::new();

        info!(
            run_id = %run_id,
            solver = %solver.solver_type(),
            problem = %problem,
            generation = current_generation,
            "run started"
        );
        state = RunState::Running;
        debug!(state = %state, "run state");

        let stop_reason = loop {
            // The sequential conduit never awaits, so give the runtime a
            // suspension point once per generation.
            tokio::task::yield_now().await;

            let mut progress = solver.progress();
            progress.current_generation = current_generation;
            if let Some(reason) = criteria.evaluate(&progress) {
                break reason;
            }
            if self.cancel.is_cancelled() {
                break StopReason::Cancelled;
            }

            let generation = current_generation + 1;
            let (evaluated, failed) = match solver.propose(generation) {
                Ok(batch) => {
                    let evaluated = conduit.evaluate(&model, problem, batch).await?;
                    let failed = evaluated.iter().filter(|s| !s.is_usable()).count();
                    match solver.incorporate(generation, &evaluated) {
                        Ok(()) => {}
                        Err(GeneronError::InfeasibleBatch { .. }) if tolerate_infeasible => {
                            warn!(
                                generation,
                                "all samples failed; deferring to the infeasibility criterion"
                            );
                        }
                        Err(e) => return Err(e),
                    }
                    (evaluated, failed)
                }
                // An infeasible proposal round still commits, reports, and
                // checkpoints its generation like any other.
                Err(GeneronError::InfeasibleBatch { .. }) if tolerate_infeasible => {
                    warn!(
                        generation,
                        "no feasible proposals; deferring to the infeasibility criterion"
                    );
                    (Vec::new(), 0)
                }
                Err(e) => return Err(e),
            };

            current_generation = generation;
            commit(experiment, solver.as_ref(), generation)?;

            let report = GenerationReport {
                index: generation,
                evaluated: evaluated.len(),
                failed,
                best_value: solver.progress().best_value,
            };
            if console_frequency > 0 && generation % console_frequency == 0 {
                info!(
                    generation = report.index,
                    evaluated = report.evaluated,
                    failed = report.failed,
                    best = ?report.best_value,
                    "generation complete"
                );
            }
            reports.push(report);

            if let Some(cp) = &checkpoints {
                if cp.should_save(generation) {
                    state = RunState::Checkpointing;
                    debug!(state = %state, "run state");
                    if let Err(e) = cp.save_generation(experiment.tree()) {
                        warn!(generation, error = %e, "checkpoint write failed; run continues in memory");
                    }
                    state = RunState::Running;
                    debug!(state = %state, "run state");
                }
            }
        };

        state = RunState::Terminated;
        debug!(state = %state, "run state");

        let best_value = solver.progress().best_value;
        experiment
            .tree_mut()
            .overwrite("General/Termination Reason", stop_reason.to_string())?;
        if let Some(cp) = &checkpoints {
            if let Err(e) = cp.save_final(experiment.tree()) {
                warn!(error = %e, "final snapshot failed");
            }
        }

        let runtime_secs = started.elapsed().as_secs_f64();
        info!(
            run_id = %run_id,
            generations = current_generation,
            reason = %stop_reason,
            best = ?best_value,
            runtime_secs,
            "run terminated"
        );

        Ok(RunSummary {
            run_id,
            generations: current_generation,
            stop_reason,
            best_value,
            runtime_secs,
            reports,
        })
    }

    /// Run several experiments concurrently, one task each.
    ///
    /// Results come back in submission order, each run succeeding or failing
    /// independently. Cancelling this engine cancels every run.
    pub async fn run_all(
        &self,
        experiments: Vec<Experiment>,
    ) -> Result<Vec<(Experiment, Result<RunSummary>)>> {
        let mut handles = Vec::with_capacity(experiments.len());
        for mut experiment in experiments {
            let engine = self.clone();
            handles.push(tokio::spawn(async move {
                let outcome = engine.run(&mut experiment).await;
                (experiment, outcome)
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            let (experiment, outcome) = handle
                .await
                .map_err(|e| GeneronError::Internal(format!("run task aborted: {e}")))?;
            results.push((experiment, outcome));
        }
        Ok(results)
    }
}

/// Commit one generation: bump the counter and mirror the solver state into
/// the tree, so every later snapshot is self-contained.
fn commit(
    experiment: &mut Experiment,
    solver: &dyn SolverStrategy,
    generation: u64,
) -> Result<()> {
    let internal = solver.internal_state()?;
    let tree = experiment.tree_mut();
    tree.overwrite("General/Current Generation", generation)?;
    tree.overwrite("General/Timestamp", Utc::now().to_rfc3339())?;
    tree.overwrite("Solver/Internal", internal)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::checkpoint::read_checkpoint;
    use crate::models::Sample;
    use std::path::Path;
    use tempfile::TempDir;

    fn sphere_experiment(dir: &Path, max_generations: u64, seed: u64) -> Experiment {
        let mut e = Experiment::new(|s: &mut Sample| -> Result<()> {
            let v: f64 = s.variables.iter().map(|x| -x * x).sum();
            s.add_result(v);
            Ok(())
        });
        e.set("Problem/Type", "Evaluation/Direct").unwrap();
        e.set("Solver/Type", "Optimizer/Population").unwrap();
        e.set("Solver/Population Size", 8).unwrap();
        e.set("Random Seed", seed).unwrap();
        e.set("Variables/0/Name", "X").unwrap();
        e.set("Variables/0/Lower Bound", -10.0).unwrap();
        e.set("Variables/0/Upper Bound", 10.0).unwrap();
        e.set("Solver/Termination Criteria/Max Generations", max_generations)
            .unwrap();
        e.set("Results Output/Path", dir.to_str().unwrap()).unwrap();
        e
    }

    #[tokio::test]
    async fn run_stops_at_max_generations_and_writes_snapshots() {
        let dir = TempDir::new().unwrap();
        let mut e = sphere_experiment(dir.path(), 5, 77);
        let summary = Engine::new().run(&mut e).await.unwrap();

        assert_eq!(summary.stop_reason, StopReason::MaxGenerations);
        assert_eq!(summary.generations, 5);
        assert_eq!(summary.reports.len(), 5);
        assert_eq!(e.tree().get_u64("General/Current Generation").unwrap(), 5);

        for generation in 0..=5u64 {
            assert!(dir.path().join(format!("s{generation:05}.json")).exists());
        }
        let final_tree = read_checkpoint(&dir.path().join("final.json")).unwrap();
        assert_eq!(
            final_tree.get_str("General/Termination Reason").unwrap(),
            "Max Generations"
        );
        assert_eq!(final_tree.get_str("General/Run ID").unwrap(), summary.run_id);
    }

    #[tokio::test]
    async fn max_value_stops_before_the_generation_budget() {
        let dir = TempDir::new().unwrap();
        let mut e = sphere_experiment(dir.path(), 50, 5);
        e.set("Solver/Termination Criteria/Max Value", -150.0).unwrap();
        let summary = Engine::new().run(&mut e).await.unwrap();
        assert_eq!(summary.stop_reason, StopReason::MaxValue);
        assert!(summary.generations < 50);
    }

    #[tokio::test]
    async fn resumed_run_matches_an_uninterrupted_one() {
        let dir_a = TempDir::new().unwrap();
        let dir_b = TempDir::new().unwrap();
        let engine = Engine::new();

        let mut a = sphere_experiment(dir_a.path(), 6, 4242);
        engine.run(&mut a).await.unwrap();

        let mut b = sphere_experiment(dir_b.path(), 3, 4242);
        engine.run(&mut b).await.unwrap();
        let untouched = std::fs::read(dir_b.path().join("s00002.json")).unwrap();

        let mut resumed = sphere_experiment(dir_b.path(), 3, 4242);
        resumed.load_latest(dir_b.path()).unwrap();
        resumed
            .set("Solver/Termination Criteria/Max Generations", 6)
            .unwrap();
        let summary = engine.run(&mut resumed).await.unwrap();
        assert_eq!(summary.generations, 6);

        // Interrupted-plus-resumed reaches the same internal state as the
        // uninterrupted run with the same seed.
        assert_eq!(
            a.tree().get("Solver/Internal").unwrap(),
            resumed.tree().get("Solver/Internal").unwrap()
        );
        // Snapshots written before the interruption are untouched.
        assert_eq!(
            std::fs::read(dir_b.path().join("s00002.json")).unwrap(),
            untouched
        );
    }

    fn bayes_experiment(dir: &Path, max_generations: u64, seed: u64) -> Experiment {
        let mut e = Experiment::new(|s: &mut Sample| -> Result<()> {
            let ll: f64 = s.variables.iter().map(|x| -0.5 * x * x).sum();
            s.set_log_likelihood(ll);
            Ok(())
        });
        e.set("Problem/Type", "Evaluation/Bayesian").unwrap();
        e.set("Solver/Type", "Sampler/Annealed").unwrap();
        e.set("Solver/Population Size", 64).unwrap();
        e.set("Solver/Annealing Increment", 0.1).unwrap();
        e.set("Random Seed", seed).unwrap();
        e.set("Variables/0/Name", "Theta").unwrap();
        e.set("Variables/0/Prior Distribution", "Uniform Prior").unwrap();
        e.set("Distributions/0/Name", "Uniform Prior").unwrap();
        e.set("Distributions/0/Type", "Univariate/Uniform").unwrap();
        e.set("Distributions/0/Minimum", -5.0).unwrap();
        e.set("Distributions/0/Maximum", 5.0).unwrap();
        e.set("Solver/Termination Criteria/Max Generations", max_generations)
            .unwrap();
        e.set("Results Output/Path", dir.to_str().unwrap()).unwrap();
        e
    }

    #[tokio::test]
    async fn sampler_resume_extends_the_run_without_rewriting_history() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::new();

        let mut first = bayes_experiment(dir.path(), 2, 2024);
        let summary = engine.run(&mut first).await.unwrap();
        assert_eq!(summary.generations, 2);
        let before = std::fs::read(dir.path().join("s00001.json")).unwrap();

        let mut resumed = bayes_experiment(dir.path(), 2, 2024);
        resumed.load_latest(dir.path()).unwrap();
        resumed
            .set("Solver/Termination Criteria/Max Generations", 4)
            .unwrap();
        let summary = engine.run(&mut resumed).await.unwrap();
        assert_eq!(summary.stop_reason, StopReason::MaxGenerations);
        assert_eq!(
            resumed.tree().get_u64("General/Current Generation").unwrap(),
            4
        );
        // Committed snapshots from before the resume are byte-identical.
        assert_eq!(std::fs::read(dir.path().join("s00001.json")).unwrap(), before);
    }

    fn gradient_free_rprop_experiment(dir: &Path, max_infeasible: u64) -> Experiment {
        // The model never supplies a gradient, so every batch fails the
        // model contract and the infeasibility criterion must end the run.
        let mut e = Experiment::new(|s: &mut Sample| -> Result<()> {
            let x = s.variable(0);
            s.add_result(-x * x);
            Ok(())
        });
        e.set("Problem/Type", "Evaluation/Direct/Gradient").unwrap();
        e.set("Solver/Type", "Optimizer/Rprop").unwrap();
        e.set("Variables/0/Name", "X").unwrap();
        e.set("Variables/0/Initial Value", 2.0).unwrap();
        e.set(
            "Solver/Termination Criteria/Max Infeasible Resamplings",
            max_infeasible,
        )
        .unwrap();
        e.set("Results Output/Path", dir.to_str().unwrap()).unwrap();
        e
    }

    #[tokio::test]
    async fn persistent_infeasibility_stops_the_run() {
        let dir = TempDir::new().unwrap();
        let mut e = gradient_free_rprop_experiment(dir.path(), 3);
        let summary = Engine::new().run(&mut e).await.unwrap();

        assert_eq!(summary.stop_reason, StopReason::MaxInfeasibleResamplings);
        assert_eq!(summary.generations, 3);
        // Tolerated-infeasible generations still report and checkpoint.
        assert_eq!(summary.reports.len(), 3);
        for generation in 0..=3u64 {
            assert!(dir.path().join(format!("s{generation:05}.json")).exists());
        }
    }

    #[tokio::test]
    async fn infeasible_batch_is_fatal_when_resampling_is_not_tolerated() {
        let dir = TempDir::new().unwrap();
        let mut e = Experiment::new(|_s: &mut Sample| -> Result<()> {
            Err(GeneronError::ModelEvaluation {
                sample: 0,
                detail: "diverged".to_string(),
            })
        });
        e.set("Problem/Type", "Evaluation/Direct").unwrap();
        e.set("Solver/Type", "Optimizer/Population").unwrap();
        e.set("Solver/Population Size", 8).unwrap();
        e.set("Variables/0/Name", "X").unwrap();
        e.set("Variables/0/Lower Bound", -10.0).unwrap();
        e.set("Variables/0/Upper Bound", 10.0).unwrap();
        e.set("Solver/Termination Criteria/Max Generations", 5).unwrap();
        e.set("Results Output/Path", dir.path().to_str().unwrap())
            .unwrap();

        assert!(matches!(
            Engine::new().run(&mut e).await,
            Err(GeneronError::InfeasibleBatch { generation: 1 })
        ));
    }

    #[tokio::test]
    async fn checkpoint_write_failures_do_not_stop_the_run() {
        let dir = TempDir::new().unwrap();
        // A directory squatting on each snapshot path makes the atomic
        // rename fail.
        for name in ["s00000.json", "s00001.json", "s00002.json", "final.json"] {
            std::fs::create_dir(dir.path().join(name)).unwrap();
        }
        let mut e = sphere_experiment(dir.path(), 2, 11);
        let summary = Engine::new().run(&mut e).await.unwrap();

        assert_eq!(summary.stop_reason, StopReason::MaxGenerations);
        assert_eq!(summary.generations, 2);
        assert_eq!(e.tree().get_u64("General/Current Generation").unwrap(), 2);
    }

    #[tokio::test]
    async fn unbounded_run_yields_to_the_runtime() {
        let dir = TempDir::new().unwrap();
        let mut e = sphere_experiment(dir.path(), 0, 3);
        e.set("Results Output/Frequency", 0).unwrap();

        // With every criterion disabled the run never ends on its own; the
        // timeout can only fire if the run future suspends between
        // generations.
        let outcome = tokio::time::timeout(
            std::time::Duration::from_millis(200),
            Engine::new().run(&mut e),
        )
        .await;
        assert!(outcome.is_err());
    }

    #[tokio::test]
    async fn resuming_from_the_initial_snapshot_leaves_it_untouched() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::new();

        let mut first = sphere_experiment(dir.path(), 2, 31);
        engine.run(&mut first).await.unwrap();
        let before = std::fs::read(dir.path().join("s00000.json")).unwrap();

        let mut resumed = sphere_experiment(dir.path(), 2, 31);
        resumed
            .load_state(&dir.path().join("s00000.json"))
            .unwrap();
        let summary = engine.run(&mut resumed).await.unwrap();

        assert_eq!(summary.generations, 2);
        assert_eq!(
            std::fs::read(dir.path().join("s00000.json")).unwrap(),
            before
        );
        assert_eq!(
            first.tree().get("Solver/Internal").unwrap(),
            resumed.tree().get("Solver/Internal").unwrap()
        );
    }

    #[tokio::test]
    async fn cancellation_honored_before_the_first_batch() {
        let dir = TempDir::new().unwrap();
        let mut e = sphere_experiment(dir.path(), 0, 9);
        let engine = Engine::new();
        engine.cancel_handle().cancel();

        let summary = engine.run(&mut e).await.unwrap();
        assert_eq!(summary.stop_reason, StopReason::Cancelled);
        assert_eq!(summary.generations, 0);
        assert!(dir.path().join("final.json").exists());
    }

    #[tokio::test]
    async fn run_all_preserves_submission_order() {
        let dir_a = TempDir::new().unwrap();
        let dir_b = TempDir::new().unwrap();
        let experiments = vec![
            sphere_experiment(dir_a.path(), 2, 1),
            sphere_experiment(dir_b.path(), 3, 2),
        ];
        let results = Engine::new().run_all(experiments).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].1.as_ref().unwrap().generations, 2);
        assert_eq!(results[1].1.as_ref().unwrap().generations, 3);
    }
}
