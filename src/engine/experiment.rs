//! One experiment: a configuration tree paired with its computational model.

use crate::conduit::Model;
use crate::config::ConfigTree;
use crate::engine::checkpoint::{latest_result, read_checkpoint};
use crate::models::{GeneronError, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// A configured problem instance ready to be run by the [`Engine`].
///
/// [`Engine`]: crate::engine::Engine
pub struct Experiment {
    tree: ConfigTree,
    model: Arc<dyn Model>,
}

impl Experiment {
    /// Create an experiment with an empty configuration tree.
    pub fn new(model: impl Model + 'static) -> Self {
        Self::with_tree(ConfigTree::new(), model)
    }

    /// Create an experiment from a pre-built tree.
    pub fn with_tree(tree: ConfigTree, model: impl Model + 'static) -> Self {
        Self {
            tree,
            model: Arc::new(model),
        }
    }

    /// Borrow the configuration tree.
    pub fn tree(&self) -> &ConfigTree {
        &self.tree
    }

    /// Borrow the configuration tree mutably.
    pub fn tree_mut(&mut self) -> &mut ConfigTree {
        &mut self.tree
    }

    /// Convenience setter; see [`ConfigTree::set`].
    pub fn set(&mut self, path: &str, value: impl Into<Value>) -> Result<()> {
        self.tree.set(path, value)
    }

    /// Convenience getter; see [`ConfigTree::get`].
    pub fn get(&self, path: &str) -> Result<&Value> {
        self.tree.get(path)
    }

    pub(crate) fn model(&self) -> Arc<dyn Model> {
        Arc::clone(&self.model)
    }

    /// Adopt the state stored in one snapshot file.
    ///
    /// Any `Problem/Type` or `Solver/Type` already set on this experiment
    /// must agree with the stored values; a conflict is an
    /// `IncompatibleCheckpoint` error and the experiment is left untouched.
    pub fn load_state(&mut self, path: &Path) -> Result<()> {
        let stored = read_checkpoint(path)?;
        for key in ["Problem/Type", "Solver/Type"] {
            if let (Some(current), Some(incoming)) = (self.tree.get_opt(key), stored.get_opt(key))
            {
                if current != incoming {
                    return Err(GeneronError::IncompatibleCheckpoint {
                        expected: current.to_string(),
                        found: incoming.to_string(),
                    });
                }
            }
        }
        let generation = stored.get_u64_opt("General/Current Generation")?.unwrap_or(0);
        info!(path = %path.display(), generation, "restored experiment state");
        self.tree = stored;
        Ok(())
    }

    /// Adopt the newest usable snapshot in a results directory, returning
    /// the file that was loaded.
    pub fn load_latest(&mut self, dir: &Path) -> Result<PathBuf> {
        let path = latest_result(dir)?;
        self.load_state(&path)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::checkpoint::CheckpointManager;
    use crate::models::Sample;
    use tempfile::TempDir;

    fn noop_model() -> impl Model {
        |s: &mut Sample| -> Result<()> {
            s.add_result(0.0);
            Ok(())
        }
    }

    fn write_snapshot(dir: &Path, generation: u64, solver: &str) -> PathBuf {
        let cp = CheckpointManager::new(dir, 1).unwrap();
        let mut t = ConfigTree::new();
        t.set("General/Current Generation", generation).unwrap();
        t.set("General/Run ID", "run-a").unwrap();
        t.set("Solver/Type", solver).unwrap();
        cp.save_generation(&t).unwrap()
    }

    #[test]
    fn load_state_adopts_the_stored_tree() {
        let dir = TempDir::new().unwrap();
        let path = write_snapshot(dir.path(), 4, "Optimizer/Population");

        let mut e = Experiment::new(noop_model());
        e.load_state(&path).unwrap();
        assert_eq!(e.tree().get_u64("General/Current Generation").unwrap(), 4);
        assert_eq!(e.tree().get_str("General/Run ID").unwrap(), "run-a");
    }

    #[test]
    fn conflicting_solver_type_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_snapshot(dir.path(), 2, "Optimizer/Population");

        let mut e = Experiment::new(noop_model());
        e.set("Solver/Type", "Sampler/Annealed").unwrap();
        assert!(matches!(
            e.load_state(&path),
            Err(GeneronError::IncompatibleCheckpoint { .. })
        ));
        // Untouched on failure.
        assert_eq!(e.tree().get_str("Solver/Type").unwrap(), "Sampler/Annealed");
    }

    #[test]
    fn load_latest_finds_the_newest_snapshot() {
        let dir = TempDir::new().unwrap();
        write_snapshot(dir.path(), 1, "Optimizer/Population");
        let newest = write_snapshot(dir.path(), 3, "Optimizer/Population");

        let mut e = Experiment::new(noop_model());
        let loaded = e.load_latest(dir.path()).unwrap();
        assert_eq!(loaded, newest);
        assert_eq!(e.tree().get_u64("General/Current Generation").unwrap(), 3);
    }
}
