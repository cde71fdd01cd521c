//! Result-file persistence.
//!
//! A run writes one full configuration snapshot per saved generation, named
//! `s00000.json`, `s00001.json`, ... inside the results directory, plus a
//! `final.json` marker once terminated. Writes are atomic (write-then-rename)
//! so a crash mid-save never leaves a truncated snapshot behind.

use crate::config::ConfigTree;
use crate::models::{GeneronError, Result};
use glob::glob;
use regex::Regex;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};

/// Persists generation snapshots for one run.
pub struct CheckpointManager {
    dir: PathBuf,
    frequency: u64,
}

impl CheckpointManager {
    /// Create a manager rooted at `dir`, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>, frequency: u64) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| GeneronError::io("creating results dir", e))?;
        Ok(Self { dir, frequency })
    }

    /// Results directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Whether generation `generation` falls on the save cadence.
    pub fn should_save(&self, generation: u64) -> bool {
        self.frequency > 0 && generation % self.frequency == 0
    }

    /// Snapshot file path for one generation.
    pub fn generation_path(&self, generation: u64) -> PathBuf {
        self.dir.join(format!("s{generation:05}.json"))
    }

    /// Path of the termination marker.
    pub fn final_path(&self) -> PathBuf {
        self.dir.join("final.json")
    }

    /// Write the snapshot for the tree's current generation.
    pub fn save_generation(&self, tree: &ConfigTree) -> Result<PathBuf> {
        let generation = tree.get_u64("General/Current Generation")?;
        let path = self.generation_path(generation);
        write_atomic(&path, tree)?;
        debug!(generation, path = %path.display(), "checkpoint saved");
        Ok(path)
    }

    /// Write the `final.json` marker for a terminated run.
    pub fn save_final(&self, tree: &ConfigTree) -> Result<PathBuf> {
        let path = self.final_path();
        write_atomic(&path, tree)?;
        debug!(path = %path.display(), "final snapshot saved");
        Ok(path)
    }
}

/// Atomic snapshot write: temp file in the same directory, then rename.
fn write_atomic(path: &Path, tree: &ConfigTree) -> Result<()> {
    let temp = path.with_extension("json.tmp");
    let write = || -> std::io::Result<()> {
        let file = File::create(&temp)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(tree.serialize().as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        fs::rename(&temp, path)
    };
    write().map_err(|source| GeneronError::CheckpointWrite {
        path: path.to_path_buf(),
        source,
    })
}

/// Read one snapshot file back into a tree.
pub fn read_checkpoint(path: &Path) -> Result<ConfigTree> {
    let text = fs::read_to_string(path)
        .map_err(|e| GeneronError::io(format!("reading {}", path.display()), e))?;
    ConfigTree::deserialize(&text)
}

/// Find the newest usable generation snapshot in a results directory.
///
/// `final.json` is never a candidate. Files that fail to parse or carry no
/// run id are logged and skipped, falling back to the next-newest snapshot.
/// When snapshots from more than one run share the directory, the run that
/// wrote most recently owns it; snapshots carrying any other run id are
/// skipped with a warning, so a stale longer run cannot shadow a fresh
/// shorter one.
pub fn latest_result(dir: &Path) -> Result<PathBuf> {
    let pattern = dir.join("s*.json");
    let pattern = pattern
        .to_str()
        .ok_or_else(|| GeneronError::Internal("results path is not valid UTF-8".to_string()))?;
    let name_re = Regex::new(r"^s(\d{5})\.json$")
        .map_err(|e| GeneronError::Internal(format!("result file pattern: {e}")))?;

    let mut candidates: Vec<(u64, PathBuf)> = Vec::new();
    for entry in glob(pattern).map_err(|e| GeneronError::Internal(format!("result glob: {e}")))? {
        let path = match entry {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "unreadable results entry; skipping");
                continue;
            }
        };
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(caps) = name_re.captures(name) else {
            continue;
        };
        let Ok(index) = caps[1].parse::<u64>() else {
            continue;
        };
        candidates.push((index, path));
    }
    candidates.sort_by(|a, b| b.0.cmp(&a.0));

    let mut usable: Vec<(u64, PathBuf, String, SystemTime)> = Vec::new();
    for (index, path) in candidates {
        match read_checkpoint(&path) {
            Ok(tree) => match tree.get_str_opt("General/Run ID") {
                Ok(Some(id)) => {
                    let modified = fs::metadata(&path)
                        .and_then(|m| m.modified())
                        .unwrap_or(SystemTime::UNIX_EPOCH);
                    usable.push((index, path, id.to_string(), modified));
                }
                _ => warn!(path = %path.display(), "snapshot carries no run id; skipping"),
            },
            Err(e) => warn!(path = %path.display(), error = %e, "unreadable snapshot; skipping"),
        }
    }

    // The most recently written snapshot names the run that owns the
    // directory.
    let Some(anchor) = usable
        .iter()
        .max_by_key(|(_, _, _, modified)| *modified)
        .map(|(_, _, id, _)| id.clone())
    else {
        return Err(GeneronError::NoResults(dir.to_path_buf()));
    };

    for (index, path, id, _) in usable {
        if id == anchor {
            debug!(generation = index, path = %path.display(), "latest result");
            return Ok(path);
        }
        warn!(path = %path.display(), run_id = %id, "snapshot from a different run; skipping");
    }
    Err(GeneronError::NoResults(dir.to_path_buf()))
}
