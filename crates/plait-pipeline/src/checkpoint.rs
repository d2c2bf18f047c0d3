//! Durable progress state for resumable runs.
//!
//! Two files live in the checkpoint directory: `progress.json`, the
//! summary overwritten on every save (via temp-file-then-rename with an
//! fsync so a crash never leaves a half-written summary), and
//! `results.jsonl`, an append-only log of successful records, one JSON
//! object per line in process order.

use std::{
  collections::HashSet,
  fs,
  io::Write as _,
  path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

const PROGRESS_FILE: &str = "progress.json";
const RESULTS_FILE: &str = "results.jsonl";

// ─── Checkpoint ──────────────────────────────────────────────────────────────

/// The persisted summary: which item ids have been handled and which
/// failed. Failed ids are *not* skipped on resume — re-running the same
/// input retries them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Checkpoint {
  pub total_items:   u64,
  pub processed_ids: Vec<String>,
  pub failed_ids:    Vec<String>,
  pub last_saved_at: Option<DateTime<Utc>>,
}

impl Checkpoint {
  /// The ids to skip when resuming.
  pub fn processed_set(&self) -> HashSet<&str> {
    self.processed_ids.iter().map(String::as_str).collect()
  }
}

// ─── CheckpointStore ─────────────────────────────────────────────────────────

/// File-backed storage for one run's checkpoint and results.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
  dir: PathBuf,
}

impl CheckpointStore {
  /// Use (and create if needed) `dir` as the checkpoint directory.
  pub fn create(dir: impl Into<PathBuf>) -> Result<Self> {
    let dir = dir.into();
    fs::create_dir_all(&dir)?;
    Ok(Self { dir })
  }

  pub fn progress_path(&self) -> PathBuf { self.dir.join(PROGRESS_FILE) }

  pub fn results_path(&self) -> PathBuf { self.dir.join(RESULTS_FILE) }

  /// Load the persisted checkpoint. `Ok(None)` means no checkpoint exists;
  /// an unreadable file is [`Error::CorruptCheckpoint`], never silently
  /// treated as absent.
  pub fn load(&self) -> Result<Option<Checkpoint>> {
    let path = self.progress_path();
    let raw = match fs::read_to_string(&path) {
      Ok(raw) => raw,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(e.into()),
    };

    match serde_json::from_str(&raw) {
      Ok(checkpoint) => Ok(Some(checkpoint)),
      Err(e) => {
        Err(Error::CorruptCheckpoint { path, cause: e.to_string() })
      }
    }
  }

  /// Overwrite the checkpoint summary durably.
  pub fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
    let path = self.progress_path();
    let tmp = path.with_extension("json.tmp");

    let mut file = fs::File::create(&tmp)?;
    file.write_all(serde_json::to_string_pretty(checkpoint)?.as_bytes())?;
    file.sync_all()?;
    drop(file);
    fs::rename(&tmp, &path)?;

    tracing::debug!(
      processed = checkpoint.processed_ids.len(),
      failed = checkpoint.failed_ids.len(),
      "checkpoint saved"
    );
    Ok(())
  }

  /// Append successful results, one JSON object per line, and flush.
  pub fn append_results<T: Serialize>(&self, results: &[T]) -> Result<()> {
    if results.is_empty() {
      return Ok(());
    }

    let mut file = fs::OpenOptions::new()
      .create(true)
      .append(true)
      .open(self.results_path())?;
    for result in results {
      let line = serde_json::to_string(result)?;
      file.write_all(line.as_bytes())?;
      file.write_all(b"\n")?;
    }
    file.sync_all()?;
    Ok(())
  }

  /// Discard all persisted state. The explicit operator escape hatch for a
  /// corrupt checkpoint, and the start of every non-resume run.
  pub fn reset(&self) -> Result<()> {
    for path in [self.progress_path(), self.results_path()] {
      remove_if_exists(&path)?;
    }
    Ok(())
  }
}

fn remove_if_exists(path: &Path) -> Result<()> {
  match fs::remove_file(path) {
    Ok(()) => Ok(()),
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
    Err(e) => Err(e.into()),
  }
}
