//! Error type for `plait-pipeline`.
//!
//! Only checkpoint problems abort a run; item-level failures are isolated
//! and reported through [`crate::RunStats`] instead.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("checkpoint I/O error: {0}")]
  Io(#[from] std::io::Error),

  /// Persisted resume state exists but cannot be read. Deliberately
  /// distinct from "no checkpoint": the pipeline refuses to silently start
  /// from scratch; the operator must reset explicitly.
  #[error("checkpoint at {path} is unreadable ({cause}); reset it explicitly to start over")]
  CorruptCheckpoint { path: PathBuf, cause: String },

  #[error("serialization error: {0}")]
  Json(#[from] serde_json::Error),
}

impl Error {
  pub fn is_corrupt_checkpoint(&self) -> bool {
    matches!(self, Self::CorruptCheckpoint { .. })
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
