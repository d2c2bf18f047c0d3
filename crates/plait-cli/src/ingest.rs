//! JSONL ingest — the adapter boundary.
//!
//! Each input file carries wire-format records, one JSON object per line,
//! as produced by the per-platform extractors (and by `plait export`).

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use plait_core::event::RawRecord;
use plait_pipeline::{ItemTransform, TransformOutcome};

/// One input line, keyed for the checkpoint.
pub struct IngestItem {
  pub key:  String,
  pub line: String,
}

fn file_label(path: &Path) -> String {
  path
    .file_name()
    .map(|n| n.to_string_lossy().into_owned())
    .unwrap_or_else(|| path.display().to_string())
}

/// Read all input files into items. Blank lines are skipped. The checkpoint
/// key is the record's `id` field; a line without a readable id is keyed
/// `{file}:{line_number}` so it still gets attempted (and retried) rather
/// than silently dropped.
pub fn read_items(paths: &[PathBuf]) -> anyhow::Result<Vec<IngestItem>> {
  let mut items = Vec::new();
  for path in paths {
    let raw = std::fs::read_to_string(path)
      .with_context(|| format!("reading input file {}", path.display()))?;
    let label = file_label(path);

    let before = items.len();
    for (index, line) in raw.lines().enumerate() {
      let line = line.trim();
      if line.is_empty() {
        continue;
      }
      let key = serde_json::from_str::<serde_json::Value>(line)
        .ok()
        .and_then(|v| v.get("id")?.as_str().map(str::to_owned))
        .unwrap_or_else(|| format!("{label}:{}", index + 1));
      items.push(IngestItem { key, line: line.to_owned() });
    }
    tracing::info!(
      file = %path.display(),
      records = items.len() - before,
      "loaded input file"
    );
  }
  Ok(items)
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
  #[error("malformed record: {0}")]
  Parse(#[from] serde_json::Error),
}

/// Parses each line into a wire-format record, dropping records older than
/// the configured start date.
pub struct JsonlTransform {
  pub start_date: Option<DateTime<Utc>>,
}

impl ItemTransform<IngestItem> for JsonlTransform {
  type Error = IngestError;

  fn item_id(&self, item: &IngestItem) -> String { item.key.clone() }

  async fn transform(
    &self,
    item: &IngestItem,
  ) -> Result<TransformOutcome, IngestError> {
    let record: RawRecord = serde_json::from_str(&item.line)?;
    if let Some(cutoff) = self.start_date
      && record.timestamp < cutoff
    {
      return Ok(TransformOutcome::Filtered);
    }
    Ok(TransformOutcome::Record(record))
  }
}
