//! The chunked processor — the single worker that walks a batch.

use std::{collections::HashSet, future::Future};

use chrono::Utc;
use plait_core::{event::RawRecord, ledger::Ledger, validate::check_record};
use serde::Serialize;

use crate::{
  Result,
  checkpoint::{Checkpoint, CheckpointStore},
  interrupt::Interrupt,
};

// ─── Transform contract ──────────────────────────────────────────────────────

/// What a per-item transform produced.
#[derive(Debug, Clone, PartialEq)]
pub enum TransformOutcome {
  /// A wire-format record, ready for validation and ledger insertion.
  Record(RawRecord),
  /// The adapter intentionally dropped the item (date filter, tombstone).
  /// Counted as skipped and checkpointed so resume does not revisit it.
  Filtered,
}

/// The pluggable per-item transform supplied by each source adapter.
///
/// Transforms may perform blocking I/O against external sources; retry and
/// backoff around flaky calls belong inside the transform, not in the
/// processor.
pub trait ItemTransform<I>: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Stable unique identifier for an item; the checkpoint is keyed on it.
  fn item_id(&self, item: &I) -> String;

  fn transform<'a>(
    &'a self,
    item: &'a I,
  ) -> impl Future<Output = Result<TransformOutcome, Self::Error>> + Send + 'a;
}

// ─── Configuration and stats ─────────────────────────────────────────────────

/// Chunking knobs. Smaller chunks checkpoint more often (less reprocessing
/// after a crash) at higher I/O cost.
#[derive(Debug, Clone, Copy)]
pub struct ChunkConfig {
  /// Items per chunk; the checkpoint is saved unconditionally at every
  /// chunk boundary.
  pub chunk_size:    usize,
  /// Additionally save after every N handled items within a chunk.
  pub save_interval: usize,
}

impl Default for ChunkConfig {
  fn default() -> Self { Self { chunk_size: 100, save_interval: 10 } }
}

/// One isolated item failure, surfaced to the operator at end of run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
  pub item_id: String,
  pub cause:   String,
}

/// How the run ended. `Interrupted` is not terminal — a new run with
/// `resume` continues where this one stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
  Completed,
  Interrupted,
}

/// End-of-run statistics.
#[derive(Debug, Clone)]
pub struct RunStats {
  /// Items actually attempted this run (not resume-skipped).
  pub processed: u64,
  pub succeeded: u64,
  pub failed:    u64,
  pub skipped:   u64,
  pub failures:  Vec<Failure>,
  pub outcome:   RunOutcome,
}

impl RunStats {
  fn new() -> Self {
    Self {
      processed: 0,
      succeeded: 0,
      failed: 0,
      skipped: 0,
      failures: Vec::new(),
      outcome: RunOutcome::Completed,
    }
  }
}

// ─── Processor ───────────────────────────────────────────────────────────────

/// Walks items in fixed-size chunks through transform → validation →
/// ledger insertion, checkpointing as it goes. Single-threaded by design:
/// resolution order is part of the ledger's correctness contract.
pub struct Processor {
  config:    ChunkConfig,
  store:     CheckpointStore,
  interrupt: Interrupt,
}

impl Processor {
  pub fn new(config: ChunkConfig, store: CheckpointStore) -> Self {
    Self { config, store, interrupt: Interrupt::new() }
  }

  /// Use an externally shared interrupt flag (e.g. tripped by ctrl-c).
  pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
    self.interrupt = interrupt;
    self
  }

  /// Process `items` in input order.
  ///
  /// With `resume`, items recorded as processed in the checkpoint are
  /// skipped; previously failed items are retried. Without `resume`, any
  /// existing checkpoint is discarded and the run starts fresh.
  ///
  /// Item-level failures never abort the run; only checkpoint problems do.
  pub async fn process<I, T, L>(
    &self,
    items: &[I],
    transform: &T,
    ledger: &L,
    resume: bool,
  ) -> Result<RunStats>
  where
    I: Sync,
    T: ItemTransform<I>,
    L: Ledger,
  {
    let mut checkpoint = if resume {
      self.store.load()?.unwrap_or_default()
    } else {
      self.store.reset()?;
      Checkpoint::default()
    };
    checkpoint.total_items = items.len() as u64;

    let done: HashSet<String> =
      checkpoint.processed_set().iter().map(|s| s.to_string()).collect();

    let total_chunks = items.len().div_ceil(self.config.chunk_size.max(1));
    tracing::info!(
      total_items = items.len(),
      chunk_size = self.config.chunk_size,
      resume,
      already_processed = done.len(),
      "starting chunked processing"
    );

    let mut stats = RunStats::new();
    let mut pending: Vec<RawRecord> = Vec::new();
    let mut since_save = 0usize;

    'chunks: for (chunk_index, chunk) in
      items.chunks(self.config.chunk_size.max(1)).enumerate()
    {
      for item in chunk {
        if self.interrupt.is_tripped() {
          tracing::warn!("interrupted; persisting progress before stopping");
          stats.outcome = RunOutcome::Interrupted;
          break 'chunks;
        }

        let item_id = transform.item_id(item);
        if resume && done.contains(&item_id) {
          stats.skipped += 1;
          continue;
        }

        self
          .handle_item(item, &item_id, transform, ledger, &mut checkpoint, &mut stats, &mut pending)
          .await;
        stats.processed += 1;
        since_save += 1;

        if since_save >= self.config.save_interval.max(1) {
          self.persist(&mut checkpoint, &mut pending)?;
          since_save = 0;
        }
      }

      self.persist(&mut checkpoint, &mut pending)?;
      since_save = 0;
      tracing::info!(
        chunk = chunk_index + 1,
        total_chunks,
        processed = stats.processed,
        succeeded = stats.succeeded,
        failed = stats.failed,
        "chunk complete"
      );
    }

    // Unconditional final persist — also the guarantee that everything
    // completed before an interrupt is durably recorded.
    self.persist(&mut checkpoint, &mut pending)?;

    tracing::info!(
      processed = stats.processed,
      succeeded = stats.succeeded,
      failed = stats.failed,
      skipped = stats.skipped,
      interrupted = stats.outcome == RunOutcome::Interrupted,
      "processing finished"
    );
    Ok(stats)
  }

  #[allow(clippy::too_many_arguments)]
  async fn handle_item<I, T, L>(
    &self,
    item: &I,
    item_id: &str,
    transform: &T,
    ledger: &L,
    checkpoint: &mut Checkpoint,
    stats: &mut RunStats,
    pending: &mut Vec<RawRecord>,
  ) where
    I: Sync,
    T: ItemTransform<I>,
    L: Ledger,
  {
    let outcome = match transform.transform(item).await {
      Ok(outcome) => outcome,
      Err(e) => {
        record_failure(checkpoint, stats, item_id, &e.to_string());
        return;
      }
    };

    let record = match outcome {
      TransformOutcome::Record(record) => record,
      TransformOutcome::Filtered => {
        stats.skipped += 1;
        mark_done(checkpoint, item_id);
        return;
      }
    };

    let record = match check_record(record) {
      Ok(record) => record,
      Err(e) => {
        record_failure(checkpoint, stats, item_id, &e.to_string());
        return;
      }
    };

    match ledger.add_event(record.clone()).await {
      Ok(true) => {
        stats.succeeded += 1;
        mark_done(checkpoint, item_id);
        pending.push(record);
      }
      Ok(false) => {
        // Idempotent ingestion: a duplicate id is a skip, not an error.
        stats.skipped += 1;
        mark_done(checkpoint, item_id);
      }
      Err(e) => {
        record_failure(checkpoint, stats, item_id, &e.to_string());
      }
    }
  }

  fn persist(
    &self,
    checkpoint: &mut Checkpoint,
    pending: &mut Vec<RawRecord>,
  ) -> Result<()> {
    self.store.append_results(pending)?;
    pending.clear();
    checkpoint.last_saved_at = Some(Utc::now());
    self.store.save(checkpoint)
  }
}

fn mark_done(checkpoint: &mut Checkpoint, item_id: &str) {
  checkpoint.processed_ids.push(item_id.to_owned());
  // A retried item that now went through is no longer failed.
  checkpoint.failed_ids.retain(|id| id != item_id);
}

fn record_failure(
  checkpoint: &mut Checkpoint,
  stats: &mut RunStats,
  item_id: &str,
  cause: &str,
) {
  tracing::warn!(item_id, cause, "item failed (continuing)");
  stats.failed += 1;
  stats
    .failures
    .push(Failure { item_id: item_id.to_owned(), cause: cause.to_owned() });
  if !checkpoint.failed_ids.iter().any(|id| id == item_id) {
    checkpoint.failed_ids.push(item_id.to_owned());
  }
}
