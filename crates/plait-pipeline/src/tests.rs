//! Integration tests for the chunked processor against an in-memory
//! ledger and a temp-dir checkpoint store.

use std::collections::HashSet;

use chrono::{Duration, TimeZone, Utc};
use plait_core::{
  event::{EventId, PersonRef, RawRecord},
  ledger::Ledger as _,
  source::Source,
};
use plait_store_sqlite::SqliteLedger;
use tempfile::TempDir;

use crate::{
  ChunkConfig, CheckpointStore, Interrupt, ItemTransform, Processor,
  RunOutcome, TransformOutcome,
};

// ─── Fixtures ────────────────────────────────────────────────────────────────

fn rec(i: usize) -> RawRecord {
  let base = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();
  RawRecord {
    id:             EventId::parse(&format!("gmail:m{i}")).unwrap(),
    source:         Source::Gmail,
    timestamp:      base + Duration::seconds(i as i64),
    timezone:       None,
    sender:         PersonRef {
      email: Some(format!("sender{i}@example.com")),
      source_id: Some(format!("sender{i}@example.com")),
      source: Some(Source::Gmail),
      ..Default::default()
    },
    recipients:     vec![],
    subject:        None,
    body:           format!("hello {i}"),
    attachments:    vec![],
    thread_id:      None,
    is_read:        None,
    is_starred:     None,
    is_reply:       None,
    reply_to_id:    None,
    event_start:    None,
    event_end:      None,
    event_location: None,
    event_status:   None,
    raw_data:       serde_json::Value::Null,
  }
}

fn items(n: usize) -> Vec<RawRecord> { (1..=n).map(rec).collect() }

#[derive(Debug, thiserror::Error)]
#[error("adapter exploded on {0}")]
struct BoomError(String);

/// A transform over pre-built records with injectable failures, filtering,
/// and a mid-run interrupt trip.
#[derive(Default)]
struct TestTransform {
  fail:    HashSet<String>,
  filter:  HashSet<String>,
  trip_on: Option<(String, Interrupt)>,
}

impl ItemTransform<RawRecord> for TestTransform {
  type Error = BoomError;

  fn item_id(&self, item: &RawRecord) -> String { item.id.to_string() }

  async fn transform(
    &self,
    item: &RawRecord,
  ) -> Result<TransformOutcome, BoomError> {
    let id = item.id.to_string();
    if let Some((trip_id, interrupt)) = &self.trip_on {
      if *trip_id == id {
        interrupt.trip();
      }
    }
    if self.fail.contains(&id) {
      return Err(BoomError(id));
    }
    if self.filter.contains(&id) {
      return Ok(TransformOutcome::Filtered);
    }
    Ok(TransformOutcome::Record(item.clone()))
  }
}

async fn ledger() -> SqliteLedger {
  SqliteLedger::open_in_memory().await.expect("in-memory ledger")
}

fn processor(dir: &TempDir) -> Processor {
  let store = CheckpointStore::create(dir.path()).unwrap();
  Processor::new(ChunkConfig { chunk_size: 4, save_interval: 2 }, store)
}

// ─── Completion and resume ───────────────────────────────────────────────────

#[tokio::test]
async fn completed_run_then_resume_skips_everything() {
  let dir = TempDir::new().unwrap();
  let ledger = ledger().await;
  let items = items(10);
  let transform = TestTransform::default();

  let first = processor(&dir)
    .process(&items, &transform, &ledger, true)
    .await
    .unwrap();
  assert_eq!(first.succeeded, 10);
  assert_eq!(first.processed, 10);
  assert_eq!(first.failed, 0);
  assert_eq!(first.outcome, RunOutcome::Completed);

  let second = processor(&dir)
    .process(&items, &transform, &ledger, true)
    .await
    .unwrap();
  assert_eq!(second.succeeded, 0);
  assert_eq!(second.processed, 0);
  assert_eq!(second.skipped, first.succeeded);
}

#[tokio::test]
async fn results_file_has_one_line_per_success() {
  let dir = TempDir::new().unwrap();
  let ledger = ledger().await;
  let items = items(5);

  processor(&dir)
    .process(&items, &TestTransform::default(), &ledger, true)
    .await
    .unwrap();

  let store = CheckpointStore::create(dir.path()).unwrap();
  let contents = std::fs::read_to_string(store.results_path()).unwrap();
  let lines: Vec<_> = contents.lines().collect();
  assert_eq!(lines.len(), 5);
  // Written in process order, each line a wire-format record.
  let first: RawRecord = serde_json::from_str(lines[0]).unwrap();
  assert_eq!(first.id.as_str(), "gmail:m1");
}

// ─── Failure isolation ───────────────────────────────────────────────────────

#[tokio::test]
async fn one_bad_item_does_not_stop_the_chunk() {
  let dir = TempDir::new().unwrap();
  let ledger = ledger().await;
  let items = items(10);
  let transform = TestTransform {
    fail: ["gmail:m5".to_owned()].into(),
    ..Default::default()
  };

  let stats = processor(&dir)
    .process(&items, &transform, &ledger, true)
    .await
    .unwrap();

  assert_eq!(stats.succeeded, 9);
  assert_eq!(stats.failed, 1);
  assert_eq!(stats.failures.len(), 1);
  assert_eq!(stats.failures[0].item_id, "gmail:m5");
  assert!(stats.failures[0].cause.contains("exploded"));

  // Items 6-10 were still processed.
  assert_eq!(ledger.stats().await.unwrap().total_events, 9);
}

#[tokio::test]
async fn failed_items_are_retried_on_rerun() {
  let dir = TempDir::new().unwrap();
  let ledger = ledger().await;
  let items = items(10);

  let flaky = TestTransform {
    fail: ["gmail:m5".to_owned()].into(),
    ..Default::default()
  };
  processor(&dir).process(&items, &flaky, &ledger, true).await.unwrap();

  // Same input, transform healthy now: only the failed item is attempted.
  let healthy = TestTransform::default();
  let stats = processor(&dir)
    .process(&items, &healthy, &ledger, true)
    .await
    .unwrap();

  assert_eq!(stats.processed, 1);
  assert_eq!(stats.succeeded, 1);
  assert_eq!(stats.skipped, 9);

  let checkpoint = CheckpointStore::create(dir.path())
    .unwrap()
    .load()
    .unwrap()
    .unwrap();
  assert!(checkpoint.failed_ids.is_empty());
}

#[tokio::test]
async fn invalid_record_counts_as_failed() {
  let dir = TempDir::new().unwrap();
  let ledger = ledger().await;
  let mut bad = rec(1);
  bad.body = String::new();
  let items = vec![bad, rec(2)];

  let stats = processor(&dir)
    .process(&items, &TestTransform::default(), &ledger, true)
    .await
    .unwrap();

  assert_eq!(stats.failed, 1);
  assert_eq!(stats.succeeded, 1);
  assert!(stats.failures[0].cause.contains("body"));
}

// ─── Idempotence and filtering ───────────────────────────────────────────────

#[tokio::test]
async fn duplicate_event_id_is_a_skip() {
  let dir = TempDir::new().unwrap();
  let ledger = ledger().await;
  let mut twice = rec(1);
  // Same ledger id seen under a different checkpoint item id.
  twice.body = "same event, second sighting".into();
  let items = vec![rec(1), twice];

  // Distinct checkpoint keys so resume-skipping is not what hides the dup.
  struct ByIndex(TestTransform);
  impl ItemTransform<RawRecord> for ByIndex {
    type Error = BoomError;
    fn item_id(&self, item: &RawRecord) -> String {
      format!("{}:{}", item.id, item.body.len())
    }
    async fn transform(
      &self,
      item: &RawRecord,
    ) -> Result<TransformOutcome, BoomError> {
      self.0.transform(item).await
    }
  }

  let stats = processor(&dir)
    .process(&items, &ByIndex(TestTransform::default()), &ledger, true)
    .await
    .unwrap();

  assert_eq!(stats.succeeded, 1);
  assert_eq!(stats.skipped, 1);
  assert_eq!(ledger.stats().await.unwrap().total_events, 1);
}

#[tokio::test]
async fn filtered_items_are_not_revisited_on_resume() {
  let dir = TempDir::new().unwrap();
  let ledger = ledger().await;
  let items = items(10);
  let transform = TestTransform {
    filter: ["gmail:m2".to_owned()].into(),
    ..Default::default()
  };

  let first = processor(&dir)
    .process(&items, &transform, &ledger, true)
    .await
    .unwrap();
  assert_eq!(first.succeeded, 9);
  assert_eq!(first.skipped, 1);

  let second = processor(&dir)
    .process(&items, &transform, &ledger, true)
    .await
    .unwrap();
  assert_eq!(second.processed, 0);
  assert_eq!(second.skipped, 10);
}

// ─── Interruption ────────────────────────────────────────────────────────────

#[tokio::test]
async fn interrupt_persists_progress_and_resume_continues() {
  let dir = TempDir::new().unwrap();
  let ledger = ledger().await;
  let items = items(10);

  let interrupt = Interrupt::new();
  let transform = TestTransform {
    trip_on: Some(("gmail:m3".to_owned(), interrupt.clone())),
    ..Default::default()
  };

  let first = processor(&dir)
    .with_interrupt(interrupt)
    .process(&items, &transform, &ledger, true)
    .await
    .unwrap();

  // The in-flight item (m3) ran to completion; m4 onwards never started.
  assert_eq!(first.outcome, RunOutcome::Interrupted);
  assert_eq!(first.processed, 3);
  assert_eq!(first.succeeded, 3);

  let second = processor(&dir)
    .process(&items, &TestTransform::default(), &ledger, true)
    .await
    .unwrap();
  assert_eq!(second.outcome, RunOutcome::Completed);
  assert_eq!(second.skipped, 3);
  assert_eq!(second.succeeded, 7);
  assert_eq!(ledger.stats().await.unwrap().total_events, 10);
}

// ─── Checkpoint integrity ────────────────────────────────────────────────────

#[tokio::test]
async fn corrupt_checkpoint_refuses_to_resume() {
  let dir = TempDir::new().unwrap();
  let ledger = ledger().await;
  let items = items(3);

  let store = CheckpointStore::create(dir.path()).unwrap();
  std::fs::write(store.progress_path(), "{ not json").unwrap();

  let err = processor(&dir)
    .process(&items, &TestTransform::default(), &ledger, true)
    .await
    .unwrap_err();
  assert!(err.is_corrupt_checkpoint());

  // An explicit fresh start (resume = false) resets and proceeds.
  let stats = processor(&dir)
    .process(&items, &TestTransform::default(), &ledger, false)
    .await
    .unwrap();
  assert_eq!(stats.succeeded, 3);
}

#[tokio::test]
async fn missing_checkpoint_is_not_corruption() {
  let dir = TempDir::new().unwrap();
  let store = CheckpointStore::create(dir.path()).unwrap();
  assert!(store.load().unwrap().is_none());
}
