//! The `Ledger` trait and export types.
//!
//! The trait is implemented by storage backends (e.g. `plait-store-sqlite`).
//! Higher layers (the pipeline, the CLI) depend on this abstraction, not on
//! any concrete backend.

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::{
  event::{Event, EventId, PersonRef, RawRecord},
  person::{Person, PersonId},
  source::Source,
};

// ─── Export types ────────────────────────────────────────────────────────────

/// A full, deterministic snapshot of the ledger. Events are ordered by
/// timestamp ascending, ties broken by source then local id, and are wire
/// format records — an export can be re-ingested losslessly.
///
/// `unique_person_count` counts every canonical person, including persons
/// created through [`Ledger::resolve`] that no event references. Only
/// persons reachable from `events` are rebuilt by a re-ingest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerExport {
  pub total_events:        u64,
  pub sources_seen:        Vec<Source>,
  pub unique_person_count: u64,
  pub events:              Vec<RawRecord>,
}

/// Summary counters without the event payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerStats {
  pub total_events:        u64,
  pub unique_person_count: u64,
  pub sources_seen:        Vec<Source>,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a plait ledger backend.
///
/// The ledger owns both the event collection and the person registry, is
/// the sole writer of person merges, and the sole authority on whether an
/// event identifier already exists.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes.
pub trait Ledger: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Identity ──────────────────────────────────────────────────────────

  /// Resolve a raw person reference to a person id, creating or merging
  /// persons as required. Order-sensitive; see
  /// [`crate::resolve::PersonRegistry::resolve`].
  fn resolve<'a>(
    &'a self,
    reference: &'a PersonRef,
  ) -> impl Future<Output = Result<PersonId, Self::Error>> + Send + 'a;

  // ── Events ────────────────────────────────────────────────────────────

  /// Insert one validated record. Resolves sender and recipients and
  /// commits the event atomically with them; rejects the whole event
  /// (no partial insertion) if any reference cannot be resolved.
  ///
  /// Returns `false` as a no-op if the event id already exists (idempotent
  /// ingestion), `true` if newly inserted.
  fn add_event(
    &self,
    record: RawRecord,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Retrieve one event by id. Returns `None` if not found.
  fn get_event<'a>(
    &'a self,
    id: &'a EventId,
  ) -> impl Future<Output = Result<Option<Event>, Self::Error>> + Send + 'a;

  /// All events where the person is sender or recipient, ordered by
  /// timestamp ascending. A snapshot at call time, not a live view.
  fn get_events_for_person(
    &self,
    person_id: PersonId,
  ) -> impl Future<Output = Result<Vec<Event>, Self::Error>> + Send + '_;

  // ── Persons ───────────────────────────────────────────────────────────

  fn get_person(
    &self,
    person_id: PersonId,
  ) -> impl Future<Output = Result<Option<Person>, Self::Error>> + Send + '_;

  /// Look a person up by email, phone, or `source:local_id` key.
  fn get_person_by_identifier<'a>(
    &'a self,
    identifier: &'a str,
  ) -> impl Future<Output = Result<Option<Person>, Self::Error>> + Send + 'a;

  /// All canonical (non-merged) persons, in deterministic order.
  fn list_persons(
    &self,
  ) -> impl Future<Output = Result<Vec<Person>, Self::Error>> + Send + '_;

  // ── Snapshots ─────────────────────────────────────────────────────────

  fn export(
    &self,
  ) -> impl Future<Output = Result<LedgerExport, Self::Error>> + Send + '_;

  fn stats(
    &self,
  ) -> impl Future<Output = Result<LedgerStats, Self::Error>> + Send + '_;
}

// ─── Timeline rendering ──────────────────────────────────────────────────────

fn ref_label(reference: &PersonRef) -> &str {
  reference
    .name
    .as_deref()
    .or(reference.email.as_deref())
    .or(reference.phone.as_deref())
    .or(reference.source_id.as_deref())
    .unwrap_or("(unknown)")
}

/// Render an export as a human-readable chronological timeline.
pub fn render_timeline(export: &LedgerExport) -> String {
  use std::fmt::Write as _;

  let mut out = String::new();
  let bar = "=".repeat(80);
  let rule = "-".repeat(80);

  let _ = writeln!(out, "{bar}");
  let _ = writeln!(out, "UNIFIED COMMUNICATION LEDGER - TIMELINE");
  let _ = writeln!(out, "{bar}");

  for record in &export.events {
    let _ = writeln!(
      out,
      "\n[{}] {}",
      record.source.tag().to_uppercase(),
      record.timestamp.format("%Y-%m-%d %H:%M:%S")
    );
    let _ = writeln!(out, "From: {}", ref_label(&record.sender));

    if !record.recipients.is_empty() {
      let to: Vec<&str> = record.recipients.iter().map(ref_label).collect();
      let _ = writeln!(out, "To: {}", to.join(", "));
    }
    if let Some(subject) = &record.subject {
      let _ = writeln!(out, "Subject: {subject}");
    }
    if let (Some(start), Some(end)) = (record.event_start, record.event_end) {
      let _ = writeln!(
        out,
        "Event: {} - {}",
        start.format("%Y-%m-%d %H:%M:%S"),
        end.format("%Y-%m-%d %H:%M:%S")
      );
    }

    let body: String = record.body.chars().take(200).collect();
    let ellipsis =
      if record.body.chars().count() > 200 { "..." } else { "" };
    let _ = writeln!(out, "\n{body}{ellipsis}");
    let _ = writeln!(out, "{rule}");
  }

  out
}
