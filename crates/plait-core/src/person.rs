//! Person — one real-world contact, deduplicated across sources.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::source::Source;

/// Opaque internal person identifier. Assigned on first creation, never
/// reused.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize,
  Deserialize,
)]
#[serde(transparent)]
pub struct PersonId(pub Uuid);

impl PersonId {
  pub fn new() -> Self { Self(Uuid::new_v4()) }
}

impl Default for PersonId {
  fn default() -> Self { Self::new() }
}

impl std::fmt::Display for PersonId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    self.0.fmt(f)
  }
}

/// A platform identifier that resolved to a person. Functions as a
/// per-source unique key: no two persons may share one.
#[derive(
  Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct SourceKey {
  pub source:   Source,
  pub local_id: String,
}

impl SourceKey {
  pub fn new(source: Source, local_id: impl Into<String>) -> Self {
    Self { source, local_id: local_id.into() }
  }
}

impl std::fmt::Display for SourceKey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}:{}", self.source, self.local_id)
  }
}

/// One real-world contact. Invariant: at least one of `display_name`,
/// `email`, `phone`, or a member of `sources` is present.
///
/// Never deleted — a person proven to duplicate another is merged into it
/// and ceases to be independently resolvable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
  pub person_id:    PersonId,
  pub display_name: Option<String>,
  /// Normalized (trimmed, lower-cased) email, if known.
  pub email:        Option<String>,
  /// Normalized international-form phone, if known.
  pub phone:        Option<String>,
  /// Every platform identifier that resolved to this person.
  pub sources:      BTreeSet<SourceKey>,
  pub first_seen:   DateTime<Utc>,
  pub last_seen:    DateTime<Utc>,
  /// Running count of events this person sent or received.
  pub event_count:  u64,
  /// Marks the ledger owner; sticky once set.
  pub is_self:      bool,
}

impl Person {
  /// The identifier a reader would use for this person: name, else email,
  /// else phone, else the first source key.
  pub fn label(&self) -> String {
    self
      .display_name
      .clone()
      .or_else(|| self.email.clone())
      .or_else(|| self.phone.clone())
      .or_else(|| self.sources.iter().next().map(|k| k.to_string()))
      .unwrap_or_else(|| self.person_id.to_string())
  }

  /// The source key attached to this person for `source`, if any.
  pub fn source_key_for(&self, source: Source) -> Option<&SourceKey> {
    self.sources.iter().find(|k| k.source == source)
  }
}
