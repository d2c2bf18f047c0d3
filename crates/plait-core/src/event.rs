//! Communication events — the irreducible unit of the record store.
//!
//! [`RawRecord`] is the wire format produced by source adapters, one JSON
//! object per event, with people as partial [`PersonRef`]s. [`Event`] is the
//! resolved, stored form: identical content, but every person reference has
//! been replaced with a [`PersonId`] by identity resolution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result, person::PersonId, source::Source};

// ─── EventId ─────────────────────────────────────────────────────────────────

/// Globally unique event identifier of the form `{source}:{local}`.
///
/// The prefix is the lower-case source tag; the local part is the
/// platform-assigned identifier, restricted to `[A-Za-z0-9_-]`.
#[derive(
  Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct EventId(String);

impl EventId {
  pub fn parse(s: &str) -> Result<Self> {
    let Some((prefix, local)) = s.split_once(':') else {
      return Err(Error::InvalidEventId(s.to_owned()));
    };

    let prefix_ok =
      !prefix.is_empty() && prefix.bytes().all(|b| b.is_ascii_lowercase());
    let local_ok = !local.is_empty()
      && local
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');

    if !prefix_ok || !local_ok {
      return Err(Error::InvalidEventId(s.to_owned()));
    }
    Ok(Self(s.to_owned()))
  }

  pub fn as_str(&self) -> &str { &self.0 }

  /// The source tag before the colon.
  pub fn source_tag(&self) -> &str {
    self.0.split_once(':').map(|(p, _)| p).unwrap_or(&self.0)
  }

  /// The platform-local identifier after the colon.
  pub fn local(&self) -> &str {
    self.0.split_once(':').map(|(_, l)| l).unwrap_or("")
  }
}

impl TryFrom<String> for EventId {
  type Error = Error;
  fn try_from(s: String) -> Result<Self> { Self::parse(&s) }
}

impl From<EventId> for String {
  fn from(id: EventId) -> String { id.0 }
}

impl std::fmt::Display for EventId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.0)
  }
}

// ─── PersonRef ───────────────────────────────────────────────────────────────

/// A partial description of a person attached to one raw record, used as
/// input to identity resolution. Any subset of the fields may be present,
/// but a reference with none of them cannot be resolved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersonRef {
  pub name:      Option<String>,
  pub email:     Option<String>,
  pub phone:     Option<String>,
  /// The platform-local identifier for this person (e.g. a phone number on
  /// iMessage, an address on Gmail).
  pub source_id: Option<String>,
  pub source:    Option<Source>,
  /// Marks the ledger owner. Set by adapters that can tell (e.g. iMessage
  /// `is_from_me`); sticky once resolved.
  #[serde(default, skip_serializing_if = "std::ops::Not::not")]
  pub is_self:   bool,
}

impl PersonRef {
  /// Whether this reference carries at least one identifying attribute.
  pub fn has_identity(&self) -> bool {
    self.name.is_some()
      || self.email.is_some()
      || self.phone.is_some()
      || (self.source.is_some() && self.source_id.is_some())
  }
}

// ─── Calendar fields ─────────────────────────────────────────────────────────

/// Status of a calendar entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
  Confirmed,
  Tentative,
  Cancelled,
}

/// Calendar-specific fields, present only for calendar-like sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarInfo {
  #[serde(with = "ts_opt")]
  pub start:    Option<DateTime<Utc>>,
  #[serde(with = "ts_opt")]
  pub end:      Option<DateTime<Utc>>,
  pub location: Option<String>,
  pub status:   Option<EventStatus>,
}

// ─── RawRecord ───────────────────────────────────────────────────────────────

/// The canonical wire format: one JSON object per communication event, as
/// produced by adapters and consumed by the validation layer. Fields the
/// adapter cannot determine are null, never omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
  pub id:             EventId,
  pub source:         Source,
  #[serde(with = "ts")]
  pub timestamp:      DateTime<Utc>,
  #[serde(default)]
  pub timezone:       Option<String>,
  pub sender:         PersonRef,
  #[serde(default)]
  pub recipients:     Vec<PersonRef>,
  #[serde(default)]
  pub subject:        Option<String>,
  pub body:           String,
  #[serde(default)]
  pub attachments:    Vec<String>,
  #[serde(default)]
  pub thread_id:      Option<String>,
  #[serde(default)]
  pub is_read:        Option<bool>,
  #[serde(default)]
  pub is_starred:     Option<bool>,
  #[serde(default)]
  pub is_reply:       Option<bool>,
  #[serde(default)]
  pub reply_to_id:    Option<String>,
  #[serde(default, with = "ts_opt")]
  pub event_start:    Option<DateTime<Utc>>,
  #[serde(default, with = "ts_opt")]
  pub event_end:      Option<DateTime<Utc>>,
  #[serde(default)]
  pub event_location: Option<String>,
  #[serde(default)]
  pub event_status:   Option<EventStatus>,
  /// Source-specific fields preserved for audit; opaque to the core.
  #[serde(default)]
  pub raw_data:       serde_json::Value,
}

impl RawRecord {
  /// Group the flat wire-level calendar fields, if any are set.
  pub fn calendar_info(&self) -> Option<CalendarInfo> {
    if self.event_start.is_none()
      && self.event_end.is_none()
      && self.event_location.is_none()
      && self.event_status.is_none()
    {
      return None;
    }
    Some(CalendarInfo {
      start:    self.event_start,
      end:      self.event_end,
      location: self.event_location.clone(),
      status:   self.event_status,
    })
  }
}

// ─── Event ───────────────────────────────────────────────────────────────────

/// A resolved, stored communication event. Immutable once committed; the
/// only later change is a person merge re-pointing `sender`/`recipients`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
  pub id:          EventId,
  pub source:      Source,
  pub timestamp:   DateTime<Utc>,
  pub timezone:    Option<String>,
  pub sender:      PersonId,
  pub recipients:  Vec<PersonId>,
  pub subject:     Option<String>,
  pub body:        String,
  pub attachments: Vec<String>,
  pub thread_id:   Option<String>,
  pub is_read:     Option<bool>,
  pub is_starred:  Option<bool>,
  pub is_reply:    Option<bool>,
  pub reply_to_id: Option<String>,
  pub calendar:    Option<CalendarInfo>,
  pub raw_data:    serde_json::Value,
}

// ─── Timestamp codecs ────────────────────────────────────────────────────────

/// Serde codec for wire timestamps: serialises as RFC 3339, accepts ISO-8601
/// with or without an offset (offset-less values are taken as UTC).
pub mod ts {
  use chrono::{DateTime, NaiveDateTime, Utc};
  use serde::{Deserialize, Deserializer, Serializer};

  pub fn serialize<S: Serializer>(
    dt: &DateTime<Utc>,
    ser: S,
  ) -> Result<S::Ok, S::Error> {
    ser.serialize_str(&dt.to_rfc3339())
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(
    de: D,
  ) -> Result<DateTime<Utc>, D::Error> {
    let s = String::deserialize(de)?;
    parse(&s).map_err(serde::de::Error::custom)
  }

  pub(crate) fn parse(s: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
      return Ok(dt.with_timezone(&Utc));
    }
    // Offset-less ISO-8601; fractional seconds allowed.
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
      .map(|naive| naive.and_utc())
      .map_err(|_| format!("invalid timestamp: {s:?}"))
  }
}

/// [`ts`] lifted over `Option`.
pub mod ts_opt {
  use chrono::{DateTime, Utc};
  use serde::{Deserialize, Deserializer, Serializer};

  pub fn serialize<S: Serializer>(
    dt: &Option<DateTime<Utc>>,
    ser: S,
  ) -> Result<S::Ok, S::Error> {
    match dt {
      Some(dt) => ser.serialize_str(&dt.to_rfc3339()),
      None => ser.serialize_none(),
    }
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(
    de: D,
  ) -> Result<Option<DateTime<Utc>>, D::Error> {
    let s = Option::<String>::deserialize(de)?;
    s.map(|s| super::ts::parse(&s).map_err(serde::de::Error::custom))
      .transpose()
  }
}
