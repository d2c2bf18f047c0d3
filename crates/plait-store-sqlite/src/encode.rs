//! Encoding and decoding helpers between domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as RFC 3339 strings, person ids as hyphenated
//! lowercase UUIDs, attachments and raw_data as compact JSON.

use chrono::{DateTime, Utc};
use plait_core::{
  event::{CalendarInfo, Event, EventId, EventStatus},
  person::{Person, PersonId, SourceKey},
  source::Source,
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn encode_person_id(id: PersonId) -> String {
  id.0.hyphenated().to_string()
}

pub fn decode_person_id(s: &str) -> Result<PersonId> {
  Ok(PersonId(Uuid::parse_str(s)?))
}

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::Decode(format!("bad timestamp {s:?}: {e}")))
}

pub fn decode_source(s: &str) -> Result<Source> {
  Source::parse(s).map_err(|e| Error::Decode(e.to_string()))
}

pub fn encode_event_status(status: EventStatus) -> &'static str {
  match status {
    EventStatus::Confirmed => "confirmed",
    EventStatus::Tentative => "tentative",
    EventStatus::Cancelled => "cancelled",
  }
}

pub fn decode_event_status(s: &str) -> Result<EventStatus> {
  match s {
    "confirmed" => Ok(EventStatus::Confirmed),
    "tentative" => Ok(EventStatus::Tentative),
    "cancelled" => Ok(EventStatus::Cancelled),
    other => Err(Error::Decode(format!("unknown event status: {other:?}"))),
  }
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw strings read directly from a `persons` row; `sources` is gathered
/// from `person_sources` by the caller.
pub struct RawPerson {
  pub person_id:    String,
  pub display_name: Option<String>,
  pub email:        Option<String>,
  pub phone:        Option<String>,
  pub first_seen:   String,
  pub last_seen:    String,
  pub event_count:  i64,
  pub is_self:      bool,
  pub sources:      Vec<(String, String)>,
}

impl RawPerson {
  pub fn into_person(self) -> Result<Person> {
    let sources = self
      .sources
      .into_iter()
      .map(|(source, local)| {
        Ok(SourceKey::new(decode_source(&source)?, local))
      })
      .collect::<Result<_>>()?;

    Ok(Person {
      person_id: decode_person_id(&self.person_id)?,
      display_name: self.display_name,
      email: self.email,
      phone: self.phone,
      sources,
      first_seen: decode_dt(&self.first_seen)?,
      last_seen: decode_dt(&self.last_seen)?,
      event_count: self.event_count as u64,
      is_self: self.is_self,
    })
  }
}

/// A person flattened to column values for an upsert, plus its source keys
/// for the `person_sources` table.
pub struct PersonRow {
  pub person_id:    String,
  pub display_name: Option<String>,
  pub email:        Option<String>,
  pub phone:        Option<String>,
  pub first_seen:   String,
  pub last_seen:    String,
  pub event_count:  i64,
  pub is_self:      bool,
  pub sources:      Vec<(String, String)>,
}

impl PersonRow {
  pub fn from_person(person: &Person) -> Self {
    Self {
      person_id:    encode_person_id(person.person_id),
      display_name: person.display_name.clone(),
      email:        person.email.clone(),
      phone:        person.phone.clone(),
      first_seen:   encode_dt(person.first_seen),
      last_seen:    encode_dt(person.last_seen),
      event_count:  person.event_count as i64,
      is_self:      person.is_self,
      sources:      person
        .sources
        .iter()
        .map(|k| (k.source.tag().to_owned(), k.local_id.clone()))
        .collect(),
    }
  }
}

/// An event flattened to column values for insertion.
pub struct EventRow {
  pub event_id:       String,
  pub source:         String,
  pub timestamp:      String,
  pub timezone:       Option<String>,
  pub sender_id:      String,
  pub subject:        Option<String>,
  pub body:           String,
  pub attachments:    String,
  pub thread_id:      Option<String>,
  pub is_read:        Option<bool>,
  pub is_starred:     Option<bool>,
  pub is_reply:       Option<bool>,
  pub reply_to_id:    Option<String>,
  pub event_start:    Option<String>,
  pub event_end:      Option<String>,
  pub event_location: Option<String>,
  pub event_status:   Option<String>,
  pub raw_data:       String,
  pub recipients:     Vec<String>,
}

impl EventRow {
  pub fn from_record(
    record: &plait_core::event::RawRecord,
    sender: PersonId,
    recipients: &[PersonId],
  ) -> Result<Self> {
    Ok(Self {
      event_id:       record.id.as_str().to_owned(),
      source:         record.source.tag().to_owned(),
      timestamp:      encode_dt(record.timestamp),
      timezone:       record.timezone.clone(),
      sender_id:      encode_person_id(sender),
      subject:        record.subject.clone(),
      body:           record.body.clone(),
      attachments:    serde_json::to_string(&record.attachments)?,
      thread_id:      record.thread_id.clone(),
      is_read:        record.is_read,
      is_starred:     record.is_starred,
      is_reply:       record.is_reply,
      reply_to_id:    record.reply_to_id.clone(),
      event_start:    record.event_start.map(encode_dt),
      event_end:      record.event_end.map(encode_dt),
      event_location: record.event_location.clone(),
      event_status:   record.event_status.map(|s| encode_event_status(s).to_owned()),
      raw_data:       serde_json::to_string(&record.raw_data)?,
      recipients:     recipients.iter().map(|&id| encode_person_id(id)).collect(),
    })
  }
}

/// Raw strings read directly from an `events` row; `recipients` is gathered
/// from `event_recipients` by the caller, in position order.
pub struct RawEvent {
  pub event_id:       String,
  pub source:         String,
  pub timestamp:      String,
  pub timezone:       Option<String>,
  pub sender_id:      String,
  pub subject:        Option<String>,
  pub body:           String,
  pub attachments:    String,
  pub thread_id:      Option<String>,
  pub is_read:        Option<bool>,
  pub is_starred:     Option<bool>,
  pub is_reply:       Option<bool>,
  pub reply_to_id:    Option<String>,
  pub event_start:    Option<String>,
  pub event_end:      Option<String>,
  pub event_location: Option<String>,
  pub event_status:   Option<String>,
  pub raw_data:       String,
  pub recipients:     Vec<String>,
}

impl RawEvent {
  pub fn into_event(self) -> Result<Event> {
    let id = EventId::parse(&self.event_id).map_err(Error::Core)?;
    let source = decode_source(&self.source)?;

    let start = self.event_start.as_deref().map(decode_dt).transpose()?;
    let end = self.event_end.as_deref().map(decode_dt).transpose()?;
    let status =
      self.event_status.as_deref().map(decode_event_status).transpose()?;

    let calendar = if start.is_none()
      && end.is_none()
      && self.event_location.is_none()
      && status.is_none()
    {
      None
    } else {
      Some(CalendarInfo {
        start,
        end,
        location: self.event_location,
        status,
      })
    };

    Ok(Event {
      id,
      source,
      timestamp: decode_dt(&self.timestamp)?,
      timezone: self.timezone,
      sender: decode_person_id(&self.sender_id)?,
      recipients: self
        .recipients
        .iter()
        .map(|s| decode_person_id(s))
        .collect::<Result<_>>()?,
      subject: self.subject,
      body: self.body,
      attachments: serde_json::from_str(&self.attachments)?,
      thread_id: self.thread_id,
      is_read: self.is_read,
      is_starred: self.is_starred,
      is_reply: self.is_reply,
      reply_to_id: self.reply_to_id,
      calendar,
      raw_data: serde_json::from_str(&self.raw_data)?,
    })
  }
}
