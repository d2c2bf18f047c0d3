//! [`SqliteLedger`] — the SQLite implementation of [`Ledger`].

use std::{collections::HashMap, path::Path, sync::Arc};

use chrono::Utc;
use plait_core::{
  event::{Event, EventId, PersonRef, RawRecord},
  ledger::{Ledger, LedgerExport, LedgerStats},
  person::{Person, PersonId},
  resolve::{PersonRegistry, Resolution},
  source::Source,
};
use rusqlite::OptionalExtension as _;
use tokio::sync::Mutex;

use crate::{
  Error, Result,
  encode::{
    EventRow, PersonRow, RawEvent, RawPerson, encode_person_id,
  },
  schema::SCHEMA,
};

// ─── SQL fragments ───────────────────────────────────────────────────────────

const EVENT_COLUMNS: &str = "event_id, source, timestamp, timezone, \
   sender_id, subject, body, attachments, thread_id, is_read, is_starred, \
   is_reply, reply_to_id, event_start, event_end, event_location, \
   event_status, raw_data";

fn read_event_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawEvent> {
  Ok(RawEvent {
    event_id:       row.get(0)?,
    source:         row.get(1)?,
    timestamp:      row.get(2)?,
    timezone:       row.get(3)?,
    sender_id:      row.get(4)?,
    subject:        row.get(5)?,
    body:           row.get(6)?,
    attachments:    row.get(7)?,
    thread_id:      row.get(8)?,
    is_read:        row.get(9)?,
    is_starred:     row.get(10)?,
    is_reply:       row.get(11)?,
    reply_to_id:    row.get(12)?,
    event_start:    row.get(13)?,
    event_end:      row.get(14)?,
    event_location: row.get(15)?,
    event_status:   row.get(16)?,
    raw_data:       row.get(17)?,
    recipients:     Vec::new(),
  })
}

fn load_recipients(
  conn: &rusqlite::Connection,
  event_id: &str,
) -> rusqlite::Result<Vec<String>> {
  let mut stmt = conn.prepare(
    "SELECT person_id FROM event_recipients
     WHERE event_id = ?1 ORDER BY position",
  )?;
  stmt
    .query_map(rusqlite::params![event_id], |row| row.get(0))?
    .collect()
}

fn apply_merges(
  tx: &rusqlite::Transaction<'_>,
  merges: &[(String, String)],
) -> rusqlite::Result<()> {
  for (loser, winner) in merges {
    tx.execute(
      "UPDATE persons SET merged_into = ?2 WHERE person_id = ?1",
      rusqlite::params![loser, winner],
    )?;
    tx.execute(
      "UPDATE person_sources SET person_id = ?2 WHERE person_id = ?1",
      rusqlite::params![loser, winner],
    )?;
    tx.execute(
      "UPDATE events SET sender_id = ?2 WHERE sender_id = ?1",
      rusqlite::params![loser, winner],
    )?;
    tx.execute(
      "UPDATE event_recipients SET person_id = ?2 WHERE person_id = ?1",
      rusqlite::params![loser, winner],
    )?;
  }
  Ok(())
}

fn upsert_persons(
  tx: &rusqlite::Transaction<'_>,
  rows: &[PersonRow],
) -> rusqlite::Result<()> {
  for row in rows {
    tx.execute(
      "INSERT INTO persons (
         person_id, display_name, email, phone,
         first_seen, last_seen, event_count, is_self
       ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
       ON CONFLICT(person_id) DO UPDATE SET
         display_name = excluded.display_name,
         email        = excluded.email,
         phone        = excluded.phone,
         first_seen   = excluded.first_seen,
         last_seen    = excluded.last_seen,
         event_count  = excluded.event_count,
         is_self      = excluded.is_self",
      rusqlite::params![
        row.person_id,
        row.display_name,
        row.email,
        row.phone,
        row.first_seen,
        row.last_seen,
        row.event_count,
        row.is_self,
      ],
    )?;
    for (source, local) in &row.sources {
      tx.execute(
        "INSERT OR REPLACE INTO person_sources (source, source_local_id, person_id)
         VALUES (?1, ?2, ?3)",
        rusqlite::params![source, local, row.person_id],
      )?;
    }
  }
  Ok(())
}

// ─── Ledger ──────────────────────────────────────────────────────────────────

/// A plait ledger backed by a single SQLite file.
///
/// The person registry lives in memory behind a mutex and is the authority
/// for identity resolution; every mutation is written through to SQLite in
/// the same call, and the registry is rebuilt from the database at open.
/// Cloning is cheap — both halves are reference-counted.
#[derive(Clone)]
pub struct SqliteLedger {
  conn:     tokio_rusqlite::Connection,
  registry: Arc<Mutex<PersonRegistry>>,
}

impl SqliteLedger {
  /// Open (or create) a ledger at `path`, run schema initialisation, and
  /// load the person registry.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    Self::init(conn).await
  }

  /// Open an in-memory ledger — useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    Self::init(conn).await
  }

  async fn init(conn: tokio_rusqlite::Connection) -> Result<Self> {
    conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;

    let registry = Self::load_registry(&conn).await?;
    tracing::debug!(persons = registry.len(), "ledger opened");

    Ok(Self { conn, registry: Arc::new(Mutex::new(registry)) })
  }

  /// Rebuild the in-memory registry from canonical (non-merged) persons.
  async fn load_registry(
    conn: &tokio_rusqlite::Connection,
  ) -> Result<PersonRegistry> {
    let raws: Vec<RawPerson> = conn
      .call(|conn| {
        let mut keys: HashMap<String, Vec<(String, String)>> = HashMap::new();
        {
          let mut stmt = conn.prepare(
            "SELECT ps.person_id, ps.source, ps.source_local_id
             FROM person_sources ps
             JOIN persons p ON p.person_id = ps.person_id
             WHERE p.merged_into IS NULL",
          )?;
          let rows = stmt.query_map([], |row| {
            Ok((
              row.get::<_, String>(0)?,
              row.get::<_, String>(1)?,
              row.get::<_, String>(2)?,
            ))
          })?;
          for row in rows {
            let (person_id, source, local) = row?;
            keys.entry(person_id).or_default().push((source, local));
          }
        }

        let mut stmt = conn.prepare(
          "SELECT person_id, display_name, email, phone,
                  first_seen, last_seen, event_count, is_self
           FROM persons WHERE merged_into IS NULL",
        )?;
        let raws = stmt
          .query_map([], |row| {
            Ok(RawPerson {
              person_id:    row.get(0)?,
              display_name: row.get(1)?,
              email:        row.get(2)?,
              phone:        row.get(3)?,
              first_seen:   row.get(4)?,
              last_seen:    row.get(5)?,
              event_count:  row.get(6)?,
              is_self:      row.get(7)?,
              sources:      Vec::new(),
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;

        let raws = raws
          .into_iter()
          .map(|mut raw| {
            raw.sources = keys.remove(&raw.person_id).unwrap_or_default();
            raw
          })
          .collect();
        Ok(raws)
      })
      .await?;

    let persons = raws
      .into_iter()
      .map(RawPerson::into_person)
      .collect::<Result<Vec<_>>>()?;

    Ok(PersonRegistry::load(persons))
  }

  async fn event_exists(&self, id: &EventId) -> Result<bool> {
    let id_str = id.as_str().to_owned();
    let exists = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT 1 FROM events WHERE event_id = ?1",
              rusqlite::params![id_str],
              |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false),
        )
      })
      .await?;
    Ok(exists)
  }

  /// Persist registry changes that happened outside an event insertion
  /// (the standalone `resolve` path).
  async fn write_delta(
    &self,
    merges: Vec<(String, String)>,
    persons: Vec<PersonRow>,
  ) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        // Winner rows must exist before merged_into can reference them.
        upsert_persons(&tx, &persons)?;
        apply_merges(&tx, &merges)?;
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Follow merge redirections until the surviving person is reached.
  fn chase(redirect: &HashMap<PersonId, PersonId>, mut id: PersonId) -> PersonId {
    while let Some(&winner) = redirect.get(&id) {
      id = winner;
    }
    id
  }
}

// ─── Ledger impl ─────────────────────────────────────────────────────────────

impl Ledger for SqliteLedger {
  type Error = Error;

  async fn resolve(&self, reference: &PersonRef) -> Result<PersonId> {
    let mut registry = self.registry.lock().await;
    let Resolution { person_id, absorbed, .. } =
      registry.resolve(reference, Utc::now())?;

    let merges = absorbed
      .map(|loser| (encode_person_id(loser), encode_person_id(person_id)))
      .into_iter()
      .collect();
    let persons = registry
      .get(person_id)
      .map(PersonRow::from_person)
      .into_iter()
      .collect();

    self.write_delta(merges, persons).await?;
    Ok(person_id)
  }

  async fn add_event(&self, record: RawRecord) -> Result<bool> {
    let mut registry = self.registry.lock().await;

    // Idempotent ingestion: a known id is a no-op, not an error.
    if self.event_exists(&record.id).await? {
      tracing::debug!(event_id = %record.id, "duplicate event id, skipping");
      return Ok(false);
    }

    // Check every reference up front so resolution cannot fail after it
    // has started mutating the registry (no partial insertion).
    if !record.sender.has_identity() {
      return Err(plait_core::Error::UnidentifiablePerson.into());
    }
    for recipient in &record.recipients {
      if !recipient.has_identity() {
        return Err(plait_core::Error::UnidentifiablePerson.into());
      }
    }

    let mut redirect: HashMap<PersonId, PersonId> = HashMap::new();
    let mut resolved: Vec<PersonId> = Vec::new();

    let sender_res = registry.resolve(&record.sender, record.timestamp)?;
    if let Some(loser) = sender_res.absorbed {
      redirect.insert(loser, sender_res.person_id);
    }
    resolved.push(sender_res.person_id);

    let mut recipient_ids = Vec::with_capacity(record.recipients.len());
    for recipient in &record.recipients {
      let res = registry.resolve(recipient, record.timestamp)?;
      if let Some(loser) = res.absorbed {
        redirect.insert(loser, res.person_id);
      }
      resolved.push(res.person_id);
      recipient_ids.push(res.person_id);
    }

    // A merge later in the reference list may have absorbed a person
    // resolved earlier in it; chase every id to its survivor.
    let sender_id = Self::chase(&redirect, sender_res.person_id);
    let recipient_ids: Vec<PersonId> = recipient_ids
      .into_iter()
      .map(|id| Self::chase(&redirect, id))
      .collect();

    let mut participants = vec![sender_id];
    for &id in &recipient_ids {
      if !participants.contains(&id) {
        participants.push(id);
      }
    }
    registry.note_event(&participants, record.timestamp);

    // Snapshot everything the transaction needs before leaving the lock's
    // synchronous section.
    let mut touched: Vec<PersonId> =
      resolved.into_iter().map(|id| Self::chase(&redirect, id)).collect();
    touched.sort();
    touched.dedup();
    let person_rows: Vec<PersonRow> = touched
      .iter()
      .filter_map(|id| registry.get(*id))
      .map(PersonRow::from_person)
      .collect();
    let merge_rows: Vec<(String, String)> = redirect
      .iter()
      .map(|(loser, winner)| {
        (encode_person_id(*loser), encode_person_id(Self::chase(&redirect, *winner)))
      })
      .collect();
    let event_row = EventRow::from_record(&record, sender_id, &recipient_ids)?;

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        // A merge winner may have been created by this very event, so its
        // row has to land before any merged_into reference to it.
        upsert_persons(&tx, &person_rows)?;
        apply_merges(&tx, &merge_rows)?;

        tx.execute(
          &format!(
            "INSERT INTO events ({EVENT_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12,
                     ?13, ?14, ?15, ?16, ?17, ?18)"
          ),
          rusqlite::params![
            event_row.event_id,
            event_row.source,
            event_row.timestamp,
            event_row.timezone,
            event_row.sender_id,
            event_row.subject,
            event_row.body,
            event_row.attachments,
            event_row.thread_id,
            event_row.is_read,
            event_row.is_starred,
            event_row.is_reply,
            event_row.reply_to_id,
            event_row.event_start,
            event_row.event_end,
            event_row.event_location,
            event_row.event_status,
            event_row.raw_data,
          ],
        )?;
        for (position, person_id) in event_row.recipients.iter().enumerate() {
          tx.execute(
            "INSERT INTO event_recipients (event_id, person_id, position)
             VALUES (?1, ?2, ?3)",
            rusqlite::params![event_row.event_id, person_id, position as i64],
          )?;
        }

        tx.commit()?;
        Ok(())
      })
      .await?;

    Ok(true)
  }

  async fn get_event(&self, id: &EventId) -> Result<Option<Event>> {
    let id_str = id.as_str().to_owned();
    let raw: Option<RawEvent> = self
      .conn
      .call(move |conn| {
        let raw = conn
          .query_row(
            &format!("SELECT {EVENT_COLUMNS} FROM events WHERE event_id = ?1"),
            rusqlite::params![id_str],
            read_event_row,
          )
          .optional()?;

        match raw {
          Some(mut raw) => {
            raw.recipients = load_recipients(conn, &raw.event_id)?;
            Ok(Some(raw))
          }
          None => Ok(None),
        }
      })
      .await?;

    raw.map(RawEvent::into_event).transpose()
  }

  async fn get_events_for_person(
    &self,
    person_id: PersonId,
  ) -> Result<Vec<Event>> {
    let id_str = encode_person_id(person_id);
    let raws: Vec<RawEvent> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {EVENT_COLUMNS} FROM events
           WHERE sender_id = ?1
              OR event_id IN (SELECT event_id FROM event_recipients
                              WHERE person_id = ?1)
           ORDER BY timestamp, event_id"
        ))?;
        let mut raws = stmt
          .query_map(rusqlite::params![id_str], read_event_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        for raw in &mut raws {
          raw.recipients = load_recipients(conn, &raw.event_id)?;
        }
        Ok(raws)
      })
      .await?;

    raws.into_iter().map(RawEvent::into_event).collect()
  }

  async fn get_person(&self, person_id: PersonId) -> Result<Option<Person>> {
    let registry = self.registry.lock().await;
    Ok(registry.get(person_id).cloned())
  }

  async fn get_person_by_identifier(
    &self,
    identifier: &str,
  ) -> Result<Option<Person>> {
    let registry = self.registry.lock().await;
    Ok(registry.lookup_identifier(identifier).cloned())
  }

  async fn list_persons(&self) -> Result<Vec<Person>> {
    let registry = self.registry.lock().await;
    Ok(registry.list().into_iter().cloned().collect())
  }

  async fn export(&self) -> Result<LedgerExport> {
    let registry = self.registry.lock().await;

    let raws: Vec<RawEvent> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(&format!(
          // event_id is '{{source}}:{{local}}', so ordering by it breaks
          // timestamp ties by source then local id.
          "SELECT {EVENT_COLUMNS} FROM events ORDER BY timestamp, event_id"
        ))?;
        let mut raws = stmt
          .query_map([], read_event_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        for raw in &mut raws {
          raw.recipients = load_recipients(conn, &raw.event_id)?;
        }
        Ok(raws)
      })
      .await?;

    let mut sources = std::collections::BTreeSet::new();
    let mut records = Vec::with_capacity(raws.len());
    for raw in raws {
      let event = raw.into_event()?;
      sources.insert(event.source);
      records.push(event_to_record(&registry, event)?);
    }

    Ok(LedgerExport {
      total_events:        records.len() as u64,
      sources_seen:        sources.into_iter().collect(),
      unique_person_count: registry.len() as u64,
      events:              records,
    })
  }

  async fn stats(&self) -> Result<LedgerStats> {
    let registry = self.registry.lock().await;

    let (total_events, source_tags): (i64, Vec<String>) = self
      .conn
      .call(|conn| {
        let total: i64 =
          conn.query_row("SELECT COUNT(*) FROM events", [], |r| r.get(0))?;
        let mut stmt =
          conn.prepare("SELECT DISTINCT source FROM events ORDER BY source")?;
        let tags = stmt
          .query_map([], |row| row.get(0))?
          .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok((total, tags))
      })
      .await?;

    let sources_seen = source_tags
      .iter()
      .map(|tag| crate::encode::decode_source(tag))
      .collect::<Result<Vec<_>>>()?;

    Ok(LedgerStats {
      total_events:        total_events as u64,
      unique_person_count: registry.len() as u64,
      sources_seen,
    })
  }
}

// ─── Export helpers ──────────────────────────────────────────────────────────

fn person_to_ref(person: &Person, source: Source) -> PersonRef {
  PersonRef {
    name:      person.display_name.clone(),
    email:     person.email.clone(),
    phone:     person.phone.clone(),
    source_id: person.source_key_for(source).map(|k| k.local_id.clone()),
    source:    Some(source),
    is_self:   person.is_self,
  }
}

/// Turn a stored event back into a wire-format record, with person ids
/// expanded to reference objects carrying the canonical attributes.
fn event_to_record(
  registry: &PersonRegistry,
  event: Event,
) -> Result<RawRecord> {
  let expand = |id: PersonId| -> Result<PersonRef> {
    registry
      .get(id)
      .map(|person| person_to_ref(person, event.source))
      .ok_or_else(|| {
        Error::Decode(format!("event {} references unknown person {id}", event.id))
      })
  };

  let sender = expand(event.sender)?;
  let recipients = event
    .recipients
    .iter()
    .map(|&id| expand(id))
    .collect::<Result<Vec<_>>>()?;

  let calendar = event.calendar;
  Ok(RawRecord {
    id: event.id,
    source: event.source,
    timestamp: event.timestamp,
    timezone: event.timezone,
    sender,
    recipients,
    subject: event.subject,
    body: event.body,
    attachments: event.attachments,
    thread_id: event.thread_id,
    is_read: event.is_read,
    is_starred: event.is_starred,
    is_reply: event.is_reply,
    reply_to_id: event.reply_to_id,
    event_start: calendar.as_ref().and_then(|c| c.start),
    event_end: calendar.as_ref().and_then(|c| c.end),
    event_location: calendar.as_ref().and_then(|c| c.location.clone()),
    event_status: calendar.as_ref().and_then(|c| c.status),
    raw_data: event.raw_data,
  })
}
