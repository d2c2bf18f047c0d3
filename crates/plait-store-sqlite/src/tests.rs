//! Integration tests for [`SqliteLedger`] against an in-memory database,
//! plus one on-disk reopen test.

use chrono::{DateTime, TimeZone, Utc};
use plait_core::{
  event::{EventId, PersonRef, RawRecord},
  ledger::Ledger,
  source::Source,
};
use tempfile::TempDir;

use crate::SqliteLedger;

async fn ledger() -> SqliteLedger {
  SqliteLedger::open_in_memory().await.expect("in-memory ledger")
}

fn at(h: u32, m: u32) -> DateTime<Utc> {
  Utc.with_ymd_and_hms(2024, 3, 10, h, m, 0).unwrap()
}

fn phone_ref(name: &str, phone: &str) -> PersonRef {
  PersonRef {
    name: Some(name.into()),
    phone: Some(phone.into()),
    source_id: Some(phone.into()),
    source: Some(Source::Imessage),
    ..Default::default()
  }
}

fn email_ref(name: &str, email: &str) -> PersonRef {
  PersonRef {
    name: Some(name.into()),
    email: Some(email.into()),
    source_id: Some(email.into()),
    source: Some(Source::Gmail),
    ..Default::default()
  }
}

fn msg(
  id: &str,
  source: Source,
  timestamp: DateTime<Utc>,
  sender: PersonRef,
  recipients: Vec<PersonRef>,
  body: &str,
) -> RawRecord {
  RawRecord {
    id: EventId::parse(id).expect("valid event id"),
    source,
    timestamp,
    timezone: None,
    sender,
    recipients,
    subject: None,
    body: body.into(),
    attachments: vec![],
    thread_id: None,
    is_read: None,
    is_starred: None,
    is_reply: None,
    reply_to_id: None,
    event_start: None,
    event_end: None,
    event_location: None,
    event_status: None,
    raw_data: serde_json::Value::Null,
  }
}

// ─── Idempotence ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn add_event_is_idempotent() {
  let ledger = ledger().await;
  let record = msg(
    "imessage:A1",
    Source::Imessage,
    at(9, 0),
    phone_ref("Ann", "+15551234567"),
    vec![],
    "first sighting",
  );

  assert!(ledger.add_event(record.clone()).await.unwrap());
  assert!(!ledger.add_event(record).await.unwrap());

  let stats = ledger.stats().await.unwrap();
  assert_eq!(stats.total_events, 1);
  assert_eq!(stats.unique_person_count, 1);
}

#[tokio::test]
async fn unidentifiable_sender_rejects_whole_event() {
  let ledger = ledger().await;
  let record = msg(
    "imessage:A1",
    Source::Imessage,
    at(9, 0),
    PersonRef::default(),
    vec![email_ref("Bea", "bea@example.com")],
    "should not land",
  );

  assert!(ledger.add_event(record).await.is_err());

  // No partial insertion: the identifiable recipient was not created.
  let stats = ledger.stats().await.unwrap();
  assert_eq!(stats.total_events, 0);
  assert_eq!(stats.unique_person_count, 0);
  assert!(
    ledger
      .get_person_by_identifier("bea@example.com")
      .await
      .unwrap()
      .is_none()
  );
}

// ─── Cross-source identity ───────────────────────────────────────────────────

#[tokio::test]
async fn bridging_reference_merges_phone_person_into_email_person() {
  let ledger = ledger().await;

  // Same human, seen first by phone and then by email.
  ledger
    .add_event(msg(
      "imessage:A1",
      Source::Imessage,
      at(9, 0),
      phone_ref("Ann", "+15551234567"),
      vec![],
      "text from the phone",
    ))
    .await
    .unwrap();
  ledger
    .add_event(msg(
      "gmail:B2",
      Source::Gmail,
      at(10, 0),
      email_ref("Ann Smith", "a@b.com"),
      vec![],
      "mail from the laptop",
    ))
    .await
    .unwrap();
  assert_eq!(ledger.stats().await.unwrap().unique_person_count, 2);

  // A reference carrying both identifiers bridges the two.
  let bridge = PersonRef {
    email: Some("a@b.com".into()),
    phone: Some("+15551234567".into()),
    ..Default::default()
  };
  ledger
    .add_event(msg(
      "gmail:B3",
      Source::Gmail,
      at(11, 0),
      bridge.clone(),
      vec![],
      "signature with a phone number",
    ))
    .await
    .unwrap();

  let stats = ledger.stats().await.unwrap();
  assert_eq!(stats.unique_person_count, 1);
  assert_eq!(stats.total_events, 3);

  // Email is authoritative: the survivor is the email-first person, now
  // carrying the phone and both source keys.
  let ann = ledger
    .get_person_by_identifier("a@b.com")
    .await
    .unwrap()
    .expect("survivor");
  assert_eq!(ann.email.as_deref(), Some("a@b.com"));
  assert_eq!(ann.phone.as_deref(), Some("+15551234567"));
  assert_eq!(ann.sources.len(), 2);

  let by_phone = ledger
    .get_person_by_identifier("+15551234567")
    .await
    .unwrap()
    .expect("reachable by phone");
  assert_eq!(by_phone.person_id, ann.person_id);

  // Historical events follow the merge.
  let events = ledger.get_events_for_person(ann.person_id).await.unwrap();
  let ids: Vec<&str> = events.iter().map(|e| e.id.as_str()).collect();
  assert_eq!(ids, vec!["imessage:A1", "gmail:B2", "gmail:B3"]);
}

#[tokio::test]
async fn merge_triggered_inside_one_reference_list() {
  let ledger = ledger().await;

  ledger
    .add_event(msg(
      "imessage:A1",
      Source::Imessage,
      at(9, 0),
      phone_ref("Ann", "+15551234567"),
      vec![],
      "text from the phone",
    ))
    .await
    .unwrap();

  // The sender creates the email person; a recipient of the same record
  // carries that email plus Ann's phone, so the phone person is absorbed
  // into a person that has never been written out yet.
  let bridge = PersonRef {
    email: Some("a@b.com".into()),
    phone: Some("+15551234567".into()),
    ..Default::default()
  };
  let inserted = ledger
    .add_event(msg(
      "gmail:B2",
      Source::Gmail,
      at(10, 0),
      email_ref("Ann Smith", "a@b.com"),
      vec![bridge],
      "mail with a phone number in the signature",
    ))
    .await
    .unwrap();
  assert!(inserted);

  let stats = ledger.stats().await.unwrap();
  assert_eq!(stats.total_events, 2);
  assert_eq!(stats.unique_person_count, 1);

  let ann = ledger
    .get_person_by_identifier("a@b.com")
    .await
    .unwrap()
    .expect("survivor");
  assert_eq!(ann.phone.as_deref(), Some("+15551234567"));

  // Both events follow the merge, including the one whose sender was the
  // absorbed person.
  let events = ledger.get_events_for_person(ann.person_id).await.unwrap();
  let ids: Vec<&str> = events.iter().map(|e| e.id.as_str()).collect();
  assert_eq!(ids, vec!["imessage:A1", "gmail:B2"]);
}

#[tokio::test]
async fn phone_is_normalized_before_matching() {
  let ledger = ledger().await;

  ledger
    .add_event(msg(
      "imessage:A1",
      Source::Imessage,
      at(9, 0),
      phone_ref("Ann", "(555) 123-4567"),
      vec![],
      "local formatting",
    ))
    .await
    .unwrap();
  ledger
    .add_event(msg(
      "imessage:A2",
      Source::Imessage,
      at(9, 5),
      PersonRef {
        phone: Some("+1 555 123 4567".into()),
        source_id: Some("+15551234567".into()),
        source: Some(Source::Imessage),
        ..Default::default()
      },
      vec![],
      "international formatting",
    ))
    .await
    .unwrap();

  assert_eq!(ledger.stats().await.unwrap().unique_person_count, 1);
  let ann = ledger
    .get_person_by_identifier("+15551234567")
    .await
    .unwrap()
    .expect("one person");
  assert_eq!(ann.event_count, 2);
}

#[tokio::test]
async fn recipients_are_resolved_too() {
  let ledger = ledger().await;

  ledger
    .add_event(msg(
      "gmail:m1",
      Source::Gmail,
      at(9, 0),
      email_ref("Ann", "ann@example.com"),
      vec![
        email_ref("Bea", "bea@example.com"),
        email_ref("Cal", "cal@example.com"),
      ],
      "group thread",
    ))
    .await
    .unwrap();

  assert_eq!(ledger.stats().await.unwrap().unique_person_count, 3);

  let bea = ledger
    .get_person_by_identifier("bea@example.com")
    .await
    .unwrap()
    .expect("recipient exists");
  let events = ledger.get_events_for_person(bea.person_id).await.unwrap();
  assert_eq!(events.len(), 1);
  assert_eq!(events[0].recipients.len(), 2);
}

#[tokio::test]
async fn resolve_alone_persists_the_person() {
  let ledger = ledger().await;

  let id = ledger.resolve(&email_ref("Ann", "ann@example.com")).await.unwrap();
  let again =
    ledger.resolve(&email_ref("Ann", "ann@example.com")).await.unwrap();
  assert_eq!(id, again);

  let ann = ledger.get_person(id).await.unwrap().expect("created");
  assert_eq!(ann.display_name.as_deref(), Some("Ann"));
  assert_eq!(ledger.list_persons().await.unwrap().len(), 1);
}

// ─── Retrieval and ordering ──────────────────────────────────────────────────

#[tokio::test]
async fn get_event_round_trips_fields() {
  let ledger = ledger().await;
  let mut record = msg(
    "gcal:ev1",
    Source::Gcal,
    at(9, 0),
    email_ref("Ann", "ann@example.com"),
    vec![email_ref("Bea", "bea@example.com")],
    "Project sync",
  );
  record.subject = Some("Sync".into());
  record.event_start = Some(at(14, 0));
  record.event_end = Some(at(15, 0));
  record.event_location = Some("Room 4".into());

  ledger.add_event(record).await.unwrap();

  let event = ledger
    .get_event(&EventId::parse("gcal:ev1").unwrap())
    .await
    .unwrap()
    .expect("stored event");
  assert_eq!(event.subject.as_deref(), Some("Sync"));
  let calendar = event.calendar.expect("calendar info");
  assert_eq!(calendar.start, Some(at(14, 0)));
  assert_eq!(calendar.location.as_deref(), Some("Room 4"));

  assert!(
    ledger
      .get_event(&EventId::parse("gcal:missing").unwrap())
      .await
      .unwrap()
      .is_none()
  );
}

#[tokio::test]
async fn person_events_come_back_in_timestamp_order() {
  let ledger = ledger().await;
  let ann = email_ref("Ann", "ann@example.com");

  // Inserted out of order on purpose.
  for (id, hour) in [("gmail:m3", 12), ("gmail:m1", 9), ("gmail:m2", 10)] {
    ledger
      .add_event(msg(id, Source::Gmail, at(hour, 0), ann.clone(), vec![], id))
      .await
      .unwrap();
  }

  let person = ledger
    .get_person_by_identifier("ann@example.com")
    .await
    .unwrap()
    .expect("sender");
  let events = ledger.get_events_for_person(person.person_id).await.unwrap();
  let ids: Vec<&str> = events.iter().map(|e| e.id.as_str()).collect();
  assert_eq!(ids, vec!["gmail:m1", "gmail:m2", "gmail:m3"]);
}

// ─── Export ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn export_is_ordered_and_re_ingestable() {
  let ledger = ledger().await;

  ledger
    .add_event(msg(
      "imessage:t1",
      Source::Imessage,
      at(10, 0),
      phone_ref("Ann", "+15551234567"),
      vec![],
      "later",
    ))
    .await
    .unwrap();
  ledger
    .add_event(msg(
      "gmail:m1",
      Source::Gmail,
      at(9, 0),
      email_ref("Bea", "bea@example.com"),
      vec![phone_ref("Ann", "+15551234567")],
      "earlier",
    ))
    .await
    .unwrap();
  // Same timestamp as imessage:t1; source tag breaks the tie.
  ledger
    .add_event(msg(
      "gcal:ev1",
      Source::Gcal,
      at(10, 0),
      email_ref("Bea", "bea@example.com"),
      vec![],
      "standup",
    ))
    .await
    .unwrap();

  let export = ledger.export().await.unwrap();
  assert_eq!(export.total_events, 3);
  assert_eq!(export.unique_person_count, 2);
  assert_eq!(
    export.sources_seen,
    vec![Source::Imessage, Source::Gmail, Source::Gcal]
  );
  let ids: Vec<&str> = export.events.iter().map(|e| e.id.as_str()).collect();
  assert_eq!(ids, vec!["gmail:m1", "gcal:ev1", "imessage:t1"]);

  // Exported references carry the canonical attributes, so a fresh ledger
  // rebuilds the same shape from them.
  let copy = SqliteLedger::open_in_memory().await.unwrap();
  for record in export.events.clone() {
    assert!(copy.add_event(record).await.unwrap());
  }
  let restats = copy.stats().await.unwrap();
  assert_eq!(restats.total_events, 3);
  assert_eq!(restats.unique_person_count, 2);
  assert_eq!(copy.export().await.unwrap().events.len(), 3);
}

#[tokio::test]
async fn export_header_counts_event_less_persons() {
  let ledger = ledger().await;
  ledger.resolve(&email_ref("Ann", "ann@example.com")).await.unwrap();

  // A person created by a standalone resolve has no event to carry them;
  // the header counts them, the events array cannot.
  let export = ledger.export().await.unwrap();
  assert_eq!(export.unique_person_count, 1);
  assert!(export.events.is_empty());
}

// ─── Persistence ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn registry_survives_reopen() {
  let dir = TempDir::new().unwrap();
  let path = dir.path().join("plait.db");

  {
    let ledger = SqliteLedger::open(&path).await.unwrap();
    ledger
      .add_event(msg(
        "imessage:A1",
        Source::Imessage,
        at(9, 0),
        phone_ref("Ann", "+15551234567"),
        vec![],
        "text",
      ))
      .await
      .unwrap();
    ledger
      .add_event(msg(
        "gmail:B2",
        Source::Gmail,
        at(10, 0),
        email_ref("Ann Smith", "a@b.com"),
        vec![],
        "mail",
      ))
      .await
      .unwrap();
    ledger
      .add_event(msg(
        "gmail:B3",
        Source::Gmail,
        at(11, 0),
        PersonRef {
          email: Some("a@b.com".into()),
          phone: Some("+15551234567".into()),
          ..Default::default()
        },
        vec![],
        "bridge",
      ))
      .await
      .unwrap();
  }

  let reopened = SqliteLedger::open(&path).await.unwrap();
  let stats = reopened.stats().await.unwrap();
  assert_eq!(stats.total_events, 3);
  assert_eq!(stats.unique_person_count, 1);

  // The merge is durable: both identifiers still land on the survivor.
  let ann = reopened
    .get_person_by_identifier("a@b.com")
    .await
    .unwrap()
    .expect("survivor after reopen");
  assert_eq!(
    reopened
      .get_person_by_identifier("+15551234567")
      .await
      .unwrap()
      .expect("phone still attached")
      .person_id,
    ann.person_id
  );
  assert_eq!(ann.event_count, 3);

  // Duplicate detection works across processes.
  assert!(
    !reopened
      .add_event(msg(
        "imessage:A1",
        Source::Imessage,
        at(9, 0),
        phone_ref("Ann", "+15551234567"),
        vec![],
        "text",
      ))
      .await
      .unwrap()
  );
}
