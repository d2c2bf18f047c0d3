//! SQL schema for the plait SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- Persons are never deleted. A person proven to duplicate another gets
-- merged_into set and drops out of every lookup; the row stays for audit.
CREATE TABLE IF NOT EXISTS persons (
    person_id    TEXT PRIMARY KEY,
    display_name TEXT,
    email        TEXT,            -- normalized; NULL if unknown
    phone        TEXT,            -- normalized; NULL if unknown
    first_seen   TEXT NOT NULL,   -- ISO 8601 UTC
    last_seen    TEXT NOT NULL,
    event_count  INTEGER NOT NULL DEFAULT 0,
    is_self      INTEGER NOT NULL DEFAULT 0,
    merged_into  TEXT REFERENCES persons(person_id)
);

-- (source, source_local_id) is a per-source unique key: no two persons may
-- hold the same pair.
CREATE TABLE IF NOT EXISTS person_sources (
    source          TEXT NOT NULL,
    source_local_id TEXT NOT NULL,
    person_id       TEXT NOT NULL REFERENCES persons(person_id),
    PRIMARY KEY (source, source_local_id)
);

-- Events are append-only. The only UPDATE ever issued re-points person
-- references when two persons merge.
CREATE TABLE IF NOT EXISTS events (
    event_id       TEXT PRIMARY KEY,   -- '{source}:{local}'
    source         TEXT NOT NULL,
    timestamp      TEXT NOT NULL,      -- ISO 8601 UTC
    timezone       TEXT,
    sender_id      TEXT NOT NULL REFERENCES persons(person_id),
    subject        TEXT,
    body           TEXT NOT NULL,
    attachments    TEXT NOT NULL DEFAULT '[]',   -- JSON array
    thread_id      TEXT,
    is_read        INTEGER,
    is_starred     INTEGER,
    is_reply       INTEGER,
    reply_to_id    TEXT,
    event_start    TEXT,
    event_end      TEXT,
    event_location TEXT,
    event_status   TEXT,               -- 'confirmed' | 'tentative' | 'cancelled'
    raw_data       TEXT NOT NULL DEFAULT 'null'  -- opaque JSON passthrough
);

CREATE TABLE IF NOT EXISTS event_recipients (
    event_id  TEXT NOT NULL REFERENCES events(event_id),
    person_id TEXT NOT NULL REFERENCES persons(person_id),
    position  INTEGER NOT NULL,
    PRIMARY KEY (event_id, position)
);

CREATE INDEX IF NOT EXISTS events_timestamp_idx    ON events(timestamp);
CREATE INDEX IF NOT EXISTS events_sender_idx       ON events(sender_id);
CREATE INDEX IF NOT EXISTS recipients_person_idx   ON event_recipients(person_id);
CREATE INDEX IF NOT EXISTS persons_merged_into_idx ON persons(merged_into);

PRAGMA user_version = 1;
";
