//! Wire-format contract enforcement.
//!
//! Every record passes through [`check_record`] before it may enter the
//! ledger: strings are sanitized (NULs stripped, JSON-hostile separators
//! replaced, lengths capped), then the record is validated. Validation
//! reports every offending field, not just the first.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  event::{PersonRef, RawRecord},
};

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").unwrap()
});

// Allows +, digits, spaces, hyphens, and parentheses.
static PHONE_RE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"^\+?[\d\s\-()]+$").unwrap());

// ─── Field caps ──────────────────────────────────────────────────────────────

const MAX_NAME: usize = 500;
const MAX_EMAIL: usize = 500;
const MAX_PHONE: usize = 50;
const MAX_SOURCE_ID: usize = 500;
const MAX_SUBJECT: usize = 1_000;
const MAX_BODY: usize = 100_000;
const MAX_LOCATION: usize = 500;
const MAX_THREAD: usize = 500;
const MAX_TIMEZONE: usize = 100;
const MAX_ATTACHMENT: usize = 1_000;

// ─── FieldError ──────────────────────────────────────────────────────────────

/// One validation failure, named after the offending field (dotted paths
/// for nested contacts, e.g. `recipients[2].email`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
  pub field:   String,
  pub message: String,
}

impl FieldError {
  fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
    Self { field: field.into(), message: message.into() }
  }
}

// ─── Sanitization ────────────────────────────────────────────────────────────

/// Strip null bytes, replace the U+2028/U+2029 line separators (invalid in
/// many JSON consumers) with spaces, and truncate to `max` characters with
/// a `...` marker.
pub fn sanitize_string(value: &str, max: usize) -> String {
  let cleaned: String = value
    .chars()
    .filter(|&c| c != '\0')
    .map(|c| if c == '\u{2028}' || c == '\u{2029}' { ' ' } else { c })
    .collect();

  if cleaned.chars().count() > max {
    let truncated: String = cleaned.chars().take(max).collect();
    format!("{truncated}...")
  } else {
    cleaned
  }
}

fn sanitize_opt(value: &mut Option<String>, max: usize) {
  if let Some(v) = value.as_deref() {
    let cleaned = sanitize_string(v, max);
    *value = if cleaned.is_empty() { None } else { Some(cleaned) };
  }
}

fn sanitize_ref(contact: &mut PersonRef) {
  sanitize_opt(&mut contact.name, MAX_NAME);
  sanitize_opt(&mut contact.email, MAX_EMAIL);
  sanitize_opt(&mut contact.phone, MAX_PHONE);
  sanitize_opt(&mut contact.source_id, MAX_SOURCE_ID);
}

/// Sanitize every string field of a record in place. `raw_data` is opaque
/// and passes through untouched.
pub fn sanitize_record(record: &mut RawRecord) {
  sanitize_ref(&mut record.sender);
  for recipient in &mut record.recipients {
    sanitize_ref(recipient);
  }

  record.body = sanitize_string(&record.body, MAX_BODY);
  sanitize_opt(&mut record.subject, MAX_SUBJECT);
  sanitize_opt(&mut record.thread_id, MAX_THREAD);
  sanitize_opt(&mut record.timezone, MAX_TIMEZONE);
  sanitize_opt(&mut record.reply_to_id, MAX_SOURCE_ID);
  sanitize_opt(&mut record.event_location, MAX_LOCATION);
  for attachment in &mut record.attachments {
    *attachment = sanitize_string(attachment, MAX_ATTACHMENT);
  }
}

// ─── Validation ──────────────────────────────────────────────────────────────

fn validate_ref(prefix: &str, contact: &PersonRef, errors: &mut Vec<FieldError>) {
  if let Some(email) = contact.email.as_deref() {
    if !EMAIL_RE.is_match(email) {
      errors.push(FieldError::new(
        format!("{prefix}.email"),
        format!("invalid email format: {email:?}"),
      ));
    }
  }
  if let Some(phone) = contact.phone.as_deref() {
    if !PHONE_RE.is_match(phone) {
      errors.push(FieldError::new(
        format!("{prefix}.phone"),
        format!("invalid phone format: {phone:?}"),
      ));
    }
  }
}

/// Validate a (sanitized) record against the wire-format contract.
pub fn validate_record(record: &RawRecord) -> Vec<FieldError> {
  let mut errors = Vec::new();

  if record.id.source_tag() != record.source.tag() {
    errors.push(FieldError::new(
      "id",
      format!(
        "id prefix {:?} does not match source {:?}",
        record.id.source_tag(),
        record.source.tag()
      ),
    ));
  }

  if record.body.is_empty() {
    errors.push(FieldError::new("body", "body cannot be empty"));
  }

  validate_ref("sender", &record.sender, &mut errors);
  for (i, recipient) in record.recipients.iter().enumerate() {
    validate_ref(&format!("recipients[{i}]"), recipient, &mut errors);
  }

  if !record.source.is_calendar() && record.calendar_info().is_some() {
    errors.push(FieldError::new(
      "event_start",
      format!("calendar fields on non-calendar source {:?}", record.source.tag()),
    ));
  }

  errors
}

/// Sanitize, then validate. The pipeline calls this on every record before
/// ledger insertion.
pub fn check_record(mut record: RawRecord) -> Result<RawRecord> {
  sanitize_record(&mut record);
  let errors = validate_record(&record);
  if errors.is_empty() {
    Ok(record)
  } else {
    Err(Error::Validation(errors))
  }
}
