//! Error types for `plait-core`.

use thiserror::Error;
use uuid::Uuid;

use crate::validate::FieldError;

#[derive(Debug, Error)]
pub enum Error {
  /// A person reference carried no name, email, phone, or source identifier.
  #[error("person reference has no usable identifying attribute")]
  UnidentifiablePerson,

  #[error("invalid event id: {0:?}")]
  InvalidEventId(String),

  #[error("unknown source tag: {0:?}")]
  UnknownSource(String),

  #[error("person not found: {0}")]
  PersonNotFound(Uuid),

  /// A record failed the wire-format contract. Every offending field is
  /// reported, not just the first.
  #[error("record failed validation: {}", format_field_errors(.0))]
  Validation(Vec<FieldError>),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

fn format_field_errors(errors: &[FieldError]) -> String {
  errors
    .iter()
    .map(|e| format!("{}: {}", e.field, e.message))
    .collect::<Vec<_>>()
    .join("; ")
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
