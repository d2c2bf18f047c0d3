//! Canonical forms for comparable identifiers.
//!
//! Resolution compares emails and phones only in these forms; raw values
//! stay untouched in `raw_data` for audit.

/// Trim and ASCII-lowercase an email address. Empty input normalizes to
/// `None`.
pub fn normalize_email(email: &str) -> Option<String> {
  let trimmed = email.trim();
  if trimmed.is_empty() {
    return None;
  }
  Some(trimmed.to_ascii_lowercase())
}

/// Coerce a phone number to a single international-style representation.
///
/// Formatting characters are stripped. NANP-length numbers (10 digits, or
/// 11 starting with `1`) become `+1...`; anything else keeps its digits
/// behind a bare `+`. Strings with fewer than 7 digits (short codes,
/// filtered placeholders) are not usable as identity keys and normalize to
/// `None`.
pub fn normalize_phone(phone: &str) -> Option<String> {
  let digits: String =
    phone.chars().filter(|c| c.is_ascii_digit()).collect();

  if digits.len() < 7 {
    return None;
  }

  let canonical = match digits.len() {
    10 => format!("+1{digits}"),
    11 if digits.starts_with('1') => format!("+{digits}"),
    _ => format!("+{digits}"),
  };
  Some(canonical)
}
