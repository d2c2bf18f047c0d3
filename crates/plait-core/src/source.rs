//! The closed set of originating platforms.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// One originating platform or export format. The wire tag is the
/// lower-case variant name; the set is closed — adapters for new platforms
/// require a new variant here.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize,
  Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Source {
  Imessage,
  Whatsapp,
  Gmail,
  Gcal,
  Googletakeoutcal,
  Googletakeoutchat,
  Googletakeoutmeet,
  Googletakeoutcontacts,
}

impl Source {
  /// The wire tag, also used as the prefix of event ids.
  pub fn tag(self) -> &'static str {
    match self {
      Self::Imessage => "imessage",
      Self::Whatsapp => "whatsapp",
      Self::Gmail => "gmail",
      Self::Gcal => "gcal",
      Self::Googletakeoutcal => "googletakeoutcal",
      Self::Googletakeoutchat => "googletakeoutchat",
      Self::Googletakeoutmeet => "googletakeoutmeet",
      Self::Googletakeoutcontacts => "googletakeoutcontacts",
    }
  }

  pub fn parse(tag: &str) -> Result<Self> {
    match tag {
      "imessage" => Ok(Self::Imessage),
      "whatsapp" => Ok(Self::Whatsapp),
      "gmail" => Ok(Self::Gmail),
      "gcal" => Ok(Self::Gcal),
      "googletakeoutcal" => Ok(Self::Googletakeoutcal),
      "googletakeoutchat" => Ok(Self::Googletakeoutchat),
      "googletakeoutmeet" => Ok(Self::Googletakeoutmeet),
      "googletakeoutcontacts" => Ok(Self::Googletakeoutcontacts),
      other => Err(Error::UnknownSource(other.to_owned())),
    }
  }

  /// Calendar-like sources carry the optional `event_*` fields.
  pub fn is_calendar(self) -> bool {
    matches!(self, Self::Gcal | Self::Googletakeoutcal)
  }
}

impl std::fmt::Display for Source {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.tag())
  }
}
