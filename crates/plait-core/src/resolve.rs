//! Identity resolution — mapping raw person references onto known persons.
//!
//! The registry is an explicit value, not ambient state: resolution order is
//! part of the correctness contract, so exactly one registry instance is
//! threaded through a run and every mutation happens in arrival order.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::{
  Error, Result,
  event::PersonRef,
  normalize::{normalize_email, normalize_phone},
  person::{Person, PersonId, SourceKey},
};

// ─── Resolution ──────────────────────────────────────────────────────────────

/// Outcome of resolving one reference.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
  pub person_id: PersonId,
  /// A previously-distinct person absorbed into `person_id` because this
  /// reference tied their identifiers together. Reportable: it changes
  /// historical attribution.
  pub absorbed:  Option<PersonId>,
  /// True when the reference matched nothing and a new person was created.
  pub created:   bool,
}

// ─── PersonRegistry ──────────────────────────────────────────────────────────

/// The in-memory person table plus the three lookup indexes resolution
/// needs. The ledger store owns exactly one of these and serializes all
/// access to it (single-writer model).
#[derive(Debug, Default)]
pub struct PersonRegistry {
  persons:   HashMap<PersonId, Person>,
  by_source: HashMap<SourceKey, PersonId>,
  by_email:  HashMap<String, PersonId>,
  by_phone:  HashMap<String, PersonId>,
}

impl PersonRegistry {
  pub fn new() -> Self { Self::default() }

  /// Rebuild a registry from previously persisted canonical persons
  /// (merged-away rows must not be included).
  pub fn load(persons: impl IntoIterator<Item = Person>) -> Self {
    let mut registry = Self::new();
    for person in persons {
      let id = person.person_id;
      for key in &person.sources {
        registry.by_source.insert(key.clone(), id);
      }
      if let Some(email) = &person.email {
        registry.by_email.insert(email.clone(), id);
      }
      if let Some(phone) = &person.phone {
        registry.by_phone.insert(phone.clone(), id);
      }
      registry.persons.insert(id, person);
    }
    registry
  }

  pub fn len(&self) -> usize { self.persons.len() }

  pub fn is_empty(&self) -> bool { self.persons.is_empty() }

  pub fn get(&self, id: PersonId) -> Option<&Person> { self.persons.get(&id) }

  /// All canonical persons, ordered by first-seen time then id for
  /// deterministic output.
  pub fn list(&self) -> Vec<&Person> {
    let mut persons: Vec<&Person> = self.persons.values().collect();
    persons.sort_by(|a, b| {
      a.first_seen
        .cmp(&b.first_seen)
        .then(a.person_id.cmp(&b.person_id))
    });
    persons
  }

  /// Look a person up by any external identifier: a `source:local` key, an
  /// email, or a phone number.
  pub fn lookup_identifier(&self, identifier: &str) -> Option<&Person> {
    if let Some((tag, local)) = identifier.split_once(':') {
      if let Ok(source) = crate::source::Source::parse(tag) {
        if let Some(&id) = self.by_source.get(&SourceKey::new(source, local)) {
          return self.persons.get(&id);
        }
      }
    }
    if let Some(email) = normalize_email(identifier) {
      if let Some(&id) = self.by_email.get(&email) {
        return self.persons.get(&id);
      }
    }
    if let Some(phone) = normalize_phone(identifier) {
      if let Some(&id) = self.by_phone.get(&phone) {
        return self.persons.get(&id);
      }
    }
    None
  }

  // ── Resolution ────────────────────────────────────────────────────────

  /// Resolve a reference to a person id, creating, attaching, or merging as
  /// the evidence requires. Deterministic and order-sensitive: callers must
  /// present references in arrival order.
  ///
  /// Lookup priority is source key, then email, then phone. Email is
  /// authoritative over phone: when one reference matches two distinct
  /// persons, the phone-matched person is merged into the email-matched
  /// one.
  pub fn resolve(
    &mut self,
    reference: &PersonRef,
    seen_at: DateTime<Utc>,
  ) -> Result<Resolution> {
    if !reference.has_identity() {
      return Err(Error::UnidentifiablePerson);
    }

    let email = reference.email.as_deref().and_then(normalize_email);
    let phone = reference.phone.as_deref().and_then(normalize_phone);
    let key = match (reference.source, reference.source_id.as_deref()) {
      (Some(source), Some(local)) => Some(SourceKey::new(source, local)),
      _ => None,
    };

    // Exact platform identifier wins outright.
    if let Some(key) = &key {
      if let Some(&id) = self.by_source.get(key) {
        self.absorb_attributes(id, reference, &email, &phone, None);
        return Ok(Resolution { person_id: id, absorbed: None, created: false });
      }
    }

    // Email match. If the same reference's phone points at a different
    // person, the two are provably one — merge, email side surviving.
    if let Some(email_key) = &email {
      if let Some(id) = self.by_email.get(email_key).copied() {
        let absorbed = match phone.as_deref().and_then(|p| self.by_phone.get(p)) {
          Some(&other) if other != id => {
            self.merge(id, other);
            Some(other)
          }
          _ => None,
        };
        self.absorb_attributes(id, reference, &email, &phone, key.as_ref());
        return Ok(Resolution { person_id: id, absorbed, created: false });
      }
    }

    // Phone match is advisory but sufficient when nothing else is known.
    if let Some(phone_key) = &phone {
      if let Some(&id) = self.by_phone.get(phone_key) {
        self.absorb_attributes(id, reference, &email, &phone, key.as_ref());
        return Ok(Resolution { person_id: id, absorbed: None, created: false });
      }
    }

    // Nothing matched: a new person.
    let person = Person {
      person_id:    PersonId::new(),
      display_name: reference.name.clone(),
      email:        email.clone(),
      phone:        phone.clone(),
      sources:      key.iter().cloned().collect(),
      first_seen:   seen_at,
      last_seen:    seen_at,
      event_count:  0,
      is_self:      reference.is_self,
    };
    let id = person.person_id;

    if let Some(key) = key {
      self.by_source.insert(key, id);
    }
    if let Some(email) = email {
      self.by_email.insert(email, id);
    }
    if let Some(phone) = phone {
      self.by_phone.insert(phone, id);
    }
    self.persons.insert(id, person);

    Ok(Resolution { person_id: id, absorbed: None, created: true })
  }

  /// Fill attributes the person is missing from a freshly resolved
  /// reference: name backfill, new identifiers (indexed), the self flag,
  /// and a newly seen source key. Existing values are never overwritten.
  fn absorb_attributes(
    &mut self,
    id: PersonId,
    reference: &PersonRef,
    email: &Option<String>,
    phone: &Option<String>,
    key: Option<&SourceKey>,
  ) {
    let Some(person) = self.persons.get_mut(&id) else { return };

    if person.display_name.is_none() {
      person.display_name = reference.name.clone();
    }
    if reference.is_self {
      person.is_self = true;
    }
    if let Some(key) = key {
      if person.sources.insert(key.clone()) {
        self.by_source.insert(key.clone(), id);
      }
    }
    if person.email.is_none() {
      if let Some(email) = email {
        person.email = Some(email.clone());
        self.by_email.insert(email.clone(), id);
      }
    }
    if person.phone.is_none() {
      if let Some(phone) = phone {
        // Only claim the phone if no one else holds it (the email branch
        // already merged the case where someone did).
        if !self.by_phone.contains_key(phone) {
          person.phone = Some(phone.clone());
          self.by_phone.insert(phone.clone(), id);
        }
      }
    }
  }

  /// Merge `loser` into `winner`: identifiers transferred, attributes
  /// backfilled, counters combined. The loser ceases to be independently
  /// resolvable. Logged as an auditable event — it changes historical
  /// attribution.
  fn merge(&mut self, winner: PersonId, loser: PersonId) {
    if !self.persons.contains_key(&winner) {
      return;
    }
    let Some(absorbed) = self.persons.remove(&loser) else { return };

    tracing::warn!(
      winner = %winner,
      absorbed = %loser,
      absorbed_label = %absorbed.label(),
      "identity conflict: merging persons proven identical"
    );

    for key in &absorbed.sources {
      self.by_source.insert(key.clone(), winner);
    }
    if let Some(email) = &absorbed.email {
      self.by_email.insert(email.clone(), winner);
    }
    if let Some(phone) = &absorbed.phone {
      self.by_phone.insert(phone.clone(), winner);
    }

    let Some(person) = self.persons.get_mut(&winner) else { return };
    person.sources.extend(absorbed.sources);
    if person.display_name.is_none() {
      person.display_name = absorbed.display_name;
    }
    if person.email.is_none() {
      person.email = absorbed.email;
    }
    if person.phone.is_none() {
      person.phone = absorbed.phone;
    }
    person.event_count += absorbed.event_count;
    person.first_seen = person.first_seen.min(absorbed.first_seen);
    person.last_seen = person.last_seen.max(absorbed.last_seen);
    person.is_self |= absorbed.is_self;
  }

  /// Record that an event at `at` involved each person in `participants`
  /// (deduplicated by the caller): bumps the event counter and widens the
  /// seen window.
  pub fn note_event(&mut self, participants: &[PersonId], at: DateTime<Utc>) {
    for id in participants {
      if let Some(person) = self.persons.get_mut(id) {
        person.event_count += 1;
        person.first_seen = person.first_seen.min(at);
        person.last_seen = person.last_seen.max(at);
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;
  use crate::source::Source;

  fn at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap()
  }

  fn imessage_ref(phone: &str) -> PersonRef {
    PersonRef {
      phone: Some(phone.into()),
      source_id: Some(phone.into()),
      source: Some(Source::Imessage),
      ..Default::default()
    }
  }

  fn gmail_ref(email: &str) -> PersonRef {
    PersonRef {
      email: Some(email.into()),
      source_id: Some(email.into()),
      source: Some(Source::Gmail),
      ..Default::default()
    }
  }

  #[test]
  fn unidentifiable_reference_rejected() {
    let mut reg = PersonRegistry::new();
    let err = reg.resolve(&PersonRef::default(), at()).unwrap_err();
    assert!(matches!(err, Error::UnidentifiablePerson));
  }

  #[test]
  fn same_email_resolves_to_same_person_regardless_of_order() {
    let a = PersonRef {
      email: Some("Ada@Example.com".into()),
      source_id: Some("x1".into()),
      source: Some(Source::Gmail),
      ..Default::default()
    };
    let b = PersonRef {
      email: Some("ada@example.com ".into()),
      source_id: Some("y2".into()),
      source: Some(Source::Whatsapp),
      ..Default::default()
    };

    let mut forward = PersonRegistry::new();
    let fa = forward.resolve(&a, at()).unwrap().person_id;
    let fb = forward.resolve(&b, at()).unwrap().person_id;
    assert_eq!(fa, fb);

    let mut reverse = PersonRegistry::new();
    let rb = reverse.resolve(&b, at()).unwrap().person_id;
    let ra = reverse.resolve(&a, at()).unwrap().person_id;
    assert_eq!(ra, rb);

    assert_eq!(forward.len(), 1);
    assert_eq!(reverse.len(), 1);
  }

  #[test]
  fn source_keys_stay_disjoint_across_persons() {
    let mut reg = PersonRegistry::new();
    reg.resolve(&imessage_ref("+15551234567"), at()).unwrap();
    reg.resolve(&gmail_ref("a@b.com"), at()).unwrap();
    reg.resolve(&imessage_ref("+15551234567"), at()).unwrap();

    let mut seen = std::collections::HashSet::new();
    for person in reg.list() {
      for key in &person.sources {
        assert!(seen.insert(key.clone()), "duplicate source key {key}");
      }
    }
  }

  #[test]
  fn name_backfilled_on_repeat_sighting() {
    let mut reg = PersonRegistry::new();
    let first = reg.resolve(&imessage_ref("+15551234567"), at()).unwrap();
    assert!(reg.get(first.person_id).unwrap().display_name.is_none());

    let mut named = imessage_ref("+15551234567");
    named.name = Some("Ada".into());
    let second = reg.resolve(&named, at()).unwrap();

    assert_eq!(first.person_id, second.person_id);
    assert_eq!(
      reg.get(first.person_id).unwrap().display_name.as_deref(),
      Some("Ada")
    );
  }

  #[test]
  fn email_and_phone_conflict_merges_into_email_person() {
    let mut reg = PersonRegistry::new();
    let phone_person =
      reg.resolve(&imessage_ref("+15551234567"), at()).unwrap().person_id;
    let email_person =
      reg.resolve(&gmail_ref("a@b.com"), at()).unwrap().person_id;
    assert_ne!(phone_person, email_person);
    assert_eq!(reg.len(), 2);

    // Third reference carries both identifiers.
    let bridging = PersonRef {
      email: Some("a@b.com".into()),
      phone: Some("+15551234567".into()),
      source_id: Some("z9".into()),
      source: Some(Source::Whatsapp),
      ..Default::default()
    };
    let resolution = reg.resolve(&bridging, at()).unwrap();

    assert_eq!(resolution.person_id, email_person);
    assert_eq!(resolution.absorbed, Some(phone_person));
    assert_eq!(reg.len(), 1);

    let survivor = reg.get(email_person).unwrap();
    assert_eq!(survivor.email.as_deref(), Some("a@b.com"));
    assert_eq!(survivor.phone.as_deref(), Some("+15551234567"));
    // All three platform identifiers now live on the survivor.
    assert_eq!(survivor.sources.len(), 3);

    // The old phone identifier resolves to the survivor from now on.
    let again = reg.resolve(&imessage_ref("+15551234567"), at()).unwrap();
    assert_eq!(again.person_id, email_person);
  }

  #[test]
  fn is_self_sticky() {
    let mut reg = PersonRegistry::new();
    let mut me = imessage_ref("+15550000000");
    me.is_self = true;
    let id = reg.resolve(&me, at()).unwrap().person_id;

    let later = reg.resolve(&imessage_ref("+15550000000"), at()).unwrap();
    assert_eq!(later.person_id, id);
    assert!(reg.get(id).unwrap().is_self);
  }

  #[test]
  fn note_event_widens_seen_window() {
    let mut reg = PersonRegistry::new();
    let id = reg.resolve(&gmail_ref("a@b.com"), at()).unwrap().person_id;

    let earlier = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let later = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
    reg.note_event(&[id], earlier);
    reg.note_event(&[id], later);

    let person = reg.get(id).unwrap();
    assert_eq!(person.event_count, 2);
    assert_eq!(person.first_seen, earlier);
    assert_eq!(person.last_seen, later);
  }

  #[test]
  fn lookup_by_each_identifier_kind() {
    let mut reg = PersonRegistry::new();
    let mut r = gmail_ref("a@b.com");
    r.phone = Some("+15551234567".into());
    let id = reg.resolve(&r, at()).unwrap().person_id;

    assert_eq!(reg.lookup_identifier("a@b.com").unwrap().person_id, id);
    assert_eq!(
      reg.lookup_identifier("(555) 123-4567").unwrap().person_id,
      id
    );
    assert_eq!(reg.lookup_identifier("gmail:a@b.com").unwrap().person_id, id);
    assert!(reg.lookup_identifier("nobody@nowhere.test").is_none());
  }
}
