//! Read-side reconciliation of records written by racing check-then-write sequences.

use indexmap::IndexMap;
use time::OffsetDateTime;

use crate::dao::models::{PresenceRecord, ReadinessRecord};

/// Record addressed by a session key and ordered by a timestamp.
pub trait KeyedRecord {
    fn key(&self) -> &str;
    fn stamp(&self) -> OffsetDateTime;
}

impl KeyedRecord for PresenceRecord {
    fn key(&self) -> &str {
        &self.session_id
    }

    fn stamp(&self) -> OffsetDateTime {
        self.last_seen_at
    }
}

impl KeyedRecord for ReadinessRecord {
    fn key(&self) -> &str {
        &self.session_id
    }

    fn stamp(&self) -> OffsetDateTime {
        self.declared_at
    }
}

/// Keep one record per key (the freshest one), ordered by ascending timestamp then key.
pub fn reconcile<R, I>(records: I) -> Vec<R>
where
    R: KeyedRecord,
    I: IntoIterator<Item = R>,
{
    let mut freshest: IndexMap<String, R> = IndexMap::new();
    for record in records {
        match freshest.get(record.key()) {
            Some(kept) if kept.stamp() >= record.stamp() => {}
            _ => {
                freshest.insert(record.key().to_string(), record);
            }
        }
    }

    let mut reconciled: Vec<R> = freshest.into_values().collect();
    reconciled.sort_by(|a, b| a.stamp().cmp(&b.stamp()).then_with(|| a.key().cmp(b.key())));
    reconciled
}
