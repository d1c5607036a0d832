//! # Identity-Key Dedup
//!
//! The seen-set shared by incremental sync and store hydration. Two records
//! with the same `(ts, lat, lon)` are the same observation, no matter what the
//! other columns say.

use std::collections::HashSet;

use crate::types::{IdentityKey, Record};

/// Set of identity keys already accepted.
#[derive(Debug, Clone, Default)]
pub struct SeenSet {
    keys: HashSet<IdentityKey>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a set from records already held locally.
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a Record>) -> Self {
        let mut set = Self::new();
        set.seed(records);
        set
    }

    /// Marks every record as seen.
    pub fn seed<'a>(&mut self, records: impl IntoIterator<Item = &'a Record>) {
        self.keys.extend(records.into_iter().map(Record::identity_key));
    }

    /// Marks `record` as seen. Returns false if its key was already present.
    pub fn insert(&mut self, record: &Record) -> bool {
        self.keys.insert(record.identity_key())
    }

    /// Forgets `record`'s key so it can be accepted again.
    pub fn remove(&mut self, record: &Record) -> bool {
        self.keys.remove(&record.identity_key())
    }

    pub fn contains(&self, record: &Record) -> bool {
        self.keys.contains(&record.identity_key())
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn clear(&mut self) {
        self.keys.clear();
    }
}
