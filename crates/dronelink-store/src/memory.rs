//! In-memory [`DataStore`] used by tests and dry runs.

use dronelink_core::Record;

use crate::error::StoreResult;
use crate::{DataStore, LoadReport};

/// Keeps records in a `Vec` and counts writes.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: Vec<Record>,
    replace_calls: usize,
    append_calls: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that already holds `records`, as if hydrated from disk.
    pub fn with_records(records: Vec<Record>) -> Self {
        MemoryStore {
            records,
            ..Self::default()
        }
    }

    pub fn replace_calls(&self) -> usize {
        self.replace_calls
    }

    pub fn append_calls(&self) -> usize {
        self.append_calls
    }
}

impl DataStore for MemoryStore {
    fn load(&mut self) -> StoreResult<LoadReport> {
        Ok(LoadReport {
            loaded: self.records.len(),
            skipped: 0,
        })
    }

    fn replace(&mut self, records: &[Record]) -> StoreResult<()> {
        self.replace_calls += 1;
        self.records = records.to_vec();
        Ok(())
    }

    fn append(&mut self, records: &[Record]) -> StoreResult<()> {
        self.append_calls += 1;
        self.records.extend_from_slice(records);
        Ok(())
    }

    fn records(&self) -> &[Record] {
        &self.records
    }
}
