//! # dronelink-store: Record Sink
//!
//! Durable storage for accepted telemetry records.
//!
//! ## Write Contract
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        DataStore Contract                               │
//! │                                                                         │
//! │  startup ──────────► load()      hydrate prior records                 │
//! │                                                                         │
//! │  full-log Success ─► replace()   authoritative resync, old rows gone   │
//! │                                                                         │
//! │  incremental done ─► append()    merge, existing rows untouched        │
//! │                                                                         │
//! │  Nothing else writes. Failed or empty transfers never reach the store. │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`csv`] - File-backed store, one header row, values as decimal text
//! - [`memory`] - In-memory store for tests and dry runs
//! - [`error`] - Store error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use dronelink_store::{CsvStore, DataStore};
//!
//! let mut store = CsvStore::new("drone_data.csv");
//! let report = store.load()?;
//! println!("hydrated {} records", report.loaded);
//!
//! store.replace(&transfer.records)?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod csv;
pub mod error;
pub mod memory;

// =============================================================================
// Re-exports
// =============================================================================

pub use self::csv::CsvStore;
pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;

use dronelink_core::Record;

// =============================================================================
// DataStore Trait
// =============================================================================

/// Summary of a startup hydration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Records now held by the store.
    pub loaded: usize,
    /// Rows skipped because they did not parse.
    pub skipped: usize,
}

/// The sink accepted records are written to.
///
/// Implementations keep the current contents in memory so the driver can read
/// them without touching storage.
pub trait DataStore: Send {
    /// Reads prior state. Missing storage is an empty store, not an error.
    fn load(&mut self) -> StoreResult<LoadReport>;

    /// Replaces all contents with `records`.
    fn replace(&mut self, records: &[Record]) -> StoreResult<()>;

    /// Appends `records` after the existing contents.
    fn append(&mut self, records: &[Record]) -> StoreResult<()>;

    /// Current contents in storage order.
    fn records(&self) -> &[Record];
}

impl<S: DataStore + ?Sized> DataStore for Box<S> {
    fn load(&mut self) -> StoreResult<LoadReport> {
        (**self).load()
    }

    fn replace(&mut self, records: &[Record]) -> StoreResult<()> {
        (**self).replace(records)
    }

    fn append(&mut self, records: &[Record]) -> StoreResult<()> {
        (**self).append(records)
    }

    fn records(&self) -> &[Record] {
        (**self).records()
    }
}
