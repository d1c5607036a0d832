//! # dronelink-sync: Telemetry Sync Engine
//!
//! Keeps a publish/subscribe session to the drone's broker and pulls telemetry
//! off the device, either as a full log or as incremental top-ups.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Ground Station Sync Architecture                    │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                TelemetryDriver (context object)                  │  │
//! │  │                                                                  │  │
//! │  │  cycle(now): poll session, dispatch by topic, tick timeouts,     │  │
//! │  │  hand finished transfers to the DataStore                        │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ SessionLink    │  │ LogTransfer    │  │ IncrementalSync        │    │
//! │  │                │  │ Controller     │  │ Controller             │    │
//! │  │ SessionManager │  │                │  │                        │    │
//! │  │ (cooperative)  │  │ stream_log ──► │  │ preview ──► batches    │    │
//! │  │  or            │  │ chunks ──► eof │  │ dedup by (ts,lat,lon)  │    │
//! │  │ SessionWorker  │  │ reorder, parse │  │ preview_done ──► append│    │
//! │  │ (background)   │  │ replace store  │  │                        │    │
//! │  └───────┬────────┘  └────────────────┘  └────────────────────────┘    │
//! │          │                                                              │
//! │          ▼                                                              │
//! │  ┌────────────────┐   drone/{id}/cmd        ◄── commands (QoS 1)       │
//! │  │ PubSubTransport│   drone/{id}/info       ──► heartbeats              │
//! │  │                │   drone/{id}/log/part   ──► log chunks              │
//! │  │ MemoryBroker   │   drone/{id}/preview    ──► record batches          │
//! │  │ for tests/demo │   drone/{id}/events     ──► preview_done            │
//! │  └────────────────┘   drone/{id}/state      ──► device state            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`config`] - Broker, device, transfer and session settings (TOML + env)
//! - [`error`] - Sync error types
//! - [`protocol`] - Topics, commands and payload codecs
//! - [`transport`] - The pub/sub transport seam and the in-memory broker
//! - [`session`] - Connection lifecycle, subscriptions, reconnect backoff
//! - [`link`] - Traits the controllers and the driver talk through
//! - [`worker`] - Background session worker with bounded handoff queues
//! - [`transfer`] - Full-log transfer state machine
//! - [`incremental`] - Incremental sync with identity-key dedup
//! - [`driver`] - `TelemetryDriver`, the per-cycle orchestrator
//! - `sim` - A simulated drone for demos and tests (feature `sim`)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use dronelink_store::CsvStore;
//! use dronelink_sync::{DronelinkConfig, SessionManager, TelemetryDriver, unix_now};
//!
//! let config = DronelinkConfig::load(None)?;
//! let mut session = SessionManager::new(transport, config.topics(), config.session.clone());
//! session.connect(config.connect_options()?)?;
//!
//! let store = CsvStore::new(&config.store.data_file);
//! let mut driver = TelemetryDriver::new(session, store, &config.transfer);
//! driver.hydrate()?;
//!
//! driver.request_full_log(unix_now())?;
//! loop {
//!     let report = driver.cycle(unix_now());
//!     if report.transfer.is_some() {
//!         break;
//!     }
//! }
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod driver;
pub mod error;
pub mod incremental;
pub mod link;
pub mod protocol;
pub mod session;
#[cfg(feature = "sim")]
pub mod sim;
pub mod transfer;
pub mod transport;
pub mod worker;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{
    BrokerSettings, DeviceSettings, DronelinkConfig, SessionSettings, StoreSettings,
    TransferSettings,
};
pub use driver::{CycleReport, DriverStatus, NoOpEmitter, TelemetryDriver, TelemetryEventEmitter};
pub use error::{ConnectError, PublishError, StartError, SyncError, SyncResult, TransportError};
pub use incremental::{IncrementalSyncController, SyncReport};
pub use link::{CommandPublisher, SessionLink};
pub use protocol::{Command, DeviceEvent, PreviewBatch, QoS, TopicKind, Topics};
pub use session::{ConnectionState, Inbound, SessionEvent, SessionHandle, SessionManager};
#[cfg(feature = "sim")]
pub use sim::{ChunkOrder, SimulatedDrone};
pub use transfer::{LogTransferController, TransferState};
pub use transport::{
    ConnectOptions, MemoryBroker, MemoryTransport, PubSubTransport, TlsMode, TransportEvent,
};
pub use worker::{SessionWorker, SessionWorkerHandle};

/// Wall-clock seconds since the Unix epoch.
///
/// Every state machine in this crate takes `now` as an argument. This is the
/// one place the real clock is read.
pub fn unix_now() -> f64 {
    let now = chrono::Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_nanos()) / 1e9
}
