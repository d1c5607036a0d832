//! # dronelink-core: Pure Telemetry Logic
//!
//! Everything the ground station needs to reason about drone telemetry that
//! does not touch a socket, a file or a clock.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        dronelink Data Flow                              │
//! │                                                                         │
//! │  Broker ──► dronelink-sync (session, transfer, incremental sync)        │
//! │                    │                                                    │
//! │                    ▼                                                    │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │               ★ dronelink-core (THIS CRATE) ★                   │   │
//! │  │                                                                 │   │
//! │  │  ┌──────────┐ ┌────────────┐ ┌──────────┐ ┌──────┐ ┌─────────┐ │   │
//! │  │  │  types   │ │ reassembly │ │ liveness │ │dedup │ │validation│ │   │
//! │  │  │ Record   │ │ seq order  │ │ 2 beats  │ │(ts,  │ │ mission │ │   │
//! │  │  │ Chunk    │ │ line filter│ │ < 11 s   │ │lat,  │ │ params  │ │   │
//! │  │  │ Outcome  │ │ parse      │ │          │ │lon)  │ │         │ │   │
//! │  │  └──────────┘ └────────────┘ └──────────┘ └──────┘ └─────────┘ │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO NETWORK • TIME IS ALWAYS PASSED IN               │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                    │                                                    │
//! │                    ▼                                                    │
//! │  dronelink-store (CSV sink)                                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Record, Chunk, heartbeat and transfer result types
//! - [`schema`] - The fixed 8-column record line format
//! - [`reassembly`] - Turns buffered chunks into an ordered record set
//! - [`liveness`] - Heartbeat cadence based presence detection
//! - [`dedup`] - Identity-key seen-set shared by both sync modes
//! - [`validation`] - Mission parameter checks
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use dronelink_core::schema::parse_line;
//!
//! let record = parse_line("100.0,19.4,-99.1,50.0,3,5.2,8,1").unwrap();
//! assert_eq!(record.drop_id, 3);
//! assert!(record.fix_ok);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod dedup;
pub mod error;
pub mod liveness;
pub mod reassembly;
pub mod schema;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use dedup::SeenSet;
pub use error::{RecordParseError, ValidationError};
pub use liveness::LivenessMonitor;
pub use reassembly::{reassemble, Reassembly};
pub use types::*;
pub use validation::MissionParams;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Seconds a full-log transfer may stay in `Collecting` before it is aborted.
pub const DEFAULT_TRANSFER_TIMEOUT_SECS: f64 = 16.0;

/// Maximum gap between two consecutive heartbeats for the device to count
/// as online.
pub const DEFAULT_ONLINE_WINDOW_SECS: f64 = 11.0;

/// Default number of records asked for by an incremental sync.
pub const DEFAULT_PREVIEW_LAST: u32 = 50;
