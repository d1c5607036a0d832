//! # Domain Types
//!
//! Core telemetry types used throughout dronelink.
//!
//! ## Type Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────────┐   │
//! │  │     Record      │   │      Chunk      │   │   TransferResult    │   │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────────  │   │
//! │  │  ts, lat, lon   │   │  seq            │   │  records            │   │
//! │  │  alt, drop_id   │   │  data           │   │  accepted_count     │   │
//! │  │  speed_mps      │   │  eof            │   │  rejected_line_count│   │
//! │  │  sats, fix_ok   │   │                 │   │  outcome            │   │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────────┘   │
//! │                                                                         │
//! │  Identity key: (ts, lat, lon) - compared bitwise, -0.0 folded to 0.0   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Deserializer, Serialize};

// =============================================================================
// Record
// =============================================================================

/// One telemetry sample logged by the drone at a ball drop.
///
/// Records are immutable once accepted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Seconds since the Unix epoch.
    pub ts: f64,
    pub lat: f64,
    pub lon: f64,
    /// Altitude in metres.
    pub alt: f64,
    pub drop_id: i64,
    pub speed_mps: f64,
    /// Satellites in view.
    pub sats: i64,
    /// Whether the GPS reported a valid fix.
    #[serde(deserialize_with = "deserialize_flag")]
    pub fix_ok: bool,
}

impl Record {
    /// Returns the deduplication key shared by both sync modes.
    pub fn identity_key(&self) -> IdentityKey {
        IdentityKey::new(self.ts, self.lat, self.lon)
    }
}

/// Accepts `true`/`false`, `0`/`1` and their string spellings.
fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
        Float(f64),
        Text(String),
    }

    match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => Ok(b),
        Flag::Int(i) => Ok(i != 0),
        Flag::Float(f) => Ok(f != 0.0),
        Flag::Text(s) => crate::schema::parse_flag(&s).map_err(serde::de::Error::custom),
    }
}

// =============================================================================
// Identity Key
// =============================================================================

/// `(ts, lat, lon)` packed as bit patterns so it can be hashed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdentityKey {
    ts: u64,
    lat: u64,
    lon: u64,
}

impl IdentityKey {
    pub fn new(ts: f64, lat: f64, lon: f64) -> Self {
        IdentityKey {
            ts: canonical_bits(ts),
            lat: canonical_bits(lat),
            lon: canonical_bits(lon),
        }
    }
}

#[inline]
fn canonical_bits(value: f64) -> u64 {
    // -0.0 == 0.0 numerically; keep them on the same key
    if value == 0.0 {
        0.0f64.to_bits()
    } else {
        value.to_bits()
    }
}

// =============================================================================
// Chunk
// =============================================================================

/// One fragment of the serialized telemetry log as it arrives on the wire.
///
/// An `eof` chunk signals end-of-transfer and may omit `seq` and `data`.
/// A non-eof chunk missing either field is malformed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Chunk {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,

    #[serde(default)]
    pub eof: bool,
}

impl Chunk {
    /// Creates a data chunk.
    pub fn data(seq: i64, data: impl Into<String>) -> Self {
        Chunk {
            seq: Some(seq),
            data: Some(data.into()),
            eof: false,
        }
    }

    /// Creates an end-of-transfer marker.
    pub fn eof() -> Self {
        Chunk {
            seq: None,
            data: None,
            eof: true,
        }
    }
}

/// A validated data chunk held in the transfer buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferedChunk {
    pub seq: i64,
    pub data: String,
}

// =============================================================================
// Heartbeat
// =============================================================================

/// A heartbeat observed at receipt time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeartbeatEvent {
    pub received_at: f64,
}

// =============================================================================
// Transfer Result
// =============================================================================

/// How a full-log transfer ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferOutcome {
    /// At least one record survived filtering. Rejected lines may be non-zero.
    Success,
    /// EOF arrived before any chunk, valid or not.
    EmptyLog,
    /// No EOF within the configured timeout.
    Timeout,
    /// Chunks arrived but nothing parsed, or an undecodable frame aborted the transfer.
    MalformedPayload,
    /// The session dropped while the transfer was active.
    NotConnected,
    /// The operator cancelled the transfer.
    Cancelled,
}

impl TransferOutcome {
    /// Only a successful transfer replaces the stored dataset.
    pub fn is_success(&self) -> bool {
        matches!(self, TransferOutcome::Success)
    }
}

impl std::fmt::Display for TransferOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferOutcome::Success => write!(f, "success"),
            TransferOutcome::EmptyLog => write!(f, "empty_log"),
            TransferOutcome::Timeout => write!(f, "timeout"),
            TransferOutcome::MalformedPayload => write!(f, "malformed_payload"),
            TransferOutcome::NotConnected => write!(f, "not_connected"),
            TransferOutcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// The finished product of one full-log transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferResult {
    /// Parsed records in `seq` order. Empty unless the outcome is `Success`.
    pub records: Vec<Record>,
    pub accepted_count: usize,
    pub rejected_line_count: usize,
    /// Valid data chunks buffered before the transfer ended.
    pub chunks_received: usize,
    /// Non-eof chunks dropped for missing `seq` or `data`, plus the
    /// undecodable frame that aborted the transfer, if any.
    pub malformed_chunks: usize,
    pub outcome: TransferOutcome,
}

impl TransferResult {
    /// A result that carries no records.
    pub fn without_records(
        outcome: TransferOutcome,
        chunks_received: usize,
        malformed_chunks: usize,
    ) -> Self {
        TransferResult {
            records: Vec::new(),
            accepted_count: 0,
            rejected_line_count: 0,
            chunks_received,
            malformed_chunks,
            outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Record {
        Record {
            ts: 100.0,
            lat: 19.4,
            lon: -99.1,
            alt: 50.0,
            drop_id: 3,
            speed_mps: 5.2,
            sats: 8,
            fix_ok: true,
        }
    }

    #[test]
    fn test_identity_key_ignores_non_key_fields() {
        let a = sample();
        let b = Record {
            alt: 80.0,
            drop_id: 9,
            ..a
        };
        assert_eq!(a.identity_key(), b.identity_key());

        let c = Record { lat: 19.5, ..a };
        assert_ne!(a.identity_key(), c.identity_key());
    }

    #[test]
    fn test_identity_key_folds_negative_zero() {
        assert_eq!(
            IdentityKey::new(0.0, -0.0, 1.0),
            IdentityKey::new(0.0, 0.0, 1.0)
        );
    }

    #[test]
    fn test_record_flag_accepts_numbers() {
        let json = r#"{"ts":1.0,"lat":2.0,"lon":3.0,"alt":4.0,"drop_id":5,"speed_mps":6.0,"sats":7,"fix_ok":1}"#;
        let record: Record = serde_json::from_str(json).unwrap();
        assert!(record.fix_ok);

        let json = r#"{"ts":1.0,"lat":2.0,"lon":3.0,"alt":4.0,"drop_id":5,"speed_mps":6.0,"sats":7,"fix_ok":false}"#;
        let record: Record = serde_json::from_str(json).unwrap();
        assert!(!record.fix_ok);
    }

    #[test]
    fn test_eof_chunk_without_fields() {
        let chunk: Chunk = serde_json::from_str(r#"{"eof":true}"#).unwrap();
        assert!(chunk.eof);
        assert_eq!(chunk.seq, None);
        assert_eq!(chunk.data, None);
    }

    #[test]
    fn test_chunk_eof_defaults_false() {
        let chunk: Chunk = serde_json::from_str(r#"{"seq":4,"data":"abc"}"#).unwrap();
        assert_eq!(chunk, Chunk::data(4, "abc"));
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(TransferOutcome::EmptyLog.to_string(), "empty_log");
        assert!(TransferOutcome::Success.is_success());
        assert!(!TransferOutcome::Timeout.is_success());
    }
}
