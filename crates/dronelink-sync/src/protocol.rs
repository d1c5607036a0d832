//! # Drone Wire Protocol
//!
//! Topic layout, command payloads and inbound decoders.
//!
//! ## Topic Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Topics for device D                                  │
//! │                                                                         │
//! │  GROUND STATION ───► drone/D/cmd        commands (JSON, QoS 1)         │
//! │                                                                         │
//! │  DRONE ───► drone/D/state      latest device state     (QoS 1)         │
//! │  DRONE ───► drone/D/info       heartbeat               (QoS 1)         │
//! │  DRONE ───► drone/D/log/part   full-log chunk stream   (QoS 1)         │
//! │  DRONE ───► drone/D/preview    incremental batches     (QoS 1)         │
//! │  DRONE ───► drone/D/events     completion signals      (QoS 0)         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Wire Format
//! Commands are internally tagged JSON keyed on `action`:
//! ```json
//! { "action": "start", "interval_s": 2.0, "delay_s": 5.0, "step_hz": 800 }
//! { "action": "preview", "last": 50 }
//! ```
//!
//! Chunks carry no transfer token. A stale EOF from an aborted transfer can
//! finalize a newer one and duplicate `seq` values are kept as-is.

use serde::{Deserialize, Serialize};
use tracing::debug;

use dronelink_core::{Chunk, MissionParams, Record};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Quality of Service
// =============================================================================

/// Delivery guarantee requested from the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum QoS {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl From<QoS> for u8 {
    fn from(qos: QoS) -> u8 {
        match qos {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }
}

impl TryFrom<u8> for QoS {
    type Error = String;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(format!("invalid QoS level {}", other)),
        }
    }
}

/// QoS for every command we publish.
pub const COMMAND_QOS: QoS = QoS::AtLeastOnce;

// =============================================================================
// Topics
// =============================================================================

/// Which inbound channel a topic belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind {
    State,
    Info,
    LogPart,
    Preview,
    Events,
}

/// Fully qualified topic names for one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub cmd: String,
    pub state: String,
    pub info: String,
    pub log_part: String,
    pub preview: String,
    pub events: String,
}

impl Topics {
    pub fn for_device(device_id: &str) -> Self {
        let base = format!("drone/{}", device_id);
        Topics {
            cmd: format!("{}/cmd", base),
            state: format!("{}/state", base),
            info: format!("{}/info", base),
            log_part: format!("{}/log/part", base),
            preview: format!("{}/preview", base),
            events: format!("{}/events", base),
        }
    }

    /// The set subscribed after every successful connect.
    pub fn subscriptions(&self) -> Vec<(String, QoS)> {
        vec![
            (self.state.clone(), QoS::AtLeastOnce),
            (self.info.clone(), QoS::AtLeastOnce),
            (self.log_part.clone(), QoS::AtLeastOnce),
            (self.preview.clone(), QoS::AtLeastOnce),
            (self.events.clone(), QoS::AtMostOnce),
        ]
    }

    /// Maps an inbound topic to its channel. `None` for anything we did not subscribe to.
    pub fn classify(&self, topic: &str) -> Option<TopicKind> {
        if topic == self.state {
            Some(TopicKind::State)
        } else if topic == self.info {
            Some(TopicKind::Info)
        } else if topic == self.log_part {
            Some(TopicKind::LogPart)
        } else if topic == self.preview {
            Some(TopicKind::Preview)
        } else if topic == self.events {
            Some(TopicKind::Events)
        } else {
            None
        }
    }
}

// =============================================================================
// Commands
// =============================================================================

/// Commands published on `drone/D/cmd`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Command {
    /// Begin a drop mission.
    Start {
        interval_s: f64,
        delay_s: f64,
        step_hz: u32,
    },

    /// Emergency stop.
    Stop,

    /// Ask the drone to stream its full log on `log/part`.
    StreamLog,

    /// Ask for the most recent `last` records on `preview`.
    Preview { last: u32 },
}

impl Command {
    pub fn start(params: &MissionParams) -> Self {
        Command::Start {
            interval_s: params.interval_s,
            delay_s: params.delay_s,
            step_hz: params.step_hz,
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            Command::Start { .. } => "start",
            Command::Stop => "stop",
            Command::StreamLog => "stream_log",
            Command::Preview { .. } => "preview",
        }
    }

    pub fn to_json(&self) -> SyncResult<String> {
        serde_json::to_string(self).map_err(|e| SyncError::SerializationFailed(e.to_string()))
    }

    pub fn from_json(json: &[u8]) -> SyncResult<Self> {
        Ok(serde_json::from_slice(json)?)
    }
}

// =============================================================================
// Device Events
// =============================================================================

/// Out-of-band signals on `drone/D/events`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DeviceEvent {
    /// All preview batches for the current sync have been sent.
    PreviewDone,

    #[serde(other)]
    Unknown,
}

// =============================================================================
// Decoders
// =============================================================================

/// Decodes a `log/part` payload.
pub fn decode_chunk(payload: &[u8]) -> SyncResult<Chunk> {
    Ok(serde_json::from_slice(payload)?)
}

/// A decoded `preview` payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreviewBatch {
    pub records: Vec<Record>,
    /// Array entries that were not valid records.
    pub rejected: usize,
}

/// Decodes a `preview` payload: a JSON array of records. A bad entry is
/// skipped and counted; only a payload that is not an array fails.
pub fn decode_batch(payload: &[u8]) -> SyncResult<PreviewBatch> {
    let entries: Vec<serde_json::Value> = serde_json::from_slice(payload)?;
    let mut batch = PreviewBatch::default();
    for entry in entries {
        match serde_json::from_value::<Record>(entry) {
            Ok(record) => batch.records.push(record),
            Err(e) => {
                debug!(error = %e, "Skipping invalid preview record");
                batch.rejected += 1;
            }
        }
    }
    Ok(batch)
}

pub fn decode_event(payload: &[u8]) -> SyncResult<DeviceEvent> {
    Ok(serde_json::from_slice(payload)?)
}

/// Decodes a `state` payload as an arbitrary JSON value.
pub fn decode_state(payload: &[u8]) -> SyncResult<serde_json::Value> {
    Ok(serde_json::from_slice(payload)?)
}

pub fn encode_chunk(chunk: &Chunk) -> SyncResult<Vec<u8>> {
    serde_json::to_vec(chunk).map_err(|e| SyncError::SerializationFailed(e.to_string()))
}

pub fn encode_batch(records: &[Record]) -> SyncResult<Vec<u8>> {
    serde_json::to_vec(records).map_err(|e| SyncError::SerializationFailed(e.to_string()))
}

// =============================================================================
// Connection Acknowledgement
// =============================================================================

/// Human-readable reason for a connect acknowledgement code.
pub fn connack_reason(code: u8) -> &'static str {
    match code {
        0 => "connection accepted",
        1 => "unacceptable protocol version",
        2 => "identifier rejected",
        3 => "server unavailable",
        4 => "bad username or password",
        5 => "not authorised",
        _ => "unknown reason",
    }
}

/// Credentials problems, as opposed to a broker that is merely unavailable.
pub fn connack_is_auth_failure(code: u8) -> bool {
    matches!(code, 4 | 5)
}
