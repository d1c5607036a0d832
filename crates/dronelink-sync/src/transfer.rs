//! # Full-Log Transfer
//!
//! Requests the drone's complete log and reassembles the chunk stream.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                   LogTransferController States                          │
//! │                                                                         │
//! │   ┌──────┐ request_full_log() ┌────────────┐ publish ok ┌────────────┐ │
//! │   │ Idle │ ─────────────────► │ Requesting │ ─────────► │ Collecting │ │
//! │   └──────┘                    └─────┬──────┘            └─────┬──────┘ │
//! │      ▲                              │ publish failed          │        │
//! │      ├──────────────────────────────┘                         │        │
//! │      │                                                        │        │
//! │      │   timeout / undecodable frame / cancel / disconnect    │        │
//! │      ├────────────────────────────────────────────────────────┤        │
//! │      │                                                        │ eof    │
//! │      │                                                        ▼        │
//! │      │                                                 ┌────────────┐  │
//! │      └──────────────── result ─────────────────────────│ Finalizing │  │
//! │                                                        └────────────┘  │
//! │                                                                         │
//! │  Every exit back to Idle empties the chunk buffer.                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A successful result is handed to the driver, which replaces the stored
//! dataset with it.

use tracing::{debug, info, warn};

use dronelink_core::{
    reassemble, BufferedChunk, Chunk, TransferOutcome, TransferResult,
    DEFAULT_TRANSFER_TIMEOUT_SECS,
};

use crate::error::StartError;
use crate::link::CommandPublisher;
use crate::protocol::{decode_chunk, Command};

/// Where the controller is in a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Idle,
    Requesting,
    Collecting,
    Finalizing,
}

impl std::fmt::Display for TransferState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferState::Idle => write!(f, "idle"),
            TransferState::Requesting => write!(f, "requesting"),
            TransferState::Collecting => write!(f, "collecting"),
            TransferState::Finalizing => write!(f, "finalizing"),
        }
    }
}

/// Drives one full-log transfer at a time.
#[derive(Debug)]
pub struct LogTransferController {
    state: TransferState,
    timeout_secs: f64,
    started_at: f64,
    buffer: Vec<BufferedChunk>,
    malformed_chunks: usize,
}

impl Default for LogTransferController {
    fn default() -> Self {
        Self::new(DEFAULT_TRANSFER_TIMEOUT_SECS)
    }
}

impl LogTransferController {
    pub fn new(timeout_secs: f64) -> Self {
        LogTransferController {
            state: TransferState::Idle,
            timeout_secs,
            started_at: 0.0,
            buffer: Vec::new(),
            malformed_chunks: 0,
        }
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state != TransferState::Idle
    }

    pub fn chunks_buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn timeout_secs(&self) -> f64 {
        self.timeout_secs
    }

    /// Publishes `stream_log` and starts collecting.
    pub fn request_full_log<P>(&mut self, publisher: &mut P, now: f64) -> Result<(), StartError>
    where
        P: CommandPublisher + ?Sized,
    {
        if self.is_active() {
            return Err(StartError::AlreadyInProgress);
        }
        if !publisher.is_connected() {
            return Err(StartError::NotConnected);
        }

        self.buffer.clear();
        self.malformed_chunks = 0;
        self.started_at = now;
        self.state = TransferState::Requesting;

        if let Err(e) = publisher.send_command(&Command::StreamLog) {
            warn!(error = %e, "Could not send log request");
            self.state = TransferState::Idle;
            return Err(e.into());
        }

        self.state = TransferState::Collecting;
        info!(started_at = now, timeout_secs = self.timeout_secs, "Full log transfer started");
        Ok(())
    }

    /// Feeds a raw `log/part` payload. An undecodable frame aborts the transfer.
    pub fn on_payload(&mut self, payload: &[u8]) -> Option<TransferResult> {
        if self.state != TransferState::Collecting {
            debug!("Ignoring log chunk outside of a transfer");
            return None;
        }
        match decode_chunk(payload) {
            Ok(chunk) => self.on_chunk(chunk),
            Err(e) => {
                self.malformed_chunks += 1;
                warn!(error = %e, "Undecodable log chunk, aborting transfer");
                Some(self.finish(TransferOutcome::MalformedPayload))
            }
        }
    }

    /// Feeds one decoded chunk. Returns the result once the transfer ends.
    pub fn on_chunk(&mut self, chunk: Chunk) -> Option<TransferResult> {
        if self.state != TransferState::Collecting {
            debug!(eof = chunk.eof, "Ignoring log chunk outside of a transfer");
            return None;
        }

        if chunk.eof {
            return Some(self.finalize());
        }

        match (chunk.seq, chunk.data) {
            (Some(seq), Some(data)) => {
                self.buffer.push(BufferedChunk { seq, data });
            }
            _ => {
                self.malformed_chunks += 1;
                debug!(malformed = self.malformed_chunks, "Dropping chunk without seq or data");
            }
        }
        None
    }

    /// Aborts with `Timeout` once the deadline has passed.
    pub fn tick(&mut self, now: f64) -> Option<TransferResult> {
        if self.state != TransferState::Collecting {
            return None;
        }
        if now - self.started_at > self.timeout_secs {
            warn!(
                elapsed = now - self.started_at,
                chunks = self.buffer.len(),
                "Log transfer timed out"
            );
            return Some(self.finish(TransferOutcome::Timeout));
        }
        None
    }

    /// Operator cancel. `None` when nothing was running.
    pub fn cancel(&mut self) -> Option<TransferResult> {
        if !self.is_active() {
            return None;
        }
        info!("Log transfer cancelled");
        Some(self.finish(TransferOutcome::Cancelled))
    }

    /// The session dropped. `None` when nothing was running.
    pub fn on_disconnect(&mut self) -> Option<TransferResult> {
        if !self.is_active() {
            return None;
        }
        warn!("Session lost during log transfer");
        Some(self.finish(TransferOutcome::NotConnected))
    }

    fn finalize(&mut self) -> TransferResult {
        self.state = TransferState::Finalizing;

        let mut chunks = std::mem::take(&mut self.buffer);
        let malformed_chunks = std::mem::take(&mut self.malformed_chunks);
        let chunks_received = chunks.len();

        let result = if chunks.is_empty() {
            // chunks that arrived but were all dropped are not an empty log
            let outcome = if malformed_chunks == 0 {
                TransferOutcome::EmptyLog
            } else {
                TransferOutcome::MalformedPayload
            };
            TransferResult::without_records(outcome, 0, malformed_chunks)
        } else {
            let reassembly = reassemble(&mut chunks);
            let outcome = if reassembly.records.is_empty() {
                TransferOutcome::MalformedPayload
            } else {
                TransferOutcome::Success
            };
            let records = if outcome.is_success() {
                reassembly.records
            } else {
                Vec::new()
            };
            TransferResult {
                accepted_count: records.len(),
                records,
                rejected_line_count: reassembly.rejected_lines,
                chunks_received,
                malformed_chunks,
                outcome,
            }
        };

        self.state = TransferState::Idle;
        info!(
            outcome = %result.outcome,
            accepted = result.accepted_count,
            rejected = result.rejected_line_count,
            chunks = chunks_received,
            "Log transfer finished"
        );
        result
    }

    fn finish(&mut self, outcome: TransferOutcome) -> TransferResult {
        let chunks_received = std::mem::take(&mut self.buffer).len();
        let malformed_chunks = std::mem::take(&mut self.malformed_chunks);
        self.state = TransferState::Idle;
        TransferResult::without_records(outcome, chunks_received, malformed_chunks)
    }
}
