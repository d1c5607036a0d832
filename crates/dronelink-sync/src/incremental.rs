//! # Incremental Sync
//!
//! Tops up the local dataset with the drone's most recent records.
//!
//! ```text
//! request_sync(limit) ──► {"action":"preview","last":limit}
//!
//! preview batch ──► identity key (ts,lat,lon) seen? ──yes──► duplicate, dropped
//!                                                   └─no──► pending, marked seen
//!
//! {"event":"preview_done"} ──► SyncReport { records: pending, ... }
//!                              driver appends, never replaces
//! ```
//!
//! The seen-set outlives individual syncs. It is seeded from the store at
//! startup and after every full-log replacement.

use tracing::{debug, info, warn};

use dronelink_core::{Record, SeenSet, DEFAULT_TRANSFER_TIMEOUT_SECS};

use crate::error::StartError;
use crate::link::CommandPublisher;
use crate::protocol::{decode_batch, Command};

/// Summary of one finished incremental sync.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    /// Newly accepted records, in arrival order. The driver appends these.
    pub records: Vec<Record>,
    pub accepted_count: usize,
    pub duplicate_count: usize,
    /// Preview payloads that did not decode.
    pub undecodable_batches: usize,
    /// Entries skipped inside otherwise valid batches.
    pub rejected_records: usize,
    /// Finished by the timeout rather than by `preview_done`.
    pub timed_out: bool,
}

#[derive(Debug)]
pub struct IncrementalSyncController {
    in_progress: bool,
    timeout_secs: f64,
    started_at: f64,
    seen: SeenSet,
    pending: Vec<Record>,
    duplicates: usize,
    undecodable_batches: usize,
    rejected_records: usize,
}

impl Default for IncrementalSyncController {
    fn default() -> Self {
        Self::new(DEFAULT_TRANSFER_TIMEOUT_SECS)
    }
}

impl IncrementalSyncController {
    pub fn new(timeout_secs: f64) -> Self {
        IncrementalSyncController {
            in_progress: false,
            timeout_secs,
            started_at: 0.0,
            seen: SeenSet::new(),
            pending: Vec::new(),
            duplicates: 0,
            undecodable_batches: 0,
            rejected_records: 0,
        }
    }

    pub fn is_in_progress(&self) -> bool {
        self.in_progress
    }

    /// Identity keys known so far.
    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    /// Records accepted in the running sync but not yet reported.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Replaces the seen-set with the keys of `records`.
    pub fn hydrate(&mut self, records: &[Record]) {
        self.seen = SeenSet::from_records(records);
        debug!(keys = self.seen.len(), "Seen-set hydrated");
    }

    pub fn request_sync<P>(&mut self, publisher: &mut P, limit: u32, now: f64) -> Result<(), StartError>
    where
        P: CommandPublisher + ?Sized,
    {
        if self.in_progress {
            return Err(StartError::AlreadyInProgress);
        }
        if !publisher.is_connected() {
            return Err(StartError::NotConnected);
        }

        publisher.send_command(&Command::Preview { last: limit })?;

        self.in_progress = true;
        self.started_at = now;
        self.pending.clear();
        self.duplicates = 0;
        self.undecodable_batches = 0;
        self.rejected_records = 0;
        info!(limit, "Incremental sync started");
        Ok(())
    }

    /// Merges a batch. Returns how many records were new.
    pub fn on_batch(&mut self, records: Vec<Record>) -> usize {
        if !self.in_progress {
            debug!(count = records.len(), "Ignoring preview batch outside of a sync");
            return 0;
        }

        let mut accepted = 0;
        for record in records {
            if self.seen.insert(&record) {
                self.pending.push(record);
                accepted += 1;
            } else {
                self.duplicates += 1;
            }
        }
        debug!(accepted, pending = self.pending.len(), "Preview batch merged");
        accepted
    }

    /// Decodes and merges a raw `preview` payload.
    pub fn on_batch_payload(&mut self, payload: &[u8]) -> usize {
        if !self.in_progress {
            return 0;
        }
        match decode_batch(payload) {
            Ok(batch) => {
                if batch.rejected > 0 {
                    warn!(rejected = batch.rejected, "Skipped invalid records in preview batch");
                }
                self.rejected_records += batch.rejected;
                self.on_batch(batch.records)
            }
            Err(e) => {
                warn!(error = %e, "Undecodable preview batch");
                self.undecodable_batches += 1;
                0
            }
        }
    }

    /// Completion signal. `None` when no sync was running.
    pub fn on_sync_done(&mut self) -> Option<SyncReport> {
        if !self.in_progress {
            debug!("preview_done with no sync in progress");
            return None;
        }
        Some(self.finish(false))
    }

    /// Finishes a sync whose completion signal never came.
    pub fn tick(&mut self, now: f64) -> Option<SyncReport> {
        if self.in_progress && now - self.started_at > self.timeout_secs {
            warn!(pending = self.pending.len(), "Incremental sync timed out");
            return Some(self.finish(true));
        }
        None
    }

    /// Drops the running sync without reporting. Its records become unseen again.
    pub fn cancel(&mut self) -> bool {
        if !self.in_progress {
            return false;
        }
        self.in_progress = false;
        let dropped = std::mem::take(&mut self.pending);
        self.forget(&dropped);
        info!(dropped = dropped.len(), "Incremental sync cancelled");
        true
    }

    /// Un-marks records that were accepted but never persisted.
    pub fn forget(&mut self, records: &[Record]) {
        for record in records {
            self.seen.remove(record);
        }
    }

    fn finish(&mut self, timed_out: bool) -> SyncReport {
        self.in_progress = false;
        let records = std::mem::take(&mut self.pending);
        let report = SyncReport {
            accepted_count: records.len(),
            records,
            duplicate_count: std::mem::take(&mut self.duplicates),
            undecodable_batches: std::mem::take(&mut self.undecodable_batches),
            rejected_records: std::mem::take(&mut self.rejected_records),
            timed_out,
        };
        info!(
            accepted = report.accepted_count,
            duplicates = report.duplicate_count,
            timed_out,
            "Incremental sync finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PublishError;
    use crate::protocol::{encode_batch, QoS, Topics};

    struct Link {
        connected: bool,
        topics: Topics,
        sent: Vec<Vec<u8>>,
    }

    impl CommandPublisher for Link {
        fn is_connected(&self) -> bool {
            self.connected
        }

        fn topics(&self) -> &Topics {
            &self.topics
        }

        fn try_publish(&mut self, _topic: &str, payload: &[u8], _qos: QoS) -> Result<(), PublishError> {
            self.sent.push(payload.to_vec());
            Ok(())
        }
    }

    fn link() -> Link {
        Link {
            connected: true,
            topics: Topics::for_device("d"),
            sent: Vec::new(),
        }
    }

    fn record(ts: f64, lat: f64, lon: f64) -> Record {
        Record {
            ts,
            lat,
            lon,
            alt: 50.0,
            drop_id: 1,
            speed_mps: 5.0,
            sats: 8,
            fix_ok: true,
        }
    }

    fn running() -> IncrementalSyncController {
        let mut ctl = IncrementalSyncController::new(16.0);
        ctl.request_sync(&mut link(), 50, 0.0).unwrap();
        ctl
    }

    #[test]
    fn test_request_publishes_preview() {
        let mut link = link();
        let mut ctl = IncrementalSyncController::default();
        ctl.request_sync(&mut link, 25, 0.0).unwrap();

        assert!(ctl.is_in_progress());
        assert_eq!(link.sent[0], br#"{"action":"preview","last":25}"#);
        assert_eq!(
            ctl.request_sync(&mut link, 25, 1.0),
            Err(StartError::AlreadyInProgress)
        );
    }

    #[test]
    fn test_request_requires_connection() {
        let mut link = link();
        link.connected = false;
        let mut ctl = IncrementalSyncController::default();
        assert_eq!(
            ctl.request_sync(&mut link, 25, 0.0),
            Err(StartError::NotConnected)
        );
        assert!(!ctl.is_in_progress());
    }

    #[test]
    fn test_dedup_within_and_across_batches() {
        let mut ctl = running();
        let a = record(1.0, 19.4, -99.1);
        let mut a_again = a;
        a_again.alt = 999.0;
        let b = record(2.0, 19.4, -99.1);

        assert_eq!(ctl.on_batch(vec![a, a_again]), 1);
        assert_eq!(ctl.on_batch(vec![b, a]), 1);

        let report = ctl.on_sync_done().unwrap();
        assert_eq!(report.accepted_count, 2);
        assert_eq!(report.duplicate_count, 2);
        assert_eq!(report.records[0].alt, 50.0);
        assert!(!report.timed_out);
        assert!(!ctl.is_in_progress());
    }

    #[test]
    fn test_hydrated_records_are_duplicates() {
        let existing = record(1.0, 19.4, -99.1);
        let mut ctl = IncrementalSyncController::default();
        ctl.hydrate(&[existing]);
        ctl.request_sync(&mut link(), 50, 0.0).unwrap();

        assert_eq!(ctl.on_batch(vec![existing]), 0);
        let report = ctl.on_sync_done().unwrap();
        assert_eq!(report.accepted_count, 0);
        assert!(report.records.is_empty());
    }

    #[test]
    fn test_batch_outside_sync_is_ignored() {
        let mut ctl = IncrementalSyncController::default();
        assert_eq!(ctl.on_batch(vec![record(1.0, 0.0, 0.0)]), 0);
        assert_eq!(ctl.seen_count(), 0);
        assert!(ctl.on_sync_done().is_none());
    }

    #[test]
    fn test_batch_payload() {
        let mut ctl = running();
        let payload = encode_batch(&[record(1.0, 2.0, 3.0), record(4.0, 5.0, 6.0)]).unwrap();
        assert_eq!(ctl.on_batch_payload(&payload), 2);
        assert_eq!(ctl.on_batch_payload(b"{broken"), 0);

        let report = ctl.on_sync_done().unwrap();
        assert_eq!(report.accepted_count, 2);
        assert_eq!(report.undecodable_batches, 1);
    }

    #[test]
    fn test_bad_entry_keeps_rest_of_batch() {
        let mut ctl = running();
        let payload = br#"[
            {"ts":1.0,"lat":2.0,"lon":3.0,"alt":50.0,"drop_id":1,"speed_mps":5.0,"sats":8,"fix_ok":1},
            {"ts":4.0,"lat":5.0}
        ]"#;
        assert_eq!(ctl.on_batch_payload(payload), 1);

        let report = ctl.on_sync_done().unwrap();
        assert_eq!(report.accepted_count, 1);
        assert_eq!(report.rejected_records, 1);
        assert_eq!(report.undecodable_batches, 0);
    }

    #[test]
    fn test_timeout_reports_partial() {
        let mut ctl = running();
        ctl.on_batch(vec![record(1.0, 2.0, 3.0)]);

        assert!(ctl.tick(10.0).is_none());
        let report = ctl.tick(17.0).unwrap();
        assert!(report.timed_out);
        assert_eq!(report.accepted_count, 1);
        assert!(!ctl.is_in_progress());
    }

    #[test]
    fn test_cancel_discards_pending() {
        let mut ctl = running();
        ctl.on_batch(vec![record(1.0, 2.0, 3.0)]);

        assert!(ctl.cancel());
        assert!(!ctl.cancel());
        assert_eq!(ctl.pending_count(), 0);
        assert_eq!(ctl.seen_count(), 0);
        assert!(ctl.on_sync_done().is_none());

        ctl.request_sync(&mut link(), 50, 1.0).unwrap();
        assert_eq!(ctl.on_batch(vec![record(1.0, 2.0, 3.0)]), 1);
    }
}
