//! # Telemetry Driver
//!
//! The context object that owns every piece of session state and advances it
//! once per cycle.
//!
//! ## Cycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      TelemetryDriver::cycle(now)                        │
//! │                                                                         │
//! │  1. link.poll_events(now)                                              │
//! │       cooperative: SessionManager::pump (bounded slice)                 │
//! │       background:  SessionWorkerHandle::drain (try_recv only)           │
//! │                                                                         │
//! │  2. dispatch each event                                                │
//! │       Connected / Disconnected ──► liveness reset, transfer abort       │
//! │       info        ──► LivenessMonitor::on_heartbeat                     │
//! │       log/part    ──► LogTransferController::on_payload                 │
//! │       preview     ──► IncrementalSyncController::on_batch_payload       │
//! │       events      ──► preview_done ──► on_sync_done                     │
//! │       state       ──► latest device state                               │
//! │                                                                         │
//! │  3. tick both controllers (timeouts)                                   │
//! │                                                                         │
//! │  4. handoff                                                            │
//! │       transfer Success ──► DataStore::replace, reseed seen-set          │
//! │       sync finished    ──► DataStore::append (new records only)         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The caller owns the cadence. Nothing here sleeps or spawns.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use dronelink_core::{
    LivenessMonitor, MissionParams, Record, TransferOutcome, TransferResult,
};
use dronelink_store::{DataStore, LoadReport};

use crate::config::TransferSettings;
use crate::error::{ConnectError, PublishError, StartError, SyncError, SyncResult};
use crate::incremental::{IncrementalSyncController, SyncReport};
use crate::link::SessionLink;
use crate::protocol::{decode_event, decode_state, Command, DeviceEvent, TopicKind};
use crate::session::{ConnectionState, Inbound, SessionEvent};
use crate::transfer::{LogTransferController, TransferState};

// =============================================================================
// Event Emitter Trait
// =============================================================================

/// Receives notifications for the operator surface.
pub trait TelemetryEventEmitter: Send + Sync {
    /// Session connected or disconnected.
    fn emit_connection(&self, state: ConnectionState, reason: Option<&str>);

    /// Broker refused the session or the transport could not connect.
    fn emit_connect_refused(&self, error: &ConnectError);

    /// Device became online. Fires once per online transition.
    fn emit_device_online(&self);

    fn emit_transfer_finished(&self, result: &TransferResult);

    fn emit_sync_finished(&self, report: &SyncReport);

    /// An error. `actionable` marks the "not connected" class.
    fn emit_error(&self, message: &str, actionable: bool);

    fn emit_device_state(&self, state: &serde_json::Value);
}

/// No-op event emitter for testing.
pub struct NoOpEmitter;

impl TelemetryEventEmitter for NoOpEmitter {
    fn emit_connection(&self, _state: ConnectionState, _reason: Option<&str>) {}
    fn emit_connect_refused(&self, _error: &ConnectError) {}
    fn emit_device_online(&self) {}
    fn emit_transfer_finished(&self, _result: &TransferResult) {}
    fn emit_sync_finished(&self, _report: &SyncReport) {}
    fn emit_error(&self, _message: &str, _actionable: bool) {}
    fn emit_device_state(&self, _state: &serde_json::Value) {}
}

// =============================================================================
// Driver Status
// =============================================================================

/// Snapshot for external queries.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverStatus {
    pub connected: bool,
    pub device_online: bool,
    pub transfer_state: TransferState,
    pub sync_in_progress: bool,
    pub stored_records: usize,
    pub last_transfer: Option<TransferOutcome>,
    pub last_error: Option<String>,
}

/// What one cycle produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    /// Session events handled.
    pub events: usize,
    pub transfer: Option<TransferResult>,
    pub sync: Option<SyncReport>,
}

// =============================================================================
// Telemetry Driver
// =============================================================================

/// Owns the session link, the controllers and the store.
pub struct TelemetryDriver<L: SessionLink, S: DataStore> {
    link: L,
    store: S,
    liveness: LivenessMonitor,
    transfer: LogTransferController,
    incremental: IncrementalSyncController,
    emitter: Arc<dyn TelemetryEventEmitter>,
    preview_last: u32,
    device_state: Option<serde_json::Value>,
    last_transfer: Option<TransferOutcome>,
    last_error: Option<String>,
}

impl<L: SessionLink, S: DataStore> TelemetryDriver<L, S> {
    pub fn new(link: L, store: S, settings: &TransferSettings) -> Self {
        Self::with_emitter(link, store, settings, Arc::new(NoOpEmitter))
    }

    /// Creates a driver with a custom event emitter. The seen-set is seeded
    /// from whatever `store` already holds.
    pub fn with_emitter(
        link: L,
        store: S,
        settings: &TransferSettings,
        emitter: Arc<dyn TelemetryEventEmitter>,
    ) -> Self {
        let mut incremental = IncrementalSyncController::new(settings.sync_timeout_secs);
        incremental.hydrate(store.records());

        TelemetryDriver {
            link,
            store,
            liveness: LivenessMonitor::new(settings.online_window_secs),
            transfer: LogTransferController::new(settings.timeout_secs),
            incremental,
            emitter,
            preview_last: settings.preview_last,
            device_state: None,
            last_transfer: None,
            last_error: None,
        }
    }

    /// Loads prior records from the store and seeds the seen-set.
    pub fn hydrate(&mut self) -> SyncResult<LoadReport> {
        let report = self.store.load()?;
        self.incremental.hydrate(self.store.records());
        info!(loaded = report.loaded, skipped = report.skipped, "Hydrated from store");
        Ok(report)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn records(&self) -> &[Record] {
        self.store.records()
    }

    /// Gives back the link and the store, e.g. to shut a worker down.
    pub fn into_parts(self) -> (L, S) {
        (self.link, self.store)
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    pub fn is_device_online(&self) -> bool {
        self.liveness.is_online()
    }

    pub fn transfer_state(&self) -> TransferState {
        self.transfer.state()
    }

    pub fn sync_in_progress(&self) -> bool {
        self.incremental.is_in_progress()
    }

    /// Latest payload seen on the state topic.
    pub fn device_state(&self) -> Option<&serde_json::Value> {
        self.device_state.as_ref()
    }

    pub fn status(&self) -> DriverStatus {
        DriverStatus {
            connected: self.is_connected(),
            device_online: self.is_device_online(),
            transfer_state: self.transfer.state(),
            sync_in_progress: self.incremental.is_in_progress(),
            stored_records: self.store.records().len(),
            last_transfer: self.last_transfer,
            last_error: self.last_error.clone(),
        }
    }

    // =========================================================================
    // Operator Requests
    // =========================================================================

    /// Starts a full-log transfer. Refused while an incremental sync runs,
    /// since the replaced dataset would not include its pending records.
    pub fn request_full_log(&mut self, now: f64) -> Result<(), StartError> {
        let result = if self.incremental.is_in_progress() {
            Err(StartError::AlreadyInProgress)
        } else {
            self.transfer.request_full_log(&mut self.link, now)
        };
        self.note_start(&result);
        result
    }

    /// Requests the configured number of recent records.
    pub fn request_incremental_sync(&mut self, now: f64) -> Result<(), StartError> {
        self.request_incremental_sync_with(self.preview_last, now)
    }

    /// Requests the last `limit` records. Refused while a full-log transfer
    /// is active.
    pub fn request_incremental_sync_with(&mut self, limit: u32, now: f64) -> Result<(), StartError> {
        let result = if self.transfer.is_active() {
            Err(StartError::AlreadyInProgress)
        } else {
            self.incremental.request_sync(&mut self.link, limit, now)
        };
        self.note_start(&result);
        result
    }

    fn note_start(&mut self, result: &Result<(), StartError>) {
        if let Err(e) = result {
            self.record_failure(SyncError::Start(e.clone()));
        }
    }

    /// Cancels a running full-log transfer. The stored dataset is untouched.
    pub fn cancel_transfer(&mut self) -> Option<TransferResult> {
        let result = self.transfer.cancel()?;
        self.last_transfer = Some(result.outcome);
        self.emitter.emit_transfer_finished(&result);
        Some(result)
    }

    pub fn cancel_sync(&mut self) -> bool {
        self.incremental.cancel()
    }

    pub fn start_mission(&mut self, params: &MissionParams) -> Result<(), PublishError> {
        info!(
            interval_s = params.interval_s,
            delay_s = params.delay_s,
            step_hz = params.step_hz,
            "Starting mission"
        );
        self.send(&Command::start(params))
    }

    pub fn emergency_stop(&mut self) -> Result<(), PublishError> {
        warn!("Emergency stop requested");
        self.send(&Command::Stop)
    }

    fn send(&mut self, command: &Command) -> Result<(), PublishError> {
        let result = self.link.send_command(command);
        if let Err(e) = &result {
            warn!(action = command.action(), error = %e, "Command failed");
            self.record_failure(SyncError::Publish(e.clone()));
        }
        result
    }

    /// Ends the session. Liveness resets and any running transfer or sync
    /// is aborted right away.
    pub fn disconnect(&mut self) {
        self.link.disconnect();
        let mut scratch = CycleReport::default();
        self.on_session_lost(&mut scratch);
    }

    // =========================================================================
    // Cycle
    // =========================================================================

    /// Drains the session, dispatches, ticks and hands results off.
    pub fn cycle(&mut self, now: f64) -> CycleReport {
        let events = self.link.poll_events(now);
        let mut report = CycleReport {
            events: events.len(),
            ..CycleReport::default()
        };

        for event in events {
            self.dispatch(event, &mut report);
        }

        if let Some(result) = self.transfer.tick(now) {
            self.complete_transfer(result, &mut report);
        }
        if let Some(sync) = self.incremental.tick(now) {
            self.complete_sync(sync, &mut report);
        }

        report
    }

    fn dispatch(&mut self, event: SessionEvent, report: &mut CycleReport) {
        match event {
            SessionEvent::Connected => {
                self.emitter.emit_connection(ConnectionState::Connected, None);
            }
            SessionEvent::Disconnected { reason } => {
                self.on_session_lost(report);
                self.emitter
                    .emit_connection(ConnectionState::Disconnected, Some(&reason));
            }
            SessionEvent::ConnectRefused { error, .. } => {
                self.last_error = Some(error.to_string());
                self.emitter.emit_connect_refused(&error);
            }
            SessionEvent::PublishFailed { error } => {
                warn!(error = %error, "Queued publish failed");
                self.record_failure(SyncError::Publish(error));
            }
            SessionEvent::Inbound(inbound) => self.dispatch_inbound(inbound, report),
        }
    }

    fn dispatch_inbound(&mut self, inbound: Inbound, report: &mut CycleReport) {
        match inbound.kind {
            TopicKind::Info => {
                self.liveness.on_heartbeat(inbound.received_at);
                if self.liveness.take_online_notice() {
                    info!(at = inbound.received_at, "Device is online");
                    self.emitter.emit_device_online();
                }
            }
            TopicKind::LogPart => {
                if let Some(result) = self.transfer.on_payload(&inbound.payload) {
                    self.complete_transfer(result, report);
                }
            }
            TopicKind::Preview => {
                self.incremental.on_batch_payload(&inbound.payload);
            }
            TopicKind::Events => match decode_event(&inbound.payload) {
                Ok(DeviceEvent::PreviewDone) => {
                    if let Some(sync) = self.incremental.on_sync_done() {
                        self.complete_sync(sync, report);
                    }
                }
                Ok(DeviceEvent::Unknown) => {
                    debug!(payload = %String::from_utf8_lossy(&inbound.payload), "Ignoring unknown device event");
                }
                Err(e) => warn!(error = %e, "Undecodable device event"),
            },
            TopicKind::State => match decode_state(&inbound.payload) {
                Ok(state) => {
                    self.emitter.emit_device_state(&state);
                    self.device_state = Some(state);
                }
                Err(e) => warn!(error = %e, "Undecodable device state"),
            },
        }
    }

    fn on_session_lost(&mut self, report: &mut CycleReport) {
        self.liveness.on_disconnect();
        if let Some(result) = self.transfer.on_disconnect() {
            self.complete_transfer(result, report);
        }
        self.incremental.cancel();
    }

    // =========================================================================
    // Handoff
    // =========================================================================

    fn complete_transfer(&mut self, result: TransferResult, report: &mut CycleReport) {
        if result.outcome.is_success() {
            match self.store.replace(&result.records) {
                Ok(()) => {
                    self.incremental.hydrate(self.store.records());
                    info!(records = result.accepted_count, "Stored dataset replaced");
                }
                Err(e) => {
                    error!(error = %e, "Failed to store transfer");
                    self.record_failure(SyncError::Store(e));
                }
            }
        } else if result.outcome == TransferOutcome::NotConnected {
            self.record_error("log transfer aborted: not connected", true);
        }

        self.last_transfer = Some(result.outcome);
        self.emitter.emit_transfer_finished(&result);
        report.transfer = Some(result);
    }

    fn complete_sync(&mut self, sync: SyncReport, report: &mut CycleReport) {
        if !sync.records.is_empty() {
            match self.store.append(&sync.records) {
                Ok(()) => info!(appended = sync.accepted_count, "Stored new records"),
                Err(e) => {
                    error!(error = %e, "Failed to store synced records");
                    self.incremental.forget(&sync.records);
                    self.record_failure(SyncError::Store(e));
                }
            }
        }

        self.emitter.emit_sync_finished(&sync);
        report.sync = Some(sync);
    }

    fn record_failure(&mut self, error: SyncError) {
        self.record_error(&error.to_string(), error.is_not_connected());
    }

    fn record_error(&mut self, message: &str, actionable: bool) {
        self.last_error = Some(message.to_string());
        self.emitter.emit_error(message, actionable);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DronelinkConfig, SessionSettings};
    use crate::protocol::{encode_batch, encode_chunk, Topics};
    use crate::session::SessionManager;
    use crate::transport::{MemoryBroker, MemoryTransport};
    use dronelink_core::Chunk;
    use dronelink_store::{MemoryStore, StoreError, StoreResult};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        log: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn push(&self, entry: String) {
            self.log.lock().unwrap().push(entry);
        }

        fn entries(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    impl TelemetryEventEmitter for Recorder {
        fn emit_connection(&self, state: ConnectionState, _reason: Option<&str>) {
            self.push(format!("connection:{}", state));
        }
        fn emit_connect_refused(&self, error: &ConnectError) {
            self.push(format!("refused:{}", error));
        }
        fn emit_device_online(&self) {
            self.push("online".into());
        }
        fn emit_transfer_finished(&self, result: &TransferResult) {
            self.push(format!("transfer:{}", result.outcome));
        }
        fn emit_sync_finished(&self, report: &SyncReport) {
            self.push(format!("sync:{}", report.accepted_count));
        }
        fn emit_error(&self, _message: &str, actionable: bool) {
            self.push(format!("error:{}", actionable));
        }
        fn emit_device_state(&self, _state: &serde_json::Value) {
            self.push("state".into());
        }
    }

    type Driver = TelemetryDriver<SessionManager<MemoryTransport>, MemoryStore>;

    /// A store whose disk is gone.
    struct FailingStore;

    impl FailingStore {
        fn error(write: bool) -> StoreError {
            let path = std::path::PathBuf::from("/readonly/drone_data.csv");
            let source = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
            if write {
                StoreError::Write { path, source }
            } else {
                StoreError::Read { path, source }
            }
        }
    }

    impl DataStore for FailingStore {
        fn load(&mut self) -> StoreResult<LoadReport> {
            Err(Self::error(false))
        }
        fn replace(&mut self, _records: &[Record]) -> StoreResult<()> {
            Err(Self::error(true))
        }
        fn append(&mut self, _records: &[Record]) -> StoreResult<()> {
            Err(Self::error(true))
        }
        fn records(&self) -> &[Record] {
            &[]
        }
    }

    const D: &str = "drone-001";

    fn record(ts: f64) -> Record {
        Record {
            ts,
            lat: 19.4,
            lon: -99.1,
            alt: 50.0,
            drop_id: 1,
            speed_mps: 5.0,
            sats: 8,
            fix_ok: true,
        }
    }

    fn driver(broker: &MemoryBroker, store: MemoryStore) -> (Driver, Arc<Recorder>) {
        let config = DronelinkConfig::default();
        let mut session =
            SessionManager::new(broker.transport(), Topics::for_device(D), SessionSettings::default());
        session.connect(config.connect_options().unwrap()).unwrap();

        let recorder = Arc::new(Recorder::default());
        let mut driver =
            TelemetryDriver::with_emitter(session, store, &config.transfer, recorder.clone());
        driver.cycle(0.0);
        (driver, recorder)
    }

    fn topic(kind: &str) -> String {
        format!("drone/{}/{}", D, kind)
    }

    #[test]
    fn test_full_log_replaces_store() {
        let broker = MemoryBroker::new();
        let (mut driver, recorder) = driver(&broker, MemoryStore::with_records(vec![record(1.0)]));

        driver.request_full_log(1.0).unwrap();
        let row = "100.0,19.4,-99.1,50.0,3,5.2,8,1\n";
        broker.deliver(&topic("log/part"), encode_chunk(&Chunk::data(0, row)).unwrap(), 1.1);
        broker.deliver(&topic("log/part"), encode_chunk(&Chunk::eof()).unwrap(), 1.2);

        let report = driver.cycle(2.0);
        assert_eq!(report.transfer.unwrap().outcome, TransferOutcome::Success);
        assert_eq!(driver.records().len(), 1);
        assert_eq!(driver.records()[0].ts, 100.0);
        assert_eq!(driver.store().replace_calls(), 1);
        assert!(recorder.entries().contains(&"transfer:success".to_string()));
    }

    #[test]
    fn test_empty_log_leaves_store_untouched() {
        let broker = MemoryBroker::new();
        let (mut driver, _) = driver(&broker, MemoryStore::with_records(vec![record(1.0)]));

        driver.request_full_log(1.0).unwrap();
        broker.deliver(&topic("log/part"), r#"{"eof":true}"#, 1.1);

        let report = driver.cycle(2.0);
        assert_eq!(report.transfer.unwrap().outcome, TransferOutcome::EmptyLog);
        assert_eq!(driver.store().replace_calls(), 0);
        assert_eq!(driver.records().len(), 1);
    }

    #[test]
    fn test_transfer_timeout_in_cycle() {
        let broker = MemoryBroker::new();
        let (mut driver, _) = driver(&broker, MemoryStore::new());

        driver.request_full_log(10.0).unwrap();
        assert!(driver.cycle(20.0).transfer.is_none());
        let report = driver.cycle(26.1);
        assert_eq!(report.transfer.unwrap().outcome, TransferOutcome::Timeout);
        assert_eq!(driver.transfer_state(), TransferState::Idle);
    }

    #[test]
    fn test_incremental_sync_appends() {
        let broker = MemoryBroker::new();
        let (mut driver, recorder) = driver(&broker, MemoryStore::with_records(vec![record(1.0)]));

        driver.request_incremental_sync(1.0).unwrap();
        let batch = encode_batch(&[record(1.0), record(2.0), record(3.0)]).unwrap();
        broker.deliver(&topic("preview"), batch, 1.1);
        broker.deliver(&topic("events"), r#"{"event":"preview_done"}"#, 1.2);

        let report = driver.cycle(2.0);
        assert_eq!(report.sync.unwrap().accepted_count, 2);
        assert_eq!(driver.records().len(), 3);
        assert_eq!(driver.store().append_calls(), 1);
        assert!(recorder.entries().contains(&"sync:2".to_string()));
    }

    #[test]
    fn test_store_failure_is_reported() {
        let broker = MemoryBroker::new();
        let config = DronelinkConfig::default();
        let mut session =
            SessionManager::new(broker.transport(), Topics::for_device(D), SessionSettings::default());
        session.connect(config.connect_options().unwrap()).unwrap();
        let recorder = Arc::new(Recorder::default());
        let mut driver =
            TelemetryDriver::with_emitter(session, FailingStore, &config.transfer, recorder.clone());
        driver.cycle(0.0);

        assert!(matches!(driver.hydrate(), Err(SyncError::Store(_))));

        driver.request_incremental_sync(1.0).unwrap();
        broker.deliver(&topic("preview"), encode_batch(&[record(1.0)]).unwrap(), 1.1);
        broker.deliver(&topic("events"), r#"{"event":"preview_done"}"#, 1.2);
        driver.cycle(2.0);

        let last_error = driver.status().last_error.unwrap();
        assert!(last_error.contains("drone_data.csv"));
        assert!(recorder.entries().contains(&"error:false".to_string()));

        // The record was forgotten, so the next sync offers it again.
        driver.request_incremental_sync(3.0).unwrap();
        broker.deliver(&topic("preview"), encode_batch(&[record(1.0)]).unwrap(), 3.1);
        broker.deliver(&topic("events"), r#"{"event":"preview_done"}"#, 3.2);
        assert_eq!(driver.cycle(4.0).sync.unwrap().accepted_count, 1);
    }

    #[test]
    fn test_liveness_through_driver() {
        let broker = MemoryBroker::new();
        let (mut driver, recorder) = driver(&broker, MemoryStore::new());

        broker.deliver(&topic("info"), "{}", 0.0);
        driver.cycle(0.1);
        assert!(!driver.is_device_online());

        broker.deliver(&topic("info"), "{}", 5.0);
        driver.cycle(5.1);
        assert!(driver.is_device_online());

        broker.deliver(&topic("info"), "{}", 6.0);
        driver.cycle(6.1);
        let online = recorder.entries().iter().filter(|e| *e == "online").count();
        assert_eq!(online, 1);
    }

    #[test]
    fn test_connection_loss_resets_and_aborts() {
        let broker = MemoryBroker::new();
        let (mut driver, recorder) = driver(&broker, MemoryStore::new());

        broker.deliver(&topic("info"), "{}", 0.0);
        broker.deliver(&topic("info"), "{}", 1.0);
        driver.cycle(1.0);
        driver.request_full_log(1.0).unwrap();

        broker.drop_connection("wifi lost");
        let report = driver.cycle(2.0);

        assert!(!driver.is_device_online());
        assert_eq!(report.transfer.unwrap().outcome, TransferOutcome::NotConnected);
        assert!(recorder.entries().contains(&"error:true".to_string()));
        assert_eq!(
            driver.request_full_log(3.0),
            Err(StartError::NotConnected)
        );
    }

    #[test]
    fn test_connection_loss_cancels_sync() {
        let broker = MemoryBroker::new();
        let (mut driver, _) = driver(&broker, MemoryStore::new());

        driver.request_incremental_sync(1.0).unwrap();
        broker.deliver(&topic("preview"), encode_batch(&[record(1.0)]).unwrap(), 1.1);
        broker.drop_connection("wifi lost");
        let report = driver.cycle(2.0);

        assert!(report.sync.is_none());
        assert!(!driver.sync_in_progress());
        assert!(driver.records().is_empty());
    }

    #[test]
    fn test_transfer_and_sync_are_exclusive() {
        let broker = MemoryBroker::new();
        let (mut driver, _) = driver(&broker, MemoryStore::new());

        driver.request_incremental_sync(1.0).unwrap();
        assert_eq!(driver.request_full_log(1.0), Err(StartError::AlreadyInProgress));
        assert_eq!(driver.transfer_state(), TransferState::Idle);
        assert!(driver.status().last_error.is_some());

        // The device answers the sync and also streams a log nobody asked
        // for; the stray chunks are ignored and the record lands once.
        let row = "1.0,19.4,-99.1,50.0,1,5.0,8,1\n";
        broker.deliver(&topic("preview"), encode_batch(&[record(1.0)]).unwrap(), 1.1);
        broker.deliver(&topic("log/part"), encode_chunk(&Chunk::data(0, row)).unwrap(), 1.2);
        broker.deliver(&topic("log/part"), encode_chunk(&Chunk::eof()).unwrap(), 1.3);
        broker.deliver(&topic("events"), r#"{"event":"preview_done"}"#, 1.4);

        let report = driver.cycle(2.0);
        assert!(report.transfer.is_none());
        assert_eq!(report.sync.unwrap().accepted_count, 1);
        assert_eq!(driver.records(), &[record(1.0)]);

        driver.request_full_log(3.0).unwrap();
        assert_eq!(
            driver.request_incremental_sync(3.0),
            Err(StartError::AlreadyInProgress)
        );
        assert!(!driver.sync_in_progress());

        broker.deliver(&topic("log/part"), encode_chunk(&Chunk::data(0, row)).unwrap(), 3.1);
        broker.deliver(&topic("log/part"), encode_chunk(&Chunk::eof()).unwrap(), 3.2);
        let report = driver.cycle(4.0);
        assert_eq!(report.transfer.unwrap().outcome, TransferOutcome::Success);
        assert_eq!(driver.records(), &[record(1.0)]);
    }

    #[test]
    fn test_explicit_disconnect_cascades() {
        let broker = MemoryBroker::new();
        let (mut driver, _) = driver(&broker, MemoryStore::new());
        broker.deliver(&topic("info"), "{}", 0.0);
        broker.deliver(&topic("info"), "{}", 1.0);
        driver.cycle(1.0);
        assert!(driver.is_device_online());

        driver.disconnect();
        assert!(!driver.is_device_online());
        assert!(!driver.is_connected());
        driver.disconnect();
    }

    #[test]
    fn test_mission_commands() {
        let broker = MemoryBroker::new();
        let (mut driver, _) = driver(&broker, MemoryStore::new());

        let params = MissionParams::from_operator_input(5.0, 10.0, 3.0, 800).unwrap();
        driver.start_mission(&params).unwrap();
        driver.emergency_stop().unwrap();

        let published = broker.take_published();
        let actions: Vec<serde_json::Value> = published
            .iter()
            .map(|m| serde_json::from_slice(&m.payload).unwrap())
            .collect();
        assert_eq!(actions[0]["action"], "start");
        assert_eq!(actions[0]["interval_s"], 2.0);
        assert_eq!(actions[1]["action"], "stop");

        driver.disconnect();
        assert_eq!(driver.emergency_stop(), Err(PublishError::NotConnected));
    }

    #[test]
    fn test_device_state_is_kept() {
        let broker = MemoryBroker::new();
        let (mut driver, recorder) = driver(&broker, MemoryStore::new());

        broker.deliver(&topic("state"), r#"{"running":true}"#, 1.0);
        driver.cycle(1.0);
        assert_eq!(driver.device_state().unwrap()["running"], true);
        assert!(recorder.entries().contains(&"state".to_string()));
    }

    #[test]
    fn test_cancel_transfer() {
        let broker = MemoryBroker::new();
        let (mut driver, _) = driver(&broker, MemoryStore::new());
        assert!(driver.cancel_transfer().is_none());

        driver.request_full_log(1.0).unwrap();
        let result = driver.cancel_transfer().unwrap();
        assert_eq!(result.outcome, TransferOutcome::Cancelled);
        assert_eq!(driver.status().last_transfer, Some(TransferOutcome::Cancelled));
    }
}
