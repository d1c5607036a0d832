//! # Background Session Worker
//!
//! Runs a [`SessionManager`] on its own blocking thread and hands everything
//! it produces to the driver through bounded queues.
//!
//! ## Handoff Model
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Session Worker Handoff                              │
//! │                                                                         │
//! │   driver thread                          worker thread (spawn_blocking) │
//! │   ─────────────                          ─────────────────────────────  │
//! │                                                                         │
//! │   SessionWorkerHandle ── commands ─────► SessionManager::pump(now)     │
//! │     connect / publish /   (bounded)            │                        │
//! │     disconnect / shutdown                      │ route by category      │
//! │                                                ▼                        │
//! │   drain() ◄────────── status      ◄──── Connected, Disconnected, ...    │
//! │           ◄────────── heartbeat   ◄──── drone/D/info                    │
//! │           ◄────────── log chunk   ◄──── drone/D/log/part                │
//! │           ◄────────── preview     ◄──── drone/D/preview                 │
//! │           ◄────────── device event◄──── drone/D/events, drone/D/state   │
//! │                                                                         │
//! │  Every queue is bounded. Sends use try_send: a full queue drops the    │
//! │  event with a warning instead of stalling the worker. The driver       │
//! │  drains with try_recv and never blocks.                                │
//! │                                                                         │
//! │  Each queued event carries a worker-assigned sequence number. drain()  │
//! │  releases events in that order only, so a preview_done can never      │
//! │  overtake the batch it closes.                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Controller state stays on the driver side. The worker only owns the
//! session and the transport.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{PublishError, SyncError, SyncResult};
use crate::link::{CommandPublisher, SessionLink};
use crate::protocol::{QoS, TopicKind, Topics};
use crate::session::{SessionEvent, SessionManager};
use crate::transport::{ConnectOptions, PubSubTransport};
use crate::unix_now;

// =============================================================================
// Worker Commands
// =============================================================================

/// Requests from the driver to the worker.
#[derive(Debug)]
pub enum WorkerCommand {
    Connect(ConnectOptions),
    Publish {
        topic: String,
        payload: Vec<u8>,
        qos: QoS,
    },
    Disconnect,
    Shutdown,
}

// =============================================================================
// Handoff Queues
// =============================================================================

/// An event tagged with its position in the worker's output.
#[derive(Debug)]
struct Envelope {
    seq: u64,
    event: SessionEvent,
}

struct Outboxes {
    next_seq: u64,
    status: mpsc::Sender<Envelope>,
    heartbeat: mpsc::Sender<Envelope>,
    log_chunk: mpsc::Sender<Envelope>,
    preview: mpsc::Sender<Envelope>,
    device_event: mpsc::Sender<Envelope>,
}

impl Outboxes {
    /// Sequence numbers advance only on successful sends, so the delivered
    /// sequence has no gaps.
    fn route(&mut self, event: SessionEvent) {
        let (queue, category) = match &event {
            SessionEvent::Inbound(inbound) => match inbound.kind {
                TopicKind::Info => (&self.heartbeat, "heartbeat"),
                TopicKind::LogPart => (&self.log_chunk, "log_chunk"),
                TopicKind::Preview => (&self.preview, "preview"),
                TopicKind::Events | TopicKind::State => (&self.device_event, "device_event"),
            },
            _ => (&self.status, "status"),
        };

        let envelope = Envelope {
            seq: self.next_seq,
            event,
        };
        match queue.try_send(envelope) {
            Ok(()) => self.next_seq += 1,
            Err(TrySendError::Full(_)) => {
                warn!(category, "Handoff queue full, dropping event");
            }
            Err(TrySendError::Closed(_)) => {
                debug!(category, "Handoff queue closed");
            }
        }
    }
}

struct Inboxes {
    status: mpsc::Receiver<Envelope>,
    heartbeat: mpsc::Receiver<Envelope>,
    log_chunk: mpsc::Receiver<Envelope>,
    preview: mpsc::Receiver<Envelope>,
    device_event: mpsc::Receiver<Envelope>,
}

impl Inboxes {
    fn all_mut(&mut self) -> [&mut mpsc::Receiver<Envelope>; 5] {
        [
            &mut self.status,
            &mut self.heartbeat,
            &mut self.log_chunk,
            &mut self.preview,
            &mut self.device_event,
        ]
    }
}

fn drain_into(queue: &mut mpsc::Receiver<Envelope>, held: &mut BTreeMap<u64, SessionEvent>) {
    loop {
        match queue.try_recv() {
            Ok(envelope) => {
                held.insert(envelope.seq, envelope.event);
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
        }
    }
}

// =============================================================================
// Session Worker
// =============================================================================

/// Spawns the session loop.
pub struct SessionWorker;

impl SessionWorker {
    /// Moves `session` onto a blocking worker thread. Must be called from
    /// within a tokio runtime.
    pub fn spawn<T>(session: SessionManager<T>) -> SessionWorkerHandle
    where
        T: PubSubTransport + 'static,
    {
        let capacity = session.settings().queue_capacity.max(1);
        let idle = session.settings().pump_slice();
        let topics = session.topics().clone();

        let (command_tx, command_rx) = mpsc::channel(capacity);
        let (status_tx, status_rx) = mpsc::channel(capacity);
        let (heartbeat_tx, heartbeat_rx) = mpsc::channel(capacity);
        let (log_chunk_tx, log_chunk_rx) = mpsc::channel(capacity);
        let (preview_tx, preview_rx) = mpsc::channel(capacity);
        let (device_event_tx, device_event_rx) = mpsc::channel(capacity);

        let outboxes = Outboxes {
            next_seq: 0,
            status: status_tx,
            heartbeat: heartbeat_tx,
            log_chunk: log_chunk_tx,
            preview: preview_tx,
            device_event: device_event_tx,
        };

        let task = tokio::task::spawn_blocking(move || run(session, command_rx, outboxes, idle));

        SessionWorkerHandle {
            commands: command_tx,
            inboxes: Inboxes {
                status: status_rx,
                heartbeat: heartbeat_rx,
                log_chunk: log_chunk_rx,
                preview: preview_rx,
                device_event: device_event_rx,
            },
            held: BTreeMap::new(),
            next_seq: 0,
            topics,
            connected: false,
            task: Some(task),
        }
    }
}

fn run<T: PubSubTransport>(
    mut session: SessionManager<T>,
    mut commands: mpsc::Receiver<WorkerCommand>,
    mut outboxes: Outboxes,
    idle: Duration,
) {
    info!("Session worker started");

    loop {
        let mut busy = false;

        loop {
            let command = match commands.try_recv() {
                Ok(command) => command,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    debug!("Worker handle dropped");
                    session.disconnect();
                    return;
                }
            };
            busy = true;

            match command {
                WorkerCommand::Connect(options) => {
                    if let Err(error) = session.connect(options) {
                        outboxes.route(SessionEvent::ConnectRefused { code: None, error });
                    }
                }
                WorkerCommand::Publish {
                    topic,
                    payload,
                    qos,
                } => {
                    // failures come back as PublishFailed on the next pump
                    session.publish(&topic, &payload, qos);
                }
                WorkerCommand::Disconnect => session.disconnect(),
                WorkerCommand::Shutdown => {
                    session.disconnect();
                    for event in session.pump(unix_now()) {
                        outboxes.route(event);
                    }
                    info!("Session worker stopped");
                    return;
                }
            }
        }

        let events = session.pump(unix_now());
        busy |= !events.is_empty();
        for event in events {
            outboxes.route(event);
        }

        if !busy {
            std::thread::sleep(idle);
        }
    }
}

// =============================================================================
// Worker Handle
// =============================================================================

/// Driver-side end of a running [`SessionWorker`].
pub struct SessionWorkerHandle {
    commands: mpsc::Sender<WorkerCommand>,
    inboxes: Inboxes,
    /// Received but waiting for an earlier sequence number.
    held: BTreeMap<u64, SessionEvent>,
    next_seq: u64,
    topics: Topics,
    connected: bool,
    task: Option<JoinHandle<()>>,
}

impl SessionWorkerHandle {
    fn send(&self, command: WorkerCommand) -> SyncResult<()> {
        self.commands.try_send(command).map_err(|e| match e {
            TrySendError::Full(_) => SyncError::ChannelError("worker command queue full".into()),
            TrySendError::Closed(_) => SyncError::ShuttingDown,
        })
    }

    /// Asks the worker to connect. The outcome arrives as a status event.
    pub fn connect(&self, options: ConnectOptions) -> SyncResult<()> {
        self.send(WorkerCommand::Connect(options))
    }

    /// Connection state as of the last [`drain`](Self::drain).
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Takes everything queued and returns it in the order the worker
    /// produced it. An event whose predecessor is still in flight on
    /// another queue is held until the next drain.
    pub fn drain(&mut self) -> Vec<SessionEvent> {
        for queue in self.inboxes.all_mut() {
            drain_into(queue, &mut self.held);
        }

        let mut out = Vec::new();
        while let Some(event) = self.held.remove(&self.next_seq) {
            self.next_seq += 1;
            match &event {
                SessionEvent::Connected => self.connected = true,
                SessionEvent::Disconnected { .. } | SessionEvent::ConnectRefused { .. } => {
                    self.connected = false
                }
                _ => {}
            }
            out.push(event);
        }
        out
    }

    /// Stops the worker and waits for its thread to finish.
    pub async fn shutdown(mut self) -> SyncResult<()> {
        self.connected = false;
        if self.commands.send(WorkerCommand::Shutdown).await.is_err() {
            debug!("Worker already gone");
        }
        if let Some(task) = self.task.take() {
            task.await
                .map_err(|e| SyncError::ChannelError(format!("worker task failed: {}", e)))?;
        }
        Ok(())
    }
}

impl CommandPublisher for SessionWorkerHandle {
    fn is_connected(&self) -> bool {
        self.connected
    }

    fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Queues the publish. A transport-level failure arrives later as
    /// [`SessionEvent::PublishFailed`].
    fn try_publish(&mut self, topic: &str, payload: &[u8], qos: QoS) -> Result<(), PublishError> {
        if !self.connected {
            return Err(PublishError::NotConnected);
        }
        self.commands
            .try_send(WorkerCommand::Publish {
                topic: topic.to_string(),
                payload: payload.to_vec(),
                qos,
            })
            .map_err(|e| match e {
                TrySendError::Full(_) => {
                    PublishError::TransportRejected("worker command queue full".into())
                }
                TrySendError::Closed(_) => PublishError::NotConnected,
            })
    }
}

impl SessionLink for SessionWorkerHandle {
    fn poll_events(&mut self, _now: f64) -> Vec<SessionEvent> {
        self.drain()
    }

    fn disconnect(&mut self) {
        self.connected = false;
        if let Err(e) = self.send(WorkerCommand::Disconnect) {
            warn!(error = %e, "Could not forward disconnect to worker");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DronelinkConfig, SessionSettings};
    use crate::protocol::Command;
    use crate::transport::MemoryBroker;
    use std::time::Instant;

    fn spawn(broker: &MemoryBroker) -> SessionWorkerHandle {
        let settings = SessionSettings {
            pump_slice_ms: 5,
            queue_capacity: 8,
            ..SessionSettings::default()
        };
        let session =
            SessionManager::new(broker.transport(), Topics::for_device("drone-001"), settings);
        SessionWorker::spawn(session)
    }

    async fn drain_until<F>(handle: &mut SessionWorkerHandle, mut done: F) -> Vec<SessionEvent>
    where
        F: FnMut(&[SessionEvent]) -> bool,
    {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut seen = Vec::new();
        while Instant::now() < deadline {
            seen.extend(handle.drain());
            if done(&seen) {
                return seen;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for worker events: {:?}", seen);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_worker_connects_and_routes_events() {
        let broker = MemoryBroker::new();
        let mut handle = spawn(&broker);

        handle
            .connect(DronelinkConfig::default().connect_options().unwrap())
            .unwrap();
        drain_until(&mut handle, |e| e.contains(&SessionEvent::Connected)).await;
        assert!(handle.is_connected());

        broker.deliver("drone/drone-001/info", "{}", 1.0);
        broker.deliver("drone/drone-001/log/part", r#"{"eof":true}"#, 1.5);
        let events = drain_until(&mut handle, |e| e.len() >= 2).await;
        assert!(events.iter().all(|e| matches!(e, SessionEvent::Inbound(_))));

        handle.send_command(&Command::Stop).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while broker.published().is_empty() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(broker.published()[0].payload, br#"{"action":"stop"}"#);

        handle.shutdown().await.unwrap();
        assert!(!broker.is_client_connected());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_worker_reports_refused_connect() {
        let broker = MemoryBroker::new();
        broker.set_connack(5);
        let mut handle = spawn(&broker);

        handle
            .connect(DronelinkConfig::default().connect_options().unwrap())
            .unwrap();
        let events = drain_until(&mut handle, |e| {
            e.iter().any(|ev| matches!(ev, SessionEvent::ConnectRefused { .. }))
        })
        .await;

        assert!(!handle.is_connected());
        assert!(events.iter().any(|ev| matches!(
            ev,
            SessionEvent::ConnectRefused { code: Some(5), .. }
        )));
        assert_eq!(
            handle.send_command(&Command::Stop),
            Err(PublishError::NotConnected)
        );
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_drain_preserves_order_across_queues() {
        let broker = MemoryBroker::new();
        let mut handle = spawn(&broker);
        handle
            .connect(DronelinkConfig::default().connect_options().unwrap())
            .unwrap();
        drain_until(&mut handle, |e| e.contains(&SessionEvent::Connected)).await;

        for i in 0..3 {
            let at = i as f64;
            broker.deliver("drone/drone-001/preview", "[]", at);
            broker.deliver("drone/drone-001/events", r#"{"event":"preview_done"}"#, at + 0.5);
        }
        let events = drain_until(&mut handle, |e| e.len() >= 6).await;

        let stamps: Vec<f64> = events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::Inbound(inbound) => Some(inbound.received_at),
                _ => None,
            })
            .collect();
        assert_eq!(stamps, vec![0.0, 0.5, 1.0, 1.5, 2.0, 2.5]);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_worker_disconnect() {
        let broker = MemoryBroker::new();
        let mut handle = spawn(&broker);
        handle
            .connect(DronelinkConfig::default().connect_options().unwrap())
            .unwrap();
        drain_until(&mut handle, |e| e.contains(&SessionEvent::Connected)).await;

        SessionLink::disconnect(&mut handle);
        assert!(!handle.is_connected());
        drain_until(&mut handle, |e| {
            e.iter().any(|ev| matches!(ev, SessionEvent::Disconnected { .. }))
        })
        .await;
        assert!(!broker.is_client_connected());

        handle.shutdown().await.unwrap();
    }
}
