//! # Session Manager
//!
//! Owns the transport, the broker credentials and the subscription set, and
//! turns raw transport events into [`SessionEvent`]s.
//!
//! ## Connection Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Session Connection States                            │
//! │                                                                         │
//! │  ┌────────────┐    connect()    ┌────────────┐                         │
//! │  │Disconnected│ ──────────────► │ Connecting │                         │
//! │  └────────────┘                 └─────┬──────┘                         │
//! │        ▲                              │                                 │
//! │        │                 connack 0    │   connack != 0 / lost           │
//! │        │                        ┌─────┴─────┐                          │
//! │        │                        ▼           ▼                           │
//! │        │              ┌────────────┐  ┌────────────┐                   │
//! │        │              │ Connected  │  │ Backoff    │                   │
//! │        │              └─────┬──────┘  └─────┬──────┘                   │
//! │        │                    │               │                           │
//! │        │             connection lost        │  deadline passed          │
//! │        │                    │               ▼                           │
//! │        │                    │         ┌────────────┐                   │
//! │        └─ disconnect() ─────┴──────── │Reconnecting│                   │
//! │           auth rejected               └────────────┘                   │
//! │                                                                         │
//! │  On every connack 0: subscribe the device topics, emit Connected.      │
//! │  Subscription failure is logged; the session stays up without data.   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The manager never sleeps. Reconnect deadlines are compared against the
//! `now` passed to [`SessionManager::pump`], so the caller owns the cadence.

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::SessionSettings;
use crate::error::{ConnectError, PublishError};
use crate::link::{CommandPublisher, SessionLink};
use crate::protocol::{connack_is_auth_failure, connack_reason, QoS, TopicKind, Topics};
use crate::transport::{ConnectOptions, PubSubTransport, TransportEvent};

// =============================================================================
// Session State
// =============================================================================

/// Connection state of the broker session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected.
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Connected and subscribed.
    Connected,
    /// Waiting before reconnection attempt.
    Backoff,
    /// Reconnection in progress.
    Reconnecting,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Backoff => write!(f, "backoff"),
            ConnectionState::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

/// Identifies a live session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    pub client_id: String,
    pub broker_url: Url,
}

// =============================================================================
// Session Events
// =============================================================================

/// A message on one of the device topics.
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
    pub kind: TopicKind,
    pub payload: Vec<u8>,
    pub received_at: f64,
}

/// What the session reports to the driver.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Connack 0 received and subscriptions issued.
    Connected,

    /// A live or connecting session ended.
    Disconnected { reason: String },

    /// The broker refused the handshake or the transport could not connect.
    ConnectRefused { code: Option<u8>, error: ConnectError },

    /// A publish attempt failed.
    PublishFailed { error: PublishError },

    Inbound(Inbound),
}

// =============================================================================
// Session Manager
// =============================================================================

/// Owns one [`PubSubTransport`] and its reconnect policy.
///
/// ## Usage
/// ```rust,ignore
/// let mut session = SessionManager::new(transport, config.topics(), config.session.clone());
/// session.connect(config.connect_options()?)?;
///
/// loop {
///     for event in session.pump(unix_now()) {
///         // route to controllers
///     }
/// }
/// ```
pub struct SessionManager<T: PubSubTransport> {
    transport: T,
    topics: Topics,
    settings: SessionSettings,
    state: ConnectionState,
    options: Option<ConnectOptions>,
    handle: Option<SessionHandle>,
    auto_reconnect: bool,
    backoff: ExponentialBackoff,
    retry_count: u32,
    reconnect_at: Option<f64>,
    pending: Vec<SessionEvent>,
}

impl<T: PubSubTransport> SessionManager<T> {
    pub fn new(transport: T, topics: Topics, settings: SessionSettings) -> Self {
        let backoff = create_backoff(&settings);
        SessionManager {
            transport,
            topics,
            settings,
            state: ConnectionState::Disconnected,
            options: None,
            handle: None,
            auto_reconnect: false,
            backoff,
            retry_count: 0,
            reconnect_at: None,
            pending: Vec::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn handle(&self) -> Option<&SessionHandle> {
        self.handle.as_ref()
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Reconnect attempts since the last successful connack.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// When the next reconnect attempt is due, if one is scheduled.
    pub fn reconnect_at(&self) -> Option<f64> {
        self.reconnect_at
    }

    // =========================================================================
    // Connect / Disconnect
    // =========================================================================

    /// Starts a session. While connected or connecting this returns the
    /// existing handle without touching the transport.
    pub fn connect(&mut self, options: ConnectOptions) -> Result<SessionHandle, ConnectError> {
        if let Some(handle) = &self.handle {
            if matches!(
                self.state,
                ConnectionState::Connected | ConnectionState::Connecting
            ) {
                debug!(client_id = %handle.client_id, "Already connected, reusing session");
                return Ok(handle.clone());
            }
        }

        self.options = Some(options);
        self.auto_reconnect = true;
        self.backoff.reset();
        self.retry_count = 0;
        self.reconnect_at = None;

        self.attempt_connect()
    }

    fn attempt_connect(&mut self) -> Result<SessionHandle, ConnectError> {
        let options = self.options.clone().ok_or_else(|| {
            ConnectError::TransportUnavailable("no connection options configured".into())
        })?;

        self.state = ConnectionState::Connecting;
        info!(url = %options.url, client_id = %options.client_id, tls = %options.tls, "Connecting to broker");

        match self.transport.connect(&options) {
            Ok(()) => {
                let handle = SessionHandle {
                    client_id: options.client_id.clone(),
                    broker_url: options.url.clone(),
                };
                self.handle = Some(handle.clone());
                Ok(handle)
            }
            Err(e) => {
                warn!(error = %e, "Broker connection failed");
                self.state = ConnectionState::Disconnected;
                self.handle = None;
                Err(e)
            }
        }
    }

    /// Releases the transport and stops reconnecting. Safe to call repeatedly.
    pub fn disconnect(&mut self) {
        self.auto_reconnect = false;
        self.reconnect_at = None;

        let was_live = matches!(
            self.state,
            ConnectionState::Connected | ConnectionState::Connecting | ConnectionState::Reconnecting
        );

        self.transport.disconnect();
        self.state = ConnectionState::Disconnected;
        self.handle = None;

        if was_live {
            info!("Disconnected from broker");
            self.pending.push(SessionEvent::Disconnected {
                reason: "client disconnect".into(),
            });
        }
    }

    // =========================================================================
    // Subscribe / Publish
    // =========================================================================

    /// Subscribes `topics`. Failure is logged and reported as `false`.
    pub fn subscribe(&mut self, topics: &[(String, QoS)]) -> bool {
        match self.transport.subscribe(topics) {
            Ok(()) => {
                debug!(count = topics.len(), "Subscribed to device topics");
                true
            }
            Err(e) => {
                warn!(error = %e, "Subscription failed, continuing without data");
                false
            }
        }
    }

    pub fn try_publish(&mut self, topic: &str, payload: &[u8], qos: QoS) -> Result<(), PublishError> {
        let result = if self.is_connected() {
            self.transport
                .publish(topic, payload, qos)
                .map_err(PublishError::from)
        } else {
            Err(PublishError::NotConnected)
        };

        if let Err(error) = &result {
            warn!(topic, error = %error, "Publish failed");
            self.pending.push(SessionEvent::PublishFailed {
                error: error.clone(),
            });
        } else {
            debug!(topic, bytes = payload.len(), "Published");
        }
        result
    }

    /// Best-effort publish. Failures are logged and surface as a
    /// [`SessionEvent::PublishFailed`] on the next pump.
    pub fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS) -> bool {
        self.try_publish(topic, payload, qos).is_ok()
    }

    // =========================================================================
    // Pump
    // =========================================================================

    /// Polls the transport for one bounded slice and handles reconnect timing.
    pub fn pump(&mut self, now: f64) -> Vec<SessionEvent> {
        let mut out = std::mem::take(&mut self.pending);

        for event in self.transport.poll(self.settings.pump_slice()) {
            match event {
                TransportEvent::ConnAck { code } => self.on_connack(code, now, &mut out),
                TransportEvent::ConnectionLost { reason } => {
                    self.on_connection_lost(reason, now, &mut out)
                }
                TransportEvent::Message(delivery) => match self.topics.classify(&delivery.topic) {
                    Some(kind) => out.push(SessionEvent::Inbound(Inbound {
                        kind,
                        payload: delivery.payload,
                        received_at: delivery.received_at,
                    })),
                    None => debug!(topic = %delivery.topic, "Ignoring message on unknown topic"),
                },
            }
        }

        self.maybe_reconnect(now, &mut out);
        out.append(&mut self.pending);
        out
    }

    fn on_connack(&mut self, code: u8, now: f64, out: &mut Vec<SessionEvent>) {
        if code == 0 {
            self.state = ConnectionState::Connected;
            self.backoff.reset();
            self.retry_count = 0;
            self.reconnect_at = None;
            info!("Broker accepted connection");

            let subscriptions = self.topics.subscriptions();
            self.subscribe(&subscriptions);
            out.push(SessionEvent::Connected);
            return;
        }

        let reason = connack_reason(code);
        warn!(code, reason, "Broker refused connection");

        self.transport.disconnect();
        self.state = ConnectionState::Disconnected;
        self.handle = None;

        let error = if connack_is_auth_failure(code) {
            self.auto_reconnect = false;
            ConnectError::AuthRejected(reason.to_string())
        } else {
            self.schedule_reconnect(now);
            ConnectError::TransportUnavailable(reason.to_string())
        };
        out.push(SessionEvent::ConnectRefused {
            code: Some(code),
            error,
        });
    }

    fn on_connection_lost(&mut self, reason: String, now: f64, out: &mut Vec<SessionEvent>) {
        if !matches!(
            self.state,
            ConnectionState::Connected | ConnectionState::Connecting
        ) {
            debug!(reason = %reason, "Connection lost while not connected");
            return;
        }

        warn!(reason = %reason, "Connection to broker lost");
        self.state = ConnectionState::Disconnected;
        self.handle = None;
        out.push(SessionEvent::Disconnected { reason });
        self.schedule_reconnect(now);
    }

    fn schedule_reconnect(&mut self, now: f64) {
        if !self.auto_reconnect {
            return;
        }

        if self.settings.max_retries > 0 && self.retry_count >= self.settings.max_retries {
            error!(
                max_retries = self.settings.max_retries,
                "Max reconnection attempts reached"
            );
            self.auto_reconnect = false;
            self.state = ConnectionState::Disconnected;
            return;
        }

        match self.backoff.next_backoff() {
            Some(delay) => {
                self.retry_count += 1;
                self.reconnect_at = Some(now + delay.as_secs_f64());
                self.state = ConnectionState::Backoff;
                debug!(?delay, attempt = self.retry_count, "Waiting before reconnect");
            }
            None => {
                error!("Backoff exhausted");
                self.auto_reconnect = false;
                self.state = ConnectionState::Disconnected;
            }
        }
    }

    fn maybe_reconnect(&mut self, now: f64, out: &mut Vec<SessionEvent>) {
        let due = self.state == ConnectionState::Backoff
            && self.reconnect_at.map_or(false, |at| now >= at);
        if !due {
            return;
        }

        self.reconnect_at = None;
        self.state = ConnectionState::Reconnecting;
        info!(attempt = self.retry_count, "Reconnecting to broker");

        if let Err(error) = self.attempt_connect() {
            if error.is_retryable() {
                self.schedule_reconnect(now);
            } else {
                self.auto_reconnect = false;
            }
            out.push(SessionEvent::ConnectRefused { code: None, error });
        }
    }
}

fn create_backoff(settings: &SessionSettings) -> ExponentialBackoff {
    ExponentialBackoff {
        initial_interval: Duration::from_millis(settings.initial_backoff_ms),
        max_interval: Duration::from_secs(settings.max_backoff_secs),
        multiplier: 2.0,
        max_elapsed_time: None,
        ..Default::default()
    }
}

// =============================================================================
// Link Implementation
// =============================================================================

impl<T: PubSubTransport> CommandPublisher for SessionManager<T> {
    fn is_connected(&self) -> bool {
        SessionManager::is_connected(self)
    }

    fn topics(&self) -> &Topics {
        SessionManager::topics(self)
    }

    fn try_publish(&mut self, topic: &str, payload: &[u8], qos: QoS) -> Result<(), PublishError> {
        SessionManager::try_publish(self, topic, payload, qos)
    }
}

impl<T: PubSubTransport> SessionLink for SessionManager<T> {
    fn poll_events(&mut self, now: f64) -> Vec<SessionEvent> {
        self.pump(now)
    }

    fn disconnect(&mut self) {
        SessionManager::disconnect(self)
    }
}
