//! In-process broker for tests and the simulated ground-station mode.
//!
//! A [`MemoryBroker`] is a cloneable handle to shared broker state. The client
//! side talks to it through [`MemoryTransport`]; the device side (a test or a
//! simulator) injects deliveries and reads what the client published.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::{debug, trace};

use crate::error::{ConnectError, TransportError};
use crate::protocol::QoS;
use crate::transport::{ConnectOptions, Delivery, PubSubTransport, TransportEvent};

/// A message the client published.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
}

#[derive(Debug, Default)]
struct BrokerState {
    connack_code: u8,
    connect_failure: Option<ConnectError>,
    reject_publishes: Option<String>,
    connected: bool,
    connect_attempts: usize,
    last_options: Option<ConnectOptions>,
    subscriptions: Vec<(String, QoS)>,
    published: Vec<PublishedMessage>,
    pending: VecDeque<TransportEvent>,
}

/// Shared handle to the in-memory broker.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// A client transport attached to this broker.
    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport {
            broker: self.clone(),
        }
    }

    // =========================================================================
    // Broker Behavior
    // =========================================================================

    /// Code answered to the next connect handshakes.
    pub fn set_connack(&self, code: u8) {
        self.lock().connack_code = code;
    }

    /// Makes the next `connect` call fail before any handshake.
    pub fn fail_next_connect(&self, error: ConnectError) {
        self.lock().connect_failure = Some(error);
    }

    /// Rejects every publish with `reason` until cleared with `None`.
    pub fn reject_publishes(&self, reason: Option<&str>) {
        self.lock().reject_publishes = reason.map(str::to_string);
    }

    /// Drops the client connection as if the network failed.
    pub fn drop_connection(&self, reason: &str) {
        let mut state = self.lock();
        if state.connected {
            state.connected = false;
            state.subscriptions.clear();
            state.pending.push_back(TransportEvent::ConnectionLost {
                reason: reason.to_string(),
            });
        }
    }

    // =========================================================================
    // Device Side
    // =========================================================================

    /// Delivers a message to the client if it is connected and subscribed.
    /// Returns whether the message was queued.
    pub fn deliver(&self, topic: &str, payload: impl Into<Vec<u8>>, received_at: f64) -> bool {
        let mut state = self.lock();
        if !state.connected || !state.subscriptions.iter().any(|(t, _)| t == topic) {
            trace!(topic, "Dropping delivery with no subscriber");
            return false;
        }
        state.pending.push_back(TransportEvent::Message(Delivery {
            topic: topic.to_string(),
            payload: payload.into(),
            received_at,
        }));
        true
    }

    /// Removes and returns everything the client has published.
    pub fn take_published(&self) -> Vec<PublishedMessage> {
        std::mem::take(&mut self.lock().published)
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.lock().published.clone()
    }

    pub fn subscriptions(&self) -> Vec<(String, QoS)> {
        self.lock().subscriptions.clone()
    }

    pub fn is_client_connected(&self) -> bool {
        self.lock().connected
    }

    pub fn connect_attempts(&self) -> usize {
        self.lock().connect_attempts
    }

    /// Options from the most recent connect attempt.
    pub fn last_options(&self) -> Option<ConnectOptions> {
        self.lock().last_options.clone()
    }
}

/// Client side of a [`MemoryBroker`].
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    broker: MemoryBroker,
}

impl PubSubTransport for MemoryTransport {
    fn connect(&mut self, options: &ConnectOptions) -> Result<(), ConnectError> {
        let mut state = self.broker.lock();
        state.connect_attempts += 1;
        state.last_options = Some(options.clone());

        if let Some(err) = state.connect_failure.take() {
            debug!(error = %err, "Memory broker refusing connect");
            return Err(err);
        }

        let code = state.connack_code;
        state.connected = code == 0;
        state.pending.push_back(TransportEvent::ConnAck { code });
        Ok(())
    }

    fn disconnect(&mut self) {
        let mut state = self.broker.lock();
        state.connected = false;
        state.subscriptions.clear();
        state.pending.clear();
    }

    fn subscribe(&mut self, topics: &[(String, QoS)]) -> Result<(), TransportError> {
        let mut state = self.broker.lock();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        for (topic, qos) in topics {
            state.subscriptions.retain(|(t, _)| t != topic);
            state.subscriptions.push((topic.clone(), *qos));
        }
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS) -> Result<(), TransportError> {
        let mut state = self.broker.lock();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        if let Some(reason) = &state.reject_publishes {
            return Err(TransportError::Rejected(reason.clone()));
        }
        state.published.push(PublishedMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos,
        });
        Ok(())
    }

    fn poll(&mut self, _slice: Duration) -> Vec<TransportEvent> {
        self.broker.lock().pending.drain(..).collect()
    }
}
