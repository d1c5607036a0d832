//! # Pub/Sub Transport
//!
//! The seam between the session manager and whatever client library talks to
//! the broker.
//!
//! ## Contract
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       PubSubTransport                                   │
//! │                                                                         │
//! │  connect(opts) ──► Ok: handshake started, ConnAck arrives via poll()   │
//! │                    Err: ConnectError (unreachable, TLS, ...)           │
//! │                                                                         │
//! │  subscribe / publish ──► best effort, QoS-level delivery only          │
//! │                                                                         │
//! │  poll(slice) ──► everything that happened since the last poll:         │
//! │                  ConnAck{code} | ConnectionLost{reason} | Message      │
//! │                  Never blocks longer than `slice`.                     │
//! │                                                                         │
//! │  No callbacks: deliveries are pulled, so nothing mutates caller state  │
//! │  from inside the client library.                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod memory;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ConnectError, TransportError};
use crate::protocol::QoS;

pub use memory::{MemoryBroker, MemoryTransport, PublishedMessage};

// =============================================================================
// Connection Parameters
// =============================================================================

/// Certificate trust mode for the broker connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsMode {
    /// Verify the broker certificate.
    #[default]
    Strict,
    /// Encrypt but skip certificate verification.
    Insecure,
    /// Plain `ws://`.
    Disabled,
}

impl std::fmt::Display for TlsMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TlsMode::Strict => write!(f, "strict"),
            TlsMode::Insecure => write!(f, "insecure"),
            TlsMode::Disabled => write!(f, "disabled"),
        }
    }
}

/// Everything a transport needs for one connection attempt.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    pub url: Url,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keepalive: Duration,
    pub tls: TlsMode,
}

impl std::fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("url", &self.url.as_str())
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("keepalive", &self.keepalive)
            .field("tls", &self.tls)
            .finish()
    }
}

// =============================================================================
// Transport Events
// =============================================================================

/// One inbound message as handed over by the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub topic: String,
    pub payload: Vec<u8>,
    /// Receipt time, seconds since the epoch.
    pub received_at: f64,
}

/// What `poll` reports.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Broker answered the connect handshake. `0` means accepted.
    ConnAck { code: u8 },

    /// An established connection dropped.
    ConnectionLost { reason: String },

    Message(Delivery),
}

// =============================================================================
// Transport Trait
// =============================================================================

/// A broker client owned exclusively by the session manager.
pub trait PubSubTransport: Send {
    /// Starts a connection. The outcome of the handshake arrives as a
    /// [`TransportEvent::ConnAck`].
    fn connect(&mut self, options: &ConnectOptions) -> Result<(), ConnectError>;

    /// Closes the connection. Safe to call when already closed.
    fn disconnect(&mut self);

    fn subscribe(&mut self, topics: &[(String, QoS)]) -> Result<(), TransportError>;

    fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS) -> Result<(), TransportError>;

    /// Returns pending events, waiting at most `slice` for the first one.
    fn poll(&mut self, slice: Duration) -> Vec<TransportEvent>;
}

impl<T: PubSubTransport + ?Sized> PubSubTransport for Box<T> {
    fn connect(&mut self, options: &ConnectOptions) -> Result<(), ConnectError> {
        (**self).connect(options)
    }

    fn disconnect(&mut self) {
        (**self).disconnect()
    }

    fn subscribe(&mut self, topics: &[(String, QoS)]) -> Result<(), TransportError> {
        (**self).subscribe(topics)
    }

    fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS) -> Result<(), TransportError> {
        (**self).publish(topic, payload, qos)
    }

    fn poll(&mut self, slice: Duration) -> Vec<TransportEvent> {
        (**self).poll(slice)
    }
}
