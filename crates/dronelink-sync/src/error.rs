//! # Sync Error Types
//!
//! Error types for session, transfer and configuration operations.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  ConnectError   │  │   StartError    │  │     PublishError        │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  Transport      │  │  NotConnected   │  │  NotConnected           │ │
//! │  │   Unavailable   │  │  AlreadyIn      │  │  TransportRejected      │ │
//! │  │  AuthRejected   │  │   Progress      │  │                         │ │
//! │  │  TLSError       │  │  CommandRejected│  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────────────────────────────────┐ │
//! │  │ TransportError  │  │  SyncError (aggregate)                      │ │
//! │  │                 │  │                                             │ │
//! │  │  NotConnected   │  │  Config problems, store failures, channel   │ │
//! │  │  Rejected       │  │  failures, plus all of the above via From   │ │
//! │  └─────────────────┘  └─────────────────────────────────────────────┘ │
//! │                                                                         │
//! │  Parse-level faults are NOT errors: they become a TransferOutcome.     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

// =============================================================================
// Component Errors
// =============================================================================

/// Why a broker connection could not be established.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    /// Network unreachable, broker down or refused for a non-auth reason.
    #[error("Broker unavailable: {0}")]
    TransportUnavailable(String),

    /// Credentials were refused.
    #[error("Broker rejected credentials: {0}")]
    AuthRejected(String),

    /// TLS handshake or certificate verification failed.
    #[error("TLS error: {0}")]
    TlsError(String),
}

impl ConnectError {
    /// Auth and TLS failures will not fix themselves by retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ConnectError::TransportUnavailable(_))
    }
}

/// Why a transfer or sync request was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StartError {
    #[error("Not connected to the broker")]
    NotConnected,

    #[error("A request of this kind is already in progress")]
    AlreadyInProgress,

    /// The session was up but the command could not be handed to the transport.
    #[error("Command rejected by transport: {0}")]
    CommandRejected(String),
}

/// Why a publish failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    #[error("Not connected to the broker")]
    NotConnected,

    #[error("Transport rejected publish: {0}")]
    TransportRejected(String),
}

impl From<PublishError> for StartError {
    fn from(err: PublishError) -> Self {
        match err {
            PublishError::NotConnected => StartError::NotConnected,
            PublishError::TransportRejected(reason) => StartError::CommandRejected(reason),
        }
    }
}

/// Errors reported by a [`PubSubTransport`](crate::transport::PubSubTransport)
/// after the connection is up.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Transport not connected")]
    NotConnected,

    #[error("Transport rejected request: {0}")]
    Rejected(String),
}

impl From<TransportError> for PublishError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::NotConnected => PublishError::NotConnected,
            TransportError::Rejected(reason) => PublishError::TransportRejected(reason),
        }
    }
}

// =============================================================================
// Aggregate Error
// =============================================================================

/// Sync error type covering everything the crate can fail with.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Device ID not configured")]
    MissingDeviceId,

    #[error("Invalid broker URL: {0}")]
    InvalidUrl(String),

    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Session / Transfer Errors
    // =========================================================================
    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Start(#[from] StartError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    // =========================================================================
    // Protocol Errors
    // =========================================================================
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    // =========================================================================
    // Storage Errors
    // =========================================================================
    #[error(transparent)]
    Store(#[from] dronelink_store::StoreError),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Channel error: {0}")]
    ChannelError(String),

    #[error("Session worker is shutting down")]
    ShuttingDown,
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            SyncError::DeserializationFailed(err.to_string())
        } else {
            SyncError::SerializationFailed(err.to_string())
        }
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl SyncError {
    /// Returns true if retrying the operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Connect(e) => e.is_retryable(),
            SyncError::Start(StartError::AlreadyInProgress) => true,
            SyncError::Publish(PublishError::TransportRejected(_))
            | SyncError::Transport(TransportError::Rejected(_))
            | SyncError::ChannelError(_) => true,
            _ => false,
        }
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::MissingDeviceId
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }

    /// Returns true for the "not connected" class the operator must act on.
    pub fn is_not_connected(&self) -> bool {
        matches!(
            self,
            SyncError::Start(StartError::NotConnected)
                | SyncError::Publish(PublishError::NotConnected)
                | SyncError::Transport(TransportError::NotConnected)
        )
    }
}
