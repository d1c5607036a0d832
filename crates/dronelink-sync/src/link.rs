//! Traits the controllers and the driver use to reach the broker session.
//!
//! [`SessionManager`](crate::session::SessionManager) implements them for the
//! cooperative model and [`SessionWorkerHandle`](crate::worker::SessionWorkerHandle)
//! for the background model.

use crate::error::PublishError;
use crate::protocol::{Command, QoS, Topics, COMMAND_QOS};
use crate::session::SessionEvent;

/// Publishes commands to the device.
pub trait CommandPublisher {
    fn is_connected(&self) -> bool;

    fn topics(&self) -> &Topics;

    fn try_publish(&mut self, topic: &str, payload: &[u8], qos: QoS) -> Result<(), PublishError>;

    /// Serializes `command` and publishes it on the device's `cmd` topic.
    fn send_command(&mut self, command: &Command) -> Result<(), PublishError> {
        if !self.is_connected() {
            return Err(PublishError::NotConnected);
        }
        let json = command
            .to_json()
            .map_err(|e| PublishError::TransportRejected(e.to_string()))?;
        let topic = self.topics().cmd.clone();
        self.try_publish(&topic, json.as_bytes(), COMMAND_QOS)
    }
}

/// A session the driver can drain once per cycle.
pub trait SessionLink: CommandPublisher {
    /// Everything that happened since the last call. Never blocks for long.
    fn poll_events(&mut self, now: f64) -> Vec<SessionEvent>;

    /// Ends the session and stops reconnecting.
    fn disconnect(&mut self);
}
