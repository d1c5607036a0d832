//! # Liveness Monitor
//!
//! Infers whether the drone is actively transmitting from heartbeat cadence.
//!
//! ## Rule
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Presence Detection                                │
//! │                                                                         │
//! │  heartbeat ──► keep last 2 timestamps                                  │
//! │                    │                                                    │
//! │                    ▼                                                    │
//! │        2 present AND offline AND gap < window (11 s)?                  │
//! │                    │                                                    │
//! │              yes   │   no                                               │
//! │          ┌─────────┴─────────┐                                          │
//! │          ▼                   ▼                                          │
//! │   online = true        unchanged                                        │
//! │   arm one-shot notice                                                   │
//! │                                                                         │
//! │  disconnect ──► clear buffer, online = false (always)                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A single stray heartbeat never marks the device online.

use std::collections::VecDeque;

use tracing::{debug, info};

use crate::types::HeartbeatEvent;
use crate::DEFAULT_ONLINE_WINDOW_SECS;

const RETAINED_HEARTBEATS: usize = 2;

/// Heartbeat-driven presence state.
#[derive(Debug, Clone)]
pub struct LivenessMonitor {
    window_secs: f64,
    recent: VecDeque<HeartbeatEvent>,
    online: bool,
    notice_pending: bool,
}

impl Default for LivenessMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_ONLINE_WINDOW_SECS)
    }
}

impl LivenessMonitor {
    /// Creates a monitor with the given maximum heartbeat gap.
    pub fn new(window_secs: f64) -> Self {
        LivenessMonitor {
            window_secs,
            recent: VecDeque::with_capacity(RETAINED_HEARTBEATS + 1),
            online: false,
            notice_pending: false,
        }
    }

    /// Records a heartbeat observed at `now`.
    ///
    /// Returns true if this heartbeat flipped the device online.
    pub fn on_heartbeat(&mut self, now: f64) -> bool {
        self.recent.push_back(HeartbeatEvent { received_at: now });
        while self.recent.len() > RETAINED_HEARTBEATS {
            self.recent.pop_front();
        }

        if self.online || self.recent.len() != RETAINED_HEARTBEATS {
            return false;
        }

        let gap = self.recent[1].received_at - self.recent[0].received_at;
        if gap < self.window_secs {
            self.online = true;
            self.notice_pending = true;
            info!(gap_secs = gap, "Device became online");
            true
        } else {
            debug!(gap_secs = gap, window_secs = self.window_secs, "Heartbeat gap too wide");
            false
        }
    }

    /// Transport went away. A stale online reading must not survive this.
    pub fn on_disconnect(&mut self) {
        if self.online {
            info!("Device marked offline after disconnect");
        }
        self.recent.clear();
        self.online = false;
        self.notice_pending = false;
    }

    /// Whether the device is currently considered online.
    pub fn is_online(&self) -> bool {
        self.online
    }

    /// Consumes the "device became online" notice. Returns true at most once
    /// per offline-to-online transition.
    pub fn take_online_notice(&mut self) -> bool {
        std::mem::take(&mut self.notice_pending)
    }

    /// The retained heartbeats, oldest first.
    pub fn recent(&self) -> impl Iterator<Item = &HeartbeatEvent> {
        self.recent.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_heartbeats_go_online() {
        let mut monitor = LivenessMonitor::default();
        assert!(!monitor.on_heartbeat(0.0));
        assert!(!monitor.is_online());
        assert!(monitor.on_heartbeat(5.0));
        assert!(monitor.is_online());
    }

    #[test]
    fn test_wide_gap_stays_offline() {
        let mut monitor = LivenessMonitor::default();
        monitor.on_heartbeat(0.0);
        assert!(!monitor.on_heartbeat(15.0));
        assert!(!monitor.is_online());
    }

    #[test]
    fn test_gap_equal_to_window_stays_offline() {
        let mut monitor = LivenessMonitor::new(11.0);
        monitor.on_heartbeat(0.0);
        assert!(!monitor.on_heartbeat(11.0));
    }

    #[test]
    fn test_recovers_after_wide_gap() {
        let mut monitor = LivenessMonitor::default();
        monitor.on_heartbeat(0.0);
        monitor.on_heartbeat(15.0);
        assert!(monitor.on_heartbeat(20.0));
        assert_eq!(monitor.recent().count(), 2);
    }

    #[test]
    fn test_disconnect_between_heartbeats_resets() {
        let mut monitor = LivenessMonitor::default();
        monitor.on_heartbeat(0.0);
        monitor.on_disconnect();
        assert!(!monitor.on_heartbeat(5.0));
        assert!(!monitor.is_online());
    }

    #[test]
    fn test_disconnect_clears_online() {
        let mut monitor = LivenessMonitor::default();
        monitor.on_heartbeat(0.0);
        monitor.on_heartbeat(5.0);
        monitor.on_disconnect();
        assert!(!monitor.is_online());
        assert_eq!(monitor.recent().count(), 0);
        assert!(!monitor.take_online_notice());
    }

    #[test]
    fn test_online_notice_is_one_shot() {
        let mut monitor = LivenessMonitor::default();
        monitor.on_heartbeat(0.0);
        monitor.on_heartbeat(5.0);
        // further heartbeats while online do not re-arm the notice
        monitor.on_heartbeat(10.0);
        assert!(monitor.take_online_notice());
        assert!(!monitor.take_online_notice());
    }
}
