//! The console loop: steps the simulated drone, cycles the driver, sleeps.

use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use tracing::{error, info, warn};

use dronelink_core::{MissionParams, TransferResult};
use dronelink_store::CsvStore;
use dronelink_sync::{
    unix_now, ConnectError, ConnectionState, CycleReport, SessionLink, SimulatedDrone, SyncReport,
    TelemetryDriver, TelemetryEventEmitter,
};

/// Forwards driver notifications to the log.
pub struct LoggingEmitter;

impl TelemetryEventEmitter for LoggingEmitter {
    fn emit_connection(&self, state: ConnectionState, reason: Option<&str>) {
        match reason {
            Some(reason) => warn!(%state, reason, "Broker session changed"),
            None => info!(%state, "Broker session changed"),
        }
    }

    fn emit_connect_refused(&self, error: &ConnectError) {
        error!(error = %error, "Broker refused the session");
    }

    fn emit_device_online(&self) {
        info!("Drone is online");
    }

    fn emit_transfer_finished(&self, result: &TransferResult) {
        info!(
            outcome = %result.outcome,
            accepted = result.accepted_count,
            rejected_lines = result.rejected_line_count,
            chunks = result.chunks_received,
            "Log transfer finished"
        );
    }

    fn emit_sync_finished(&self, report: &SyncReport) {
        info!(
            accepted = report.accepted_count,
            duplicates = report.duplicate_count,
            timed_out = report.timed_out,
            "Incremental sync finished"
        );
    }

    fn emit_error(&self, message: &str, actionable: bool) {
        if actionable {
            warn!("{} (check the broker connection)", message);
        } else {
            error!("{}", message);
        }
    }

    fn emit_device_state(&self, state: &serde_json::Value) {
        info!(%state, "Drone state");
    }
}

pub struct Console<L: SessionLink> {
    driver: TelemetryDriver<L, CsvStore>,
    drone: SimulatedDrone,
    slice: Duration,
}

impl<L: SessionLink> Console<L> {
    pub fn new(driver: TelemetryDriver<L, CsvStore>, drone: SimulatedDrone, slice: Duration) -> Self {
        Console {
            driver,
            drone,
            slice,
        }
    }

    pub fn driver(&self) -> &TelemetryDriver<L, CsvStore> {
        &self.driver
    }

    pub fn into_driver(self) -> TelemetryDriver<L, CsvStore> {
        self.driver
    }

    async fn tick(&mut self) -> Result<CycleReport> {
        let now = unix_now();
        self.drone.step(now).context("simulated drone failed")?;
        let report = self.driver.cycle(now);
        tokio::time::sleep(self.slice).await;
        Ok(report)
    }

    pub async fn wait_connected(&mut self, within: Duration) -> Result<()> {
        let deadline = Instant::now() + within;
        while Instant::now() < deadline {
            self.tick().await?;
            if self.driver.is_connected() {
                return Ok(());
            }
        }
        match self.driver.status().last_error {
            Some(e) => bail!("not connected: {}", e),
            None => bail!("not connected after {:?}", within),
        }
    }

    /// Cycles until the device is online or `within` elapses.
    pub async fn wait_online(&mut self, within: Duration) -> Result<bool> {
        let deadline = Instant::now() + within;
        while Instant::now() < deadline {
            self.tick().await?;
            if self.driver.is_device_online() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub async fn pull_log(&mut self) -> Result<TransferResult> {
        self.driver.request_full_log(unix_now())?;
        loop {
            if let Some(result) = self.tick().await?.transfer {
                return Ok(result);
            }
        }
    }

    pub async fn sync(&mut self, last: Option<u32>) -> Result<SyncReport> {
        match last {
            Some(limit) => self.driver.request_incremental_sync_with(limit, unix_now())?,
            None => self.driver.request_incremental_sync(unix_now())?,
        }
        loop {
            if let Some(report) = self.tick().await?.sync {
                return Ok(report);
            }
        }
    }

    pub async fn start(&mut self, params: &MissionParams) -> Result<Option<serde_json::Value>> {
        self.driver.start_mission(params)?;
        self.await_state().await
    }

    pub async fn stop(&mut self) -> Result<Option<serde_json::Value>> {
        self.driver.emergency_stop()?;
        self.await_state().await
    }

    /// Waits briefly for the device to acknowledge on the state topic.
    async fn await_state(&mut self) -> Result<Option<serde_json::Value>> {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            self.tick().await?;
            if let Some(state) = self.driver.device_state() {
                return Ok(Some(state.clone()));
            }
        }
        Ok(None)
    }
}
