//! # dronelink Ground Station
//!
//! Headless operator console. Each invocation connects, runs one operator
//! action against the drone, and exits.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Ground Station Console                           │
//! │                                                                         │
//! │  clap ──► DronelinkConfig (TOML + DRONELINK_* env + flags)             │
//! │                │                                                        │
//! │                ▼                                                        │
//! │  TelemetryDriver ◄── SessionManager (cooperative)                      │
//! │        │         ◄── SessionWorkerHandle (background)                  │
//! │        ▼                                                                │
//! │  CsvStore (drone_data.csv)                                             │
//! │                                                                         │
//! │  The broker is in-process; a SimulatedDrone answers on the far side.  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

mod cli;
mod console;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use dronelink_core::{MissionParams, Record, TransferOutcome};
use dronelink_store::CsvStore;
use dronelink_sync::{
    DronelinkConfig, MemoryBroker, SessionLink, SessionManager, SessionWorker, SimulatedDrone,
    TelemetryDriver,
};

use crate::cli::{Cli, Command, SessionMode, SimArgs};
use crate::console::{Console, LoggingEmitter};

const CONNECT_WITHIN: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = DronelinkConfig::load(cli.config.clone()).context("loading configuration")?;
    if let Some(path) = &cli.data_file {
        config.store.data_file = path.clone();
    }
    if let Some(device) = &cli.device {
        config.device.id = device.clone();
    }
    config.validate()?;

    if let Command::Config { save } = cli.command {
        return show_config(&config, save, &cli);
    }

    let broker = MemoryBroker::new();
    let drone = simulated_drone(&broker, &config, &cli.sim);
    let store = CsvStore::new(&config.store.data_file);
    let session = SessionManager::new(broker.transport(), config.topics(), config.session.clone());
    let slice = config.session.pump_slice();

    info!(
        device = config.device_id(),
        data_file = ?config.store.data_file,
        mode = ?cli.mode,
        "Ground station starting"
    );

    match cli.mode {
        SessionMode::Cooperative => {
            let mut session = session;
            session.connect(config.connect_options()?)?;
            let driver = build_driver(session, store, &config)?;
            let mut console = Console::new(driver, drone, slice);
            let outcome = execute(&mut console, &cli.command).await;
            console.into_driver().disconnect();
            outcome
        }
        SessionMode::Background => {
            let handle = SessionWorker::spawn(session);
            handle.connect(config.connect_options()?)?;
            let driver = build_driver(handle, store, &config)?;
            let mut console = Console::new(driver, drone, slice);
            let outcome = execute(&mut console, &cli.command).await;

            let mut driver = console.into_driver();
            driver.disconnect();
            let (handle, _) = driver.into_parts();
            handle.shutdown().await?;
            outcome
        }
    }
}

fn build_driver<L: SessionLink>(
    link: L,
    store: CsvStore,
    config: &DronelinkConfig,
) -> Result<TelemetryDriver<L, CsvStore>> {
    let mut driver =
        TelemetryDriver::with_emitter(link, store, &config.transfer, Arc::new(LoggingEmitter));
    driver.hydrate().context("loading stored records")?;
    Ok(driver)
}

async fn execute<L: SessionLink>(console: &mut Console<L>, command: &Command) -> Result<()> {
    console.wait_connected(CONNECT_WITHIN).await?;

    match command {
        Command::PullLog => {
            let result = console.pull_log().await?;
            println!(
                "log transfer: {} ({} records, {} rejected lines, {} chunks)",
                result.outcome,
                result.accepted_count,
                result.rejected_line_count,
                result.chunks_received
            );
            if matches!(
                result.outcome,
                TransferOutcome::Timeout | TransferOutcome::NotConnected
            ) {
                bail!("log transfer did not complete: {}", result.outcome);
            }
        }
        Command::Sync { last } => {
            let report = console.sync(*last).await?;
            println!(
                "sync: {} new, {} duplicates{}",
                report.accepted_count,
                report.duplicate_count,
                if report.timed_out { " (timed out)" } else { "" }
            );
        }
        Command::Start {
            velocity,
            spacing,
            delay,
            step_hz,
        } => {
            let params = MissionParams::from_operator_input(*velocity, *spacing, *delay, *step_hz)?;
            let state = console.start(&params).await?;
            println!("mission started: interval {:.2} s", params.interval_s);
            print_state(state);
        }
        Command::Stop => {
            let state = console.stop().await?;
            println!("stop sent");
            print_state(state);
        }
        Command::Status { wait } => {
            let online = console.wait_online(wait_duration(*wait)?).await?;
            let status = console.driver().status();
            let summary = serde_json::json!({
                "connected": status.connected,
                "device_online": online,
                "stored_records": status.stored_records,
                "transfer": status.transfer_state.to_string(),
                "last_error": status.last_error,
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Config { .. } => {}
    }

    Ok(())
}

/// Converts the `--wait` seconds, refusing negative, NaN and infinite values.
fn wait_duration(secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs).with_context(|| format!("invalid --wait value {}", secs))
}

fn print_state(state: Option<serde_json::Value>) {
    match state {
        Some(state) => println!("device state: {}", state),
        None => println!("device did not report its state"),
    }
}

fn show_config(config: &DronelinkConfig, save: bool, cli: &Cli) -> Result<()> {
    if save {
        config.save(cli.config.clone())?;
        println!("configuration saved");
        return Ok(());
    }

    let mut shown = config.clone();
    if shown.broker.password.is_some() {
        shown.broker.password = Some("***".into());
    }
    println!("{}", toml::to_string_pretty(&shown)?);
    Ok(())
}

/// A drone with a deterministic flight log of `sim_records` drops.
fn simulated_drone(broker: &MemoryBroker, config: &DronelinkConfig, sim: &SimArgs) -> SimulatedDrone {
    let log = (0..sim.sim_records)
        .map(|i| Record {
            ts: 1_718_035_200.0 + i as f64 * 2.5,
            lat: 19.4326 + i as f64 * 0.0001,
            lon: -99.1332 - i as f64 * 0.00005,
            alt: 2240.0 + (i % 5) as f64,
            drop_id: i as i64 + 1,
            speed_mps: 5.2,
            sats: 8 + (i % 3) as i64,
            fix_ok: true,
        })
        .collect();

    SimulatedDrone::new(broker.clone(), config.device_id())
        .with_log(log)
        .with_chunk_size(sim.sim_chunk_size)
        .with_chunk_order(sim.sim_chunk_order.into())
        .with_heartbeat_interval(Some(sim.sim_heartbeat_secs).filter(|s| *s > 0.0))
}

/// Initializes the tracing subscriber.
///
/// ## Log Levels
/// - `RUST_LOG=debug` - Show debug messages
/// - `RUST_LOG=dronelink_sync=trace` - Trace the sync engine only
/// - Default: INFO, with dronelink crates at DEBUG
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,dronelink_sync=debug,dronelink_store=debug"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_duration() {
        assert_eq!(wait_duration(2.5).unwrap(), Duration::from_millis(2500));
        assert_eq!(wait_duration(0.0).unwrap(), Duration::ZERO);
        assert!(wait_duration(f64::INFINITY).is_err());
        assert!(wait_duration(f64::NAN).is_err());
        assert!(wait_duration(-1.0).is_err());
    }
}
