use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use dronelink_sync::ChunkOrder;

/// How the broker session is driven.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum SessionMode {
    /// The console loop pumps the session itself.
    #[default]
    Cooperative,
    /// A background worker owns the session.
    Background,
}

/// Chunk delivery order of the simulated drone.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum SimChunkOrder {
    #[default]
    InOrder,
    Reversed,
    Interleaved,
}

impl From<SimChunkOrder> for ChunkOrder {
    fn from(order: SimChunkOrder) -> Self {
        match order {
            SimChunkOrder::InOrder => ChunkOrder::InOrder,
            SimChunkOrder::Reversed => ChunkOrder::Reversed,
            SimChunkOrder::Interleaved => ChunkOrder::Interleaved,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "ground-station", about = "Drone telemetry ground station", version)]
pub struct Cli {
    /// Config file (defaults to the platform config dir)
    #[arg(long, global = true, value_name = "path")]
    pub config: Option<PathBuf>,

    /// Override the CSV data file
    #[arg(long, global = true, value_name = "path")]
    pub data_file: Option<PathBuf>,

    /// Override the device id
    #[arg(long, global = true)]
    pub device: Option<String>,

    #[arg(long, global = true, value_enum, default_value_t = SessionMode::Cooperative)]
    pub mode: SessionMode,

    #[command(flatten)]
    pub sim: SimArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Shape of the simulated drone the console talks to.
#[derive(clap::Args, Debug, Clone)]
pub struct SimArgs {
    /// Records in the simulated drone's log
    #[arg(long, global = true, default_value_t = 25)]
    pub sim_records: usize,

    /// Characters per simulated log chunk
    #[arg(long, global = true, default_value_t = 64)]
    pub sim_chunk_size: usize,

    #[arg(long, global = true, value_enum, default_value_t = SimChunkOrder::InOrder)]
    pub sim_chunk_order: SimChunkOrder,

    /// Seconds between simulated heartbeats
    #[arg(long, global = true, default_value_t = 1.0)]
    pub sim_heartbeat_secs: f64,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Download the full log and replace the data file
    PullLog,

    /// Fetch the most recent records and append the new ones
    Sync {
        /// Records to request (defaults to transfer.preview_last)
        #[arg(long)]
        last: Option<u32>,
    },

    /// Start a drop mission
    Start {
        /// Drone speed in m/s
        #[arg(long)]
        velocity: f64,

        /// Distance between drops in metres
        #[arg(long)]
        spacing: f64,

        /// Seconds before the first drop
        #[arg(long, default_value_t = 0.0)]
        delay: f64,

        /// Dropper stepper rate
        #[arg(long, default_value_t = 800)]
        step_hz: u32,
    },

    /// Emergency stop
    Stop,

    /// Connect, wait for the device and report
    Status {
        /// Seconds to wait for the device to come online
        #[arg(long, default_value_t = 3.0)]
        wait: f64,
    },

    /// Print the effective configuration, or write it out
    Config {
        /// Write the effective configuration to the config path
        #[arg(long)]
        save: bool,
    },
}
