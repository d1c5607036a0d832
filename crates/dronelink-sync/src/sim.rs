//! # Simulated Drone
//!
//! Plays the device side of the protocol against a [`MemoryBroker`]: answers
//! commands on the `cmd` topic and emits heartbeats on `info`.
//!
//! ```text
//! cmd  {"action":"stream_log"}        ──► log/part chunks ... {"eof":true}
//! cmd  {"action":"preview","last":N}  ──► preview [..N records..]
//!                                         events {"event":"preview_done"}
//! cmd  {"action":"start",...}/"stop"  ──► state {"running":..}
//! every heartbeat_interval            ──► info {"uptime":..}
//! ```
//!
//! Used by the console's demo mode and by integration tests. Chunk order
//! and EOF delivery can be disturbed to exercise reassembly and timeouts.

use dronelink_core::schema::{format_line, HEADER};
use dronelink_core::{Chunk, Record};
use tracing::{debug, info, warn};

use crate::error::SyncResult;
use crate::protocol::{encode_batch, encode_chunk, Command, Topics};
use crate::transport::MemoryBroker;

/// Order in which log chunks are delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChunkOrder {
    #[default]
    InOrder,
    Reversed,
    /// Even sequence numbers first, then odd.
    Interleaved,
}

pub struct SimulatedDrone {
    broker: MemoryBroker,
    topics: Topics,
    log: Vec<Record>,
    chunk_size: usize,
    chunk_order: ChunkOrder,
    with_header: bool,
    send_eof: bool,
    heartbeat_interval: Option<f64>,
    last_heartbeat: Option<f64>,
    booted_at: Option<f64>,
    running: bool,
    commands_handled: usize,
}

impl SimulatedDrone {
    pub fn new(broker: MemoryBroker, device_id: &str) -> Self {
        SimulatedDrone {
            broker,
            topics: Topics::for_device(device_id),
            log: Vec::new(),
            chunk_size: 64,
            chunk_order: ChunkOrder::InOrder,
            with_header: true,
            send_eof: true,
            heartbeat_interval: Some(5.0),
            last_heartbeat: None,
            booted_at: None,
            running: false,
            commands_handled: 0,
        }
    }

    pub fn with_log(mut self, records: Vec<Record>) -> Self {
        self.log = records;
        self
    }

    /// Characters per log chunk. Clamped to at least one.
    pub fn with_chunk_size(mut self, chars: usize) -> Self {
        self.chunk_size = chars.max(1);
        self
    }

    pub fn with_chunk_order(mut self, order: ChunkOrder) -> Self {
        self.chunk_order = order;
        self
    }

    pub fn with_header(mut self, header: bool) -> Self {
        self.with_header = header;
        self
    }

    /// `None` disables heartbeats.
    pub fn with_heartbeat_interval(mut self, secs: Option<f64>) -> Self {
        self.heartbeat_interval = secs;
        self
    }

    /// When false the log stream never terminates.
    pub fn with_eof(mut self, send_eof: bool) -> Self {
        self.send_eof = send_eof;
        self
    }

    /// Logs a new drop.
    pub fn record(&mut self, record: Record) {
        self.log.push(record);
    }

    pub fn log(&self) -> &[Record] {
        &self.log
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn commands_handled(&self) -> usize {
        self.commands_handled
    }

    /// The log file as the drone would store it.
    pub fn log_text(&self) -> String {
        let mut text = String::new();
        if self.with_header {
            text.push_str(HEADER);
            text.push('\n');
        }
        for record in &self.log {
            text.push_str(&format_line(record));
            text.push('\n');
        }
        text
    }

    /// Handles pending commands and emits a heartbeat when one is due.
    /// Returns the number of commands handled.
    pub fn step(&mut self, now: f64) -> SyncResult<usize> {
        self.booted_at.get_or_insert(now);
        self.maybe_heartbeat(now);

        let mut handled = 0;
        for message in self.broker.take_published() {
            if message.topic != self.topics.cmd {
                continue;
            }
            match Command::from_json(&message.payload) {
                Ok(command) => {
                    self.handle(command, now)?;
                    handled += 1;
                }
                Err(e) => warn!(error = %e, "Drone ignored undecodable command"),
            }
        }
        self.commands_handled += handled;
        Ok(handled)
    }

    fn maybe_heartbeat(&mut self, now: f64) {
        let Some(interval) = self.heartbeat_interval else {
            return;
        };
        let due = match self.last_heartbeat {
            Some(last) => now - last >= interval,
            None => true,
        };
        if due {
            let uptime = now - self.booted_at.unwrap_or(now);
            let payload = serde_json::json!({ "uptime": uptime }).to_string();
            if self.broker.deliver(&self.topics.info, payload, now) {
                self.last_heartbeat = Some(now);
            }
        }
    }

    fn handle(&mut self, command: Command, now: f64) -> SyncResult<()> {
        debug!(action = command.action(), "Drone received command");
        match command {
            Command::StreamLog => self.stream_log(now),
            Command::Preview { last } => self.preview(last as usize, now),
            Command::Start {
                interval_s,
                delay_s,
                step_hz,
            } => {
                self.running = true;
                let state = serde_json::json!({
                    "running": true,
                    "interval_s": interval_s,
                    "delay_s": delay_s,
                    "step_hz": step_hz,
                });
                self.broker.deliver(&self.topics.state, state.to_string(), now);
                Ok(())
            }
            Command::Stop => {
                self.running = false;
                let state = serde_json::json!({ "running": false });
                self.broker.deliver(&self.topics.state, state.to_string(), now);
                Ok(())
            }
        }
    }

    fn stream_log(&mut self, now: f64) -> SyncResult<()> {
        let text = self.log_text();
        let chars: Vec<char> = text.chars().collect();
        let mut chunks: Vec<Chunk> = chars
            .chunks(self.chunk_size)
            .enumerate()
            .map(|(seq, part)| Chunk::data(seq as i64, part.iter().collect::<String>()))
            .collect();

        match self.chunk_order {
            ChunkOrder::InOrder => {}
            ChunkOrder::Reversed => chunks.reverse(),
            ChunkOrder::Interleaved => {
                let (even, odd): (Vec<Chunk>, Vec<Chunk>) = chunks
                    .into_iter()
                    .partition(|c| c.seq.unwrap_or(0) % 2 == 0);
                chunks = even.into_iter().chain(odd).collect();
            }
        }

        info!(chunks = chunks.len(), records = self.log.len(), "Drone streaming log");
        for chunk in &chunks {
            self.broker
                .deliver(&self.topics.log_part, encode_chunk(chunk)?, now);
        }
        if self.send_eof {
            self.broker
                .deliver(&self.topics.log_part, encode_chunk(&Chunk::eof())?, now);
        }
        Ok(())
    }

    fn preview(&mut self, last: usize, now: f64) -> SyncResult<()> {
        let start = self.log.len().saturating_sub(last);
        let batch = encode_batch(&self.log[start..])?;
        self.broker.deliver(&self.topics.preview, batch, now);
        self.broker
            .deliver(&self.topics.events, r#"{"event":"preview_done"}"#, now);
        Ok(())
    }
}
