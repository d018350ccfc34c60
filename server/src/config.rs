//! Server configuration and tuning constants.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use shared::level::LevelDimensions;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

pub const RECV_BUFFER_SIZE: usize = 4096;
pub const SEND_BUFFER_SIZE: usize = 8192;
pub const SEND_SMALL_BUFFER_SIZE: usize = 1024;

pub const CONNECTION_EXPIRY_MS: u64 = 60_000;
pub const SAFE_DELETE_MS: u64 = 5_000;
pub const SWEEP_INTERVAL_MS: u64 = 1_000;

pub const MULTICAST_GC_PERIOD_MS: u64 = 6_000;
pub const MULTICAST_LIFETIME_MS: u64 = 180_000;

pub const UDP_RETRANSMISSION_PERIOD_MS: u64 = 3_000;
pub const UDP_RETRY_COUNT: u32 = 3;

pub const PING_PERIOD_MS: u64 = 5_000;

/// How socket operations are dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum IoModel {
    /// One task per submitted operation.
    #[default]
    CompletionPort,
    /// Long-lived reader and writer per connection.
    Registered,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_players: usize,
    /// Game ticks per second.
    pub tick_rate: u32,
    /// Worker threads blocking on the completion queue; 0 picks one per core.
    pub io_threads: usize,
    pub io_model: IoModel,
    pub server_name: String,
    pub motd: String,
    pub login_server: Option<SocketAddr>,
    /// Local UDP port for inter-service messages; 0 binds an ephemeral port.
    pub udp_port: u16,
    pub level_width: i16,
    pub level_height: i16,
    pub level_length: i16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 25565,
            max_players: 64,
            tick_rate: 20,
            io_threads: 0,
            io_model: IoModel::default(),
            server_name: "mmocraft".to_string(),
            motd: "Welcome to mmocraft".to_string(),
            login_server: None,
            udp_port: 0,
            level_width: 64,
            level_height: 32,
            level_length: 64,
        }
    }
}

impl ServerConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate.max(1) as f64)
    }

    pub fn io_thread_count(&self) -> usize {
        if self.io_threads == 0 {
            num_cpus::get()
        } else {
            self.io_threads
        }
    }

    pub fn level_dimensions(&self) -> LevelDimensions {
        LevelDimensions::new(self.level_width, self.level_height, self.level_length)
    }
}
