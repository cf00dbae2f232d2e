use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use zipcore_types::Network;

use crate::error::NodeError;
use crate::logging::LogFormat;
use crate::zmq_bridge::ZmqTiming;

/// Configuration of the zip service core.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Which chain the daemons run on.
    #[serde(default)]
    pub network: Network,

    /// Path of the file this config was loaded from. A relative spawn
    /// `datadir` is resolved against its directory.
    #[serde(default)]
    pub config_path: Option<PathBuf>,

    /// Spawn and supervise a local daemon.
    #[serde(default)]
    pub spawn: Option<SpawnConfig>,

    /// Daemons reached over the network.
    #[serde(default)]
    pub connect: Vec<ConnectConfig>,

    /// Pause between fail-over attempts on consecutive nodes.
    #[serde(default = "default_try_all_interval_ms")]
    pub try_all_interval_ms: u64,

    /// Pause between connection verification attempts at start-up.
    #[serde(default = "default_start_retry_interval_ms")]
    pub start_retry_interval_ms: u64,

    /// Delay before respawning a daemon that exited on its own.
    #[serde(default = "default_spawn_restart_time_ms")]
    pub spawn_restart_time_ms: u64,

    /// Poll interval while waiting for a stale daemon to remove its pid file.
    #[serde(default = "default_spawn_stop_time_ms")]
    pub spawn_stop_time_ms: u64,

    /// How long `stop` waits for the spawned daemon to exit.
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,

    #[serde(default = "default_tip_update_interval_ms")]
    pub tip_update_interval_ms: u64,

    #[serde(default = "default_reindex_wait_ms")]
    pub reindex_wait_ms: u64,

    /// Pause before reopening a daemon's notification socket.
    #[serde(default = "default_zmq_reconnect_delay_ms")]
    pub zmq_reconnect_delay_ms: u64,

    /// Silence after which a notification socket is reopened, since a
    /// SUB socket cannot tell a quiet daemon from a vanished one.
    #[serde(default = "default_zmq_idle_reconnect_ms")]
    pub zmq_idle_reconnect_ms: u64,

    /// Largest txid page a summary query may request.
    #[serde(default = "default_max_txids")]
    pub max_txids: usize,

    /// Largest page an address history query may request.
    #[serde(default = "default_max_transaction_history")]
    pub max_transaction_history: usize,

    #[serde(default = "default_max_addresses_query")]
    pub max_addresses_query: usize,

    /// Concurrent detailed-transaction lookups per history query.
    #[serde(default = "default_transaction_concurrency")]
    pub transaction_concurrency: usize,

    #[serde(default)]
    pub log_format: LogFormat,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub enable_websocket: bool,

    #[serde(default = "default_websocket_port")]
    pub websocket_port: u16,
}

/// Local daemon to spawn.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnConfig {
    pub datadir: PathBuf,
    pub exec: PathBuf,
}

/// A daemon reached over the network.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectConfig {
    #[serde(default = "default_rpchost")]
    pub rpchost: String,
    pub rpcport: u16,
    #[serde(default)]
    pub rpcuser: String,
    #[serde(default)]
    pub rpcpassword: String,
    #[serde(default = "default_rpcprotocol")]
    pub rpcprotocol: String,
    /// ZMQ endpoint publishing `hashblock`, `rawtx` and `rawtxlock`.
    #[serde(default)]
    pub zmqpubrawtx: Option<String>,
}

// ── Serde default helpers ──────────────────────────────────────────────

fn default_try_all_interval_ms() -> u64 {
    1000
}

fn default_start_retry_interval_ms() -> u64 {
    5000
}

fn default_spawn_restart_time_ms() -> u64 {
    5000
}

fn default_spawn_stop_time_ms() -> u64 {
    10000
}

fn default_shutdown_timeout_ms() -> u64 {
    15000
}

fn default_tip_update_interval_ms() -> u64 {
    15000
}

fn default_reindex_wait_ms() -> u64 {
    10000
}

fn default_zmq_reconnect_delay_ms() -> u64 {
    1000
}

fn default_zmq_idle_reconnect_ms() -> u64 {
    60000
}

fn default_max_txids() -> usize {
    1000
}

fn default_max_transaction_history() -> usize {
    50
}

fn default_max_addresses_query() -> usize {
    10000
}

fn default_transaction_concurrency() -> usize {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_websocket_port() -> u16 {
    3001
}

fn default_rpchost() -> String {
    "localhost".to_string()
}

fn default_rpcprotocol() -> String {
    "http".to_string()
}

// ── Impl ───────────────────────────────────────────────────────────────

impl ServiceConfig {
    /// Load configuration from a TOML file and remember its path.
    pub fn from_toml_file(path: &str) -> Result<Self, NodeError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| NodeError::Config(e.to_string()))?;
        let mut config = Self::from_toml_str(&content)?;
        if config.config_path.is_none() {
            config.config_path = Some(PathBuf::from(path));
        }
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, NodeError> {
        toml::from_str(s).map_err(|e| NodeError::Config(e.to_string()))
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml_string(&self) -> Result<String, NodeError> {
        toml::to_string_pretty(self).map_err(|e| NodeError::Config(e.to_string()))
    }

    /// Either a spawn section or at least one connect entry is required.
    pub fn validate(&self) -> Result<(), NodeError> {
        if self.spawn.is_none() && self.connect.is_empty() {
            return Err(NodeError::Config(
                "zipd configuration options \"spawn\" or \"connect\" are expected".into(),
            ));
        }
        if self.transaction_concurrency == 0 {
            return Err(NodeError::Config(
                "transaction_concurrency must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn try_all_interval(&self) -> Duration {
        Duration::from_millis(self.try_all_interval_ms)
    }

    pub fn start_retry_interval(&self) -> Duration {
        Duration::from_millis(self.start_retry_interval_ms)
    }

    pub fn spawn_restart_time(&self) -> Duration {
        Duration::from_millis(self.spawn_restart_time_ms)
    }

    pub fn spawn_stop_time(&self) -> Duration {
        Duration::from_millis(self.spawn_stop_time_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn tip_update_interval(&self) -> Duration {
        Duration::from_millis(self.tip_update_interval_ms)
    }

    pub fn reindex_wait(&self) -> Duration {
        Duration::from_millis(self.reindex_wait_ms)
    }

    pub fn zmq_timing(&self) -> ZmqTiming {
        ZmqTiming {
            reconnect_delay: Duration::from_millis(self.zmq_reconnect_delay_ms),
            idle_reconnect: Duration::from_millis(self.zmq_idle_reconnect_ms),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            network: Network::default(),
            config_path: None,
            spawn: None,
            connect: Vec::new(),
            try_all_interval_ms: default_try_all_interval_ms(),
            start_retry_interval_ms: default_start_retry_interval_ms(),
            spawn_restart_time_ms: default_spawn_restart_time_ms(),
            spawn_stop_time_ms: default_spawn_stop_time_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            tip_update_interval_ms: default_tip_update_interval_ms(),
            reindex_wait_ms: default_reindex_wait_ms(),
            zmq_reconnect_delay_ms: default_zmq_reconnect_delay_ms(),
            zmq_idle_reconnect_ms: default_zmq_idle_reconnect_ms(),
            max_txids: default_max_txids(),
            max_transaction_history: default_max_transaction_history(),
            max_addresses_query: default_max_addresses_query(),
            transaction_concurrency: default_transaction_concurrency(),
            log_format: LogFormat::default(),
            log_level: default_log_level(),
            enable_websocket: false,
            websocket_port: default_websocket_port(),
        }
    }
}
