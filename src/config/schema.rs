use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    /// Health monitor settings shared by every node
    #[serde(default)]
    pub health: HealthConfig,
    /// Pool sizing shared by every node (per-node capacity may override)
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
}

// ============================================================================
// Server Configuration
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address of the metrics / status HTTP endpoint
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: String,
}

fn default_metrics_addr() -> String {
    "127.0.0.1:9090".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            metrics_addr: default_metrics_addr(),
        }
    }
}

// ============================================================================
// Health Monitor Configuration
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    /// Interval between liveness pings (milliseconds)
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
    /// Net votes needed before a node changes status
    #[serde(default = "default_flip_threshold")]
    pub flip_threshold: u32,
}

fn default_ping_interval_ms() -> u64 {
    5000
}

fn default_flip_threshold() -> u32 {
    3
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            ping_interval_ms: default_ping_interval_ms(),
            flip_threshold: default_flip_threshold(),
        }
    }
}

impl HealthConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    /// Threshold clamped to at least one
    pub fn flip_threshold(&self) -> u32 {
        self.flip_threshold.max(1)
    }
}

// ============================================================================
// Pool Configuration
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default = "default_max_capacity")]
    pub max_capacity: usize,
    /// Idle connections older than this are closed (0 disables)
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    /// Bound on TCP connect plus handshake for a new backend session
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_capacity() -> usize {
    10
}

fn default_max_capacity() -> usize {
    20
}

fn default_idle_timeout_ms() -> u64 {
    300_000
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            max_capacity: default_max_capacity(),
            idle_timeout_ms: default_idle_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl PoolConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

// ============================================================================
// Node Configuration
// ============================================================================

/// One backend database instance
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    /// Unique node name
    pub name: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub password: String,
    /// Default database
    #[serde(default)]
    pub database: Option<String>,
    /// Name of the master this node replicates; absent for masters
    #[serde(default)]
    pub master: Option<String>,
    #[serde(default)]
    pub read_weight: u32,
    #[serde(default)]
    pub write_weight: u32,
    /// Overrides `[pool] capacity` for this node
    #[serde(default)]
    pub capacity: Option<usize>,
}

fn default_port() -> u16 {
    3306
}

impl NodeConfig {
    pub fn is_master(&self) -> bool {
        self.master.is_none()
    }

    /// Convert to the connection settings used by the connector
    pub fn to_backend_config(&self) -> BackendConfig {
        BackendConfig {
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            password: self.password.clone(),
            database: self.database.clone(),
        }
    }
}

/// Connection settings for a single backend
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    #[serde(default)]
    pub database: Option<String>,
}

impl BackendConfig {
    /// Get the address string (host:port)
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3306,
            user: "root".to_string(),
            password: String::new(),
            database: None,
        }
    }
}
