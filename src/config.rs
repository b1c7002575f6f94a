use serde::{Deserialize, Serialize};

// Default configuration values
const DEFAULT_RELAY_PORT: u16 = 12345;
const DEFAULT_MAX_CONNECTIONS: usize = 100;
const DEFAULT_PING_INTERVAL_SECONDS: u64 = 60;
const DEFAULT_BUS_CAPACITY: usize = 100;

/// Settings for a socket adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketConfig {
    /// Address of the WebSocket endpoint, e.g. `ws://localhost:12345/ws`
    pub url: String,
    /// Capacity of the broadcast stream carrying the adapter's envelopes
    #[serde(default = "default_bus_capacity")]
    pub capacity: usize,
}

impl SocketConfig {
    /// Create a configuration for the given endpoint with default settings
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            capacity: default_bus_capacity(),
        }
    }
}

/// Relay server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Port to bind the relay server to (0 picks an ephemeral port)
    #[serde(default = "default_relay_port")]
    pub port: u16,
    /// Maximum number of simultaneous client connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Ping interval in seconds
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: default_relay_port(),
            max_connections: default_max_connections(),
            ping_interval_secs: default_ping_interval(),
        }
    }
}

// Default functions
fn default_relay_port() -> u16 {
    std::env::var("SOCKBRIDGE_PORT")
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(DEFAULT_RELAY_PORT)
}

fn default_max_connections() -> usize {
    std::env::var("SOCKBRIDGE_MAX_CONNECTIONS")
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(DEFAULT_MAX_CONNECTIONS)
}

fn default_ping_interval() -> u64 {
    std::env::var("SOCKBRIDGE_PING_INTERVAL")
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(DEFAULT_PING_INTERVAL_SECONDS)
}

fn default_bus_capacity() -> usize {
    std::env::var("SOCKBRIDGE_BUS_CAPACITY")
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(DEFAULT_BUS_CAPACITY)
}
