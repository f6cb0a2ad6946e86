//! Server configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Default capacity of the live event channel.
pub const DEFAULT_EVENT_BUFFER: usize = 1024;

/// Configuration for the AgriRent HTTP server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the HTTP server to.
    pub bind_addr: SocketAddr,
    /// CORS allowed origins (empty means all).
    pub cors_origins: Vec<String>,
    /// Directory holding the marketplace snapshot; in-memory only when unset.
    pub state_dir: Option<PathBuf>,
    /// Capacity of the live event channel.
    pub event_buffer: usize,
    /// Maximum WebSocket connections allowed.
    pub max_ws_connections: usize,
    /// WebSocket ping interval for keepalive.
    pub ws_ping_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            cors_origins: Vec::new(),
            state_dir: None,
            event_buffer: DEFAULT_EVENT_BUFFER,
            max_ws_connections: 1000,
            ws_ping_interval: Duration::from_secs(30),
        }
    }
}

impl ServerConfig {
    /// Create a configuration with the specified bind address.
    #[must_use]
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Self::default()
        }
    }

    /// Add a CORS allowed origin.
    #[must_use]
    pub fn with_cors_origin(mut self, origin: impl Into<String>) -> Self {
        self.cors_origins.push(origin.into());
        self
    }

    /// Persist state under `dir`.
    #[must_use]
    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = Some(dir.into());
        self
    }

    /// Set the live event channel capacity. Zero is raised to one.
    #[must_use]
    pub const fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = if capacity == 0 { 1 } else { capacity };
        self
    }

    /// Set the maximum WebSocket connections.
    #[must_use]
    pub const fn with_max_ws_connections(mut self, max: usize) -> Self {
        self.max_ws_connections = max;
        self
    }

    /// Set the WebSocket ping interval.
    #[must_use]
    pub const fn with_ws_ping_interval(mut self, interval: Duration) -> Self {
        self.ws_ping_interval = interval;
        self
    }
}
