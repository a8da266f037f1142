//! Hub and client configuration.
//!
//! Both configurations have sensible defaults and builder-style setters.
//! They can also be loaded from a JSON file. Durations are written in
//! milliseconds, and missing keys keep their default:
//!
//! ```json
//! {
//!   "server": { "port": 6000, "send_timeout_ms": 2000 },
//!   "client": { "connect_timeout_ms": 3000 }
//! }
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::error::AppResult;
use crate::handler::HandlerConfig;
use crate::types::{DEFAULT_PORT, LISTEN_BACKLOG, MAX_FRAME_SIZE};

/// Environment variable naming an optional JSON configuration file.
pub const CONFIG_ENV_VAR: &str = "LAN_CHAT_CONFIG";

fn millis<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_millis)
}

/// Hub (server) configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on.
    pub bind_address: IpAddr,

    /// TCP port to listen on.
    pub port: u16,

    /// Pending-connection queue length.
    pub backlog: u32,

    /// Largest accepted frame payload.
    pub max_frame_size: u32,

    /// Frames queued per peer before it is evicted as too slow.
    pub outbound_queue_capacity: usize,

    /// Upper bound on writing a single frame to a peer.
    #[serde(rename = "send_timeout_ms", deserialize_with = "millis")]
    pub send_timeout: Duration,

    /// Buffer between handlers and the room actor.
    pub event_channel_capacity: usize,

    /// Buffer between room handles and the room actor.
    pub command_channel_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            backlog: LISTEN_BACKLOG,
            max_frame_size: MAX_FRAME_SIZE,
            outbound_queue_capacity: 256,
            send_timeout: Duration::from_secs(5),
            event_channel_capacity: 256,
            command_channel_capacity: 256,
        }
    }
}

impl ServerConfig {
    /// Creates a configuration listening on `port` on all interfaces.
    pub fn new(port: u16) -> Self {
        Self {
            port,
            ..Default::default()
        }
    }

    /// Builder: set port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Builder: set bind address.
    pub fn with_bind_address(mut self, address: IpAddr) -> Self {
        self.bind_address = address;
        self
    }

    /// Builder: set listen backlog.
    pub fn with_backlog(mut self, backlog: u32) -> Self {
        self.backlog = backlog;
        self
    }

    /// Builder: set maximum frame size.
    pub fn with_max_frame_size(mut self, max: u32) -> Self {
        self.max_frame_size = max;
        self
    }

    /// Builder: set per-peer outbound queue capacity.
    pub fn with_outbound_queue_capacity(mut self, capacity: usize) -> Self {
        self.outbound_queue_capacity = capacity;
        self
    }

    /// Builder: set per-frame send timeout.
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Builder: set handler event channel capacity.
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }

    /// Builder: set room command channel capacity.
    pub fn with_command_channel_capacity(mut self, capacity: usize) -> Self {
        self.command_channel_capacity = capacity;
        self
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    pub fn handler_config(&self) -> HandlerConfig {
        HandlerConfig {
            outbound_queue_capacity: self.outbound_queue_capacity,
            send_timeout: self.send_timeout,
        }
    }
}

/// Participant (client) configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Hub port to connect to.
    pub port: u16,

    /// Upper bound on each connection attempt.
    #[serde(rename = "connect_timeout_ms", deserialize_with = "millis")]
    pub connect_timeout: Duration,

    /// Largest accepted frame payload.
    pub max_frame_size: u32,

    /// Frames queued before the hub is considered unresponsive.
    pub outbound_queue_capacity: usize,

    /// Upper bound on writing a single frame.
    #[serde(rename = "send_timeout_ms", deserialize_with = "millis")]
    pub send_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            connect_timeout: Duration::from_secs(10),
            max_frame_size: MAX_FRAME_SIZE,
            outbound_queue_capacity: 256,
            send_timeout: Duration::from_secs(5),
        }
    }
}

impl ClientConfig {
    /// Creates a configuration for a hub on `port`.
    pub fn new(port: u16) -> Self {
        Self {
            port,
            ..Default::default()
        }
    }

    /// Builder: set hub port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Builder: set connection timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Builder: set maximum frame size.
    pub fn with_max_frame_size(mut self, max: u32) -> Self {
        self.max_frame_size = max;
        self
    }

    /// Builder: set outbound queue capacity.
    pub fn with_outbound_queue_capacity(mut self, capacity: usize) -> Self {
        self.outbound_queue_capacity = capacity;
        self
    }

    /// Builder: set per-frame send timeout.
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn handler_config(&self) -> HandlerConfig {
        HandlerConfig {
            outbound_queue_capacity: self.outbound_queue_capacity,
            send_timeout: self.send_timeout,
        }
    }
}

/// Complete configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub server: ServerConfig,
    pub client: ClientConfig,
}

impl ChatConfig {
    /// Reads a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Loads the file named by `LAN_CHAT_CONFIG`, or the defaults if unset.
    pub fn load() -> AppResult<Self> {
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }
}
