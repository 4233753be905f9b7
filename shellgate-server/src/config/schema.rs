//! Configuration schema structs

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use shellgate_protocol::UNLIMITED;

use crate::registry::TransportSpec;

/// Transport name used by the TCP listener
pub const TCP_TRANSPORT: &str = "tcp";

/// Transport name used by the WebSocket endpoint
pub const WEBSOCKET_TRANSPORT: &str = "websocket";

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub tcp: TcpConfig,
    pub websocket: WebSocketConfig,
    pub observer: ObserverConfig,
    pub session: SessionConfig,
    pub events: EventsConfig,
    pub terminal: TerminalConfig,
}

impl AppConfig {
    /// Transport descriptors in registry order
    pub fn transport_specs(&self) -> Vec<TransportSpec> {
        vec![
            TransportSpec {
                name: TCP_TRANSPORT.to_string(),
                running: self.tcp.enabled,
                max_count: capacity(self.tcp.max_connections),
            },
            TransportSpec {
                name: WEBSOCKET_TRANSPORT.to_string(),
                running: self.websocket.enabled,
                max_count: capacity(self.websocket.max_connections),
            },
        ]
    }

    /// Idle timeout for a transport, if one is configured
    pub fn idle_timeout(&self, transport: &str) -> Option<Duration> {
        let secs = match transport {
            TCP_TRANSPORT => self.tcp.idle_timeout_secs,
            WEBSOCKET_TRANSPORT => self.websocket.idle_timeout_secs,
            _ => 0,
        };
        (secs > 0).then(|| Duration::from_secs(secs))
    }

    /// Whether the observer surface shares the WebSocket listener
    pub fn observer_shares_websocket(&self) -> bool {
        self.observer.enabled
            && self.websocket.enabled
            && self.observer.listen_addr == self.websocket.listen_addr
    }
}

/// Map a configured connection limit onto a registry capacity
fn capacity(max_connections: i64) -> i64 {
    if max_connections <= 0 {
        UNLIMITED
    } else {
        max_connections
    }
}

/// Raw TCP transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpConfig {
    pub enabled: bool,
    pub listen_addr: String,
    /// Maximum concurrent sessions; 0 or less means unlimited
    pub max_connections: i64,
    /// Close sessions with no input for this long; 0 disables
    pub idle_timeout_secs: u64,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: "127.0.0.1:7681".into(),
            max_connections: 0,
            idle_timeout_secs: 0,
        }
    }
}

/// WebSocket transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSocketConfig {
    pub enabled: bool,
    pub listen_addr: String,
    /// Endpoint path for terminal connections
    pub path: String,
    /// Maximum concurrent sessions; 0 or less means unlimited
    pub max_connections: i64,
    /// Close sessions with no input for this long; 0 disables
    pub idle_timeout_secs: u64,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: "127.0.0.1:8080".into(),
            path: "/terminal".into(),
            max_connections: 0,
            idle_timeout_secs: 0,
        }
    }
}

/// Snapshot/stream HTTP surface for observers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObserverConfig {
    pub enabled: bool,
    pub listen_addr: String,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: "127.0.0.1:8080".into(),
        }
    }
}

/// Command spawned for each session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Program to run; defaults to `$SHELL` or `/bin/sh`
    pub command: Option<String>,
    pub args: Vec<String>,
    pub cwd: Option<String>,
    pub env: HashMap<String, String>,
    /// TERM used when the client does not report one
    pub default_term: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            cwd: None,
            env: HashMap::new(),
            default_term: "xterm-256color".into(),
        }
    }
}

/// Session event log settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Maximum retained events; oldest are dropped first
    pub max_log: usize,
    /// Per-subscriber buffer before the oldest undelivered events are dropped
    pub subscriber_buffer: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            max_log: 100,
            subscriber_buffer: 64,
        }
    }
}

/// Terminal bridge settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    /// Resize requests within this window collapse to the latest; 0 disables
    pub resize_coalesce_ms: u64,
    /// Output chunks buffered between the session and the connection
    pub output_buffer: usize,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            resize_coalesce_ms: 50,
            output_buffer: 256,
        }
    }
}

impl TerminalConfig {
    pub fn resize_coalesce(&self) -> Duration {
        Duration::from_millis(self.resize_coalesce_ms)
    }
}
