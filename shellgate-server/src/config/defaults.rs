//! Default configuration values
//!
//! These are embedded in the binary and printed by `shellgate-server print-config`.

/// Default configuration as TOML (for reference/documentation)
pub const DEFAULT_CONFIG_TOML: &str = r##"
# shellgate configuration

[tcp]
enabled = true
listen_addr = "127.0.0.1:7681"
# 0 or less means unlimited
max_connections = 0
# 0 disables the idle timeout
idle_timeout_secs = 0

[websocket]
enabled = true
listen_addr = "127.0.0.1:8080"
path = "/terminal"
max_connections = 0
idle_timeout_secs = 0

[observer]
# Served on the websocket listener when the addresses match
enabled = true
listen_addr = "127.0.0.1:8080"

[session]
# command = "/bin/bash"
args = []
# cwd = "/home/user"
default_term = "xterm-256color"

[session.env]

[events]
max_log = 100
subscriber_buffer = 64

[terminal]
resize_coalesce_ms = 50
output_buffer = 256
"##;
