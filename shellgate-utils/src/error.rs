//! Error types for shellgate
//!
//! Provides a unified error type used across all shellgate crates.

use std::path::PathBuf;

/// Main error type for shellgate operations
#[derive(Debug, thiserror::Error)]
pub enum ShellgateError {
    // === IO Errors ===

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    // === Connection Errors ===

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    // === Protocol Errors ===

    #[error("Protocol error: {0}")]
    Protocol(String),

    // === Admission Errors ===

    #[error("Capacity exceeded on transport '{transport}' (max {max})")]
    CapacityExceeded { transport: String, max: i64 },

    #[error("Unknown transport: {0}")]
    UnknownTransport(String),

    #[error("Transport '{0}' is not running")]
    TransportStopped(String),

    // === Configuration Errors ===

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration at {path}: {message}")]
    ConfigInvalid { path: PathBuf, message: String },

    // === Session Errors ===

    #[error("PTY error: {0}")]
    Pty(String),

    #[error("Failed to spawn process: {0}")]
    ProcessSpawn(String),

    #[error("Cleanup failed: {0}")]
    ResourceCleanup(String),

    // === Internal Errors ===

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ShellgateError {
    /// Create a connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a PTY error
    pub fn pty(msg: impl Into<String>) -> Self {
        Self::Pty(msg.into())
    }

    /// Create a cleanup error
    pub fn cleanup(msg: impl Into<String>) -> Self {
        Self::ResourceCleanup(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this error ends a connection as an ordinary disconnect
    /// rather than a rejection
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::ConnectionClosed | Self::Io(_)
        )
    }
}

/// Result type alias using ShellgateError
pub type Result<T> = std::result::Result<T, ShellgateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_capacity() {
        let err = ShellgateError::CapacityExceeded {
            transport: "websocket".into(),
            max: 5,
        };
        assert_eq!(
            err.to_string(),
            "Capacity exceeded on transport 'websocket' (max 5)"
        );
    }

    #[test]
    fn test_error_display_protocol() {
        let err = ShellgateError::protocol("unknown action");
        assert_eq!(err.to_string(), "Protocol error: unknown action");
    }

    #[test]
    fn test_error_display_file_read() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = ShellgateError::FileRead {
            path: PathBuf::from("/etc/shellgate.toml"),
            source: io_err,
        };
        let msg = err.to_string();
        assert!(msg.contains("Failed to read file"));
        assert!(msg.contains("/etc/shellgate.toml"));
    }

    #[test]
    fn test_error_display_config_invalid() {
        let err = ShellgateError::ConfigInvalid {
            path: PathBuf::from("/home/user/.config/shellgate/config.toml"),
            message: "syntax error".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("config.toml"));
        assert!(msg.contains("syntax error"));
    }

    #[test]
    fn test_error_display_cleanup() {
        let err = ShellgateError::cleanup("kill failed");
        assert_eq!(err.to_string(), "Cleanup failed: kill failed");
    }

    #[test]
    fn test_disconnect_classification() {
        assert!(ShellgateError::ConnectionClosed.is_disconnect());
        assert!(ShellgateError::connection("reset").is_disconnect());
        assert!(!ShellgateError::protocol("bad").is_disconnect());
        assert!(!ShellgateError::CapacityExceeded {
            transport: "tcp".into(),
            max: 1
        }
        .is_disconnect());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        let err: ShellgateError = io_err.into();
        assert!(matches!(err, ShellgateError::Io(_)));
        assert!(err.is_disconnect());
    }
}
