//! Configuration loader

use std::net::SocketAddr;
use std::path::Path;

use shellgate_utils::{config_file, Result, ShellgateError};

use super::AppConfig;

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from default location
    pub fn load() -> Result<AppConfig> {
        let path = config_file();
        if path.exists() {
            Self::load_from_path(&path)
        } else {
            Ok(AppConfig::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<AppConfig> {
        let content = std::fs::read_to_string(path).map_err(|e| ShellgateError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        Self::parse(&content, path)
    }

    /// Parse configuration from string
    pub fn parse(content: &str, path: &Path) -> Result<AppConfig> {
        toml::from_str(content).map_err(|e| ShellgateError::ConfigInvalid {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Validate configuration
    pub fn validate(config: &AppConfig) -> Result<()> {
        if config.events.max_log == 0 {
            return Err(ShellgateError::config("events.max_log must be at least 1"));
        }

        if config.events.subscriber_buffer == 0 {
            return Err(ShellgateError::config(
                "events.subscriber_buffer must be at least 1",
            ));
        }

        if config.terminal.output_buffer == 0 {
            return Err(ShellgateError::config(
                "terminal.output_buffer must be at least 1",
            ));
        }

        if !config.websocket.path.starts_with('/') {
            return Err(ShellgateError::config(format!(
                "websocket.path must start with '/', got '{}'",
                config.websocket.path
            )));
        }

        for (section, enabled, addr) in [
            ("tcp", config.tcp.enabled, &config.tcp.listen_addr),
            ("websocket", config.websocket.enabled, &config.websocket.listen_addr),
            ("observer", config.observer.enabled, &config.observer.listen_addr),
        ] {
            if enabled && addr.parse::<SocketAddr>().is_err() {
                return Err(ShellgateError::config(format!(
                    "{}.listen_addr is not a socket address: '{}'",
                    section, addr
                )));
            }
        }

        Ok(())
    }

    /// Load from an explicit path if given, otherwise the default location, then validate
    pub fn load_and_validate(path: Option<&Path>) -> Result<AppConfig> {
        let config = match path {
            Some(path) => Self::load_from_path(path)?,
            None => Self::load()?,
        };
        Self::validate(&config)?;
        Ok(config)
    }
}
