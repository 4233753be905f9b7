//! shellgate-utils: Common utilities shared across shellgate crates
//!
//! This crate provides:
//! - Unified error types ([`ShellgateError`], [`Result`])
//! - Logging infrastructure ([`init_logging_with_config`], [`LogConfig`])
//! - XDG-compliant path utilities ([`paths`] module)

pub mod error;
pub mod logging;
pub mod paths;

pub use error::{Result, ShellgateError};
pub use logging::{init_logging_with_config, LogConfig, LogOutput};
pub use paths::{config_dir, config_file, ensure_all_dirs, log_dir, state_dir};
