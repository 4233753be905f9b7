//! Configuration management for shellgate server
//!
//! Configuration is read once at startup from TOML; transports, session
//! spawning and the event bus are sized from it.

mod defaults;
mod loader;
mod schema;

pub use defaults::DEFAULT_CONFIG_TOML;
pub use loader::ConfigLoader;
pub use schema::*;
