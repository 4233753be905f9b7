//! shellgate server - terminal session daemon
//!
//! Exposes interactive shell sessions over TCP and WebSocket, with an HTTP
//! surface for observing transport capacity and session lifecycle events.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use shellgate_utils::{LogConfig, Result};

mod bridge;
mod command;
mod config;
mod events;
mod http;
mod pty;
mod registry;
mod services;
mod tcp;

use bridge::{BridgeOptions, TerminalBridge};
use command::CommandSessionFactory;
use config::{AppConfig, ConfigLoader, TCP_TRANSPORT, WEBSOCKET_TRANSPORT};
use pty::PtySessionFactory;
use services::SessionServices;

/// Terminal session daemon
#[derive(Debug, Parser)]
#[command(name = "shellgate-server", version, about)]
struct Cli {
    /// Configuration file (defaults to the XDG config location)
    #[arg(short, long, env = "SHELLGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Log verbosely to stderr instead of the log file
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the default configuration and exit
    PrintConfig,
}

/// State shared by every listener and connection
#[derive(Clone)]
pub struct SharedState {
    pub services: SessionServices,
    pub factory: Arc<dyn CommandSessionFactory>,
    pub config: Arc<AppConfig>,
    /// Cancelled once on shutdown; every bridge holds a child token
    pub shutdown: CancellationToken,
}

impl SharedState {
    pub fn new(config: AppConfig, factory: Arc<dyn CommandSessionFactory>) -> Self {
        Self {
            services: SessionServices::from_config(&config),
            factory,
            config: Arc::new(config),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn bridge_options(&self, transport: &str) -> BridgeOptions {
        BridgeOptions {
            resize_coalesce: self.config.terminal.resize_coalesce(),
            idle_timeout: self.config.idle_timeout(transport),
        }
    }

    /// A fresh bridge for one connection on `transport`
    pub fn new_bridge(&self, transport: &str, sink: mpsc::Sender<Bytes>) -> TerminalBridge {
        TerminalBridge::new(
            transport,
            self.services.clone(),
            Arc::clone(&self.factory),
            self.bridge_options(transport),
            sink,
        )
        .with_shutdown(&self.shutdown)
    }

    /// Buffer size for a connection's outgoing channel
    pub fn output_buffer(&self) -> usize {
        self.config.terminal.output_buffer.max(1)
    }
}

/// Bind all enabled listeners and serve until shutdown
async fn run_daemon(config: AppConfig) -> Result<()> {
    info!("shellgate server starting");

    let factory = Arc::new(PtySessionFactory::from_config(&config));
    let state = SharedState::new(config, factory);
    let config = Arc::clone(&state.config);

    let mut tasks = Vec::new();

    if config.tcp.enabled {
        match tcp::bind(&config.tcp.listen_addr).await {
            Ok(listener) => {
                tasks.push(tokio::spawn(tcp::run_tcp_accept_loop(listener, state.clone())));
            }
            Err(e) => {
                error!("{}", e);
                mark_stopped(&state, TCP_TRANSPORT);
            }
        }
    }

    let shared_listener = config.observer_shares_websocket();

    if config.websocket.enabled {
        let mut router = http::terminal_router(state.clone());
        if shared_listener {
            router = router.merge(http::observer_router(state.clone()));
        }
        match http::bind(&config.websocket.listen_addr).await {
            Ok(listener) => {
                info!(path = %config.websocket.path, "WebSocket endpoint ready");
                tasks.push(tokio::spawn(http::serve(listener, router, state.shutdown.clone())));
            }
            Err(e) => {
                error!("{}", e);
                mark_stopped(&state, WEBSOCKET_TRANSPORT);
            }
        }
    }

    if config.observer.enabled && !shared_listener {
        match http::bind(&config.observer.listen_addr).await {
            Ok(listener) => {
                let router = http::observer_router(state.clone());
                tasks.push(tokio::spawn(http::serve(listener, router, state.shutdown.clone())));
            }
            Err(e) => error!("{}", e),
        }
    }

    if tasks.is_empty() {
        warn!("No listeners running; shutting down");
        return Ok(());
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }
    state.shutdown.cancel();

    for task in tasks {
        if let Err(e) = task.await {
            warn!("Listener task failed: {}", e);
        }
    }

    info!(
        active = state.services.registry.total_active(),
        "shellgate server stopped"
    );
    Ok(())
}

fn mark_stopped(state: &SharedState, transport: &str) {
    if let Err(e) = state.services.registry.set_running(transport, false) {
        warn!("Failed to mark {} stopped: {}", transport, e);
    }
}

/// Log file by default, verbose stderr with `--verbose`
fn log_config(verbose: bool) -> LogConfig {
    if verbose {
        LogConfig::development()
    } else {
        LogConfig::server()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Command::PrintConfig) = cli.command {
        print!("{}", config::DEFAULT_CONFIG_TOML);
        return Ok(());
    }

    shellgate_utils::ensure_all_dirs()?;
    shellgate_utils::init_logging_with_config(log_config(cli.verbose))?;

    let config = ConfigLoader::load_and_validate(cli.config.as_deref())?;

    run_daemon(config).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use shellgate_utils::LogOutput;

    #[test]
    fn test_cli_parses_config_flag() {
        let cli = Cli::try_parse_from(["shellgate-server", "--config", "/tmp/sg.toml", "-v"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/sg.toml")));
        assert!(cli.verbose);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_cli_print_config() {
        let cli = Cli::try_parse_from(["shellgate-server", "print-config"]).unwrap();
        assert!(matches!(cli.command, Some(Command::PrintConfig)));
    }

    #[test]
    fn test_verbose_switches_log_file_to_stderr() {
        assert_eq!(log_config(false).output, LogOutput::File);
        assert_eq!(log_config(true).output, LogOutput::Stderr);
    }

    #[test]
    fn test_bridge_options_from_config() {
        let mut config = AppConfig::default();
        config.websocket.idle_timeout_secs = 60;
        config.terminal.resize_coalesce_ms = 0;
        let state = SharedState::new(config, Arc::new(PtySessionFactory::from_config(&AppConfig::default())));

        let options = state.bridge_options(WEBSOCKET_TRANSPORT);
        assert_eq!(options.idle_timeout, Some(std::time::Duration::from_secs(60)));
        assert!(options.resize_coalesce.is_zero());
        assert_eq!(state.bridge_options(TCP_TRANSPORT).idle_timeout, None);
    }
}
