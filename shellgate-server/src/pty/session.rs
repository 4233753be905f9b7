//! PTY-backed Command Session
//!
//! Output is pumped by a blocking reader on tokio's blocking pool into a
//! bounded channel. A full channel blocks the reader, which in turn applies
//! backpressure to the child through the PTY.

use std::io::Read;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use shellgate_protocol::{Geometry, SessionId};
use shellgate_utils::{Result, ShellgateError};

use super::{PtyConfig, PtyHandle};
use crate::command::{CommandSession, CommandSessionFactory, SessionSpec};
use crate::config::AppConfig;

/// Read buffer size for PTY output
const READ_BUFFER_SIZE: usize = 4096;

/// Spawns one PTY per session from a configured template
#[derive(Debug, Clone)]
pub struct PtySessionFactory {
    template: PtyConfig,
    default_term: String,
    output_buffer: usize,
}

impl PtySessionFactory {
    pub fn new(template: PtyConfig, default_term: impl Into<String>, output_buffer: usize) -> Self {
        Self {
            template,
            default_term: default_term.into(),
            output_buffer: output_buffer.max(1),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            PtyConfig::from_session_config(&config.session),
            config.session.default_term.clone(),
            config.terminal.output_buffer,
        )
    }
}

impl CommandSessionFactory for PtySessionFactory {
    fn create(&self, spec: &SessionSpec) -> Result<Box<dyn CommandSession>> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ShellgateError::internal(format!("No runtime for PTY reader: {}", e)))?;

        let config = self.template.for_session(spec, &self.default_term);
        let handle = PtyHandle::spawn(&config)?;

        let (output_tx, output_rx) = mpsc::channel(self.output_buffer);
        let reader = handle.clone_reader();
        let session_id = spec.session_id;
        runtime.spawn_blocking(move || blocking_reader(reader, output_tx, session_id));

        info!(
            session_id = %session_id,
            command = %config.command,
            geometry = %spec.geometry,
            "PTY session spawned"
        );

        Ok(Box::new(PtyCommandSession {
            session_id,
            handle,
            output: Some(output_rx),
            runtime,
            terminated: false,
        }))
    }
}

/// Pump PTY output into `tx` until EOF, error, or the receiver is gone
fn blocking_reader(
    reader: Arc<Mutex<Box<dyn Read + Send>>>,
    tx: mpsc::Sender<Bytes>,
    session_id: SessionId,
) {
    let mut buf = [0u8; READ_BUFFER_SIZE];
    loop {
        let result = reader.lock().read(&mut buf);
        match result {
            Ok(0) => {
                debug!(session_id = %session_id, "PTY EOF");
                break;
            }
            Ok(n) => {
                trace!(session_id = %session_id, bytes = n, "PTY output");
                if tx.blocking_send(Bytes::copy_from_slice(&buf[..n])).is_err() {
                    trace!(session_id = %session_id, "Output channel closed, reader exiting");
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                // Linux reports EIO on the master once the child side is gone
                debug!(session_id = %session_id, error = %e, "PTY read ended");
                break;
            }
        }
    }
}

/// One PTY-backed interactive command
pub struct PtyCommandSession {
    session_id: SessionId,
    handle: PtyHandle,
    output: Option<mpsc::Receiver<Bytes>>,
    runtime: tokio::runtime::Handle,
    terminated: bool,
}

impl CommandSession for PtyCommandSession {
    fn write_input(&mut self, data: &[u8]) -> Result<()> {
        if self.terminated {
            return Err(ShellgateError::pty("Session already terminated"));
        }
        self.handle.write_all(data)
    }

    fn resize(&mut self, geometry: Geometry) -> Result<()> {
        if self.terminated {
            return Err(ShellgateError::pty("Session already terminated"));
        }
        self.handle.resize(geometry)
    }

    fn take_output(&mut self) -> Option<mpsc::Receiver<Bytes>> {
        self.output.take()
    }

    fn terminate(&mut self) -> Result<()> {
        if self.terminated {
            return Ok(());
        }
        self.terminated = true;

        if let Some(code) = self.handle.try_wait()? {
            debug!(session_id = %self.session_id, exit_code = code, "PTY child already exited");
            return Ok(());
        }

        self.handle.kill()?;

        // Reap off the async runtime so the child does not linger as a zombie
        let child = self.handle.clone_child();
        let session_id = self.session_id;
        self.runtime.spawn_blocking(move || match child.lock().wait() {
            Ok(status) => {
                debug!(session_id = %session_id, exit_code = status.exit_code(), "PTY child reaped")
            }
            Err(e) => warn!(session_id = %session_id, error = %e, "Failed to reap PTY child"),
        });

        info!(session_id = %self.session_id, "PTY session terminated");
        Ok(())
    }
}

impl Drop for PtyCommandSession {
    fn drop(&mut self) {
        if let Err(e) = self.terminate() {
            warn!(session_id = %self.session_id, error = %e, "PTY cleanup on drop failed");
        }
    }
}

impl std::fmt::Debug for PtyCommandSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyCommandSession")
            .field("session_id", &self.session_id)
            .field("terminated", &self.terminated)
            .finish_non_exhaustive()
    }
}
