//! PTY handle wrapper for portable-pty

use std::io::{Read, Write};
use std::sync::Arc;

use parking_lot::Mutex;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};

use shellgate_protocol::Geometry;
use shellgate_utils::{Result, ShellgateError};

use super::PtyConfig;

/// Handle to a running PTY
pub struct PtyHandle {
    /// The master side of the PTY
    master: Mutex<Box<dyn MasterPty + Send>>,
    /// The child process
    child: Arc<Mutex<Box<dyn Child + Send + Sync>>>,
    /// Reader for PTY output
    reader: Arc<Mutex<Box<dyn Read + Send>>>,
    /// Writer for PTY input
    writer: Mutex<Box<dyn Write + Send>>,
}

impl PtyHandle {
    /// Open a PTY and spawn the configured command on it
    pub fn spawn(config: &PtyConfig) -> Result<Self> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(pty_size(config.size))
            .map_err(|e| ShellgateError::pty(format!("Failed to open PTY: {}", e)))?;

        let mut cmd = CommandBuilder::new(&config.command);
        cmd.args(&config.args);

        if let Some(cwd) = &config.cwd {
            cmd.cwd(cwd);
        }

        for (key, value) in &config.env {
            cmd.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| ShellgateError::ProcessSpawn(format!("Failed to spawn: {}", e)))?;

        // The slave side belongs to the child now; keeping it open would
        // hold the PTY alive past the child's exit
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| ShellgateError::pty(format!("Failed to clone reader: {}", e)))?;

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| ShellgateError::pty(format!("Failed to get writer: {}", e)))?;

        Ok(Self {
            master: Mutex::new(pair.master),
            child: Arc::new(Mutex::new(child)),
            reader: Arc::new(Mutex::new(reader)),
            writer: Mutex::new(writer),
        })
    }

    /// Write all data to the PTY
    pub fn write_all(&self, data: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock();
        writer
            .write_all(data)
            .and_then(|_| writer.flush())
            .map_err(|e| ShellgateError::pty(format!("Write failed: {}", e)))
    }

    /// Resize the PTY
    pub fn resize(&self, size: Geometry) -> Result<()> {
        let master = self.master.lock();
        master
            .resize(pty_size(size))
            .map_err(|e| ShellgateError::pty(format!("Resize failed: {}", e)))
    }

    /// Check if the child process has exited
    pub fn try_wait(&self) -> Result<Option<u32>> {
        let mut child = self.child.lock();
        child
            .try_wait()
            .map(|status| status.map(|s| s.exit_code()))
            .map_err(|e| ShellgateError::pty(format!("Wait failed: {}", e)))
    }

    /// Kill the child process
    pub fn kill(&self) -> Result<()> {
        let mut child = self.child.lock();
        child
            .kill()
            .map_err(|e| ShellgateError::pty(format!("Kill failed: {}", e)))
    }

    /// Get a clone of the child (for reaping off the async runtime)
    pub fn clone_child(&self) -> Arc<Mutex<Box<dyn Child + Send + Sync>>> {
        self.child.clone()
    }

    /// Get a clone of the reader (for blocking reads off the async runtime)
    pub fn clone_reader(&self) -> Arc<Mutex<Box<dyn Read + Send>>> {
        self.reader.clone()
    }
}

fn pty_size(size: Geometry) -> PtySize {
    PtySize {
        rows: size.rows,
        cols: size.cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

impl std::fmt::Debug for PtyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyHandle").finish_non_exhaustive()
    }
}
