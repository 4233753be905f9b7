//! Command Session abstraction
//!
//! A Command Session is the server-side execution context a bridge drives:
//! sized to a geometry, fed input bytes, producing output bytes, resizable
//! and terminable. The PTY-backed implementation lives in [`crate::pty`].

use bytes::Bytes;
use tokio::sync::mpsc;

use shellgate_protocol::{Geometry, InitRequest, SessionId};
use shellgate_utils::Result;

/// Parameters for creating one Command Session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSpec {
    pub session_id: SessionId,
    pub geometry: Geometry,
    /// Terminal type reported by the client, if any
    pub term: Option<String>,
    /// Whether the client reported 24-bit color
    pub truecolor: bool,
}

impl SessionSpec {
    /// Spec for the session an `init` handshake asks for
    pub fn from_init(session_id: SessionId, init: &InitRequest) -> Self {
        Self {
            session_id,
            geometry: init.geometry,
            term: Some(init.term_type.clone()).filter(|t| !t.is_empty()),
            truecolor: init.is_truecolor(),
        }
    }
}

/// A running interactive command
pub trait CommandSession: Send {
    /// Deliver input bytes to the command
    fn write_input(&mut self, data: &[u8]) -> Result<()>;

    /// Change the terminal geometry
    ///
    /// Output already produced but not yet taken from the output channel
    /// must survive a resize.
    fn resize(&mut self, geometry: Geometry) -> Result<()>;

    /// Take the output channel; yields `None` after the first call
    ///
    /// The channel closes once the command has exited and all of its
    /// output has been delivered.
    fn take_output(&mut self) -> Option<mpsc::Receiver<Bytes>>;

    /// Stop the command and release its resources
    fn terminate(&mut self) -> Result<()>;
}

/// Creates Command Sessions for bridges
pub trait CommandSessionFactory: Send + Sync {
    fn create(&self, spec: &SessionSpec) -> Result<Box<dyn CommandSession>>;
}
