//! Scripted in-memory Command Sessions for bridge tests

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use shellgate_protocol::Geometry;
use shellgate_utils::{Result, ShellgateError};

use crate::command::{CommandSession, CommandSessionFactory, SessionSpec};

#[derive(Debug, Default)]
struct MockState {
    geometries: Vec<Geometry>,
    input: Vec<u8>,
    terminated: bool,
    output_tx: Option<mpsc::Sender<Bytes>>,
}

/// Test-side view of one mock session
#[derive(Debug, Clone)]
pub struct MockSession {
    pub spec: SessionSpec,
    state: Arc<Mutex<MockState>>,
}

impl MockSession {
    /// Produce output as if the command printed it
    pub async fn emit(&self, text: &str) {
        let tx = self.state.lock().output_tx.clone();
        if let Some(tx) = tx {
            let _ = tx.send(Bytes::copy_from_slice(text.as_bytes())).await;
        }
    }

    /// Simulate the command exiting
    pub fn exit(&self) {
        self.state.lock().output_tx = None;
    }

    pub fn geometry(&self) -> Geometry {
        let state = self.state.lock();
        state.geometries.last().copied().unwrap_or(self.spec.geometry)
    }

    /// Every geometry applied, starting with the creation size
    pub fn geometry_history(&self) -> Vec<Geometry> {
        self.state.lock().geometries.clone()
    }

    pub fn input(&self) -> String {
        String::from_utf8_lossy(&self.state.lock().input).into_owned()
    }

    pub fn is_terminated(&self) -> bool {
        self.state.lock().terminated
    }
}

struct MockCommandSession {
    state: Arc<Mutex<MockState>>,
    output: Option<mpsc::Receiver<Bytes>>,
    fail_terminate: bool,
    fail_resize: bool,
}

impl CommandSession for MockCommandSession {
    fn write_input(&mut self, data: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        if state.terminated {
            return Err(ShellgateError::pty("terminated"));
        }
        state.input.extend_from_slice(data);
        Ok(())
    }

    fn resize(&mut self, geometry: Geometry) -> Result<()> {
        if self.fail_resize {
            return Err(ShellgateError::pty("resize refused"));
        }
        self.state.lock().geometries.push(geometry);
        Ok(())
    }

    fn take_output(&mut self) -> Option<mpsc::Receiver<Bytes>> {
        self.output.take()
    }

    fn terminate(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        state.terminated = true;
        state.output_tx = None;
        if self.fail_terminate {
            return Err(ShellgateError::pty("kill failed"));
        }
        Ok(())
    }
}

/// Factory recording every session it creates
#[derive(Debug, Default)]
pub struct MockSessionFactory {
    pub(super) sessions: Mutex<Vec<MockSession>>,
    pub fail_create: bool,
    pub fail_terminate: bool,
    pub fail_resize: bool,
}

impl MockSessionFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The most recently created session
    pub fn last(&self) -> MockSession {
        self.sessions
            .lock()
            .last()
            .cloned()
            .expect("no session created")
    }

    pub fn created(&self) -> usize {
        self.sessions.lock().len()
    }
}

impl CommandSessionFactory for MockSessionFactory {
    fn create(&self, spec: &SessionSpec) -> Result<Box<dyn CommandSession>> {
        if self.fail_create {
            return Err(ShellgateError::ProcessSpawn("mock spawn failure".into()));
        }

        let (tx, rx) = mpsc::channel(64);
        let state = Arc::new(Mutex::new(MockState {
            geometries: vec![spec.geometry],
            output_tx: Some(tx),
            ..Default::default()
        }));
        self.sessions.lock().push(MockSession {
            spec: spec.clone(),
            state: Arc::clone(&state),
        });

        Ok(Box::new(MockCommandSession {
            state,
            output: Some(rx),
            fail_terminate: self.fail_terminate,
            fail_resize: self.fail_resize,
        }))
    }
}
