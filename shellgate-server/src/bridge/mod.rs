//! Terminal Bridge
//!
//! One bridge per connection. It turns a stream of raw control frames into a
//! terminal session: the `init` handshake admits the connection on its
//! transport and spawns a Command Session, `read` relays input, `resize`
//! renegotiates geometry, and session output is forwarded back verbatim.
//!
//! Frames are handled strictly one at a time. Teardown is idempotent: the
//! Command Session is stopped, the registry slot released and exactly one
//! `closed` event recorded, however many times or ways it is triggered.

mod error;
mod output;
mod resize;
mod state;

#[cfg(test)]
pub(crate) mod mock;

pub use error::BridgeError;
pub use output::{ForwardEnd, OutputForwarder};
pub use resize::ResizeScheduler;
pub use state::{BridgeState, Session};

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use shellgate_protocol::{
    decode, ControlMessage, Geometry, InitRequest, ProtocolError, SessionEventType,
};
use shellgate_utils::ShellgateError;

use crate::command::{CommandSession, CommandSessionFactory, SessionSpec};
use crate::services::SessionServices;

/// Per-transport bridge settings
#[derive(Debug, Clone, Default)]
pub struct BridgeOptions {
    /// Resize coalescing window; zero applies every resize immediately
    pub resize_coalesce: Duration,
    /// Tear down an active session after this long without a control message
    pub idle_timeout: Option<Duration>,
}

/// Remote disconnect trigger for a bridge running in [`TerminalBridge::run`]
#[derive(Debug, Clone)]
pub struct BridgeHandle {
    cancel: CancellationToken,
}

impl BridgeHandle {
    /// Request teardown; the bridge closes on its next turn
    pub fn disconnect(&self) {
        self.cancel.cancel();
    }

    pub fn is_disconnected(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// What woke the bridge's run loop
enum Wake {
    Cancelled,
    Frame(Option<Result<String, BridgeError>>),
    Resize(Geometry),
    OutputEnded(ForwardEnd),
    Idle,
}

/// Per-connection terminal protocol state machine
pub struct TerminalBridge {
    transport: String,
    services: SessionServices,
    factory: Arc<dyn CommandSessionFactory>,
    options: BridgeOptions,
    /// Where session output goes (the connection's writer)
    sink: mpsc::Sender<Bytes>,
    state: BridgeState,
    session: Option<Session>,
    command: Option<Box<dyn CommandSession>>,
    forwarder: Option<OutputForwarder>,
    resize: ResizeScheduler,
    last_activity: Instant,
    cancel: CancellationToken,
}

impl TerminalBridge {
    pub fn new(
        transport: impl Into<String>,
        services: SessionServices,
        factory: Arc<dyn CommandSessionFactory>,
        options: BridgeOptions,
        sink: mpsc::Sender<Bytes>,
    ) -> Self {
        let resize = ResizeScheduler::new(options.resize_coalesce);
        Self {
            transport: transport.into(),
            services,
            factory,
            options,
            sink,
            state: BridgeState::AwaitingInit,
            session: None,
            command: None,
            forwarder: None,
            resize,
            last_activity: Instant::now(),
            cancel: CancellationToken::new(),
        }
    }

    /// Tie this bridge to a parent token, e.g. server shutdown
    pub fn with_shutdown(mut self, shutdown: &CancellationToken) -> Self {
        self.cancel = shutdown.child_token();
        self
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn transport(&self) -> &str {
        &self.transport
    }

    pub fn handle(&self) -> BridgeHandle {
        BridgeHandle {
            cancel: self.cancel.clone(),
        }
    }

    /// Handle one raw control frame from the client
    ///
    /// Any error returned here has already moved the bridge to `Closed`.
    pub fn handle_frame(&mut self, raw: &str) -> Result<(), BridgeError> {
        let decoded = decode(raw);

        match self.state {
            BridgeState::AwaitingInit => match decoded {
                Ok(ControlMessage::Init(init)) => self.open(init),
                Ok(other) => {
                    let err = ProtocolError::UnexpectedMessage {
                        action: other.action(),
                        state: self.state.to_string(),
                    };
                    warn!(transport = %self.transport, error = %err, "Protocol violation before init");
                    self.state = BridgeState::Closed;
                    Err(err.into())
                }
                Err(err) => {
                    warn!(transport = %self.transport, error = %err, "Undecodable handshake");
                    self.state = BridgeState::Closed;
                    Err(err.into())
                }
            },
            BridgeState::Active => {
                self.last_activity = Instant::now();
                match decoded {
                    Ok(ControlMessage::Read { data }) => self.relay_input(data.as_bytes()),
                    Ok(ControlMessage::Resize(geometry)) => {
                        if self.resize.is_immediate() {
                            self.apply_resize(geometry);
                        } else {
                            self.resize.schedule(geometry);
                        }
                        Ok(())
                    }
                    Ok(ControlMessage::Init(_)) => {
                        let err = ProtocolError::UnexpectedMessage {
                            action: "init",
                            state: self.state.to_string(),
                        };
                        self.fail(err.into())
                    }
                    Err(err) => self.fail(err.into()),
                }
            }
            BridgeState::Closing | BridgeState::Closed => {
                Err(BridgeError::connection("bridge is closed"))
            }
        }
    }

    fn open(&mut self, init: InitRequest) -> Result<(), BridgeError> {
        let session_id = match self.services.registry.admit(&self.transport) {
            Ok(id) => id,
            Err(e) => {
                self.state = BridgeState::Closed;
                return Err(match e {
                    ShellgateError::CapacityExceeded { transport, max } => {
                        BridgeError::CapacityExceeded { transport, max }
                    }
                    e => BridgeError::Admission(e),
                });
            }
        };

        let spec = SessionSpec::from_init(session_id, &init);

        let mut command = match self.factory.create(&spec) {
            Ok(command) => command,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Failed to create command session");
                self.services.registry.release(&self.transport, session_id);
                self.state = BridgeState::Closed;
                return Err(BridgeError::Session(e));
            }
        };
        let output = command.take_output();

        if let Err(e) = self
            .services
            .events
            .append(session_id, &self.transport, SessionEventType::Opened)
        {
            warn!(session_id = %session_id, error = %e, "Failed to record opened event");
        }

        self.session = Some(Session::from_init(session_id, &self.transport, &init));
        self.command = Some(command);
        self.state = BridgeState::Active;
        self.last_activity = Instant::now();

        if let Some(output) = output {
            self.forwarder = Some(OutputForwarder::spawn(session_id, output, self.sink.clone()));
        }

        info!(
            session_id = %session_id,
            transport = %self.transport,
            geometry = %init.geometry,
            term = %init.term_type,
            user_agent = %init.user_agent,
            "Session opened"
        );
        Ok(())
    }

    fn relay_input(&mut self, data: &[u8]) -> Result<(), BridgeError> {
        let Some(command) = self.command.as_mut() else {
            return Ok(());
        };
        match command.write_input(data) {
            Ok(()) => Ok(()),
            Err(e) => self.fail(BridgeError::Session(e)),
        }
    }

    /// Push `geometry` to the Command Session and record it on success
    fn apply_resize(&mut self, geometry: Geometry) {
        let (Some(command), Some(session)) = (self.command.as_mut(), self.session.as_mut()) else {
            return;
        };
        match command.resize(geometry) {
            Ok(()) => {
                debug!(session_id = %session.session_id, from = %session.geometry, to = %geometry, "Session resized");
                session.geometry = geometry;
            }
            Err(e) => {
                warn!(session_id = %session.session_id, geometry = %geometry, error = %e, "Resize failed");
            }
        }
    }

    /// Tear down and report `err`, unless teardown itself failed worse
    fn fail(&mut self, err: BridgeError) -> Result<(), BridgeError> {
        warn!(transport = %self.transport, state = %self.state, error = %err, "Closing bridge");
        if let Err(cleanup) = self.teardown() {
            debug!(error = %cleanup, "Cleanup error while failing bridge");
        }
        Err(err)
    }

    fn set_state(&mut self, state: BridgeState) {
        self.state = state;
        if let Some(session) = self.session.as_mut() {
            session.state = state;
        }
    }

    /// Release everything the bridge acquired and move to `Closed`
    ///
    /// A no-op once closed. Cleanup failures are reported but never stop
    /// the slot release, the `closed` event or the state change.
    fn teardown(&mut self) -> Result<(), BridgeError> {
        match self.state {
            BridgeState::Closed => return Ok(()),
            BridgeState::AwaitingInit => {
                self.set_state(BridgeState::Closed);
                return Ok(());
            }
            BridgeState::Active | BridgeState::Closing => {}
        }

        self.set_state(BridgeState::Closing);
        self.resize.cancel();
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.cancel();
        }

        let mut failures = Vec::new();
        if let Some(mut command) = self.command.take() {
            if let Err(e) = command.terminate() {
                warn!(transport = %self.transport, error = %e, "Failed to terminate command session");
                failures.push(e.to_string());
            }
        }

        if let Some(session_id) = self.session.as_ref().map(|s| s.session_id) {
            self.services.registry.release(&self.transport, session_id);
            if let Err(e) = self
                .services
                .events
                .append(session_id, &self.transport, SessionEventType::Closed)
            {
                warn!(session_id = %session_id, error = %e, "Failed to record closed event");
            }
            info!(session_id = %session_id, transport = %self.transport, "Session closed");
        }

        self.set_state(BridgeState::Closed);

        if failures.is_empty() {
            Ok(())
        } else {
            Err(BridgeError::ResourceCleanup(failures.join("; ")))
        }
    }

    /// Caller-initiated disconnect; idempotent
    ///
    /// The bridge is `Closed` afterwards even if cleanup reported an error.
    pub fn disconnect(&mut self) -> Result<(), BridgeError> {
        self.teardown()
    }

    fn idle_deadline(&self) -> Option<Instant> {
        match (self.state, self.options.idle_timeout) {
            (BridgeState::Active, Some(timeout)) => Some(self.last_activity + timeout),
            _ => None,
        }
    }

    /// Drive the bridge from a stream of raw frames until it closes
    ///
    /// Returns `Ok` on a clean end (client closed, session exited, remote
    /// disconnect) and the error that closed the bridge otherwise.
    pub async fn run<S>(mut self, mut incoming: S) -> Result<(), BridgeError>
    where
        S: Stream<Item = Result<String, BridgeError>> + Unpin,
    {
        loop {
            if self.state.is_closed() {
                return Ok(());
            }

            let idle = self.idle_deadline();
            let resize_due = self.state == BridgeState::Active && self.resize.is_pending();
            let forwarding = self.forwarder.is_some();

            let wake = tokio::select! {
                biased;

                _ = self.cancel.cancelled() => Wake::Cancelled,

                end = forwarder_finished(&mut self.forwarder), if forwarding => Wake::OutputEnded(end),

                geometry = self.resize.due(), if resize_due => Wake::Resize(geometry),

                frame = incoming.next() => Wake::Frame(frame),

                _ = sleep_until_deadline(idle), if idle.is_some() => Wake::Idle,
            };

            match wake {
                Wake::Cancelled => {
                    debug!(transport = %self.transport, "Bridge disconnect requested");
                    return self.teardown();
                }
                Wake::Frame(None) => {
                    debug!(transport = %self.transport, "Client channel closed");
                    return self.teardown();
                }
                Wake::Frame(Some(Err(err))) => {
                    if let Err(cleanup) = self.teardown() {
                        debug!(error = %cleanup, "Cleanup error after channel failure");
                    }
                    return Err(err);
                }
                Wake::Frame(Some(Ok(raw))) => self.handle_frame(&raw)?,
                Wake::Resize(geometry) => self.apply_resize(geometry),
                Wake::OutputEnded(end) => {
                    // The task has completed; it must not be polled again
                    self.forwarder = None;
                    match end {
                        ForwardEnd::SessionEnded | ForwardEnd::Cancelled => {
                            info!(transport = %self.transport, "Command session ended");
                            return self.teardown();
                        }
                        ForwardEnd::ChannelClosed => {
                            if let Err(cleanup) = self.teardown() {
                                debug!(error = %cleanup, "Cleanup error after output channel closed");
                            }
                            return Err(BridgeError::connection("output channel closed"));
                        }
                        ForwardEnd::Failed(reason) => {
                            if let Err(cleanup) = self.teardown() {
                                debug!(error = %cleanup, "Cleanup error after forwarder failure");
                            }
                            return Err(BridgeError::Session(ShellgateError::internal(reason)));
                        }
                    }
                }
                Wake::Idle => {
                    info!(transport = %self.transport, "Session idle timeout");
                    if let Err(cleanup) = self.teardown() {
                        debug!(error = %cleanup, "Cleanup error after idle timeout");
                    }
                    return Err(BridgeError::connection("idle timeout"));
                }
            }
        }
    }
}

async fn forwarder_finished(forwarder: &mut Option<OutputForwarder>) -> ForwardEnd {
    match forwarder {
        Some(forwarder) => forwarder.finished().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl Drop for TerminalBridge {
    fn drop(&mut self) {
        if !self.state.is_closed() {
            if let Err(e) = self.teardown() {
                warn!(transport = %self.transport, error = %e, "Cleanup failed while dropping bridge");
            }
        }
    }
}

impl std::fmt::Debug for TerminalBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalBridge")
            .field("transport", &self.transport)
            .field("state", &self.state)
            .field("session", &self.session.as_ref().map(|s| s.session_id))
            .finish_non_exhaustive()
    }
}
