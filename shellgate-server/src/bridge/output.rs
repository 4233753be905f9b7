//! Session output forwarding
//!
//! Moves output chunks from the Command Session to the connection, in
//! production order, until the session ends, the connection goes away, or
//! the bridge cancels it.

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use shellgate_protocol::SessionId;

/// Why a forwarder stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardEnd {
    /// The session's output closed (command exited)
    SessionEnded,
    /// The connection side stopped accepting output
    ChannelClosed,
    /// The bridge stopped it
    Cancelled,
    /// The task itself failed
    Failed(String),
}

/// Handle to a running forwarder task
#[derive(Debug)]
pub struct OutputForwarder {
    cancel_token: CancellationToken,
    join_handle: JoinHandle<ForwardEnd>,
}

impl OutputForwarder {
    /// Spawn a forwarder; must be called from within a Tokio runtime
    pub fn spawn(
        session_id: SessionId,
        output: mpsc::Receiver<Bytes>,
        sink: mpsc::Sender<Bytes>,
    ) -> Self {
        let cancel_token = CancellationToken::new();
        let join_handle = tokio::spawn(forward(session_id, output, sink, cancel_token.clone()));
        Self {
            cancel_token,
            join_handle,
        }
    }

    /// Stop forwarding without waiting
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Wait for the task to end
    ///
    /// Must not be awaited again after it has returned.
    pub async fn finished(&mut self) -> ForwardEnd {
        match (&mut self.join_handle).await {
            Ok(end) => end,
            Err(e) => {
                warn!(error = %e, "Output forwarder task failed");
                ForwardEnd::Failed(e.to_string())
            }
        }
    }
}

impl Drop for OutputForwarder {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

async fn forward(
    session_id: SessionId,
    mut output: mpsc::Receiver<Bytes>,
    sink: mpsc::Sender<Bytes>,
    cancel_token: CancellationToken,
) -> ForwardEnd {
    debug!(session_id = %session_id, "Output forwarder started");

    let end = loop {
        tokio::select! {
            biased;

            _ = cancel_token.cancelled() => break ForwardEnd::Cancelled,

            chunk = output.recv() => {
                let Some(chunk) = chunk else {
                    break ForwardEnd::SessionEnded;
                };
                trace!(session_id = %session_id, bytes = chunk.len(), "Forwarding output");

                // Sending may wait on a slow connection; keep honoring cancel
                tokio::select! {
                    biased;
                    _ = cancel_token.cancelled() => break ForwardEnd::Cancelled,
                    sent = sink.send(chunk) => {
                        if sent.is_err() {
                            break ForwardEnd::ChannelClosed;
                        }
                    }
                }
            }
        }
    };

    debug!(session_id = %session_id, end = ?end, "Output forwarder exiting");
    end
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_forwards_in_order_until_session_ends() {
        let (session_tx, session_rx) = mpsc::channel(8);
        let (sink_tx, mut sink_rx) = mpsc::channel(8);
        let mut forwarder = OutputForwarder::spawn(Uuid::new_v4(), session_rx, sink_tx);

        for chunk in ["one", "two", "three"] {
            session_tx.send(Bytes::from(chunk)).await.unwrap();
        }
        drop(session_tx);

        assert_eq!(forwarder.finished().await, ForwardEnd::SessionEnded);
        let mut got = Vec::new();
        while let Some(chunk) = sink_rx.recv().await {
            got.push(chunk);
        }
        assert_eq!(got, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn test_cancel_stops_forwarding() {
        let (_session_tx, session_rx) = mpsc::channel::<Bytes>(8);
        let (sink_tx, _sink_rx) = mpsc::channel(8);
        let mut forwarder = OutputForwarder::spawn(Uuid::new_v4(), session_rx, sink_tx);

        forwarder.cancel();
        assert_eq!(forwarder.finished().await, ForwardEnd::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_while_sink_full() {
        let (session_tx, session_rx) = mpsc::channel(8);
        let (sink_tx, _sink_rx) = mpsc::channel(1);
        let mut forwarder = OutputForwarder::spawn(Uuid::new_v4(), session_rx, sink_tx);

        session_tx.send(Bytes::from("fills")).await.unwrap();
        session_tx.send(Bytes::from("blocks")).await.unwrap();
        tokio::task::yield_now().await;

        forwarder.cancel();
        assert_eq!(forwarder.finished().await, ForwardEnd::Cancelled);
    }

    #[tokio::test]
    async fn test_closed_sink_ends_forwarder() {
        let (session_tx, session_rx) = mpsc::channel(8);
        let (sink_tx, sink_rx) = mpsc::channel(8);
        let mut forwarder = OutputForwarder::spawn(Uuid::new_v4(), session_rx, sink_tx);

        drop(sink_rx);
        session_tx.send(Bytes::from("lost")).await.unwrap();
        assert_eq!(forwarder.finished().await, ForwardEnd::ChannelClosed);
    }
}
