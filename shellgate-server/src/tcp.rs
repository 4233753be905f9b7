//! Raw TCP transport
//!
//! Clients send newline-delimited JSON control messages and receive raw
//! session output. A rejected connection gets one line of error text before
//! the socket closes.

use std::net::SocketAddr;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, info, warn};

use shellgate_protocol::{ControlLineCodec, ProtocolError};
use shellgate_utils::{Result, ShellgateError};

use crate::bridge::BridgeError;
use crate::config::TCP_TRANSPORT;
use crate::SharedState;

/// Bind the TCP listener
pub async fn bind(addr: &str) -> Result<TcpListener> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ShellgateError::Bind {
            addr: addr.to_string(),
            source: e,
        })?;
    info!("TCP listener bound to {}", addr);
    Ok(listener)
}

/// Run the TCP accept loop until shutdown
pub async fn run_tcp_accept_loop(listener: TcpListener, shared_state: SharedState) {
    let shutdown = shared_state.shutdown.clone();

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer_addr)) => {
                        debug!("New TCP connection from {}", peer_addr);
                        let state_clone = shared_state.clone();
                        tokio::spawn(async move {
                            handle_connection(stream, peer_addr, state_clone).await;
                        });
                    }
                    Err(e) => {
                        error!("TCP accept error: {}", e);
                    }
                }
            }
            _ = shutdown.cancelled() => {
                info!("Shutdown signal received, stopping TCP accept loop");
                break;
            }
        }
    }
}

/// Map a framing failure onto the bridge taxonomy
fn frame_error(err: ProtocolError) -> BridgeError {
    match err {
        ProtocolError::Io(e) => BridgeError::connection(e.to_string()),
        other => BridgeError::Protocol(other),
    }
}

async fn handle_connection(stream: TcpStream, peer_addr: SocketAddr, state: SharedState) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Failed to set TCP_NODELAY for {}: {}", peer_addr, e);
    }
    let (reader, writer) = stream.into_split();

    let (out_tx, out_rx) = mpsc::channel::<Bytes>(state.output_buffer());
    let writer_task = tokio::spawn(write_loop(writer, out_rx));

    let frames = FramedRead::new(reader, ControlLineCodec::new()).map(|r| r.map_err(frame_error));
    let bridge = state.new_bridge(TCP_TRANSPORT, out_tx.clone());

    match bridge.run(frames).await {
        Ok(()) => debug!("TCP connection from {} closed", peer_addr),
        Err(e) if e.is_client_facing() => {
            info!("Rejecting TCP connection from {}: {}", peer_addr, e);
            let _ = out_tx.send(Bytes::from(format!("{}\r\n", e))).await;
        }
        Err(e) => warn!("TCP connection from {} ended: {}", peer_addr, e),
    }

    drop(out_tx);
    if let Err(e) = writer_task.await {
        warn!("TCP writer task for {} failed: {}", peer_addr, e);
    }
}

/// Drain outgoing chunks onto the socket, then shut down the write half
async fn write_loop(writer: OwnedWriteHalf, mut rx: mpsc::Receiver<Bytes>) {
    let mut sink = FramedWrite::new(writer, ControlLineCodec::new());
    while let Some(chunk) = rx.recv().await {
        if let Err(e) = sink.send(chunk).await {
            debug!("TCP write failed: {}", e);
            return;
        }
    }
    let _ = sink.close().await;
}
