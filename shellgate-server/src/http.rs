//! HTTP surface: WebSocket terminal endpoint and observer routes
//!
//! The terminal router upgrades connections on the configured path and runs
//! one bridge per socket. The observer router serves the registry snapshot,
//! a Server-Sent Events feed of session lifecycle events, and a health
//! summary.

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use bytes::Bytes;
use futures::{stream, Sink, SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use shellgate_protocol::{ProtocolError, SessionEvent, SessionSnapshot};
use shellgate_utils::{Result, ShellgateError};

use crate::bridge::BridgeError;
use crate::config::WEBSOCKET_TRANSPORT;
use crate::SharedState;

/// Longest close reason a control frame can carry
const MAX_CLOSE_REASON: usize = 123;

/// SSE event name for session lifecycle entries
const SESSION_EVENT: &str = "session";

// ==================== Listener ====================

/// Bind an HTTP listener
pub async fn bind(addr: &str) -> Result<TcpListener> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ShellgateError::Bind {
            addr: addr.to_string(),
            source: e,
        })?;
    info!("HTTP listener bound to {}", addr);
    Ok(listener)
}

/// Serve `router` until the shutdown token fires
pub async fn serve(listener: TcpListener, router: Router, shutdown: CancellationToken) {
    let app = router.layer(TraceLayer::new_for_http());
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await;

    match result {
        Ok(()) => info!("HTTP listener stopped"),
        Err(e) => error!("HTTP server error: {}", e),
    }
}

// ==================== Routers ====================

/// WebSocket terminal endpoint at the configured path
pub fn terminal_router(state: SharedState) -> Router {
    let path = state.config.websocket.path.clone();
    Router::new()
        .route(&path, get(terminal_upgrade))
        .with_state(state)
}

/// Snapshot, event feed and health routes
pub fn observer_router(state: SharedState) -> Router {
    Router::new()
        .route("/sessions", get(sessions_snapshot))
        .route("/sessions/events", get(session_events))
        .route("/health", get(health))
        .with_state(state)
}

// ==================== Observer ====================

async fn sessions_snapshot(State(state): State<SharedState>) -> Json<SessionSnapshot> {
    Json(state.services.snapshot())
}

#[derive(Debug, Default, Deserialize)]
struct EventsQuery {
    /// Highest sequence number the observer has already seen
    after: Option<u64>,
}

/// `after` from the query, falling back to an SSE reconnect's `Last-Event-ID`
fn resume_point(query: &EventsQuery, headers: &HeaderMap) -> Option<u64> {
    query.after.or_else(|| {
        headers
            .get("last-event-id")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
    })
}

fn sse_event(event: &SessionEvent) -> std::result::Result<Event, axum::Error> {
    Event::default()
        .id(event.seq.to_string())
        .event(SESSION_EVENT)
        .json_data(event)
}

async fn session_events(
    State(state): State<SharedState>,
    Query(query): Query<EventsQuery>,
    headers: HeaderMap,
) -> Sse<impl Stream<Item = std::result::Result<Event, axum::Error>>> {
    let (backlog, subscription) = match resume_point(&query, &headers) {
        Some(after) => state.services.events.subscribe_after(after),
        None => (Vec::new(), state.services.events.subscribe()),
    };
    debug!(
        backlog = backlog.len(),
        cursor = subscription.cursor(),
        "Observer subscribed to session events"
    );

    let shutdown = state.shutdown.clone();
    let events = stream::iter(backlog)
        .chain(subscription.into_stream())
        .map(|event| sse_event(&event))
        .take_until(async move { shutdown.cancelled().await });

    Sse::new(events).keep_alive(KeepAlive::default())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TransportHealth {
    name: String,
    running: bool,
    active: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    websocket_path: String,
    open_sessions: usize,
    transports: Vec<TransportHealth>,
}

async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let transports = state
        .services
        .registry
        .snapshot()
        .into_iter()
        .map(|t| TransportHealth {
            name: t.name,
            running: t.running,
            active: t.active_count,
        })
        .collect();

    Json(HealthResponse {
        status: "ok",
        websocket_path: state.config.websocket.path.clone(),
        open_sessions: state.services.events.open_sessions(),
        transports,
    })
}

// ==================== Terminal ====================

async fn terminal_upgrade(ws: WebSocketUpgrade, State(state): State<SharedState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: SharedState) {
    let (sink, stream) = socket.split();
    serve_socket(sink, stream, state).await;
}

/// Run one bridge over a split WebSocket and close it with a matching code
async fn serve_socket<S, R>(sink: S, incoming: R, state: SharedState)
where
    S: Sink<Message> + Send + Unpin + 'static,
    R: Stream<Item = std::result::Result<Message, axum::Error>> + Send + Unpin + 'static,
{
    let (out_tx, out_rx) = mpsc::channel::<Bytes>(state.output_buffer());
    let writer = tokio::spawn(write_loop(sink, out_rx));

    let bridge = state.new_bridge(WEBSOCKET_TRANSPORT, out_tx.clone());
    let result = bridge.run(incoming_frames(incoming)).await;

    match &result {
        Ok(()) => debug!("WebSocket session closed"),
        Err(e) if e.is_client_facing() => info!("Rejecting WebSocket connection: {}", e),
        Err(e) => warn!("WebSocket session ended: {}", e),
    }

    drop(out_tx);
    match writer.await {
        Ok(Some(mut sink)) => {
            let frame = close_frame(&result);
            if sink.send(Message::Close(Some(frame))).await.is_err() {
                debug!("WebSocket closed before close frame was sent");
            }
        }
        Ok(None) => debug!("WebSocket writer stopped early"),
        Err(e) => warn!("WebSocket writer task failed: {}", e),
    }
}

/// Text frames become control frames; a close frame ends the stream
fn incoming_frames<R>(
    incoming: R,
) -> impl Stream<Item = std::result::Result<String, BridgeError>> + Send + Unpin
where
    R: Stream<Item = std::result::Result<Message, axum::Error>> + Send + Unpin + 'static,
{
    Box::pin(stream::unfold(incoming, |mut incoming| async move {
        loop {
            let item = match incoming.next().await? {
                Ok(Message::Text(text)) => Ok(text),
                Ok(Message::Binary(_)) => Err(BridgeError::Protocol(ProtocolError::Malformed(
                    "binary frames are not supported".into(),
                ))),
                Ok(Message::Close(_)) => return None,
                // Ping/pong are answered by the socket itself
                Ok(_) => continue,
                Err(e) => Err(BridgeError::connection(e.to_string())),
            };
            return Some((item, incoming));
        }
    }))
}

/// Forward output chunks as text frames; hands the sink back once drained
async fn write_loop<S>(mut sink: S, mut rx: mpsc::Receiver<Bytes>) -> Option<S>
where
    S: Sink<Message> + Unpin,
{
    let mut carry = Utf8Carry::default();
    while let Some(chunk) = rx.recv().await {
        if let Some(text) = carry.push(&chunk) {
            if sink.send(Message::Text(text)).await.is_err() {
                return None;
            }
        }
    }
    if let Some(text) = carry.finish() {
        if sink.send(Message::Text(text)).await.is_err() {
            return None;
        }
    }
    Some(sink)
}

/// Close frame describing how the bridge ended
fn close_frame(result: &std::result::Result<(), BridgeError>) -> CloseFrame<'static> {
    let (code, reason) = match result {
        Ok(()) => (close_code::NORMAL, String::new()),
        Err(e) => {
            let code = match e {
                BridgeError::CapacityExceeded { .. } => close_code::AGAIN,
                BridgeError::Protocol(_) => close_code::PROTOCOL,
                BridgeError::Connection(_) => close_code::AWAY,
                BridgeError::Admission(_)
                | BridgeError::Session(_)
                | BridgeError::ResourceCleanup(_) => close_code::ERROR,
            };
            (code, e.to_string())
        }
    };
    CloseFrame {
        code,
        reason: truncate_reason(reason).into(),
    }
}

fn truncate_reason(mut reason: String) -> String {
    if reason.len() > MAX_CLOSE_REASON {
        let mut end = MAX_CLOSE_REASON;
        while !reason.is_char_boundary(end) {
            end -= 1;
        }
        reason.truncate(end);
    }
    reason
}

/// Holds back a multi-byte character split across output chunks
#[derive(Debug, Default)]
struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    fn push(&mut self, chunk: &[u8]) -> Option<String> {
        self.pending.extend_from_slice(chunk);
        let keep = incomplete_tail(&self.pending);
        let split = self.pending.len() - keep;
        if split == 0 {
            return None;
        }
        let tail = self.pending.split_off(split);
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending = tail;
        Some(text)
    }

    fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(text)
    }
}

/// Length of a trailing, not yet complete UTF-8 sequence
fn incomplete_tail(bytes: &[u8]) -> usize {
    for back in 1..=bytes.len().min(3) {
        let b = bytes[bytes.len() - back];
        if b & 0xC0 == 0x80 {
            continue;
        }
        let needed = match b {
            0xF0..=0xFF => 4,
            0xE0..=0xEF => 3,
            0xC0..=0xDF => 2,
            _ => 1,
        };
        return if needed > back { back } else { 0 };
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use futures::channel::mpsc as fmpsc;
    use shellgate_protocol::{ControlMessage, Geometry, InitRequest, SessionEventType};
    use tower::ServiceExt;
    use uuid::Uuid;

    use crate::bridge::mock::MockSessionFactory;
    use crate::config::AppConfig;

    fn state_with(config: AppConfig) -> (SharedState, Arc<MockSessionFactory>) {
        let factory = MockSessionFactory::new();
        (SharedState::new(config, factory.clone()), factory)
    }

    fn test_state() -> (SharedState, Arc<MockSessionFactory>) {
        let mut config = AppConfig::default();
        config.terminal.resize_coalesce_ms = 0;
        state_with(config)
    }

    async fn get_json(router: Router, uri: &str) -> serde_json::Value {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    /// Read SSE body chunks until `needle` shows up
    async fn read_sse_until(body: Body, needle: &str) -> String {
        let mut data = body.into_data_stream();
        let mut seen = String::new();
        while !seen.contains(needle) {
            let chunk = tokio::time::timeout(Duration::from_secs(5), data.next())
                .await
                .expect("timed out waiting for SSE data")
                .expect("SSE stream ended")
                .unwrap();
            seen.push_str(&String::from_utf8_lossy(&chunk));
        }
        seen
    }

    fn init_frame() -> Message {
        Message::Text(
            ControlMessage::Init(InitRequest {
                term_type: "xterm-256color".into(),
                color_depth: "24".into(),
                features: Default::default(),
                geometry: Geometry { cols: 80, rows: 24 },
                user_agent: "test".into(),
            })
            .to_json(),
        )
    }

    #[tokio::test]
    async fn test_sessions_snapshot() {
        let (state, _) = test_state();
        let id = Uuid::new_v4();
        state
            .services
            .events
            .append(id, "tcp", SessionEventType::Opened)
            .unwrap();

        let body = get_json(observer_router(state), "/sessions").await;

        let transports = body["transports"].as_array().unwrap();
        assert_eq!(transports.len(), 2);
        assert_eq!(transports[0]["name"], "tcp");
        assert_eq!(transports[0]["maxCount"], -1);
        let log = body["eventLog"].as_array().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0]["seq"], 1);
        assert_eq!(log[0]["eventType"], "opened");
        assert_eq!(log[0]["sessionId"], id.to_string());
    }

    #[tokio::test]
    async fn test_health_reports_transports() {
        let mut config = AppConfig::default();
        config.tcp.enabled = false;
        let (state, _) = state_with(config);

        let body = get_json(observer_router(state), "/health").await;

        assert_eq!(body["status"], "ok");
        assert_eq!(body["websocketPath"], "/terminal");
        assert_eq!(body["transports"][0]["name"], "tcp");
        assert_eq!(body["transports"][0]["running"], false);
        assert_eq!(body["transports"][1]["running"], true);
        assert_eq!(body["transports"][1]["active"], 0);
    }

    #[tokio::test]
    async fn test_event_stream_resumes_after_seq() {
        let (state, _) = test_state();
        let events = &state.services.events;
        let first = Uuid::new_v4();
        events.append(first, "tcp", SessionEventType::Opened).unwrap();
        events.append(first, "tcp", SessionEventType::Closed).unwrap();

        let response = observer_router(state.clone())
            .oneshot(
                Request::builder()
                    .uri("/sessions/events?after=1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "text/event-stream");

        let seen = read_sse_until(response.into_body(), "\"seq\":2").await;
        assert!(seen.contains("event: session"));
        assert!(seen.contains("\"eventType\":\"closed\""));
        assert!(!seen.contains("\"seq\":1,"));
        state.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_event_stream_delivers_live_events() {
        let (state, _) = test_state();
        let response = observer_router(state.clone())
            .oneshot(
                Request::builder()
                    .uri("/sessions/events")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let id = Uuid::new_v4();
        state
            .services
            .events
            .append(id, "websocket", SessionEventType::Opened)
            .unwrap();

        let seen = read_sse_until(response.into_body(), "\"seq\":1").await;
        assert!(seen.contains(&id.to_string()));
        state.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_last_event_id_header_resumes() {
        let (state, _) = test_state();
        let events = &state.services.events;
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        events.append(a, "tcp", SessionEventType::Opened).unwrap();
        events.append(b, "tcp", SessionEventType::Opened).unwrap();

        let response = observer_router(state.clone())
            .oneshot(
                Request::builder()
                    .uri("/sessions/events")
                    .header("last-event-id", "1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let seen = read_sse_until(response.into_body(), "\"seq\":2").await;
        assert!(seen.contains(&b.to_string()));
        assert!(!seen.contains(&a.to_string()));
        state.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_stale_last_event_id_still_streams() {
        let (state, _) = test_state();
        let response = observer_router(state.clone())
            .oneshot(
                Request::builder()
                    .uri("/sessions/events")
                    .header("last-event-id", "40")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let id = Uuid::new_v4();
        state
            .services
            .events
            .append(id, "tcp", SessionEventType::Opened)
            .unwrap();

        let seen = read_sse_until(response.into_body(), "\"seq\":1").await;
        assert!(seen.contains(&id.to_string()));
        state.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_event_stream_ends_on_shutdown() {
        let (state, _) = test_state();
        let response = observer_router(state.clone())
            .oneshot(
                Request::builder()
                    .uri("/sessions/events")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        state.shutdown.cancel();
        let body = tokio::time::timeout(
            Duration::from_secs(5),
            axum::body::to_bytes(response.into_body(), usize::MAX),
        )
        .await
        .expect("event stream did not end");
        assert!(body.is_ok());
    }

    #[tokio::test]
    async fn test_terminal_route_uses_configured_path() {
        let mut config = AppConfig::default();
        config.websocket.path = "/pty".into();
        let (state, _) = state_with(config);

        let response = terminal_router(state)
            .oneshot(Request::builder().uri("/terminal").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_socket_session_round_trip() {
        let (state, factory) = test_state();
        let (client_tx, server_rx) = fmpsc::unbounded();
        let (server_tx, mut client_rx) = fmpsc::unbounded();

        let task = tokio::spawn(serve_socket(server_tx, server_rx, state.clone()));

        client_tx.unbounded_send(Ok(init_frame())).unwrap();
        client_tx
            .unbounded_send(Ok(Message::Text(
                r#"{"action":"read","data":"ls\r"}"#.into(),
            )))
            .unwrap();

        let session = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if factory.created() == 1 && factory.last().input() == "ls\r" {
                    return factory.last();
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(session.spec.term.as_deref(), Some("xterm-256color"));
        assert!(session.spec.truecolor);

        session.emit("file.txt\r\n").await;
        let out = client_rx.next().await.unwrap();
        assert_eq!(out, Message::Text("file.txt\r\n".into()));

        client_tx.unbounded_send(Ok(Message::Close(None))).unwrap();
        task.await.unwrap();

        match client_rx.next().await {
            Some(Message::Close(Some(frame))) => assert_eq!(frame.code, close_code::NORMAL),
            other => panic!("expected close frame, got {:?}", other),
        }
        assert!(session.is_terminated());
        assert_eq!(state.services.registry.total_active(), 0);
        assert_eq!(state.services.events.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn test_socket_capacity_rejection_closes_with_reason() {
        let mut config = AppConfig::default();
        config.websocket.max_connections = 1;
        let (state, factory) = state_with(config);
        state.services.registry.admit(WEBSOCKET_TRANSPORT).unwrap();

        let (client_tx, server_rx) = fmpsc::unbounded();
        let (server_tx, mut client_rx) = fmpsc::unbounded();
        client_tx.unbounded_send(Ok(init_frame())).unwrap();

        serve_socket(server_tx, server_rx, state.clone()).await;

        match client_rx.next().await {
            Some(Message::Close(Some(frame))) => {
                assert_eq!(frame.code, close_code::AGAIN);
                assert_eq!(
                    frame.reason,
                    "Capacity exceeded on transport 'websocket' (max 1)"
                );
            }
            other => panic!("expected close frame, got {:?}", other),
        }
        assert_eq!(factory.created(), 0);
        assert!(state.services.events.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_binary_frame_is_protocol_error() {
        let (state, _) = test_state();
        let (client_tx, server_rx) = fmpsc::unbounded();
        let (server_tx, mut client_rx) = fmpsc::unbounded();
        client_tx.unbounded_send(Ok(init_frame())).unwrap();
        client_tx
            .unbounded_send(Ok(Message::Binary(vec![1, 2, 3])))
            .unwrap();

        serve_socket(server_tx, server_rx, state.clone()).await;

        match client_rx.next().await {
            Some(Message::Close(Some(frame))) => assert_eq!(frame.code, close_code::PROTOCOL),
            other => panic!("expected close frame, got {:?}", other),
        }
        let log = state.services.events.snapshot();
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].event_type, SessionEventType::Closed);
    }

    #[tokio::test]
    async fn test_incoming_frames_skips_control_messages() {
        let frames: Vec<std::result::Result<Message, axum::Error>> = vec![
            Ok(Message::Ping(vec![1])),
            Ok(Message::Text("one".into())),
            Ok(Message::Pong(vec![])),
            Ok(Message::Text("two".into())),
            Ok(Message::Close(None)),
            Ok(Message::Text("after close".into())),
        ];
        let collected: Vec<String> = incoming_frames(stream::iter(frames))
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(collected, vec!["one", "two"]);
    }

    #[test]
    fn test_close_frame_codes() {
        assert_eq!(close_frame(&Ok(())).code, close_code::NORMAL);
        assert_eq!(
            close_frame(&Err(BridgeError::connection("idle timeout"))).code,
            close_code::AWAY
        );
        assert_eq!(
            close_frame(&Err(BridgeError::Session(ShellgateError::pty("boom")))).code,
            close_code::ERROR
        );
    }

    #[test]
    fn test_close_reason_truncated_on_char_boundary() {
        let long = "é".repeat(100);
        let frame = close_frame(&Err(BridgeError::connection(long)));
        assert!(frame.reason.len() <= MAX_CLOSE_REASON);
        assert!(frame.reason.starts_with("Connection error: é"));
    }

    #[test]
    fn test_utf8_carry_joins_split_characters() {
        let mut carry = Utf8Carry::default();
        let bytes = "a€b".as_bytes();

        assert_eq!(carry.push(&bytes[..2]).as_deref(), Some("a"));
        assert_eq!(carry.push(&bytes[2..3]), None);
        assert_eq!(carry.push(&bytes[3..]).as_deref(), Some("€b"));
        assert_eq!(carry.finish(), None);
    }

    #[test]
    fn test_utf8_carry_replaces_invalid_bytes() {
        let mut carry = Utf8Carry::default();
        assert_eq!(carry.push(b"ok\xFFok").as_deref(), Some("ok\u{FFFD}ok"));

        carry.push(b"x\xE2\x82");
        assert_eq!(carry.finish().as_deref(), Some("\u{FFFD}"));
    }

    #[test]
    fn test_resume_point_prefers_query() {
        let mut headers = HeaderMap::new();
        headers.insert("last-event-id", "7".parse().unwrap());

        let query = EventsQuery { after: Some(3) };
        assert_eq!(resume_point(&query, &headers), Some(3));
        assert_eq!(resume_point(&EventsQuery::default(), &headers), Some(7));
        assert_eq!(resume_point(&EventsQuery::default(), &HeaderMap::new()), None);
    }
}
