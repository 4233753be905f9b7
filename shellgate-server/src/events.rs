//! Session lifecycle event bus
//!
//! An ordered, capped, in-memory log of `opened`/`closed` transitions plus
//! live subscriptions. Every event gets a strictly increasing `seq`, which
//! observers use to stitch a snapshot and a live feed together without gaps
//! or duplicates.
//!
//! Delivery never blocks the producer: each subscriber has a bounded buffer
//! and loses its oldest undelivered events when it falls behind.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use shellgate_protocol::{SessionEvent, SessionEventType, SessionId};

use crate::config::EventsConfig;

/// Lifecycle ordering violations rejected by [`SessionEventBus::append`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventBusError {
    #[error("Session {0} already has an opened event")]
    AlreadyOpened(SessionId),

    #[error("Session {0} has no open lifecycle to close")]
    NotOpened(SessionId),
}

struct EventLog {
    events: VecDeque<SessionEvent>,
    next_seq: u64,
    last_timestamp: Option<DateTime<Utc>>,
    /// Sessions with an `opened` event and no `closed` event yet
    open: HashMap<SessionId, String>,
}

impl EventLog {
    fn last_seq(&self) -> u64 {
        self.next_seq - 1
    }
}

/// Process-wide lifecycle log and subscription hub
pub struct SessionEventBus {
    log: Mutex<EventLog>,
    tx: broadcast::Sender<SessionEvent>,
    max_log: usize,
}

impl SessionEventBus {
    /// Create a bus keeping at most `max_log` events, buffering up to
    /// `subscriber_buffer` undelivered events per subscriber
    pub fn new(max_log: usize, subscriber_buffer: usize) -> Self {
        let (tx, _) = broadcast::channel(subscriber_buffer.max(1));
        Self {
            log: Mutex::new(EventLog {
                events: VecDeque::with_capacity(max_log.min(1024)),
                next_seq: 1,
                last_timestamp: None,
                open: HashMap::new(),
            }),
            tx,
            max_log: max_log.max(1),
        }
    }

    pub fn from_config(config: &EventsConfig) -> Self {
        Self::new(config.max_log, config.subscriber_buffer)
    }

    /// Append a transition stamped with the current time
    pub fn append(
        &self,
        session_id: SessionId,
        transport_name: &str,
        event_type: SessionEventType,
    ) -> Result<SessionEvent, EventBusError> {
        self.append_at(session_id, transport_name, event_type, Utc::now())
    }

    /// Append a transition with an explicit timestamp
    ///
    /// A timestamp earlier than the last logged one is raised to it, so the
    /// log stays non-decreasing even if the wall clock steps back.
    pub fn append_at(
        &self,
        session_id: SessionId,
        transport_name: &str,
        event_type: SessionEventType,
        timestamp: DateTime<Utc>,
    ) -> Result<SessionEvent, EventBusError> {
        let mut log = self.log.lock();

        match event_type {
            SessionEventType::Opened => {
                if log.open.contains_key(&session_id) {
                    return Err(EventBusError::AlreadyOpened(session_id));
                }
                log.open.insert(session_id, transport_name.to_string());
            }
            SessionEventType::Closed => {
                if log.open.remove(&session_id).is_none() {
                    return Err(EventBusError::NotOpened(session_id));
                }
            }
        }

        let timestamp = match log.last_timestamp {
            Some(last) if timestamp < last => last,
            _ => timestamp,
        };

        let event = SessionEvent {
            seq: log.next_seq,
            session_id,
            transport_name: transport_name.to_string(),
            event_type,
            timestamp,
        };
        log.next_seq += 1;
        log.last_timestamp = Some(timestamp);

        log.events.push_back(event.clone());
        while log.events.len() > self.max_log {
            log.events.pop_front();
        }

        // Sent under the lock so subscribers observe append order
        let receivers = self.tx.send(event.clone()).unwrap_or(0);
        trace!(
            seq = event.seq,
            session_id = %session_id,
            event_type = %event_type,
            receivers,
            "Session event appended"
        );

        Ok(event)
    }

    /// The retained log as of now, oldest first
    pub fn snapshot(&self) -> Vec<SessionEvent> {
        self.log.lock().events.iter().cloned().collect()
    }

    /// Live feed of events appended after this call
    pub fn subscribe(&self) -> Subscription {
        let log = self.log.lock();
        Subscription::new(self.tx.subscribe(), log.last_seq())
    }

    /// Atomically take the retained log and a feed positioned right after it
    pub fn snapshot_and_subscribe(&self) -> (Vec<SessionEvent>, Subscription) {
        let log = self.log.lock();
        let events = log.events.iter().cloned().collect();
        (events, Subscription::new(self.tx.subscribe(), log.last_seq()))
    }

    /// Retained events with `seq > after`, and a feed continuing from there
    ///
    /// Events older than the retained window cannot be replayed. A cursor
    /// beyond the newest event was issued by an earlier process; the whole
    /// retained log is replayed for it instead.
    pub fn subscribe_after(&self, after: u64) -> (Vec<SessionEvent>, Subscription) {
        let log = self.log.lock();
        let last_seq = log.last_seq();
        let after = if after > last_seq {
            debug!(after, last_seq, "Resume cursor is ahead of the log, replaying from start");
            0
        } else {
            after
        };
        let backlog: Vec<_> = log
            .events
            .iter()
            .filter(|e| e.seq > after)
            .cloned()
            .collect();
        (backlog, Subscription::new(self.tx.subscribe(), last_seq))
    }

    /// Sequence number of the most recent event, 0 if none yet
    pub fn last_seq(&self) -> u64 {
        self.log.lock().last_seq()
    }

    /// Number of sessions with an open lifecycle
    pub fn open_sessions(&self) -> usize {
        self.log.lock().open.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Cancellable live feed of session events
///
/// Yields events in append order, skipping anything at or before its cursor.
/// Dropping the subscription or calling [`Subscription::cancel`] releases its
/// buffer.
pub struct Subscription {
    rx: Option<broadcast::Receiver<SessionEvent>>,
    after: u64,
    cancel: CancellationToken,
    dropped: u64,
}

impl Subscription {
    fn new(rx: broadcast::Receiver<SessionEvent>, after: u64) -> Self {
        Self {
            rx: Some(rx),
            after,
            cancel: CancellationToken::new(),
            dropped: 0,
        }
    }

    /// Wait for the next event; `None` once cancelled or the bus is gone
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        loop {
            let rx = self.rx.as_mut()?;
            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                result = rx.recv() => Some(result),
            };

            match outcome {
                None => {
                    self.rx = None;
                    return None;
                }
                Some(Ok(event)) => {
                    if let Some(event) = self.accept(event) {
                        return Some(event);
                    }
                }
                Some(Err(RecvError::Lagged(n))) => self.lagged(n),
                Some(Err(RecvError::Closed)) => {
                    self.rx = None;
                    return None;
                }
            }
        }
    }

    /// Next already-buffered event, without waiting
    pub fn try_recv(&mut self) -> Option<SessionEvent> {
        if self.cancel.is_cancelled() {
            self.rx = None;
        }
        loop {
            let rx = self.rx.as_mut()?;
            match rx.try_recv() {
                Ok(event) => {
                    if let Some(event) = self.accept(event) {
                        return Some(event);
                    }
                }
                Err(TryRecvError::Lagged(n)) => self.lagged(n),
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Closed) => {
                    self.rx = None;
                    return None;
                }
            }
        }
    }

    fn accept(&mut self, event: SessionEvent) -> Option<SessionEvent> {
        if event.seq <= self.after {
            return None;
        }
        self.after = event.seq;
        Some(event)
    }

    fn lagged(&mut self, n: u64) {
        self.dropped += n;
        debug!(dropped = n, total_dropped = self.dropped, "Event subscriber lagged");
    }

    /// Stop delivery and release buffered events
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        self.rx = None;
    }

    /// Token that cancels this subscription from another task
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.is_none() || self.cancel.is_cancelled()
    }

    /// Sequence number of the last event delivered (or skipped over)
    pub fn cursor(&self) -> u64 {
        self.after
    }

    /// Events lost to buffer overflow so far
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Adapt into a `Stream` ending when the subscription ends
    pub fn into_stream(self) -> impl Stream<Item = SessionEvent> + Send {
        futures::stream::unfold(self, |mut sub| async move {
            sub.recv().await.map(|event| (event, sub))
        })
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("after", &self.after)
            .field("dropped", &self.dropped)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
