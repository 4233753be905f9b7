//! Shared data types for sessions, transports and lifecycle events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque unique session token
pub type SessionId = Uuid;

/// `max_count` sentinel meaning the transport has no capacity limit
pub const UNLIMITED: i64 = -1;

// ==================== Geometry ====================

/// Terminal size in character cells
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Geometry {
    pub cols: u16,
    pub rows: u16,
}

impl Geometry {
    /// Build a geometry, rejecting zero-sized dimensions
    pub fn new(cols: u16, rows: u16) -> Option<Self> {
        if cols == 0 || rows == 0 {
            return None;
        }
        Some(Self { cols, rows })
    }
}

impl Default for Geometry {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}

impl std::fmt::Display for Geometry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.cols, self.rows)
    }
}

// ==================== Transport Descriptor ====================

/// Point-in-time view of one transport's admission counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportDescriptor {
    /// Transport kind, e.g. `"tcp"` or `"websocket"`
    pub name: String,
    /// Whether the transport accepts connections
    pub running: bool,
    /// Sessions currently admitted
    pub active_count: u64,
    /// Configured maximum, or [`UNLIMITED`]
    pub max_count: i64,
}

impl TransportDescriptor {
    /// Whether this transport has no capacity limit
    pub fn is_unlimited(&self) -> bool {
        self.max_count < 0
    }

    /// Whether another session could be admitted right now
    pub fn has_capacity(&self) -> bool {
        self.running && (self.is_unlimited() || (self.active_count as i64) < self.max_count)
    }
}

// ==================== Session Events ====================

/// Lifecycle transition recorded on the event bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionEventType {
    Opened,
    Closed,
}

impl std::fmt::Display for SessionEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionEventType::Opened => f.write_str("opened"),
            SessionEventType::Closed => f.write_str("closed"),
        }
    }
}

/// One entry of the session event log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEvent {
    /// Position in the log; strictly increasing, never reused
    pub seq: u64,
    pub session_id: SessionId,
    pub transport_name: String,
    pub event_type: SessionEventType,
    /// Non-decreasing across the whole log
    pub timestamp: DateTime<Utc>,
}

/// Observer snapshot: registry counters plus the current event log
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub transports: Vec<TransportDescriptor>,
    pub event_log: Vec<SessionEvent>,
}

impl SessionSnapshot {
    /// Highest event sequence number in the snapshot, for stitching a live feed
    pub fn last_seq(&self) -> Option<u64> {
        self.event_log.last().map(|e| e.seq)
    }
}
