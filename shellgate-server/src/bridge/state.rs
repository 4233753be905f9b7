//! Bridge lifecycle state and per-connection session record

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use shellgate_protocol::{Geometry, InitRequest, SessionId};

/// Lifecycle of one bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BridgeState {
    /// Channel established, waiting for the `init` handshake
    AwaitingInit,
    /// Session running, input and output flowing
    Active,
    /// Tearing down session resources
    Closing,
    /// Terminal
    Closed,
}

impl BridgeState {
    pub fn is_closed(&self) -> bool {
        matches!(self, BridgeState::Closed)
    }
}

impl std::fmt::Display for BridgeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BridgeState::AwaitingInit => "awaiting init",
            BridgeState::Active => "active",
            BridgeState::Closing => "closing",
            BridgeState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// The session a bridge owns once its handshake succeeded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub session_id: SessionId,
    pub transport_name: String,
    pub state: BridgeState,
    pub geometry: Geometry,
    pub created_at: DateTime<Utc>,
    pub term_type: String,
    pub color_depth: String,
    pub features: BTreeSet<String>,
    pub user_agent: String,
}

impl Session {
    pub fn from_init(session_id: SessionId, transport_name: &str, init: &InitRequest) -> Self {
        Self {
            session_id,
            transport_name: transport_name.to_string(),
            state: BridgeState::Active,
            geometry: init.geometry,
            created_at: Utc::now(),
            term_type: init.term_type.clone(),
            color_depth: init.color_depth.clone(),
            features: init.features.clone(),
            user_agent: init.user_agent.clone(),
        }
    }
}
