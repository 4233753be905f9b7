//! Session Registry
//!
//! Tracks, per configured transport, how many sessions are admitted against
//! its capacity limit. Bridges reserve a slot with [`SessionRegistry::admit`]
//! before creating any session resources and give it back with
//! [`SessionRegistry::release`] on teardown.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use dashmap::DashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shellgate_protocol::{SessionId, TransportDescriptor, UNLIMITED};
use shellgate_utils::{Result, ShellgateError};

/// Static description of a transport, used to build the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportSpec {
    pub name: String,
    pub running: bool,
    /// Capacity, or [`UNLIMITED`]
    pub max_count: i64,
}

impl TransportSpec {
    pub fn new(name: impl Into<String>, max_count: i64) -> Self {
        Self {
            name: name.into(),
            running: true,
            max_count,
        }
    }
}

struct TransportSlot {
    name: String,
    running: AtomicBool,
    active: AtomicU64,
    max: i64,
}

impl TransportSlot {
    fn descriptor(&self) -> TransportDescriptor {
        TransportDescriptor {
            name: self.name.clone(),
            running: self.running.load(Ordering::SeqCst),
            active_count: self.active.load(Ordering::SeqCst),
            max_count: self.max,
        }
    }
}

/// Process-wide admission table
///
/// Thread-safe for concurrent admit/release from many bridge tasks.
pub struct SessionRegistry {
    /// Transports in configuration order
    slots: Vec<TransportSlot>,
    /// Transport name -> index into `slots`
    by_name: HashMap<String, usize>,
    /// Admitted session -> index into `slots`
    sessions: DashMap<SessionId, usize>,
}

impl SessionRegistry {
    /// Create a registry with one descriptor per transport
    ///
    /// A later spec with a duplicate name replaces the earlier one's limits.
    pub fn new(specs: impl IntoIterator<Item = TransportSpec>) -> Self {
        let mut slots: Vec<TransportSlot> = Vec::new();
        let mut by_name = HashMap::new();

        for spec in specs {
            let max = if spec.max_count < 0 { UNLIMITED } else { spec.max_count };
            let slot = TransportSlot {
                name: spec.name.clone(),
                running: AtomicBool::new(spec.running),
                active: AtomicU64::new(0),
                max,
            };
            match by_name.get(&spec.name) {
                Some(&idx) => slots[idx] = slot,
                None => {
                    by_name.insert(spec.name, slots.len());
                    slots.push(slot);
                }
            }
        }

        Self {
            slots,
            by_name,
            sessions: DashMap::new(),
        }
    }

    fn slot(&self, transport: &str) -> Result<(usize, &TransportSlot)> {
        self.by_name
            .get(transport)
            .map(|&idx| (idx, &self.slots[idx]))
            .ok_or_else(|| ShellgateError::UnknownTransport(transport.to_string()))
    }

    /// Reserve a slot on `transport` and mint a new session id
    ///
    /// The capacity check and increment are a single atomic step, so
    /// concurrent admits can never push the count past the maximum.
    pub fn admit(&self, transport: &str) -> Result<SessionId> {
        let (idx, slot) = self.slot(transport)?;

        if !slot.running.load(Ordering::SeqCst) {
            return Err(ShellgateError::TransportStopped(transport.to_string()));
        }

        let admitted = slot
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |active| {
                if slot.max == UNLIMITED || active < slot.max as u64 {
                    Some(active + 1)
                } else {
                    None
                }
            });

        match admitted {
            Ok(previous) => {
                let session_id = Uuid::new_v4();
                self.sessions.insert(session_id, idx);
                info!(
                    session_id = %session_id,
                    transport,
                    active = previous + 1,
                    "Session admitted"
                );
                Ok(session_id)
            }
            Err(active) => {
                warn!(transport, active, max = slot.max, "Admission denied: capacity exceeded");
                Err(ShellgateError::CapacityExceeded {
                    transport: transport.to_string(),
                    max: slot.max,
                })
            }
        }
    }

    /// Give back the slot held by `session_id`
    ///
    /// Unknown or already-released sessions are a no-op, as is a transport
    /// name that does not match the one the session was admitted on.
    pub fn release(&self, transport: &str, session_id: SessionId) {
        let Some(idx) = self.by_name.get(transport).copied() else {
            debug!(transport, session_id = %session_id, "Release on unknown transport ignored");
            return;
        };

        if self
            .sessions
            .remove_if(&session_id, |_, admitted| *admitted == idx)
            .is_none()
        {
            debug!(transport, session_id = %session_id, "Release of unadmitted session ignored");
            return;
        }

        let slot = &self.slots[idx];
        let _ = slot
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |active| {
                Some(active.saturating_sub(1))
            });
        info!(
            session_id = %session_id,
            transport,
            active = slot.active.load(Ordering::SeqCst),
            "Session released"
        );
    }

    /// Mark a transport as accepting or refusing admissions
    pub fn set_running(&self, transport: &str, running: bool) -> Result<()> {
        let (_, slot) = self.slot(transport)?;
        slot.running.store(running, Ordering::SeqCst);
        debug!(transport, running, "Transport running state changed");
        Ok(())
    }

    /// Current counters for every configured transport, in configuration order
    pub fn snapshot(&self) -> Vec<TransportDescriptor> {
        self.slots.iter().map(TransportSlot::descriptor).collect()
    }

    /// Counters for a single transport
    pub fn descriptor(&self, transport: &str) -> Option<TransportDescriptor> {
        self.slot(transport).ok().map(|(_, slot)| slot.descriptor())
    }

    /// Whether `session_id` currently holds a slot
    pub fn is_admitted(&self, session_id: SessionId) -> bool {
        self.sessions.contains_key(&session_id)
    }

    /// Total admitted sessions across all transports
    pub fn total_active(&self) -> u64 {
        self.slots
            .iter()
            .map(|s| s.active.load(Ordering::SeqCst))
            .sum()
    }
}
