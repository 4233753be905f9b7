//! Shared session services
//!
//! Created once at startup and handed to every bridge and observer
//! endpoint. Cloning is cheap.

use std::sync::Arc;

use shellgate_protocol::SessionSnapshot;

use crate::config::AppConfig;
use crate::events::{SessionEventBus, Subscription};
use crate::registry::{SessionRegistry, TransportSpec};

/// Registry plus event bus, shared by all bridges
#[derive(Clone)]
pub struct SessionServices {
    pub registry: Arc<SessionRegistry>,
    pub events: Arc<SessionEventBus>,
}

impl SessionServices {
    pub fn new(registry: SessionRegistry, events: SessionEventBus) -> Self {
        Self {
            registry: Arc::new(registry),
            events: Arc::new(events),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            SessionRegistry::new(config.transport_specs()),
            SessionEventBus::from_config(&config.events),
        )
    }

    /// Services for the given transports with default event settings
    pub fn with_transports(specs: impl IntoIterator<Item = TransportSpec>) -> Self {
        Self::new(
            SessionRegistry::new(specs),
            SessionEventBus::from_config(&Default::default()),
        )
    }

    /// Current registry counters and event log
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            transports: self.registry.snapshot(),
            event_log: self.events.snapshot(),
        }
    }

    /// Snapshot plus a live feed continuing exactly after it
    pub fn snapshot_and_subscribe(&self) -> (SessionSnapshot, Subscription) {
        let transports = self.registry.snapshot();
        let (event_log, subscription) = self.events.snapshot_and_subscribe();
        (
            SessionSnapshot {
                transports,
                event_log,
            },
            subscription,
        )
    }
}

impl std::fmt::Debug for SessionServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionServices")
            .field("transports", &self.registry.snapshot())
            .field("last_seq", &self.events.last_seq())
            .finish()
    }
}
