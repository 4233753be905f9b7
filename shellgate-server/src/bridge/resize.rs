//! Resize coalescing
//!
//! Scheduling a resize replaces whatever resize is still pending and restarts
//! the window, so a burst of layout changes applies only its final geometry.

use std::time::Duration;

use tokio::time::{sleep_until, Instant};
use tracing::trace;

use shellgate_protocol::Geometry;

/// Delayed, replaceable resize task for one bridge
#[derive(Debug)]
pub struct ResizeScheduler {
    window: Duration,
    pending: Option<(Geometry, Instant)>,
}

impl ResizeScheduler {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: None,
        }
    }

    /// Whether resizes are applied immediately
    pub fn is_immediate(&self) -> bool {
        self.window.is_zero()
    }

    /// Schedule `geometry`, replacing any pending resize
    pub fn schedule(&mut self, geometry: Geometry) {
        if let Some((replaced, _)) = self.pending {
            trace!(replaced = %replaced, geometry = %geometry, "Resize coalesced");
        }
        self.pending = Some((geometry, Instant::now() + self.window));
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Drop the pending resize, if any
    pub fn cancel(&mut self) {
        self.pending = None;
    }

    /// Wait for the pending resize to come due and take it
    ///
    /// Never completes while nothing is pending. Cancel-safe: dropping the
    /// future leaves the pending resize in place.
    pub async fn due(&mut self) -> Geometry {
        match self.pending {
            Some((geometry, deadline)) => {
                sleep_until(deadline).await;
                self.pending = None;
                geometry
            }
            None => std::future::pending().await,
        }
    }
}
