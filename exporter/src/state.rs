//! State shared with the health endpoint.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Liveness flag read by `/health` and `/ready`.
///
/// Cleared when shutdown begins so load balancers stop routing to a node
/// whose probes are being detached.
#[derive(Clone, Debug)]
pub struct HealthState {
    alive: Arc<AtomicBool>,
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            alive: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::Release);
    }
}
