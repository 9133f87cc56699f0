//! Outstanding probe tracking.
//!
//! Every probe a path sends is recorded here with its send time. A matching
//! Pong resolves it into an RTT sample; a probe still pending when its timeout
//! elapses is reported through the drop callback.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Callback invoked with the id of a probe that timed out.
pub type DropCallback = Arc<dyn Fn(u32) + Send + Sync>;

/// RTT and loss tracker for one path.
#[derive(Clone)]
pub struct ProbeTracker {
    pending: Arc<DashMap<u32, Instant>>,
    timeout: Duration,
    on_drop: DropCallback,
}

impl ProbeTracker {
    /// Create a tracker that declares probes lost after `timeout`.
    pub fn new<F>(timeout: Duration, on_drop: F) -> Self
    where
        F: Fn(u32) + Send + Sync + 'static,
    {
        Self {
            pending: Arc::new(DashMap::new()),
            timeout,
            on_drop: Arc::new(on_drop),
        }
    }

    /// Record probe `id` as sent now and arm its timeout.
    ///
    /// Must be called inside a tokio runtime.
    pub fn add_probe(&self, id: u32) {
        let sent_at = Instant::now();
        self.pending.insert(id, sent_at);

        let pending = Arc::clone(&self.pending);
        let on_drop = Arc::clone(&self.on_drop);
        let deadline = sent_at + self.timeout;

        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;

            // Only the entry this timer armed; a re-sent id has its own timer
            if pending
                .remove_if(&id, |_, at| *at == sent_at)
                .is_some()
            {
                on_drop(id);
            }
        });
    }

    /// Resolve probe `id` and return its round-trip time.
    ///
    /// Returns `None` for unknown, already resolved or expired probes. A
    /// successful acknowledgment also discards every probe sent before this
    /// one; those never fire a drop.
    pub fn acknowledge(&self, id: u32) -> Option<Duration> {
        let sent_at = *self.pending.get(&id)?;
        let rtt = sent_at.elapsed();

        // Past its deadline: leave it to the timer so the drop still fires
        if rtt >= self.timeout {
            return None;
        }

        self.pending.remove(&id)?;
        self.pending.retain(|_, at| *at > sent_at);

        Some(rtt)
    }

    /// Number of probes awaiting an answer.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Forget every pending probe. Armed timers expire silently.
    pub fn clear(&self) {
        self.pending.clear();
    }

    /// Loss timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl std::fmt::Debug for ProbeTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeTracker")
            .field("pending", &self.pending.len())
            .field("timeout", &self.timeout)
            .finish()
    }
}
