//! Adaptive probe scheduling.
//!
//! Each path owns a [`Ticker`] that decides when its next Ping goes out. The
//! interval starts short while the path is connecting, starts at the
//! keepalive cadence once it is connected, and doubles after every probe up
//! to a cap that depends on whether the path is the peer's primary.

use crate::config::ProberConfig;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, mpsc, watch};
use tokio::time::Instant;

/// Reachability of one path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PathState {
    /// No recent Pong; probing fast
    Connecting,
    /// Answered a probe within the timeout
    Connected,
}

/// Priority class of a path within its peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Priority {
    /// Best path, or every path while none is connected
    Primary,
    /// Standby path
    Sub,
}

/// Interval state machine, separate from the timer task so it can be
/// reasoned about without a clock.
#[derive(Debug, Clone)]
pub(crate) struct Schedule {
    config: ProberConfig,
    state: Option<(PathState, Priority)>,
    current: Duration,
    max: Duration,
    multiplier: u32,
}

impl Schedule {
    pub(crate) fn new(config: ProberConfig) -> Self {
        let current = config.connecting_interval;
        let max = config.primary_max_interval;
        let multiplier = config.multiplier;
        Self {
            config,
            state: None,
            current,
            max,
            multiplier,
        }
    }

    /// Apply a state change. Returns whether the timer must be reset.
    pub(crate) fn set_state(&mut self, state: PathState, priority: Priority, force: bool) -> bool {
        if !force && self.state == Some((state, priority)) {
            return false;
        }

        self.max = match priority {
            Priority::Primary => self.config.primary_max_interval,
            Priority::Sub => self.config.sub_max_interval,
        };
        self.current = match state {
            PathState::Connecting => self.config.connecting_interval,
            PathState::Connected => self.config.connected_interval,
        };
        self.multiplier = self.config.multiplier;
        self.state = Some((state, priority));

        true
    }

    pub(crate) fn current(&self) -> Duration {
        self.current
    }

    /// Back off after a fire.
    pub(crate) fn advance(&mut self) {
        self.current = self.current.saturating_mul(self.multiplier).min(self.max);
    }
}

struct TickerShared {
    schedule: Mutex<Schedule>,
    reset: Notify,
    closed: watch::Sender<bool>,
}

/// Self-adjusting probe timer for one path.
///
/// Fires once at creation, then at the scheduled interval. Each fire is a
/// `()` on the receiver returned by [`Ticker::new`]; fires are dropped rather
/// than queued if the consumer falls behind. Closing (or dropping) the ticker
/// ends the receiver.
pub struct Ticker {
    shared: Arc<TickerShared>,
}

impl Ticker {
    /// Start a ticker in `Connecting`/`Primary`.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(config: ProberConfig) -> (Self, mpsc::Receiver<()>) {
        let mut schedule = Schedule::new(config);
        schedule.set_state(PathState::Connecting, Priority::Primary, false);

        let (closed, _) = watch::channel(false);
        let shared = Arc::new(TickerShared {
            schedule: Mutex::new(schedule),
            reset: Notify::new(),
            closed,
        });

        let (wake_tx, wake_rx) = mpsc::channel(1);
        let _ = wake_tx.try_send(());

        tokio::spawn(run(Arc::clone(&shared), wake_tx));

        (Self { shared }, wake_rx)
    }

    /// Reconfigure the cadence for a new state or priority.
    ///
    /// Unchanged settings are ignored unless `force` is set. A change resets
    /// the interval and re-arms the timer relative to the previous fire.
    pub fn set_state(&self, state: PathState, priority: Priority, force: bool) {
        if self.is_closed() {
            return;
        }

        if self.shared.schedule.lock().set_state(state, priority, force) {
            self.shared.reset.notify_one();
        }
    }

    /// Interval until the next fire.
    #[must_use]
    pub fn current_interval(&self) -> Duration {
        self.shared.schedule.lock().current()
    }

    /// Stop the timer and end the fire channel. Idempotent.
    pub fn close(&self) {
        self.shared.closed.send_replace(true);
    }

    /// Whether the ticker has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.shared.closed.borrow()
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run(shared: Arc<TickerShared>, wake: mpsc::Sender<()>) {
    let mut closed = shared.closed.subscribe();
    let mut last_fire = Instant::now();

    loop {
        let deadline = last_fire + shared.schedule.lock().current();

        tokio::select! {
            _ = closed.wait_for(|closed| *closed) => break,
            () = shared.reset.notified() => continue,
            () = tokio::time::sleep_until(deadline) => {}
        }

        if let Err(mpsc::error::TrySendError::Closed(())) = wake.try_send(()) {
            break;
        }
        last_fire = Instant::now();
        shared.schedule.lock().advance();
    }
}
