//! Path sessions: probing one candidate address of one peer.
//!
//! A [`PathSession`] is a handle to a worker task that owns the path's
//! [`Ticker`] and [`ProbeTracker`]. The worker is the only writer of the
//! path's state: ticks, Pongs, probe drops and priority changes all arrive as
//! messages and are applied in order.

use crate::config::DiscoConfig;
use crate::packet::{EncryptedPacket, Header, Packet};
use crate::prober::{PathState, Priority, Ticker};
use crate::status::StatusCell;
use crate::tracker::ProbeTracker;
use burrow_crypto::{PublicKey, SharedKey};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

/// Published status of one path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathStatus {
    /// Reachability
    pub state: PathState,
    /// Last measured round-trip time; zero while connecting
    pub rtt: Duration,
}

impl Default for PathStatus {
    fn default() -> Self {
        Self {
            state: PathState::Connecting,
            rtt: Duration::ZERO,
        }
    }
}

/// Best-effort handle onto the engine's outbound queue.
#[derive(Clone, Debug)]
pub struct SendQueue {
    tx: mpsc::Sender<EncryptedPacket>,
}

impl SendQueue {
    /// Wrap the sending half of the engine's outbound channel.
    #[must_use]
    pub fn new(tx: mpsc::Sender<EncryptedPacket>) -> Self {
        Self { tx }
    }

    /// Queue a packet without waiting. Returns `false` if it was dropped.
    pub fn push(&self, packet: EncryptedPacket) -> bool {
        match self.tx.try_send(packet) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(packet)) => {
                tracing::trace!("Send queue full, dropping packet to {}", packet.addr);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// Control messages for the path worker.
#[derive(Debug, Clone, Copy)]
enum PathEvent {
    Dropped(u32),
    SetPriority(Priority),
    PingObserved,
}

/// Handle to one probed path.
///
/// Dropping the handle closes the path.
pub struct PathSession {
    id: u32,
    addr: SocketAddr,
    status: Arc<StatusCell<PathStatus>>,
    priority: Mutex<Priority>,
    inbox: mpsc::Sender<Packet>,
    events: mpsc::UnboundedSender<PathEvent>,
    closed: watch::Sender<bool>,
}

impl PathSession {
    /// Spawn the worker for path `id` towards `addr`.
    ///
    /// The first Ping goes out immediately. Must be called inside a tokio
    /// runtime.
    pub fn spawn(
        id: u32,
        addr: SocketAddr,
        local: PublicKey,
        key: SharedKey,
        sender: SendQueue,
        config: &DiscoConfig,
    ) -> Self {
        let status = Arc::new(StatusCell::new(PathStatus::default()));
        let (inbox_tx, inbox_rx) = mpsc::channel(config.inbox_capacity);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = watch::channel(false);

        let drops = events_tx.clone();
        let tracker = ProbeTracker::new(config.probe_timeout, move |probe_id| {
            let _ = drops.send(PathEvent::Dropped(probe_id));
        });
        let (ticker, ticks) = Ticker::new(config.prober.clone());

        let worker = PathWorker {
            id,
            addr,
            local,
            key,
            sender,
            ticker,
            tracker,
            next_probe: 0,
            state: PathState::Connecting,
            priority: Priority::Primary,
            reinit_cooldown: config.reinit_cooldown,
            last_reinit: None,
            status: Arc::clone(&status),
        };
        tokio::spawn(worker.run(ticks, inbox_rx, events_rx, closed_rx));

        tracing::debug!("Path {} to {} started", id, addr);

        Self {
            id,
            addr,
            status,
            priority: Mutex::new(Priority::Primary),
            inbox: inbox_tx,
            events: events_tx,
            closed: closed_tx,
        }
    }

    /// Path id, unique within the owning peer.
    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Remote address probed by this path.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Current status snapshot.
    #[must_use]
    pub fn status(&self) -> PathStatus {
        self.status.get()
    }

    /// Observable status cell.
    #[must_use]
    pub fn status_cell(&self) -> Arc<StatusCell<PathStatus>> {
        Arc::clone(&self.status)
    }

    /// Last priority assigned by the peer.
    #[must_use]
    pub fn priority(&self) -> Priority {
        *self.priority.lock()
    }

    /// Assign the priority class, which selects the probe interval cap.
    pub fn set_priority(&self, priority: Priority) {
        {
            let mut current = self.priority.lock();
            if *current == priority {
                return;
            }
            *current = priority;
        }
        let _ = self.events.send(PathEvent::SetPriority(priority));
    }

    /// Hand a decrypted Pong to the worker. Dropped if the inbox is full.
    pub fn enqueue(&self, packet: Packet) {
        if self.inbox.try_send(packet).is_err() {
            tracing::trace!("Path {} inbox full, dropping packet", self.id);
        }
    }

    /// The remote pinged us from this path's address.
    pub fn ping_observed(&self) {
        let _ = self.events.send(PathEvent::PingObserved);
    }

    /// Stop probing and close the status cell. Idempotent.
    pub fn close(&self) {
        if self.closed.send_replace(true) {
            return;
        }
        self.status.close();
        tracing::debug!("Path {} to {} closed", self.id, self.addr);
    }

    /// Whether [`PathSession::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

impl Drop for PathSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for PathSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathSession")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("status", &self.status.get())
            .field("priority", &self.priority())
            .finish()
    }
}

struct PathWorker {
    id: u32,
    addr: SocketAddr,
    local: PublicKey,
    key: SharedKey,
    sender: SendQueue,
    ticker: Ticker,
    tracker: ProbeTracker,
    next_probe: u32,
    state: PathState,
    priority: Priority,
    reinit_cooldown: Duration,
    last_reinit: Option<Instant>,
    status: Arc<StatusCell<PathStatus>>,
}

impl PathWorker {
    async fn run(
        mut self,
        mut ticks: mpsc::Receiver<()>,
        mut inbox: mpsc::Receiver<Packet>,
        mut events: mpsc::UnboundedReceiver<PathEvent>,
        mut closed: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = closed.wait_for(|closed| *closed) => break,
                Some(event) = events.recv() => self.handle_event(event),
                Some(packet) = inbox.recv() => self.handle_packet(packet),
                tick = ticks.recv() => match tick {
                    Some(()) => self.send_ping(),
                    None => break,
                },
            }
        }

        self.ticker.close();
        self.tracker.clear();
        self.status.close();
    }

    fn send_ping(&mut self) {
        let probe_id = self.next_probe;
        self.next_probe = self.next_probe.wrapping_add(1);

        let ping = Packet {
            header: Header::Ping,
            sender: self.local,
            path_id: self.id,
            probe_id,
            addr: self.addr,
        };
        let Some(sealed) = ping.seal(&self.key) else {
            tracing::warn!("Failed to seal ping for path {}", self.id);
            return;
        };

        self.tracker.add_probe(probe_id);
        self.sender.push(sealed);
        tracing::trace!("Ping {} sent on path {} to {}", probe_id, self.id, self.addr);
    }

    fn handle_packet(&mut self, packet: Packet) {
        if packet.header != Header::Pong || packet.path_id != self.id {
            return;
        }

        let Some(rtt) = self.tracker.acknowledge(packet.probe_id) else {
            tracing::trace!(
                "Ignoring stale pong {} on path {}",
                packet.probe_id,
                self.id
            );
            return;
        };

        if self.state != PathState::Connected {
            tracing::debug!("Path {} to {} connected (rtt {:?})", self.id, self.addr, rtt);
        }
        self.state = PathState::Connected;
        self.ticker.set_state(PathState::Connected, self.priority, false);
        self.status.set(PathStatus {
            state: PathState::Connected,
            rtt,
        });
    }

    fn handle_event(&mut self, event: PathEvent) {
        match event {
            PathEvent::Dropped(probe_id) => {
                if self.state == PathState::Connected {
                    tracing::debug!(
                        "Path {} to {} lost (probe {} timed out)",
                        self.id,
                        self.addr,
                        probe_id
                    );
                }
                self.state = PathState::Connecting;
                self.ticker
                    .set_state(PathState::Connecting, self.priority, false);
                self.status.set(PathStatus::default());
            }
            PathEvent::SetPriority(priority) => {
                self.priority = priority;
                self.ticker.set_state(self.state, priority, false);
            }
            PathEvent::PingObserved => {
                if self.state != PathState::Connecting {
                    return;
                }
                let now = Instant::now();
                if self
                    .last_reinit
                    .is_some_and(|at| now.duration_since(at) <= self.reinit_cooldown)
                {
                    return;
                }
                self.last_reinit = Some(now);
                tracing::trace!("Path {} reinitializing prober after inbound ping", self.id);
                self.ticker
                    .set_state(PathState::Connecting, self.priority, true);
            }
        }
    }
}
