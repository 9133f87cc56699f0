//! Peer sessions: all candidate paths to one remote node.
//!
//! A [`PeerSession`] decrypts every packet from its peer, answers Pings,
//! routes Pongs to the path named by their echoed path id, and folds the
//! statuses of its paths into a single best-path status.

use crate::config::DiscoConfig;
use crate::packet::{EncryptedPacket, Header, Packet};
use crate::path::{PathSession, PathStatus, SendQueue};
use crate::prober::{PathState, Priority};
use crate::status::StatusCell;
use burrow_crypto::{CryptoError, PrivateKey, PublicKey, SharedKey};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// The path a peer is currently reachable on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActivePath {
    /// Remote address of the path
    pub addr: SocketAddr,
    /// Its last measured round-trip time
    pub rtt: Duration,
}

/// Aggregated status of one peer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PeerStatus {
    /// Best connected path, or `None` when no path is reachable
    pub active: Option<ActivePath>,
}

impl PeerStatus {
    /// Whether any path is reachable.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.active.is_some()
    }
}

type CloseHook = Box<dyn FnOnce() + Send>;

pub(crate) struct PeerInner {
    remote: PublicKey,
    local: PublicKey,
    key: SharedKey,
    sender: SendQueue,
    config: Arc<DiscoConfig>,

    next_path_id: AtomicU32,
    paths_by_addr: DashMap<SocketAddr, u32>,
    paths: DashMap<u32, PathSession>,
    path_statuses: DashMap<u32, PathStatus>,

    status: StatusCell<PeerStatus>,
    aggregate_lock: Mutex<()>,
    endpoints_lock: Mutex<()>,

    inbox: mpsc::Sender<EncryptedPacket>,
    closed: watch::Sender<bool>,
    on_close: Mutex<Option<CloseHook>>,
}

/// Session with one remote peer.
///
/// Cheap to clone; all clones refer to the same session.
#[derive(Clone)]
pub struct PeerSession {
    inner: Arc<PeerInner>,
}

impl PeerSession {
    /// Derive the shared key with `remote` and start the receive task.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidPublicKey`] if `remote` is a low-order point.
    pub(crate) fn spawn(
        local: &PrivateKey,
        remote: PublicKey,
        sender: SendQueue,
        config: Arc<DiscoConfig>,
    ) -> Result<Self, CryptoError> {
        let key = local.shared_key(&remote)?;
        let (inbox_tx, inbox_rx) = mpsc::channel(config.inbox_capacity);
        let (closed_tx, closed_rx) = watch::channel(false);

        let inner = Arc::new(PeerInner {
            remote,
            local: local.public_key(),
            key,
            sender,
            config,
            next_path_id: AtomicU32::new(1),
            paths_by_addr: DashMap::new(),
            paths: DashMap::new(),
            path_statuses: DashMap::new(),
            status: StatusCell::new(PeerStatus::default()),
            aggregate_lock: Mutex::new(()),
            endpoints_lock: Mutex::new(()),
            inbox: inbox_tx,
            closed: closed_tx,
            on_close: Mutex::new(None),
        });

        tokio::spawn(run_receiver(Arc::downgrade(&inner), inbox_rx, closed_rx));

        tracing::debug!("Peer session {} started", remote);
        Ok(Self { inner })
    }

    /// Register a callback run once when the session closes.
    pub(crate) fn set_on_close(&self, hook: impl FnOnce() + Send + 'static) {
        *self.inner.on_close.lock() = Some(Box::new(hook));
    }

    /// Whether both handles refer to the same session.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Non-owning handle that can later be matched against the peer table.
    pub(crate) fn downgrade(&self) -> WeakPeerSession {
        WeakPeerSession(Arc::downgrade(&self.inner))
    }

    /// Remote peer's public key.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        self.inner.remote
    }

    /// Current aggregated status.
    #[must_use]
    pub fn status(&self) -> PeerStatus {
        self.inner.status.get()
    }

    /// Call `f` with the current status and on every change until the
    /// session closes.
    pub fn notify_status<F>(&self, f: F) -> JoinHandle<()>
    where
        F: FnMut(PeerStatus) + Send + 'static,
    {
        self.inner.status.notify(f)
    }

    /// Addresses currently probed, ordered by path id.
    #[must_use]
    pub fn endpoints(&self) -> Vec<SocketAddr> {
        let mut paths: Vec<(u32, SocketAddr)> = self
            .inner
            .paths
            .iter()
            .map(|entry| (*entry.key(), entry.value().addr()))
            .collect();
        paths.sort_unstable();
        paths.into_iter().map(|(_, addr)| addr).collect()
    }

    /// Id, address, status and priority of every path, ordered by path id.
    #[must_use]
    pub fn paths(&self) -> Vec<(u32, SocketAddr, PathStatus, Priority)> {
        let mut paths: Vec<_> = self
            .inner
            .paths
            .iter()
            .map(|entry| {
                let path = entry.value();
                (path.id(), path.addr(), path.status(), path.priority())
            })
            .collect();
        paths.sort_unstable_by_key(|(id, ..)| *id);
        paths
    }

    /// Replace the candidate address set.
    ///
    /// New addresses get a fresh path id and start probing at once; addresses
    /// no longer listed have their paths closed. Duplicates are collapsed and
    /// IPv4-mapped IPv6 addresses are treated as IPv4.
    pub fn set_endpoints(&self, endpoints: &[SocketAddr]) {
        let inner = &self.inner;
        if inner.is_closed() {
            return;
        }

        let _guard = inner.endpoints_lock.lock();
        let wanted: HashSet<SocketAddr> = endpoints.iter().copied().map(canonical).collect();

        for addr in endpoints.iter().copied().map(canonical) {
            if inner.paths_by_addr.contains_key(&addr) {
                continue;
            }
            let id = inner.next_path_id.fetch_add(1, Ordering::Relaxed);
            let path = PathSession::spawn(
                id,
                addr,
                inner.local,
                inner.key.clone(),
                inner.sender.clone(),
                &inner.config,
            );

            // Registered before subscribing so the first snapshot is not ignored
            let status = path.status_cell();
            inner.paths.insert(id, path);
            inner.paths_by_addr.insert(addr, id);

            let weak = Arc::downgrade(&self.inner);
            status.notify(move |path_status| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_path_status(id, path_status);
                }
            });
        }

        let stale: Vec<(SocketAddr, u32)> = inner
            .paths_by_addr
            .iter()
            .filter(|entry| !wanted.contains(entry.key()))
            .map(|entry| (*entry.key(), *entry.value()))
            .collect();

        for (addr, id) in &stale {
            inner.paths_by_addr.remove(addr);
            inner.path_statuses.remove(id);
            if let Some((_, path)) = inner.paths.remove(id) {
                path.close();
            }
        }

        if !stale.is_empty() {
            inner.aggregate();
        }

        // Lost a race with close(): do not leave paths running
        if inner.is_closed() {
            inner.close_all_paths();
        }
    }

    /// Hand a datagram from this peer to the receive task. Dropped if the
    /// inbox is full.
    pub fn enqueue(&self, packet: EncryptedPacket) {
        if self.inner.inbox.try_send(packet).is_err() {
            tracing::trace!("Peer {} inbox full, dropping packet", self.inner.remote);
        }
    }

    /// Close every path, end status subscriptions and run the close hook.
    /// Idempotent.
    pub fn close(&self) {
        self.inner.close();
    }

    /// Whether [`PeerSession::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

/// Identity of a session, held by callbacks that must not keep it alive.
#[derive(Clone)]
pub(crate) struct WeakPeerSession(Weak<PeerInner>);

impl WeakPeerSession {
    /// Whether `peer` is the session this handle was taken from.
    pub(crate) fn is(&self, peer: &PeerSession) -> bool {
        std::ptr::eq(self.0.as_ptr(), Arc::as_ptr(&peer.inner))
    }
}

impl std::fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerSession")
            .field("remote", &self.inner.remote)
            .field("paths", &self.inner.paths.len())
            .field("status", &self.inner.status.get())
            .finish()
    }
}

impl PeerInner {
    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    fn close(&self) {
        if self.closed.send_replace(true) {
            return;
        }

        self.close_all_paths();
        self.status.close();

        let hook = self.on_close.lock().take();
        if let Some(hook) = hook {
            hook();
        }

        tracing::debug!("Peer session {} closed", self.remote);
    }

    fn close_all_paths(&self) {
        let ids: Vec<u32> = self.paths.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, path)) = self.paths.remove(&id) {
                self.paths_by_addr.remove(&path.addr());
                path.close();
            }
        }
        self.path_statuses.clear();
    }

    fn on_path_status(&self, id: u32, status: PathStatus) {
        if !self.paths.contains_key(&id) {
            return;
        }
        self.path_statuses.insert(id, status);
        self.aggregate();
    }

    /// Pick the best connected path, assign priorities and publish.
    fn aggregate(&self) {
        let _guard = self.aggregate_lock.lock();

        let candidates: Vec<(u32, SocketAddr, PathStatus)> = self
            .path_statuses
            .iter()
            .filter_map(|entry| {
                let id = *entry.key();
                let addr = self.paths.get(&id)?.addr();
                Some((id, addr, *entry.value()))
            })
            .collect();
        let best = select_best(candidates);

        for entry in self.paths.iter() {
            let priority = match best {
                Some((id, _)) if id != *entry.key() => Priority::Sub,
                _ => Priority::Primary,
            };
            entry.value().set_priority(priority);
        }

        let status = PeerStatus {
            active: best.map(|(_, active)| active),
        };
        if self.status.set(status) {
            match status.active {
                Some(active) => tracing::info!(
                    "Peer {} active path {} (rtt {:?})",
                    self.remote,
                    active.addr,
                    active.rtt
                ),
                None => tracing::info!("Peer {} has no active path", self.remote),
            }
        }
    }

    fn handle_packet(&self, encrypted: EncryptedPacket) {
        let Some(packet) = encrypted.open(&self.key) else {
            tracing::trace!(
                "Dropping undecryptable packet from {} ({})",
                encrypted.addr,
                self.remote
            );
            return;
        };

        match packet.header {
            Header::Ping => self.handle_ping(packet),
            Header::Pong => match self.paths.get(&packet.path_id) {
                Some(path) => path.enqueue(packet),
                None => tracing::trace!(
                    "Dropping pong for unknown path {} from {}",
                    packet.path_id,
                    packet.addr
                ),
            },
        }
    }

    fn handle_ping(&self, ping: Packet) {
        match ping.pong(self.local).seal(&self.key) {
            Some(pong) => {
                self.sender.push(pong);
            }
            None => tracing::warn!("Failed to seal pong for {}", self.remote),
        }

        let Some(id) = self.paths_by_addr.get(&ping.addr).map(|id| *id) else {
            return;
        };
        if let Some(path) = self.paths.get(&id) {
            path.ping_observed();
        }
    }
}

async fn run_receiver(
    inner: Weak<PeerInner>,
    mut inbox: mpsc::Receiver<EncryptedPacket>,
    mut closed: watch::Receiver<bool>,
) {
    loop {
        let packet = tokio::select! {
            _ = closed.wait_for(|closed| *closed) => break,
            packet = inbox.recv() => match packet {
                Some(packet) => packet,
                None => break,
            },
        };

        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.handle_packet(packet);
    }
}

/// Connected path with the lowest RTT; ties go to the lowest path id.
fn select_best(
    candidates: impl IntoIterator<Item = (u32, SocketAddr, PathStatus)>,
) -> Option<(u32, ActivePath)> {
    candidates
        .into_iter()
        .filter(|(_, _, status)| status.state == PathState::Connected)
        .min_by_key(|(id, _, status)| (status.rtt, *id))
        .map(|(id, addr, status)| {
            (
                id,
                ActivePath {
                    addr,
                    rtt: status.rtt,
                },
            )
        })
}

fn canonical(addr: SocketAddr) -> SocketAddr {
    SocketAddr::new(addr.ip().to_canonical(), addr.port())
}
