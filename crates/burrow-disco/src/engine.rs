//! The disco engine.
//!
//! [`Disco`] owns the node's disco key, one transport per address family and
//! the peer table. Inbound datagrams are routed to peer sessions by their
//! cleartext sender key; all outbound packets funnel through one queue and a
//! single sender task.

use crate::config::DiscoConfig;
use crate::error::{DiscoError, Result};
use crate::packet::EncryptedPacket;
use crate::path::SendQueue;
use crate::peer::{PeerSession, PeerStatus, WeakPeerSession};
use crate::status::StatusCell;
use burrow_crypto::{PrivateKey, PublicKey};
use burrow_transport::{
    AsyncUdpTransport, MAX_DATAGRAM_SIZE, Transport, TransportError, TransportStats,
};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Engine-wide status: aggregated status of every peer.
pub type PeerStatuses = HashMap<PublicKey, PeerStatus>;

struct DiscoInner {
    private_key: PrivateKey,
    public_key: PublicKey,
    config: Arc<DiscoConfig>,

    v4: Option<Arc<dyn Transport>>,
    v6: Option<Arc<dyn Transport>>,

    peers: DashMap<PublicKey, PeerSession>,
    statuses: StatusCell<PeerStatuses>,

    send_queue: SendQueue,
    send_rx: Mutex<Option<mpsc::Receiver<EncryptedPacket>>>,

    running: AtomicBool,
    closed: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Disco engine handle.
///
/// Cheap to clone; all clones drive the same engine. Call [`Disco::close`] to
/// stop it; background tasks keep the engine alive until then.
///
/// # Example
///
/// ```no_run
/// use burrow_crypto::PrivateKey;
/// use burrow_disco::{Disco, DiscoConfig};
///
/// # async fn example(peer: burrow_crypto::PublicKey) -> burrow_disco::Result<()> {
/// let disco = Disco::bind(PrivateKey::generate()?, DiscoConfig::default()).await?;
/// disco.start()?;
///
/// disco.add_peer(peer)?;
/// disco.set_endpoints(&peer, &["203.0.113.5:51821".parse().unwrap()])?;
///
/// disco.notify_statuses(|statuses| {
///     for (key, status) in &statuses {
///         println!("{key}: {:?}", status.active);
///     }
/// });
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Disco {
    inner: Arc<DiscoInner>,
}

impl Disco {
    /// Bind UDP sockets on `config.port` and build an engine on them.
    ///
    /// The IPv6 socket shares the IPv4 socket's port. Hosts without IPv6
    /// support run IPv4-only.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoError::InvalidConfig`] for a bad config and
    /// [`DiscoError::Transport`] if the IPv4 socket cannot be bound.
    pub async fn bind(private_key: PrivateKey, config: DiscoConfig) -> Result<Self> {
        config.validate()?;

        let v4 = AsyncUdpTransport::bind_with_config(
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.port)),
            &config.transport,
        )
        .await?;
        let port = v4.local_addr()?.port();

        let v6 = if config.enable_ipv6 {
            match AsyncUdpTransport::bind_with_config(
                SocketAddr::from((Ipv6Addr::UNSPECIFIED, port)),
                &config.transport,
            )
            .await
            {
                Ok(v6) => Some(Arc::new(v6) as Arc<dyn Transport>),
                Err(e) => {
                    tracing::warn!("IPv6 disco socket unavailable, running IPv4-only: {}", e);
                    None
                }
            }
        } else {
            None
        };

        Self::with_transports(private_key, Some(Arc::new(v4) as Arc<dyn Transport>), v6, config)
    }

    /// Build an engine on caller-supplied transports.
    ///
    /// Outbound packets use `v4` or `v6` by destination family.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoError::InvalidConfig`] for a bad config or when both
    /// transports are missing.
    pub fn with_transports(
        private_key: PrivateKey,
        v4: Option<Arc<dyn Transport>>,
        v6: Option<Arc<dyn Transport>>,
        config: DiscoConfig,
    ) -> Result<Self> {
        config.validate()?;
        if v4.is_none() && v6.is_none() {
            return Err(DiscoError::InvalidConfig(
                "at least one transport is required".into(),
            ));
        }

        let (send_tx, send_rx) = mpsc::channel(config.send_queue_capacity);
        let (closed, _) = watch::channel(false);
        let public_key = private_key.public_key();

        Ok(Self {
            inner: Arc::new(DiscoInner {
                private_key,
                public_key,
                config: Arc::new(config),
                v4,
                v6,
                peers: DashMap::new(),
                statuses: StatusCell::new(PeerStatuses::new()),
                send_queue: SendQueue::new(send_tx),
                send_rx: Mutex::new(Some(send_rx)),
                running: AtomicBool::new(false),
                closed,
                tasks: Mutex::new(Vec::new()),
            }),
        })
    }

    /// This node's disco public key.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        self.inner.public_key
    }

    /// Local addresses of the engine's transports.
    #[must_use]
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.inner
            .transports()
            .filter_map(|transport| transport.local_addr().ok())
            .collect()
    }

    /// Summed traffic counters of all transports.
    #[must_use]
    pub fn transport_stats(&self) -> TransportStats {
        self.inner
            .transports()
            .map(|transport| transport.stats())
            .fold(TransportStats::default(), |acc, s| TransportStats {
                bytes_sent: acc.bytes_sent + s.bytes_sent,
                bytes_received: acc.bytes_received + s.bytes_received,
                packets_sent: acc.packets_sent + s.packets_sent,
                packets_received: acc.packets_received + s.packets_received,
                send_errors: acc.send_errors + s.send_errors,
                recv_errors: acc.recv_errors + s.recv_errors,
            })
    }

    /// Spawn the sender task and one receiver task per transport.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoError::Closed`] after [`Disco::close`] and
    /// [`DiscoError::AlreadyRunning`] on a second call.
    pub fn start(&self) -> Result<()> {
        if self.is_closed() {
            return Err(DiscoError::Closed);
        }
        if self
            .inner
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(DiscoError::AlreadyRunning);
        }

        let send_rx = self
            .inner
            .send_rx
            .lock()
            .take()
            .ok_or(DiscoError::AlreadyRunning)?;

        let mut tasks = self.inner.tasks.lock();
        tasks.push(tokio::spawn(run_sender(Arc::clone(&self.inner), send_rx)));
        for transport in self.inner.transports() {
            tasks.push(tokio::spawn(run_receiver(
                Arc::clone(&self.inner),
                Arc::clone(transport),
            )));
        }

        tracing::info!(
            "Disco started: {} on {:?}",
            self.inner.public_key,
            self.local_addrs()
        );
        Ok(())
    }

    /// Whether [`Disco::start`] has been called.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Get or create the session for `key`.
    ///
    /// At most one session exists per key; calling this again returns the
    /// existing one.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoError::Closed`] after [`Disco::close`] and
    /// [`DiscoError::Crypto`] if `key` is not a usable X25519 public key.
    pub fn add_peer(&self, key: PublicKey) -> Result<PeerSession> {
        if self.is_closed() {
            return Err(DiscoError::Closed);
        }

        let peer = match self.inner.peers.entry(key) {
            Entry::Occupied(entry) => return Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                let peer = self.inner.spawn_peer(key)?;
                entry.insert(peer.clone());
                peer
            }
        };

        let weak = Arc::downgrade(&self.inner);
        let session = peer.downgrade();
        peer.notify_status(move |status| {
            if let Some(inner) = weak.upgrade() {
                inner.publish_peer_status(&key, &session, status);
            }
        });

        // Closed while we were inserting
        if self.is_closed() {
            peer.close();
            return Err(DiscoError::Closed);
        }

        tracing::info!("Added peer {}", key);
        Ok(peer)
    }

    /// Close and remove the session for `key`. Returns whether one existed.
    pub fn remove_peer(&self, key: &PublicKey) -> bool {
        match self.inner.peers.remove(key) {
            Some((_, peer)) => {
                peer.close();
                self.inner.statuses.update(|all| all.remove(key).is_some());
                tracing::info!("Removed peer {}", key);
                true
            }
            None => false,
        }
    }

    /// Session for `key`, if any.
    #[must_use]
    pub fn peer(&self, key: &PublicKey) -> Option<PeerSession> {
        self.inner.peers.get(key).map(|peer| peer.clone())
    }

    /// Keys of all peers.
    #[must_use]
    pub fn peers(&self) -> Vec<PublicKey> {
        self.inner.peers.iter().map(|entry| *entry.key()).collect()
    }

    /// Replace the candidate endpoints of `key`.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoError::PeerNotFound`] if `key` was never added.
    pub fn set_endpoints(&self, key: &PublicKey, endpoints: &[SocketAddr]) -> Result<()> {
        let peer = self.peer(key).ok_or(DiscoError::PeerNotFound(*key))?;
        peer.set_endpoints(endpoints);
        Ok(())
    }

    /// Snapshot of every peer's status.
    #[must_use]
    pub fn statuses(&self) -> PeerStatuses {
        self.inner.statuses.get()
    }

    /// Call `f` with all peer statuses now and on every change until the
    /// engine closes.
    pub fn notify_statuses<F>(&self, f: F) -> JoinHandle<()>
    where
        F: FnMut(PeerStatuses) + Send + 'static,
    {
        self.inner.statuses.notify(f)
    }

    /// Close transports, peer sessions and status subscriptions, then wait
    /// for background tasks to finish. Idempotent.
    pub async fn close(&self) {
        if self.inner.closed.send_replace(true) {
            return;
        }

        for transport in self.inner.transports() {
            if let Err(e) = transport.close().await {
                tracing::warn!("Error closing transport: {}", e);
            }
        }

        let peers: Vec<PeerSession> = self
            .inner
            .peers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.inner.peers.clear();
        for peer in peers {
            peer.close();
        }
        self.inner.statuses.close();

        let tasks: Vec<JoinHandle<()>> = self.inner.tasks.lock().drain(..).collect();
        for task in tasks {
            let abort = task.abort_handle();
            if tokio::time::timeout(Duration::from_secs(1), task).await.is_err() {
                tracing::warn!("Disco task did not stop in time, aborting");
                abort.abort();
            }
        }

        tracing::info!("Disco stopped: {}", self.inner.public_key);
    }

    /// Whether [`Disco::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.inner.closed.borrow()
    }
}

impl std::fmt::Debug for Disco {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Disco")
            .field("public_key", &self.inner.public_key)
            .field("local_addrs", &self.local_addrs())
            .field("peers", &self.inner.peers.len())
            .finish()
    }
}

impl DiscoInner {
    fn transports(&self) -> impl Iterator<Item = &Arc<dyn Transport>> {
        self.v4.iter().chain(self.v6.iter())
    }

    fn transport_for(&self, addr: &SocketAddr) -> Option<&Arc<dyn Transport>> {
        if addr.is_ipv4() {
            self.v4.as_ref()
        } else {
            self.v6.as_ref()
        }
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Start a session for `key` that drops itself from the table on close.
    fn spawn_peer(self: &Arc<Self>, key: PublicKey) -> Result<PeerSession> {
        let peer = PeerSession::spawn(
            &self.private_key,
            key,
            self.send_queue.clone(),
            Arc::clone(&self.config),
        )?;

        let weak = Arc::downgrade(self);
        peer.set_on_close(move || {
            if let Some(inner) = weak.upgrade() {
                inner.forget_peer(&key);
            }
        });
        Ok(peer)
    }

    /// Record `status` for `key` if `session` is still the one in the table.
    fn publish_peer_status(
        &self,
        key: &PublicKey,
        session: &WeakPeerSession,
        status: PeerStatus,
    ) {
        let Some(current) = self.peers.get(key) else {
            return;
        };
        if session.is(&current) {
            self.statuses.update(|all| all.insert(*key, status) != Some(status));
        }
    }

    /// Drop a session that closed itself, unless a live one replaced it.
    fn forget_peer(&self, key: &PublicKey) {
        if self
            .peers
            .remove_if(key, |_, current| current.is_closed())
            .is_some()
        {
            self.statuses.update(|all| all.remove(key).is_some());
        }
    }
}

async fn run_sender(inner: Arc<DiscoInner>, mut queue: mpsc::Receiver<EncryptedPacket>) {
    let mut closed = inner.closed.subscribe();

    loop {
        let packet = tokio::select! {
            _ = closed.wait_for(|closed| *closed) => break,
            packet = queue.recv() => match packet {
                Some(packet) => packet,
                None => break,
            },
        };

        let Some(transport) = inner.transport_for(&packet.addr) else {
            tracing::trace!("No transport for {}, dropping packet", packet.addr);
            continue;
        };

        if let Err(e) = transport.send_to(&packet.to_bytes(), packet.addr).await {
            if matches!(e, TransportError::Closed) {
                break;
            }
            tracing::warn!("Sending disco packet to {} failed: {}", packet.addr, e);
        }
    }

    tracing::debug!("Disco sender stopped");
}

async fn run_receiver(inner: Arc<DiscoInner>, transport: Arc<dyn Transport>) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    loop {
        let (len, from) = match transport.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(TransportError::Closed) => break,
            Err(e) => {
                if inner.is_closed() {
                    break;
                }
                tracing::warn!("Reading disco packet failed: {}", e);
                continue;
            }
        };

        let from = SocketAddr::new(from.ip().to_canonical(), from.port());
        let Some(packet) = EncryptedPacket::parse(&buf[..len], from) else {
            tracing::trace!("Dropping malformed datagram from {}", from);
            continue;
        };

        match inner.peers.get(&packet.sender) {
            Some(peer) => peer.enqueue(packet),
            None => tracing::trace!("Dropping packet from unknown peer {}", packet.sender),
        }
    }

    tracing::debug!("Disco receiver stopped");
}
