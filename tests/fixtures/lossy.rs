//! Transport wrapper that can black-hole traffic and records what it sends.

use async_trait::async_trait;
use burrow_transport::{
    AsyncUdpTransport, Transport, TransportResult, TransportStats,
};
use parking_lot::Mutex;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// UDP transport whose link can be cut and restored at runtime.
///
/// While blocked, outbound datagrams are reported as sent but never leave
/// the host, and inbound datagrams are discarded on arrival. Every send
/// attempt is recorded regardless of the link state.
pub struct LossyTransport {
    inner: AsyncUdpTransport,
    blocked: AtomicBool,
    sent: Mutex<Vec<(Vec<u8>, SocketAddr)>>,
}

impl LossyTransport {
    /// Bind on an ephemeral IPv4 loopback port.
    pub async fn bind_loopback() -> TransportResult<Arc<Self>> {
        let inner = AsyncUdpTransport::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        Ok(Arc::new(Self {
            inner,
            blocked: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
        }))
    }

    /// Cut the link in both directions.
    pub fn block(&self) {
        self.blocked.store(true, Ordering::SeqCst);
    }

    /// Restore the link.
    pub fn unblock(&self) {
        self.blocked.store(false, Ordering::SeqCst);
    }

    /// Drain the record of send attempts.
    pub fn take_sent(&self) -> Vec<(Vec<u8>, SocketAddr)> {
        std::mem::take(&mut *self.sent.lock())
    }

    fn is_blocked(&self) -> bool {
        self.blocked.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for LossyTransport {
    async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> TransportResult<usize> {
        self.sent.lock().push((buf.to_vec(), addr));

        if self.is_blocked() {
            tracing::trace!("Link blocked, dropping datagram to {}", addr);
            return Ok(buf.len());
        }
        self.inner.send_to(buf, addr).await
    }

    async fn recv_from(&self, buf: &mut [u8]) -> TransportResult<(usize, SocketAddr)> {
        loop {
            let (len, from) = self.inner.recv_from(buf).await?;
            if !self.is_blocked() {
                return Ok((len, from));
            }
            tracing::trace!("Link blocked, dropping datagram from {}", from);
        }
    }

    fn local_addr(&self) -> TransportResult<SocketAddr> {
        self.inner.local_addr()
    }

    async fn close(&self) -> TransportResult<()> {
        self.inner.close().await
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    fn stats(&self) -> TransportStats {
        self.inner.stats()
    }
}
