//! Async UDP transport.
//!
//! Tokio UDP socket built through `socket2` so buffer sizes and the IPv6-only
//! flag can be set before binding. Closing wakes any task parked in
//! [`Transport::recv_from`], which lets the engine's inbound loops exit, and
//! releases the socket so its port can be bound again.

use crate::TransportConfig;
use crate::transport::{StatsCounters, Transport, TransportError, TransportResult, TransportStats};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::watch;

/// Async UDP transport using Tokio.
///
/// Clones share the socket, the close signal and the counters. The socket is
/// dropped on [`Transport::close`]; operations still in flight keep it open
/// until they return.
///
/// # Examples
///
/// ```no_run
/// use burrow_transport::{AsyncUdpTransport, Transport};
/// use std::net::SocketAddr;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let addr: SocketAddr = "0.0.0.0:51820".parse()?;
/// let transport = AsyncUdpTransport::bind(addr).await?;
/// println!("Listening on {}", transport.local_addr()?);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct AsyncUdpTransport {
    socket: Arc<Mutex<Option<Arc<UdpSocket>>>>,
    local_addr: Option<SocketAddr>,
    closed: Arc<watch::Sender<bool>>,
    counters: Arc<StatsCounters>,
}

impl AsyncUdpTransport {
    /// Bind with the default [`TransportConfig`].
    ///
    /// Use port 0 for automatic port selection.
    ///
    /// # Errors
    /// Returns `TransportError::BindFailed` if the socket cannot be created or bound
    pub async fn bind<A: Into<SocketAddr>>(addr: A) -> TransportResult<Self> {
        Self::bind_with_config(addr, &TransportConfig::default()).await
    }

    /// Bind a UDP socket to `addr` with explicit socket options.
    ///
    /// # Errors
    /// Returns `TransportError::InvalidConfig` for an invalid config, or
    /// `TransportError::BindFailed` if the socket cannot be created or bound
    pub async fn bind_with_config<A: Into<SocketAddr>>(
        addr: A,
        config: &TransportConfig,
    ) -> TransportResult<Self> {
        let addr = addr.into();
        config.validate()?;

        let bind_err = |e: std::io::Error| TransportError::BindFailed {
            addr,
            reason: e.to_string(),
        };

        let domain = if addr.is_ipv4() {
            socket2::Domain::IPV4
        } else {
            socket2::Domain::IPV6
        };

        let socket =
            socket2::Socket::new(domain, socket2::Type::DGRAM, Some(socket2::Protocol::UDP))
                .map_err(bind_err)?;

        if addr.is_ipv6() {
            socket.set_only_v6(config.ipv6_only).map_err(bind_err)?;
        }

        socket
            .set_recv_buffer_size(config.recv_buffer_size)
            .map_err(bind_err)?;
        socket
            .set_send_buffer_size(config.send_buffer_size)
            .map_err(bind_err)?;

        socket.bind(&addr.into()).map_err(bind_err)?;

        // Convert to std socket, then to tokio socket
        socket.set_nonblocking(true).map_err(bind_err)?;
        let std_socket: std::net::UdpSocket = socket.into();
        let socket = UdpSocket::from_std(std_socket).map_err(bind_err)?;

        tracing::debug!(
            "Bound UDP transport on {}",
            socket.local_addr().unwrap_or(addr)
        );

        Ok(Self::from_socket(socket))
    }

    /// Wrap an already-bound Tokio UdpSocket.
    #[must_use]
    pub fn from_socket(socket: UdpSocket) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            local_addr: socket.local_addr().ok(),
            socket: Arc::new(Mutex::new(Some(Arc::new(socket)))),
            closed: Arc::new(closed),
            counters: Arc::new(StatsCounters::default()),
        }
    }

    fn socket(&self) -> TransportResult<Arc<UdpSocket>> {
        self.socket.lock().clone().ok_or(TransportError::Closed)
    }
}

#[async_trait]
impl Transport for AsyncUdpTransport {
    async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> TransportResult<usize> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let socket = self.socket()?;

        match socket.send_to(buf, addr).await {
            Ok(sent) => {
                self.counters.record_send(sent);
                Ok(sent)
            }
            Err(e) => {
                self.counters.record_send_error();
                Err(TransportError::Io(e))
            }
        }
    }

    async fn recv_from(&self, buf: &mut [u8]) -> TransportResult<(usize, SocketAddr)> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Err(TransportError::Closed);
        }
        let socket = self.socket()?;

        tokio::select! {
            result = socket.recv_from(buf) => match result {
                Ok((size, addr)) => {
                    self.counters.record_recv(size);
                    Ok((size, addr))
                }
                Err(e) => {
                    self.counters.record_recv_error();
                    Err(TransportError::Io(e))
                }
            },
            _ = closed.wait_for(|closed| *closed) => Err(TransportError::Closed),
        }
    }

    fn local_addr(&self) -> TransportResult<SocketAddr> {
        match self.local_addr {
            Some(addr) => Ok(addr),
            None => self.socket()?.local_addr().map_err(TransportError::Io),
        }
    }

    async fn close(&self) -> TransportResult<()> {
        self.closed.send_replace(true);
        self.socket.lock().take();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    fn stats(&self) -> TransportStats {
        self.counters.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn loopback() -> AsyncUdpTransport {
        AsyncUdpTransport::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_udp_bind() {
        let transport = loopback().await;
        let bound_addr = transport.local_addr().unwrap();
        assert_ne!(bound_addr.port(), 0);
        assert!(bound_addr.is_ipv4());
    }

    #[tokio::test]
    async fn test_udp_bind_rejects_invalid_config() {
        let config = TransportConfig {
            recv_buffer_size: 0,
            ..Default::default()
        };
        let result =
            AsyncUdpTransport::bind_with_config(SocketAddr::from(([127, 0, 0, 1], 0)), &config)
                .await;
        assert!(matches!(result, Err(TransportError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_udp_bind_port_in_use() {
        let first = loopback().await;
        let taken = first.local_addr().unwrap();

        let result = AsyncUdpTransport::bind(taken).await;
        assert!(matches!(result, Err(TransportError::BindFailed { addr, .. }) if addr == taken));
    }

    #[tokio::test]
    async fn test_udp_send_recv_and_stats() {
        let server = loopback().await;
        let server_addr = server.local_addr().unwrap();
        let client = loopback().await;

        assert_eq!(client.stats(), TransportStats::default());

        let sent = client.send_to(b"disco ping", server_addr).await.unwrap();
        assert_eq!(sent, 10);

        let mut buf = vec![0u8; 1500];
        let (size, from) = timeout(Duration::from_secs(1), server.recv_from(&mut buf))
            .await
            .expect("Timeout")
            .unwrap();

        assert_eq!(&buf[..size], b"disco ping");
        assert_eq!(from, client.local_addr().unwrap());

        let client_stats = client.stats();
        assert_eq!(client_stats.packets_sent, 1);
        assert_eq!(client_stats.bytes_sent, 10);

        let server_stats = server.stats();
        assert_eq!(server_stats.packets_received, 1);
        assert_eq!(server_stats.bytes_received, 10);
    }

    #[tokio::test]
    async fn test_udp_clones_share_state() {
        let server = loopback().await;
        let server_addr = server.local_addr().unwrap();
        let client = loopback().await;

        let handles: Vec<_> = (0..5)
            .map(|i| {
                let client = client.clone();
                tokio::spawn(async move {
                    let data = format!("probe {i}");
                    client.send_to(data.as_bytes(), server_addr).await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let mut buf = vec![0u8; 1500];
        for _ in 0..5 {
            timeout(Duration::from_secs(1), server.recv_from(&mut buf))
                .await
                .expect("Timeout")
                .unwrap();
        }

        assert_eq!(client.stats().packets_sent, 5);

        let other = client.clone();
        other.close().await.unwrap();
        assert!(client.is_closed());
    }

    #[tokio::test]
    async fn test_udp_close_rejects_operations() {
        let transport = loopback().await;
        assert!(!transport.is_closed());

        transport.close().await.unwrap();
        transport.close().await.unwrap();
        assert!(transport.is_closed());

        let result = transport
            .send_to(b"test", "127.0.0.1:1234".parse().unwrap())
            .await;
        assert!(matches!(result, Err(TransportError::Closed)));

        let mut buf = vec![0u8; 1500];
        let result = transport.recv_from(&mut buf).await;
        assert!(matches!(result, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn test_udp_close_releases_port() {
        let transport = loopback().await;
        let addr = transport.local_addr().unwrap();

        transport.close().await.unwrap();
        assert_eq!(transport.local_addr().unwrap(), addr);

        let rebound = AsyncUdpTransport::bind(addr).await.unwrap();
        assert_eq!(rebound.local_addr().unwrap(), addr);
    }

    #[tokio::test]
    async fn test_udp_close_wakes_pending_recv() {
        let transport = loopback().await;
        let reader = transport.clone();

        let pending = tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            reader.recv_from(&mut buf).await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        transport.close().await.unwrap();

        let result = timeout(Duration::from_secs(1), pending)
            .await
            .expect("recv_from did not return after close")
            .unwrap();
        assert!(matches!(result, Err(TransportError::Closed)));
    }
}
