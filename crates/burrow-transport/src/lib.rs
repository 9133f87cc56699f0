//! # Burrow Transport
//!
//! Datagram transport layer for the Burrow disco engine.
//!
//! This crate provides:
//! - The [`Transport`](transport::Transport) trait the engine sends and
//!   receives through
//! - A tokio UDP backend with socket buffer tuning and traffic counters
//!
//! The engine never touches sockets directly, so a packet-capture connection
//! or a test double can stand in for UDP.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod transport;
pub mod udp_async;

pub use transport::{Transport, TransportError, TransportResult, TransportStats};
pub use udp_async::AsyncUdpTransport;

/// Largest datagram the disco engine reads in one call.
pub const MAX_DATAGRAM_SIZE: usize = 1500;

/// Transport configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Receive buffer size (SO_RCVBUF)
    pub recv_buffer_size: usize,
    /// Send buffer size (SO_SNDBUF)
    pub send_buffer_size: usize,
    /// Restrict IPv6 sockets to IPv6 traffic so a v4 socket can share the port
    pub ipv6_only: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            recv_buffer_size: 256 * 1024,
            send_buffer_size: 256 * 1024,
            ipv6_only: true,
        }
    }
}

impl TransportConfig {
    /// Check that the buffer sizes are usable.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidConfig`] for a zero buffer size.
    pub fn validate(&self) -> TransportResult<()> {
        if self.recv_buffer_size == 0 {
            return Err(TransportError::InvalidConfig(
                "recv_buffer_size must be non-zero".to_string(),
            ));
        }
        if self.send_buffer_size == 0 {
            return Err(TransportError::InvalidConfig(
                "send_buffer_size must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
