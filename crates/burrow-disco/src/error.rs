//! Error types for the disco engine.
//!
//! Only local setup problems surface as errors. Forged or malformed packets,
//! unknown routing targets and probe loss are handled inside the engine and
//! never reach the caller.

use burrow_crypto::{CryptoError, PublicKey};
use burrow_transport::TransportError;
use std::borrow::Cow;
use thiserror::Error;

/// Errors returned by the disco engine API
#[derive(Debug, Error)]
pub enum DiscoError {
    /// Socket setup or transport failure
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Key agreement or key generation failure
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// No session exists for this peer
    #[error("Peer not found: {0}")]
    PeerNotFound(PublicKey),

    /// The engine has been closed
    #[error("Disco engine is closed")]
    Closed,

    /// `start` was called twice
    #[error("Disco engine is already running")]
    AlreadyRunning,

    /// Rejected configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(Cow<'static, str>),
}

impl DiscoError {
    /// Whether the error is caused by the engine having shut down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed | Self::Transport(TransportError::Closed))
    }
}

/// Result type for disco operations
pub type Result<T> = std::result::Result<T, DiscoError>;
