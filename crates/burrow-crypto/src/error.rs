//! Cryptographic error types.

use thiserror::Error;

/// Cryptographic errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// AEAD encryption failed
    #[error("encryption failed")]
    EncryptionFailed,

    /// AEAD decryption failed (authentication failure)
    #[error("decryption failed: authentication failure")]
    DecryptionFailed,

    /// Invalid key length
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Key text is not valid base64
    #[error("invalid key encoding: {0}")]
    InvalidKeyEncoding(String),

    /// Sealed message shorter than its nonce and tag
    #[error("sealed message too short: {0} bytes")]
    MessageTooShort(usize),

    /// Random number generation failed
    #[error("random number generation failed")]
    RandomFailed,

    /// Peer public key is a low-order point
    #[error("invalid public key")]
    InvalidPublicKey,
}
