//! X25519 disco keys (RFC 7748).
//!
//! Provides the node keypair used only for the disco side-channel:
//! - Low-order point rejection
//! - Automatic key clamping (RFC 7748)
//! - Zeroization of sensitive data
//! - Standard base64 text form (44 characters) for configs and logs

use crate::CryptoError;
use crate::aead::SharedKey;
use crate::random::random_32;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use std::fmt;
use std::str::FromStr;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// X25519 private key (32 bytes).
#[derive(Clone, ZeroizeOnDrop, Zeroize)]
pub struct PrivateKey(x25519_dalek::StaticSecret);

/// X25519 public key (32 bytes).
///
/// Stored as raw bytes so it can key hash maps and travel in cleartext packet
/// headers.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicKey([u8; 32]);

/// X25519 shared secret (32 bytes).
#[derive(ZeroizeOnDrop, Zeroize)]
pub struct SharedSecret(x25519_dalek::SharedSecret);

impl PrivateKey {
    /// Generate a new random private key from the OS CSPRNG.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::RandomFailed`] if the CSPRNG fails.
    pub fn generate() -> Result<Self, CryptoError> {
        let mut bytes = random_32()?;
        let key = Self::from_bytes(bytes);
        bytes.zeroize();
        Ok(key)
    }

    /// Derive the public key from this private key.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        PublicKey(*x25519_dalek::PublicKey::from(&self.0).as_bytes())
    }

    /// Perform Diffie-Hellman key exchange.
    ///
    /// Returns `None` if the peer's public key is a low-order point.
    #[must_use]
    pub fn exchange(&self, peer_public: &PublicKey) -> Option<SharedSecret> {
        let peer = x25519_dalek::PublicKey::from(peer_public.0);
        let shared = self.0.diffie_hellman(&peer);

        if shared.as_bytes() == &[0u8; 32] {
            return None;
        }

        Some(SharedSecret(shared))
    }

    /// Derive the symmetric disco key shared with `peer_public`.
    ///
    /// This is NaCl `crypto_box_beforenm`, so both sides derive the same key:
    /// `a.shared_key(B) == b.shared_key(A)`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidPublicKey`] for low-order peer keys.
    pub fn shared_key(&self, peer_public: &PublicKey) -> Result<SharedKey, CryptoError> {
        if self.exchange(peer_public).is_none() {
            return Err(CryptoError::InvalidPublicKey);
        }

        let mut secret = self.to_bytes();
        let shared = SharedKey::precompute(&secret, peer_public.as_bytes());
        secret.zeroize();
        Ok(shared)
    }

    /// Export as bytes (for serialization).
    ///
    /// # Security
    ///
    /// The returned bytes contain the raw private key. Handle with care.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    /// Import from bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(x25519_dalek::StaticSecret::from(bytes))
    }

    /// Encode the private key as standard base64.
    #[must_use]
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.to_bytes())
    }

    /// Decode a private key from standard base64.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not base64 or not 32 bytes long.
    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let mut bytes = decode_key(encoded)?;
        let key = Self::from_bytes(bytes);
        bytes.zeroize();
        Ok(key)
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PrivateKey")
            .field(&self.public_key())
            .finish()
    }
}

impl PublicKey {
    /// Export public key as bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0
    }

    /// Import public key from bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get bytes as a slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Encode as standard base64.
    #[must_use]
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }

    /// Constant-time comparison against raw key bytes.
    ///
    /// Slices of the wrong length never match.
    #[must_use]
    pub fn ct_eq_bytes(&self, other: &[u8]) -> bool {
        self.0.as_slice().ct_eq(other).into()
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_base64())
    }
}

impl FromStr for PublicKey {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_key(s).map(Self)
    }
}

impl SharedSecret {
    /// Get shared secret as bytes.
    ///
    /// # Security
    ///
    /// The raw shared secret is not a cipher key; use
    /// [`PrivateKey::shared_key`] for the derived box key.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }
}

fn decode_key(encoded: &str) -> Result<[u8; 32], CryptoError> {
    let decoded = STANDARD
        .decode(encoded.trim())
        .map_err(|e| CryptoError::InvalidKeyEncoding(e.to_string()))?;

    decoded
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::InvalidKeyLength {
            expected: 32,
            actual: decoded.len(),
        })
}
