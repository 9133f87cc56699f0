//! NaCl `crypto_box` sealing for disco payloads.
//!
//! [`SharedKey`] is the per-peer disco key: X25519 agreement followed by the
//! HSalsa20 precomputation (`crypto_box_beforenm`). Sealing is
//! XSalsa20-Poly1305 (`crypto_box_afternm`) under a random 24-byte nonce,
//! which is carried in front of the box:
//!
//! ```text
//! nonce (24) || tag (16) || ciphertext
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use burrow_crypto::PrivateKey;
//!
//! let alice = PrivateKey::generate()?;
//! let bob = PrivateKey::generate()?;
//! let key = alice.shared_key(&bob.public_key())?;
//!
//! let sealed = key.seal(b"secret")?;
//! let plaintext = key.open(&sealed)?;
//! ```

use crate::CryptoError;
use crate::random::random_24;
use crypto_box::SalsaBox;
use crypto_box::aead::{Aead, generic_array::GenericArray};
use std::sync::Arc;

/// Poly1305 authentication tag size (16 bytes).
pub const TAG_SIZE: usize = 16;

/// XSalsa20 nonce size (24 bytes / 192 bits).
pub const NONCE_SIZE: usize = 24;

/// Bytes a sealed box adds on top of its plaintext.
pub const SEAL_OVERHEAD: usize = NONCE_SIZE + TAG_SIZE;

/// XSalsa20-Poly1305 nonce (24 bytes).
///
/// The extended 192-bit nonce allows safe random nonce generation
/// without risk of collision (birthday bound is 2^96 messages).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Nonce([u8; NONCE_SIZE]);

impl Nonce {
    /// Create a nonce from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; NONCE_SIZE]) -> Self {
        Self(bytes)
    }

    /// Generate a random nonce from the OS CSPRNG.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::RandomFailed`] if the CSPRNG fails.
    pub fn random() -> Result<Self, CryptoError> {
        random_24().map(Self)
    }

    /// Get raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; NONCE_SIZE] {
        &self.0
    }
}

/// Symmetric disco key shared with exactly one peer.
///
/// Derived once per (local private key, peer public key) pair by
/// [`PrivateKey::shared_key`](crate::PrivateKey::shared_key) and used for every
/// disco packet exchanged with that peer, in both directions. The precomputed
/// key material is zeroized when the last clone drops.
#[derive(Clone)]
pub struct SharedKey(Arc<SalsaBox>);

impl SharedKey {
    /// Precompute the box key for `secret` (ours) and `public` (theirs).
    pub(crate) fn precompute(secret: &[u8; 32], public: &[u8; 32]) -> Self {
        let secret = crypto_box::SecretKey::from(*secret);
        let public = crypto_box::PublicKey::from(*public);
        Self(Arc::new(SalsaBox::new(&public, &secret)))
    }

    /// Seal `plaintext` under a fresh random nonce.
    ///
    /// Output layout: `nonce || tag || ciphertext`.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::RandomFailed` if no nonce can be drawn, or
    /// `CryptoError::EncryptionFailed` if sealing fails.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.seal_with_nonce(&Nonce::random()?, plaintext)
    }

    fn seal_with_nonce(&self, nonce: &Nonce, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let boxed = self
            .0
            .encrypt(GenericArray::from_slice(nonce.as_bytes()), plaintext)
            .map_err(|_| CryptoError::EncryptionFailed)?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + boxed.len());
        sealed.extend_from_slice(nonce.as_bytes());
        sealed.extend_from_slice(&boxed);
        Ok(sealed)
    }

    /// Open a sealed box produced by [`SharedKey::seal`] or any NaCl
    /// `box_afternm` peer.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::MessageTooShort` when the input cannot hold a
    /// nonce, or `CryptoError::DecryptionFailed` on authentication failure.
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() < NONCE_SIZE {
            return Err(CryptoError::MessageTooShort(sealed.len()));
        }

        let (nonce, boxed) = sealed.split_at(NONCE_SIZE);
        if boxed.len() < TAG_SIZE {
            return Err(CryptoError::DecryptionFailed);
        }

        self.0
            .decrypt(GenericArray::from_slice(nonce), boxed)
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}

impl std::fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedKey(..)")
    }
}
