//! # Burrow Crypto
//!
//! Cryptographic primitives for the Burrow disco side-channel.
//!
//! This crate provides:
//! - X25519 disco keypairs with base64 text encoding
//! - Per-peer shared keys derived once from key agreement
//! - NaCl `crypto_box` (XSalsa20-Poly1305) sealing with a random nonce per message
//! - Secure random number generation
//!
//! ## Cryptographic Suite
//!
//! | Function | Algorithm | Security Level |
//! |----------|-----------|----------------|
//! | Key Exchange | X25519 | 128-bit |
//! | Key precomputation | HSalsa20 (`crypto_box_beforenm`) | 128-bit |
//! | AEAD | XSalsa20-Poly1305 | 256-bit key |
//!
//! Disco keys are distinct from the tunnel's own keys and are never persisted
//! by the engine.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod aead;
pub mod error;
pub mod random;
pub mod x25519;

pub use aead::{NONCE_SIZE, SEAL_OVERHEAD, SharedKey, TAG_SIZE};
pub use error::CryptoError;
pub use x25519::{PrivateKey, PublicKey};

/// X25519 public key size
pub const X25519_PUBLIC_KEY_SIZE: usize = 32;

/// X25519 secret key size
pub const X25519_SECRET_KEY_SIZE: usize = 32;
