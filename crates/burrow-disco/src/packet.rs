//! Disco wire packet codec.
//!
//! Wire format (big-endian):
//!
//! ```text
//! byte 0       : header (0x80 = Ping, 0x81 = Pong)
//! bytes 1..33  : sender public key (cleartext)
//! bytes 33..   : nonce (24) || box(path id u32 | probe id u32 | sender key 32)
//! ```
//!
//! The envelope (header and sender key) is parsed without decryption so the
//! engine can route a datagram to its peer session. Only the peer session
//! holds the shared key needed to [`EncryptedPacket::open`] it.

use burrow_crypto::{PublicKey, SharedKey, X25519_PUBLIC_KEY_SIZE};
use std::net::SocketAddr;

/// Cleartext envelope size: header byte plus sender public key.
pub const ENVELOPE_SIZE: usize = 1 + X25519_PUBLIC_KEY_SIZE;

/// Decrypted payload size: path id, probe id and the echoed sender key.
pub const PAYLOAD_SIZE: usize = 4 + 4 + X25519_PUBLIC_KEY_SIZE;

/// Disco message type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Header {
    /// Probe request
    Ping = 0x80,
    /// Probe reply
    Pong = 0x81,
}

impl Header {
    /// Decode a header byte.
    #[must_use]
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x80 => Some(Self::Ping),
            0x81 => Some(Self::Pong),
            _ => None,
        }
    }

    /// Wire byte for this header.
    #[must_use]
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// A datagram whose envelope has been parsed but whose payload is still sealed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedPacket {
    /// Message type
    pub header: Header,
    /// Cleartext sender key used for routing
    pub sender: PublicKey,
    /// `nonce || box`, where the NaCl box is `tag || ciphertext`
    pub payload: Vec<u8>,
    /// Observed source (inbound) or destination (outbound)
    pub addr: SocketAddr,
}

impl EncryptedPacket {
    /// Parse the cleartext envelope of a datagram received from `addr`.
    ///
    /// Returns `None` for datagrams shorter than the envelope or with an
    /// unknown header byte.
    #[must_use]
    pub fn parse(datagram: &[u8], addr: SocketAddr) -> Option<Self> {
        if datagram.len() < ENVELOPE_SIZE {
            return None;
        }

        let header = Header::from_byte(datagram[0])?;
        let sender: [u8; X25519_PUBLIC_KEY_SIZE] = datagram[1..ENVELOPE_SIZE].try_into().ok()?;

        Some(Self {
            header,
            sender: PublicKey::from_bytes(sender),
            payload: datagram[ENVELOPE_SIZE..].to_vec(),
            addr,
        })
    }

    /// Serialize to wire bytes.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(ENVELOPE_SIZE + self.payload.len());
        buf.push(self.header.as_byte());
        buf.extend_from_slice(self.sender.as_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Decrypt and validate the payload.
    ///
    /// Returns `None` when authentication fails, the plaintext is too short,
    /// or the echoed key differs from the envelope's sender key.
    #[must_use]
    pub fn open(&self, key: &SharedKey) -> Option<Packet> {
        let plaintext = key.open(&self.payload).ok()?;
        if plaintext.len() < PAYLOAD_SIZE {
            return None;
        }

        if !self.sender.ct_eq_bytes(&plaintext[8..PAYLOAD_SIZE]) {
            return None;
        }

        let path_id = u32::from_be_bytes(plaintext[0..4].try_into().ok()?);
        let probe_id = u32::from_be_bytes(plaintext[4..8].try_into().ok()?);

        Some(Packet {
            header: self.header,
            sender: self.sender,
            path_id,
            probe_id,
            addr: self.addr,
        })
    }
}

/// A decrypted disco message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet {
    /// Message type
    pub header: Header,
    /// Sender public key
    pub sender: PublicKey,
    /// Path id minted by the pinging side and echoed in the Pong
    pub path_id: u32,
    /// Probe id, echoed in the Pong
    pub probe_id: u32,
    /// Observed source (inbound) or destination (outbound)
    pub addr: SocketAddr,
}

impl Packet {
    /// Encrypt under `key` with a fresh nonce.
    ///
    /// Returns `None` if the CSPRNG or the cipher fails.
    #[must_use]
    pub fn seal(&self, key: &SharedKey) -> Option<EncryptedPacket> {
        let mut plaintext = [0u8; PAYLOAD_SIZE];
        plaintext[0..4].copy_from_slice(&self.path_id.to_be_bytes());
        plaintext[4..8].copy_from_slice(&self.probe_id.to_be_bytes());
        plaintext[8..].copy_from_slice(self.sender.as_bytes());

        let payload = key.seal(&plaintext).ok()?;

        Some(EncryptedPacket {
            header: self.header,
            sender: self.sender,
            payload,
            addr: self.addr,
        })
    }

    /// Build the Pong answering this Ping, sent from `local` back to the
    /// observed source.
    #[must_use]
    pub fn pong(&self, local: PublicKey) -> Self {
        Self {
            header: Header::Pong,
            sender: local,
            path_id: self.path_id,
            probe_id: self.probe_id,
            addr: self.addr,
        }
    }
}
