//! # Burrow Disco
//!
//! Path discovery side-channel for the Burrow mesh.
//!
//! Every peer is reachable through a set of candidate addresses (LAN, public
//! NAT mapping, IPv6). The disco engine probes each candidate with encrypted
//! Ping/Pong exchanges, measures round-trip time, notices loss and reports
//! the best currently reachable address per peer, so the tunnel can be
//! pointed at it.
//!
//! ## Architecture
//!
//! | Layer | Type | Role |
//! |-------|------|------|
//! | Engine | [`Disco`] | Sockets, peer table, send queue |
//! | Peer | [`PeerSession`] | Decryption, Ping replies, best-path aggregation |
//! | Path | [`PathSession`] | Probing one address |
//! | Prober | [`Ticker`] | Adaptive probe interval |
//! | Tracker | [`ProbeTracker`] | RTT samples and loss detection |
//! | Codec | [`packet`] | Wire format |
//!
//! Status flows upward through [`StatusCell`]s: a path publishes its
//! reachability, its peer folds all paths into one [`PeerStatus`], and the
//! engine exposes every peer's status through [`Disco::notify_statuses`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod engine;
pub mod error;
pub mod packet;
pub mod path;
pub mod peer;
pub mod prober;
pub mod status;
pub mod tracker;

pub use burrow_crypto::{PrivateKey, PublicKey};
pub use config::{DiscoConfig, ProberConfig};
pub use engine::{Disco, PeerStatuses};
pub use error::{DiscoError, Result};
pub use packet::{EncryptedPacket, Header, Packet};
pub use path::{PathSession, PathStatus, SendQueue};
pub use peer::{ActivePath, PeerSession, PeerStatus};
pub use prober::{PathState, Priority, Ticker};
pub use status::StatusCell;
pub use tracker::ProbeTracker;
