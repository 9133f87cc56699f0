//! Two-engine test fixture for integration testing
//!
//! Runs two disco engines on IPv4 loopback, each on a [`LossyTransport`] so
//! tests can cut the link between them.
//!
//! # Example
//!
//! ```no_run
//! use burrow_integration_tests::fixtures::TwoEngineFixture;
//!
//! # async fn example() -> burrow_disco::Result<()> {
//! let fixture = TwoEngineFixture::new().await?;
//! fixture.introduce()?;
//! // ... wait for fixture.alice_sees_bob() ...
//! fixture.cleanup().await;
//! # Ok(())
//! # }
//! ```

use super::LossyTransport;
use burrow_crypto::{PrivateKey, PublicKey};
use burrow_disco::{Disco, DiscoConfig, PeerStatus, ProberConfig, Result};
use burrow_transport::Transport;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Engine config with short intervals so loss and recovery show up quickly.
pub fn fast_config() -> DiscoConfig {
    DiscoConfig {
        enable_ipv6: false,
        probe_timeout: Duration::from_millis(300),
        reinit_cooldown: Duration::from_secs(1),
        prober: ProberConfig {
            connecting_interval: Duration::from_millis(50),
            connected_interval: Duration::from_millis(200),
            primary_max_interval: Duration::from_millis(400),
            sub_max_interval: Duration::from_millis(800),
            multiplier: 2,
        },
        ..DiscoConfig::default()
    }
}

/// A started engine together with its key and link.
pub struct Endpoint {
    /// The engine
    pub disco: Disco,
    /// The engine's private key, for decrypting recorded traffic
    pub key: PrivateKey,
    /// The engine's transport
    pub link: Arc<LossyTransport>,
    /// Bound loopback address
    pub addr: SocketAddr,
}

impl Endpoint {
    /// Bind and start an engine with `config`.
    pub async fn start(config: DiscoConfig) -> Result<Self> {
        let key = PrivateKey::generate()?;
        let link = LossyTransport::bind_loopback().await?;
        let addr = link.local_addr()?;

        let transport: Arc<dyn Transport> = link.clone();
        let disco = Disco::with_transports(key.clone(), Some(transport), None, config)?;
        disco.start()?;

        Ok(Self {
            disco,
            key,
            link,
            addr,
        })
    }

    /// Public key of this engine.
    pub fn public_key(&self) -> PublicKey {
        self.disco.public_key()
    }

    /// Aggregated status this engine holds for `peer`.
    pub fn status_of(&self, peer: &PublicKey) -> Option<PeerStatus> {
        self.disco.statuses().get(peer).copied()
    }

    /// Whether this engine has an active path to `peer`.
    pub fn sees(&self, peer: &PublicKey) -> bool {
        self.status_of(peer).is_some_and(|status| status.is_connected())
    }
}

/// Two disco engines on loopback
pub struct TwoEngineFixture {
    /// First engine
    pub alice: Endpoint,
    /// Second engine
    pub bob: Endpoint,
}

impl TwoEngineFixture {
    /// Start two engines with [`fast_config`].
    pub async fn new() -> Result<Self> {
        Self::with_config(fast_config()).await
    }

    /// Start two engines with the same `config`.
    pub async fn with_config(config: DiscoConfig) -> Result<Self> {
        Ok(Self {
            alice: Endpoint::start(config.clone()).await?,
            bob: Endpoint::start(config).await?,
        })
    }

    /// Register each engine as the other's peer and point them at each
    /// other's loopback address.
    pub fn introduce(&self) -> Result<()> {
        let alice_key = self.alice.public_key();
        let bob_key = self.bob.public_key();

        self.alice.disco.add_peer(bob_key)?;
        self.bob.disco.add_peer(alice_key)?;
        self.alice.disco.set_endpoints(&bob_key, &[self.bob.addr])?;
        self.bob.disco.set_endpoints(&alice_key, &[self.alice.addr])?;
        Ok(())
    }

    /// Alice has an active path to Bob.
    pub fn alice_sees_bob(&self) -> bool {
        self.alice.sees(&self.bob.public_key())
    }

    /// Bob has an active path to Alice.
    pub fn bob_sees_alice(&self) -> bool {
        self.bob.sees(&self.alice.public_key())
    }

    /// Cut the link in both directions.
    pub fn partition(&self) {
        self.alice.link.block();
        self.bob.link.block();
    }

    /// Restore the link.
    pub fn heal(&self) {
        self.alice.link.unblock();
        self.bob.link.unblock();
    }

    /// Close both engines.
    pub async fn cleanup(&self) {
        self.alice.disco.close().await;
        self.bob.disco.close().await;
    }
}
