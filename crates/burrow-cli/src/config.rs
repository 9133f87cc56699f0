//! Configuration file for the `burrow` CLI.
//!
//! ```toml
//! [node]
//! private_key_file = "/etc/burrow/disco.key"
//! port = 51821
//!
//! [prober]
//! connecting_interval_ms = 100
//!
//! [logging]
//! level = "info"
//!
//! [[peers]]
//! name = "edge-1"
//! public_key = "base64..."
//! endpoints = ["203.0.113.5:51821", "[2001:db8::5]:51821"]
//! ```

use burrow_crypto::PublicKey;
use burrow_disco::{DiscoConfig, ProberConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Burrow configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Node configuration
    #[serde(default)]
    pub node: NodeConfig,
    /// Probe cadence
    #[serde(default)]
    pub prober: ProberSettings,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Statically configured peers
    #[serde(default)]
    pub peers: Vec<PeerConfig>,
}

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Disco private key file (base64)
    #[serde(default = "default_private_key_path")]
    pub private_key_file: PathBuf,
    /// Disco UDP port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Also listen on IPv6
    #[serde(default = "default_true")]
    pub enable_ipv6: bool,
    /// Probe loss timeout in milliseconds
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// Minimum time between ping-triggered prober resets, in milliseconds
    #[serde(default = "default_reinit_cooldown_ms")]
    pub reinit_cooldown_ms: u64,
}

/// Probe cadence in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProberSettings {
    /// Starting interval while connecting
    #[serde(default = "default_connecting_ms")]
    pub connecting_interval_ms: u64,
    /// Starting interval once connected
    #[serde(default = "default_connected_ms")]
    pub connected_interval_ms: u64,
    /// Interval cap for the primary path
    #[serde(default = "default_primary_max_ms")]
    pub primary_max_interval_ms: u64,
    /// Interval cap for standby paths
    #[serde(default = "default_sub_max_ms")]
    pub sub_max_interval_ms: u64,
    /// Backoff factor
    #[serde(default = "default_multiplier")]
    pub multiplier: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// One statically configured peer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeerConfig {
    /// Label used in log output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Peer's disco public key (base64)
    pub public_key: String,
    /// Candidate addresses (`ip:port`)
    #[serde(default)]
    pub endpoints: Vec<String>,
}

// Default values

fn default_private_key_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("burrow/disco.key")
}

fn default_port() -> u16 {
    51821
}

fn default_true() -> bool {
    true
}

fn default_probe_timeout_ms() -> u64 {
    2_000
}

fn default_reinit_cooldown_ms() -> u64 {
    30_000
}

fn default_connecting_ms() -> u64 {
    100
}

fn default_connected_ms() -> u64 {
    3_000
}

fn default_primary_max_ms() -> u64 {
    3_000
}

fn default_sub_max_ms() -> u64 {
    10_000
}

fn default_multiplier() -> u32 {
    2
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            private_key_file: default_private_key_path(),
            port: default_port(),
            enable_ipv6: true,
            probe_timeout_ms: default_probe_timeout_ms(),
            reinit_cooldown_ms: default_reinit_cooldown_ms(),
        }
    }
}

impl Default for ProberSettings {
    fn default() -> Self {
        Self {
            connecting_interval_ms: default_connecting_ms(),
            connected_interval_ms: default_connected_ms(),
            primary_max_interval_ms: default_primary_max_ms(),
            sub_max_interval_ms: default_sub_max_ms(),
            multiplier: default_multiplier(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl PeerConfig {
    /// Name for log output, falling back to the public key.
    #[must_use]
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.public_key)
    }

    /// Parse the public key.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is not 32 bytes of base64.
    pub fn parse_public_key(&self) -> anyhow::Result<PublicKey> {
        self.public_key
            .parse()
            .map_err(|e| anyhow::anyhow!("Peer '{}' has invalid public key: {}", self.label(), e))
    }

    /// Parse the endpoint list.
    ///
    /// # Errors
    ///
    /// Returns an error for any entry that is not an `ip:port` address.
    pub fn parse_endpoints(&self) -> anyhow::Result<Vec<SocketAddr>> {
        self.endpoints
            .iter()
            .map(|endpoint| {
                endpoint.parse().map_err(|_| {
                    anyhow::anyhow!(
                        "Peer '{}' has invalid endpoint '{}' (expected ip:port)",
                        self.label(),
                        endpoint
                    )
                })
            })
            .collect()
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, contents)?;
        Ok(())
    }

    /// Get default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("burrow/config.toml")
    }

    /// Engine configuration derived from this file.
    #[must_use]
    pub fn disco_config(&self) -> DiscoConfig {
        DiscoConfig {
            port: self.node.port,
            enable_ipv6: self.node.enable_ipv6,
            probe_timeout: Duration::from_millis(self.node.probe_timeout_ms),
            reinit_cooldown: Duration::from_millis(self.node.reinit_cooldown_ms),
            prober: ProberConfig {
                connecting_interval: Duration::from_millis(self.prober.connecting_interval_ms),
                connected_interval: Duration::from_millis(self.prober.connected_interval_ms),
                primary_max_interval: Duration::from_millis(self.prober.primary_max_interval_ms),
                sub_max_interval: Duration::from_millis(self.prober.sub_max_interval_ms),
                multiplier: self.prober.multiplier,
            },
            ..DiscoConfig::default()
        }
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.disco_config().validate()?;

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        let mut seen = std::collections::HashSet::new();
        for peer in &self.peers {
            let key = peer.parse_public_key()?;
            if !seen.insert(key) {
                anyhow::bail!("Peer '{}' is listed more than once", peer.label());
            }
            peer.parse_endpoints()?;
        }

        Ok(())
    }
}
