//! Engine configuration.

use crate::error::{DiscoError, Result};
use burrow_transport::TransportConfig;
use std::time::Duration;

/// Probe cadence for one path.
///
/// A path probes at `connecting_interval` (or `connected_interval` once
/// reachable) and multiplies the interval after every probe, up to the cap
/// for its priority class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProberConfig {
    /// Starting interval while the path is not yet reachable
    pub connecting_interval: Duration,
    /// Starting interval once the path is reachable
    pub connected_interval: Duration,
    /// Interval cap for the primary path
    pub primary_max_interval: Duration,
    /// Interval cap for standby paths
    pub sub_max_interval: Duration,
    /// Backoff factor applied after each probe
    pub multiplier: u32,
}

impl Default for ProberConfig {
    fn default() -> Self {
        Self {
            connecting_interval: Duration::from_millis(100),
            connected_interval: Duration::from_secs(3),
            primary_max_interval: Duration::from_secs(3),
            sub_max_interval: Duration::from_secs(10),
            multiplier: 2,
        }
    }
}

impl ProberConfig {
    /// Validate the cadence.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoError::InvalidConfig`] for zero intervals or a
    /// multiplier below 1.
    pub fn validate(&self) -> Result<()> {
        let intervals = [
            ("connecting_interval", self.connecting_interval),
            ("connected_interval", self.connected_interval),
            ("primary_max_interval", self.primary_max_interval),
            ("sub_max_interval", self.sub_max_interval),
        ];
        for (name, interval) in intervals {
            if interval.is_zero() {
                return Err(DiscoError::InvalidConfig(
                    format!("{name} must be non-zero").into(),
                ));
            }
        }

        if self.multiplier < 1 {
            return Err(DiscoError::InvalidConfig(
                "multiplier must be at least 1".into(),
            ));
        }

        Ok(())
    }
}

/// Disco engine configuration
#[derive(Debug, Clone)]
pub struct DiscoConfig {
    /// UDP port for the disco sockets (0 = ephemeral)
    pub port: u16,

    /// Also bind an IPv6 socket
    pub enable_ipv6: bool,

    /// Socket options for the UDP backend
    pub transport: TransportConfig,

    /// Outbound packets buffered before new ones are dropped
    pub send_queue_capacity: usize,

    /// Inbound packets buffered per peer and per path
    pub inbox_capacity: usize,

    /// Time a probe may stay unanswered before it counts as lost
    pub probe_timeout: Duration,

    /// Minimum time between ping-triggered prober resets on one path
    pub reinit_cooldown: Duration,

    /// Probe cadence
    pub prober: ProberConfig,
}

impl Default for DiscoConfig {
    fn default() -> Self {
        Self {
            port: 0,
            enable_ipv6: true,
            transport: TransportConfig::default(),
            send_queue_capacity: 256,
            inbox_capacity: 32,
            probe_timeout: Duration::from_secs(2),
            reinit_cooldown: Duration::from_secs(30),
            prober: ProberConfig::default(),
        }
    }
}

impl DiscoConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoError::InvalidConfig`] for zero capacities, a zero probe
    /// timeout, an invalid prober cadence or invalid socket options.
    pub fn validate(&self) -> Result<()> {
        if self.send_queue_capacity == 0 {
            return Err(DiscoError::InvalidConfig(
                "send_queue_capacity must be non-zero".into(),
            ));
        }

        if self.inbox_capacity == 0 {
            return Err(DiscoError::InvalidConfig(
                "inbox_capacity must be non-zero".into(),
            ));
        }

        if self.probe_timeout.is_zero() {
            return Err(DiscoError::InvalidConfig(
                "probe_timeout must be non-zero".into(),
            ));
        }

        self.prober.validate()?;
        self.transport
            .validate()
            .map_err(|e| DiscoError::InvalidConfig(e.to_string().into()))
    }
}
