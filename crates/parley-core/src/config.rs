//! Node configuration

use crate::error::{NodeError, Result};
use parley_crypto::aead::MIN_ENVELOPE_SIZE;
use parley_discovery::DirectoryConfig;
use parley_transport::{DEFAULT_MAX_FRAME_SIZE, TcpTransportConfig};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Default port for the node listener.
pub const DEFAULT_PORT: u16 = 4001;

/// Node configuration
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Listen addresses for incoming connections
    pub listen_addrs: Vec<SocketAddr>,

    /// Addresses advertised to the overlay (defaults to the bound addresses)
    pub advertise_addrs: Vec<SocketAddr>,

    /// DHT seed nodes
    pub bootstrap_nodes: Vec<SocketAddr>,

    /// Message channel configuration
    pub channel: ChannelConfig,

    /// Discovery configuration
    pub discovery: DiscoveryConfig,

    /// Capacity of the inbound message queue handed to the gateway
    pub gateway_queue: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_addrs: vec![SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT))],
            advertise_addrs: Vec::new(),
            bootstrap_nodes: Vec::new(),
            channel: ChannelConfig::default(),
            discovery: DiscoveryConfig::default(),
            gateway_queue: 256,
        }
    }
}

impl NodeConfig {
    /// Loopback configuration on an OS-assigned port, for tests and local demos.
    #[must_use]
    pub fn loopback() -> Self {
        Self {
            listen_addrs: vec![SocketAddr::from((Ipv4Addr::LOCALHOST, 0))],
            ..Self::default()
        }
    }

    /// Check the configuration for values the node cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::InvalidConfig`] describing the first problem.
    pub fn validate(&self) -> Result<()> {
        if self.listen_addrs.is_empty() {
            return Err(NodeError::invalid_config("at least one listen address is required"));
        }
        if self.gateway_queue == 0 {
            return Err(NodeError::invalid_config("gateway_queue must be non-zero"));
        }
        self.channel.validate()?;
        self.discovery.validate()
    }

    /// Transport settings derived from this configuration.
    #[must_use]
    pub fn transport_config(&self) -> TcpTransportConfig {
        TcpTransportConfig {
            connect_timeout: self.channel.dial_timeout,
            ..TcpTransportConfig::default()
        }
    }

    /// Directory settings derived from this configuration.
    #[must_use]
    pub fn directory_config(&self) -> DirectoryConfig {
        DirectoryConfig {
            advertise_addrs: self.advertise_addrs.clone(),
            rpc_timeout: self.discovery.rpc_timeout,
            lookup_timeout: self.discovery.lookup_timeout,
            record_ttl: self.discovery.record_ttl,
            republish_interval: self.discovery.republish_interval,
            health_interval: self.discovery.health_interval,
            ..DirectoryConfig::default()
        }
    }
}

/// Message channel configuration
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Largest inbound frame accepted
    pub max_frame_size: usize,

    /// Per-address dial timeout
    pub dial_timeout: Duration,

    /// Bound on the hello exchange after a stream opens
    pub hello_timeout: Duration,

    /// Bound on writing one frame
    pub write_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            dial_timeout: Duration::from_secs(5),
            hello_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(10),
        }
    }
}

impl ChannelConfig {
    fn validate(&self) -> Result<()> {
        if self.max_frame_size < MIN_ENVELOPE_SIZE {
            return Err(NodeError::invalid_config(
                "max_frame_size is smaller than an empty envelope",
            ));
        }
        if u32::try_from(self.max_frame_size).is_err() {
            return Err(NodeError::invalid_config(
                "max_frame_size does not fit a 32-bit length prefix",
            ));
        }
        if self.dial_timeout.is_zero() || self.hello_timeout.is_zero() || self.write_timeout.is_zero()
        {
            return Err(NodeError::invalid_config("channel timeouts must be non-zero"));
        }
        Ok(())
    }
}

/// Discovery configuration
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Timeout for one DHT RPC
    pub rpc_timeout: Duration,

    /// Overall bound on a DHT lookup
    pub lookup_timeout: Duration,

    /// Lifetime of published records
    pub record_ttl: Duration,

    /// How often own records are republished
    pub republish_interval: Duration,

    /// How often routing health is logged
    pub health_interval: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        let directory = DirectoryConfig::default();
        Self {
            rpc_timeout: directory.rpc_timeout,
            lookup_timeout: directory.lookup_timeout,
            record_ttl: directory.record_ttl,
            republish_interval: directory.republish_interval,
            health_interval: directory.health_interval,
        }
    }
}

impl DiscoveryConfig {
    fn validate(&self) -> Result<()> {
        if self.rpc_timeout.is_zero() || self.lookup_timeout.is_zero() {
            return Err(NodeError::invalid_config("discovery timeouts must be non-zero"));
        }
        if self.health_interval.is_zero() || self.republish_interval.is_zero() {
            return Err(NodeError::invalid_config("maintenance intervals must be non-zero"));
        }
        if self.record_ttl <= self.republish_interval {
            return Err(NodeError::invalid_config(
                "record_ttl must be longer than republish_interval",
            ));
        }
        Ok(())
    }
}
