//! Configuration system for the Parley CLI.

use parley_core::{ChannelConfig, DiscoveryConfig as CoreDiscoveryConfig, NodeConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Parley configuration file
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Identity configuration
    #[serde(default)]
    pub node: NodeSection,
    /// Network configuration
    #[serde(default)]
    pub network: NetworkConfig,
    /// Discovery configuration
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    /// Channel configuration
    #[serde(default)]
    pub channel: ChannelSection,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Identity configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSection {
    /// Private key file (hex)
    #[serde(default = "default_key_file")]
    pub key_file: PathBuf,
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Listen addresses
    #[serde(default = "default_listen_addrs")]
    pub listen_addrs: Vec<String>,
    /// Addresses announced to the overlay, if different from the listen addresses
    #[serde(default)]
    pub advertise_addrs: Vec<String>,
}

/// Discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// DHT bootstrap nodes (host:port)
    #[serde(default)]
    pub bootstrap_nodes: Vec<String>,
    /// Per-RPC timeout in seconds
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_secs: u64,
    /// Iterative lookup deadline in seconds
    #[serde(default = "default_lookup_timeout")]
    pub lookup_timeout_secs: u64,
    /// Stored record lifetime in seconds
    #[serde(default = "default_record_ttl")]
    pub record_ttl_secs: u64,
    /// Republish interval in seconds
    #[serde(default = "default_republish_interval")]
    pub republish_interval_secs: u64,
}

/// Channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSection {
    /// Maximum frame size in bytes
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
    /// Dial timeout in seconds
    #[serde(default = "default_dial_timeout")]
    pub dial_timeout_secs: u64,
    /// Write timeout in seconds
    #[serde(default = "default_write_timeout")]
    pub write_timeout_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values

fn default_key_file() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(".parley/private_key")
}

fn default_listen_addrs() -> Vec<String> {
    vec![format!("0.0.0.0:{}", parley_core::DEFAULT_PORT)]
}

fn default_rpc_timeout() -> u64 {
    CoreDiscoveryConfig::default().rpc_timeout.as_secs()
}

fn default_lookup_timeout() -> u64 {
    CoreDiscoveryConfig::default().lookup_timeout.as_secs()
}

fn default_record_ttl() -> u64 {
    CoreDiscoveryConfig::default().record_ttl.as_secs()
}

fn default_republish_interval() -> u64 {
    CoreDiscoveryConfig::default().republish_interval.as_secs()
}

fn default_max_frame_size() -> usize {
    ChannelConfig::default().max_frame_size
}

fn default_dial_timeout() -> u64 {
    ChannelConfig::default().dial_timeout.as_secs()
}

fn default_write_timeout() -> u64 {
    ChannelConfig::default().write_timeout.as_secs()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            key_file: default_key_file(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addrs: default_listen_addrs(),
            advertise_addrs: Vec::new(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            bootstrap_nodes: Vec::new(),
            rpc_timeout_secs: default_rpc_timeout(),
            lookup_timeout_secs: default_lookup_timeout(),
            record_ttl_secs: default_record_ttl(),
            republish_interval_secs: default_republish_interval(),
        }
    }
}

impl Default for ChannelSection {
    fn default() -> Self {
        Self {
            max_frame_size: default_max_frame_size(),
            dial_timeout_secs: default_dial_timeout(),
            write_timeout_secs: default_write_timeout(),
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
            .join("parley/config.toml")
    }

    /// Load config from the default path, falling back to defaults if absent
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be read or parsed.
    pub fn load_or_default() -> anyhow::Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        if self.network.listen_addrs.is_empty() {
            anyhow::bail!("At least one listen address is required");
        }
        for addr in &self.network.listen_addrs {
            validate_host_port(addr, "Listen address", true)?;
        }
        for addr in &self.network.advertise_addrs {
            validate_host_port(addr, "Advertise address", false)?;
        }
        for node in &self.discovery.bootstrap_nodes {
            validate_host_port(node, "Bootstrap node", false)?;
        }

        // Core validation covers timeouts and frame limits
        self.to_node_config()?.validate()?;
        Ok(())
    }

    /// Build the node configuration, resolving host names.
    ///
    /// # Errors
    ///
    /// Returns an error if an address does not resolve.
    pub fn to_node_config(&self) -> anyhow::Result<NodeConfig> {
        let defaults = NodeConfig::default();
        Ok(NodeConfig {
            listen_addrs: resolve_all(&self.network.listen_addrs)?,
            advertise_addrs: resolve_all(&self.network.advertise_addrs)?,
            bootstrap_nodes: resolve_all(&self.discovery.bootstrap_nodes)?,
            channel: ChannelConfig {
                max_frame_size: self.channel.max_frame_size,
                dial_timeout: Duration::from_secs(self.channel.dial_timeout_secs),
                write_timeout: Duration::from_secs(self.channel.write_timeout_secs),
                ..defaults.channel
            },
            discovery: CoreDiscoveryConfig {
                rpc_timeout: Duration::from_secs(self.discovery.rpc_timeout_secs),
                lookup_timeout: Duration::from_secs(self.discovery.lookup_timeout_secs),
                record_ttl: Duration::from_secs(self.discovery.record_ttl_secs),
                republish_interval: Duration::from_secs(self.discovery.republish_interval_secs),
                ..defaults.discovery
            },
            ..defaults
        })
    }
}

/// Resolve `host:port` strings, keeping every address a name maps to.
pub fn resolve_all(addrs: &[String]) -> anyhow::Result<Vec<SocketAddr>> {
    let mut resolved = Vec::with_capacity(addrs.len());
    for addr in addrs {
        let found: Vec<SocketAddr> = addr
            .to_socket_addrs()
            .map_err(|e| anyhow::anyhow!("Cannot resolve '{addr}': {e}"))?
            .collect();
        if found.is_empty() {
            anyhow::bail!("'{addr}' resolved to no addresses");
        }
        resolved.extend(found);
    }
    Ok(resolved)
}

/// Validate host:port format
fn validate_host_port(addr: &str, name: &str, allow_zero_port: bool) -> anyhow::Result<()> {
    let Some((host, port_str)) = addr.rsplit_once(':') else {
        anyhow::bail!("{name} '{addr}' missing port (expected format: host:port)");
    };

    let port: u16 = port_str
        .parse()
        .map_err(|_| anyhow::anyhow!("{name} '{addr}' has invalid port: {port_str}"))?;
    if port == 0 && !allow_zero_port {
        anyhow::bail!("{name} '{addr}' has invalid port: 0");
    }

    if host.is_empty() {
        anyhow::bail!("{name} '{addr}' has empty hostname");
    }
    if host.contains("..") || host.contains('/') || host.contains('\\') {
        anyhow::bail!("{name} '{addr}' contains invalid characters");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.network.listen_addrs, vec!["0.0.0.0:4001".to_string()]);
        assert_eq!(config.channel.max_frame_size, 1024 * 1024);
        assert_eq!(config.discovery.republish_interval_secs, 600);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
        config.logging.level = "debug".to_string();

        config.discovery.bootstrap_nodes = vec!["127.0.0.1".to_string()];
        assert!(config.validate().is_err());
        config.discovery.bootstrap_nodes = vec!["127.0.0.1:0".to_string()];
        assert!(config.validate().is_err());
        config.discovery.bootstrap_nodes = vec!["127.0.0.1:4001".to_string()];
        assert!(config.validate().is_ok());

        config.discovery.republish_interval_secs = config.discovery.record_ttl_secs;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_to_node_config() {
        let mut config = Config::default();
        config.network.listen_addrs = vec!["127.0.0.1:0".to_string()];
        config.discovery.bootstrap_nodes = vec!["127.0.0.1:4001".to_string()];
        config.channel.max_frame_size = 4096;

        let node = config.to_node_config().unwrap();
        assert_eq!(node.listen_addrs, vec!["127.0.0.1:0".parse().unwrap()]);
        assert_eq!(node.bootstrap_nodes, vec!["127.0.0.1:4001".parse().unwrap()]);
        assert_eq!(node.channel.max_frame_size, 4096);
        assert_eq!(node.discovery.record_ttl, Duration::from_secs(3600));
    }

    #[test]
    fn test_toml_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let deserialized: Config = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.network.listen_addrs, deserialized.network.listen_addrs);
        assert_eq!(config.node.key_file, deserialized.node.key_file);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str("[discovery]\nbootstrap_nodes = [\"10.0.0.1:4001\"]\n").unwrap();
        assert_eq!(config.discovery.bootstrap_nodes.len(), 1);
        assert_eq!(config.discovery.rpc_timeout_secs, 3);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.toml");

        let mut config = Config::default();
        config.logging.level = "trace".to_string();
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.logging.level, "trace");
    }
}
