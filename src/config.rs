//! Engine configuration
//!
//! All thresholds the catalogue leaves qualitative live here as tunable
//! defaults. Supports loading from TOML; every section falls back to its
//! `Default` when absent.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::RuleId;
use crate::error::{FramewatchError, Result};

/// Root configuration structure
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Fragment reassembly monitoring
    pub fragment: FragmentConfig,
    /// UDP length checks
    pub udp: UdpConfig,
    /// ICMP payload checks
    pub icmp: IcmpConfig,
    /// FTP control-channel tracking
    pub ftp: FtpConfig,
    /// Per-rule switches
    pub rules: RulesConfig,
    /// Worker pool sizing
    pub workers: WorkerConfig,
    /// Alert sink buffering
    pub sink: SinkConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fragment: FragmentConfig::default(),
            udp: UdpConfig::default(),
            icmp: IcmpConfig::default(),
            ftp: FtpConfig::default(),
            rules: RulesConfig::default(),
            workers: WorkerConfig::default(),
            sink: SinkConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| FramewatchError::ConfigError(format!("failed to read config: {}", e)))?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| FramewatchError::ConfigError(format!("failed to parse config: {}", e)))
    }
}

/// Fragmentation tracker settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FragmentConfig {
    /// Fragments per second from one source before FragmentStorm fires
    pub storm_rate_threshold: f64,
    /// Sliding window for the storm rate (seconds)
    pub storm_window_secs: u64,
    /// Fragment count ceiling per group before TooManyFragment fires
    pub max_group_fragments: usize,
    /// Group lifetime before it expires as InvalidFragment (seconds)
    pub group_ttl_secs: u64,
    /// Live group limit per source address, oldest evicted first
    pub max_groups_per_source: usize,
    /// Maximum reassembled datagram size in bytes
    pub max_reassembled_size: u32,
}

impl Default for FragmentConfig {
    fn default() -> Self {
        Self {
            storm_rate_threshold: 100.0,
            storm_window_secs: 10,
            max_group_fragments: 64,
            group_ttl_secs: 30,
            max_groups_per_source: 64,
            max_reassembled_size: 65535,
        }
    }
}

/// UDP rule settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct UdpConfig {
    /// Declared length above this fires UdpBomb. The default is the
    /// largest payload a single UDP datagram can legitimately carry, so
    /// only lengths impossible on the wire trip the rule.
    pub bomb_max_length: u16,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            bomb_max_length: 65507,
        }
    }
}

/// ICMP rule settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct IcmpConfig {
    /// Payload length at or above this fires IcmpTooLarge
    pub max_payload: usize,
}

impl Default for IcmpConfig {
    fn default() -> Self {
        Self { max_payload: 1025 }
    }
}

/// FTP control tracker settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FtpConfig {
    /// TCP ports treated as FTP control connections
    pub control_ports: Vec<u16>,
    /// Lowest acceptable announced data port
    pub data_port_min: u16,
    /// Highest acceptable announced data port
    pub data_port_max: u16,
    /// Idle seconds before a session is swept
    pub session_idle_secs: u64,
    /// Live session limit, oldest evicted first
    pub max_sessions: usize,
}

impl Default for FtpConfig {
    fn default() -> Self {
        Self {
            control_ports: vec![21],
            data_port_min: 1024,
            data_port_max: 65535,
            session_idle_secs: 300,
            max_sessions: 10_000,
        }
    }
}

/// Per-rule switches
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    /// Rules excluded from evaluation
    pub disabled: Vec<RuleId>,
}

impl RulesConfig {
    pub fn is_enabled(&self, rule: RuleId) -> bool {
        !self.disabled.contains(&rule)
    }
}

/// Worker pool settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of worker threads (0 = auto)
    pub num_workers: usize,
    /// Bounded inbound queue depth per worker
    pub queue_depth: usize,
    /// Interval of the timer-driven expiration sweep (seconds)
    pub sweep_interval_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            num_workers: 0,
            queue_depth: 1000,
            sweep_interval_secs: 5,
        }
    }
}

impl WorkerConfig {
    /// Get actual number of workers
    pub fn actual_workers(&self) -> usize {
        if self.num_workers == 0 {
            num_cpus::get().max(1)
        } else {
            self.num_workers
        }
    }
}

/// Alert sink buffering settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Alerts held while the sink is unreachable, oldest dropped when full
    pub buffer_capacity: usize,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 10_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.icmp.max_payload, 1025);
        assert_eq!(config.ftp.data_port_min, 1024);
        assert_eq!(config.ftp.control_ports, vec![21]);
        assert!(config.workers.actual_workers() >= 1);
    }

    #[test]
    fn test_partial_toml() {
        let config = Config::from_toml(
            r#"
            [fragment]
            max_group_fragments = 8

            [rules]
            disabled = ["land_attack"]
            "#,
        )
        .unwrap();

        assert_eq!(config.fragment.max_group_fragments, 8);
        assert_eq!(config.fragment.group_ttl_secs, 30); // default preserved
        assert!(!config.rules.is_enabled(RuleId::LandAttack));
        assert!(config.rules.is_enabled(RuleId::Teardrop));
    }

    #[test]
    fn test_invalid_toml_rejected() {
        assert!(Config::from_toml("fragment = 3").is_err());
    }
}
