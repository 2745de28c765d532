//! Explicit per-role configuration.
//!
//! `ClusterConfig` is what an operator writes (TOML or CLI flags); the role
//! configs are derived from it by the harness and handed to each role at
//! construction time.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::{SharingError, SharingResult};
use crate::net::Endpoint;
use crate::shamir::Share;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Topology {
    /// Coordinator collects the shares and reconstructs.
    #[default]
    Pull,
    /// Shareholders deliver straight to the requester, who reconstructs.
    Push,
}

/// How a shareholder answers. Everything but `Prompt` exists to script
/// slow, dead or misbehaving peers in simulations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Behavior {
    #[default]
    Prompt,
    Delayed {
        #[serde(with = "millis")]
        delay: Duration,
    },
    /// Reads the request and never answers.
    Silent,
    /// Answers with a payload that does not parse as a share.
    Corrupt,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub host: IpAddr,
    pub coordinator_port: u16,
    /// Shareholder `i` (0-based) listens on `base + i`; 0 picks ephemeral ports.
    pub shareholder_base_port: u16,
    pub threshold: usize,
    pub shares: usize,
    pub token: String,
    pub topology: Topology,
    #[serde(with = "millis")]
    pub quorum_timeout: Duration,
    #[serde(with = "millis")]
    pub connect_timeout: Duration,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            coordinator_port: 5200,
            shareholder_base_port: 5400,
            threshold: 3,
            shares: 10,
            token: "pls".to_string(),
            topology: Topology::Pull,
            quorum_timeout: Duration::from_millis(5000),
            connect_timeout: Duration::from_millis(1000),
        }
    }
}

impl ClusterConfig {
    /// Ephemeral ports everywhere; what tests and local simulations want.
    pub fn ephemeral() -> Self {
        Self {
            coordinator_port: 0,
            shareholder_base_port: 0,
            ..Self::default()
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("failed to parse config {}", path.display()))
    }

    pub fn validate(&self) -> SharingResult<()> {
        if self.threshold < 1 || self.threshold > self.shares || self.shares > usize::from(u16::MAX)
        {
            return Err(SharingError::InvalidThreshold {
                threshold: self.threshold,
                shares: self.shares,
            });
        }
        Ok(())
    }

    pub fn coordinator_endpoint(&self) -> Endpoint {
        SocketAddr::new(self.host, self.coordinator_port).into()
    }

    pub fn shareholder_endpoint(&self, position: usize) -> Endpoint {
        let port = match self.shareholder_base_port {
            0 => 0,
            base => base.saturating_add(position as u16),
        };
        SocketAddr::new(self.host, port).into()
    }

    pub fn shareholder(&self, position: usize, share: Share, behavior: Behavior) -> ShareholderConfig {
        ShareholderConfig {
            bind: self.shareholder_endpoint(position),
            share,
            token: self.token.clone(),
            behavior,
            connect_timeout: self.connect_timeout,
        }
    }

    pub fn coordinator(&self, shareholders: Vec<Endpoint>) -> CoordinatorConfig {
        CoordinatorConfig {
            bind: self.coordinator_endpoint(),
            shareholders,
            threshold: self.threshold,
            token: self.token.clone(),
            quorum_timeout: self.quorum_timeout,
            connect_timeout: self.connect_timeout,
        }
    }

    pub fn requester(&self, coordinator: Endpoint) -> RequesterConfig {
        RequesterConfig {
            coordinator,
            callback_host: self.host,
            topology: self.topology,
            threshold: self.threshold,
            token: self.token.clone(),
            quorum_timeout: self.quorum_timeout,
            connect_timeout: self.connect_timeout,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ShareholderConfig {
    pub bind: Endpoint,
    pub share: Share,
    pub token: String,
    pub behavior: Behavior,
    /// Bound on opening the push connection to a requester, and on how long
    /// an inbound connection may stay idle before its request arrives.
    pub connect_timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct CoordinatorConfig {
    pub bind: Endpoint,
    pub shareholders: Vec<Endpoint>,
    pub threshold: usize,
    pub token: String,
    pub quorum_timeout: Duration,
    /// Also bounds the wait for a requester's first message.
    pub connect_timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct RequesterConfig {
    pub coordinator: Endpoint,
    /// Interface the push-topology callback listener binds to (ephemeral port).
    pub callback_host: IpAddr,
    pub topology: Topology,
    pub threshold: usize,
    pub token: String,
    pub quorum_timeout: Duration,
    pub connect_timeout: Duration,
}

/// `Duration` <-> integer milliseconds.
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_demo_deployment() {
        let config = ClusterConfig::default();
        assert_eq!(config.coordinator_endpoint().to_string(), "127.0.0.1:5200");
        assert_eq!(config.shareholder_endpoint(0).to_string(), "127.0.0.1:5400");
        assert_eq!(config.shareholder_endpoint(9).to_string(), "127.0.0.1:5409");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn ephemeral_ports_stay_zero() {
        let config = ClusterConfig::ephemeral();
        assert_eq!(config.shareholder_endpoint(5).addr().port(), 0);
        assert_eq!(config.coordinator_endpoint().addr().port(), 0);
    }

    #[test]
    fn shipped_config_is_the_default_deployment() {
        let config = ClusterConfig::from_toml_str(include_str!("../cluster.toml")).unwrap();
        assert_eq!(config, ClusterConfig::default());
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let config = ClusterConfig::from_toml_str(
            r#"
            threshold = 2
            shares = 4
            topology = "push"
            quorum_timeout = 250
            "#,
        )
        .unwrap();
        assert_eq!(config.threshold, 2);
        assert_eq!(config.shares, 4);
        assert_eq!(config.topology, Topology::Push);
        assert_eq!(config.quorum_timeout, Duration::from_millis(250));
        assert_eq!(config.token, "pls");
        assert_eq!(config.connect_timeout, Duration::from_millis(1000));
    }

    #[test]
    fn bad_thresholds_fail_validation() {
        let config = ClusterConfig {
            threshold: 11,
            ..ClusterConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(SharingError::InvalidThreshold {
                threshold: 11,
                shares: 10
            })
        );
    }

    #[test]
    fn behaviors_deserialize_from_tagged_tables() {
        let behavior: Behavior =
            serde_json::from_str(r#"{"kind":"delayed","delay":1500}"#).unwrap();
        assert_eq!(
            behavior,
            Behavior::Delayed {
                delay: Duration::from_millis(1500)
            }
        );
        let silent: Behavior = serde_json::from_str(r#"{"kind":"silent"}"#).unwrap();
        assert_eq!(silent, Behavior::Silent);
    }
}
