//! 本地模拟 (Local Simulation)
//!
//! 在同一个 tokio 运行时中启动 n 个分片持有者、一个协调者和一个请求者，
//! 每个角色拥有独立的监听端口，相互之间只通过 TCP 消息通信。
//! 分片持有者的行为 (及时 / 延迟 / 沉默 / 损坏 / 离线) 由 `Scenario` 脚本化，
//! 用于验证 race-to-M 收集在慢节点与故障节点存在时的表现。

pub mod common;

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use anyhow::Context;
use rand_core::{OsRng, RngCore};
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::{Behavior, ClusterConfig};
use crate::error::ProtocolResult;
use crate::net::Endpoint;
use crate::roles::{Coordinator, Requester, Role, Shareholder};
use crate::shamir;

pub use common::{display_secret, strip_0x, truncate_hex};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Peer {
    Online(Behavior),
    /// Nobody listens at this shareholder's endpoint.
    Offline,
}

impl Default for Peer {
    fn default() -> Self {
        Peer::Online(Behavior::Prompt)
    }
}

#[derive(Clone, Debug)]
pub struct Scenario {
    pub config: ClusterConfig,
    pub secret: Vec<u8>,
    /// One entry per shareholder position; missing entries are `Prompt`.
    pub peers: Vec<Peer>,
}

impl Scenario {
    pub fn new(config: ClusterConfig, secret: impl Into<Vec<u8>>) -> Self {
        let peers = vec![Peer::default(); config.shares];
        Self {
            config,
            secret: secret.into(),
            peers,
        }
    }

    pub fn with_peer(mut self, position: usize, peer: Peer) -> Self {
        if position >= self.peers.len() {
            self.peers.resize(position + 1, Peer::default());
        }
        self.peers[position] = peer;
        self
    }

    /// `prompt` randomly placed shareholders answer at once; the rest are
    /// either delayed by `slow` or never answer at all.
    pub fn stragglers(config: ClusterConfig, secret: impl Into<Vec<u8>>, prompt: usize, slow: Duration) -> Self {
        Self::stragglers_with_rng(config, secret, prompt, slow, &mut OsRng)
    }

    pub fn stragglers_with_rng<R: RngCore>(
        config: ClusterConfig,
        secret: impl Into<Vec<u8>>,
        prompt: usize,
        slow: Duration,
        rng: &mut R,
    ) -> Self {
        let n = config.shares;
        let mut order: Vec<usize> = (0..n).collect();
        // Fisher-Yates
        for i in (1..n).rev() {
            let j = (rng.next_u32() as usize) % (i + 1);
            order.swap(i, j);
        }

        let mut scenario = Self::new(config, secret);
        for (rank, &position) in order.iter().enumerate() {
            let peer = if rank < prompt {
                Peer::Online(Behavior::Prompt)
            } else if rng.next_u32() % 2 == 0 {
                // Spread the stragglers out a little.
                let jitter = Duration::from_millis(u64::from(rng.next_u32() % 500));
                Peer::Online(Behavior::Delayed { delay: slow + jitter })
            } else {
                Peer::Online(Behavior::Silent)
            };
            scenario.peers[position] = peer;
        }
        scenario
    }

    fn peer(&self, position: usize) -> Peer {
        self.peers.get(position).copied().unwrap_or_default()
    }
}

#[derive(Debug)]
pub struct Outcome {
    pub recovered: ProtocolResult<Vec<u8>>,
    /// Time from the requester's start to its result.
    pub elapsed: Duration,
}

impl Outcome {
    pub fn matches(&self, secret: &[u8]) -> bool {
        matches!(&self.recovered, Ok(recovered) if recovered.as_slice() == secret)
    }
}

/// Splits the secret, starts every role, runs one retrieval, tears it all down.
pub async fn run(scenario: &Scenario) -> anyhow::Result<Outcome> {
    let config = &scenario.config;
    config.validate()?;

    let shares = shamir::split(&scenario.secret, config.threshold, config.shares)
        .context("failed to split secret")?;
    info!(
        "[SIM] split secret into {} shares, threshold {}, topology {:?}",
        shares.len(),
        config.threshold,
        config.topology
    );

    let mut cluster = JoinSet::new();
    let mut endpoints = Vec::with_capacity(shares.len());
    for (position, share) in shares.iter().enumerate() {
        let endpoint = match scenario.peer(position) {
            Peer::Online(behavior) => {
                let holder = Shareholder::bind(config.shareholder(position, *share, behavior))
                    .await
                    .with_context(|| format!("failed to start shareholder {}", share.index()))?;
                let endpoint = holder.endpoint();
                cluster.spawn(holder.run());
                endpoint
            }
            Peer::Offline => offline_endpoint(config, position).await?,
        };
        debug!(
            "[SIM] share {} -> {} ({})",
            share.index(),
            endpoint,
            truncate_hex(&share.to_string())
        );
        endpoints.push(endpoint);
    }

    let coordinator = Coordinator::bind(config.coordinator(endpoints))
        .await
        .context("failed to start coordinator")?;
    let coordinator_endpoint = coordinator.endpoint();
    cluster.spawn(coordinator.run());

    let started = Instant::now();
    let recovered = Requester::start(config.requester(coordinator_endpoint)).await;
    let elapsed = started.elapsed();

    // Tear down every listener and in-flight connection.
    cluster.shutdown().await;

    Ok(Outcome { recovered, elapsed })
}

/// An endpoint that refuses connections.
async fn offline_endpoint(config: &ClusterConfig, position: usize) -> anyhow::Result<Endpoint> {
    let endpoint = config.shareholder_endpoint(position);
    if endpoint.addr().port() != 0 {
        return Ok(endpoint);
    }
    reserve_port(config.host).await
}

async fn reserve_port(host: IpAddr) -> anyhow::Result<Endpoint> {
    let listener = TcpListener::bind(SocketAddr::new(host, 0)).await?;
    Ok(Endpoint::from(listener.local_addr()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_chacha::rand_core::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    #[test]
    fn stragglers_keep_exactly_prompt_responders() {
        let config = ClusterConfig::ephemeral();
        let mut rng = ChaCha20Rng::seed_from_u64(3);
        let scenario = Scenario::stragglers_with_rng(
            config,
            "pls",
            3,
            Duration::from_secs(2),
            &mut rng,
        );
        assert_eq!(scenario.peers.len(), 10);
        let prompt = scenario
            .peers
            .iter()
            .filter(|p| **p == Peer::Online(Behavior::Prompt))
            .count();
        assert_eq!(prompt, 3);
        assert!(scenario.peers.iter().all(|p| match p {
            Peer::Online(Behavior::Delayed { delay }) => *delay >= Duration::from_secs(2),
            Peer::Online(Behavior::Prompt) | Peer::Online(Behavior::Silent) => true,
            _ => false,
        }));
    }

    #[test]
    fn with_peer_overrides_a_position() {
        let scenario = Scenario::new(ClusterConfig::ephemeral(), "pls").with_peer(4, Peer::Offline);
        assert_eq!(scenario.peer(4), Peer::Offline);
        assert_eq!(scenario.peer(3), Peer::default());
        assert_eq!(scenario.peer(99), Peer::default());
    }
}
