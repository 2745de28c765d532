use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use super::Role;
use crate::config::CoordinatorConfig;
use crate::error::{ProtocolResult, WireError};
use crate::net::{Connection, Endpoint, Message};
use crate::quorum;
use crate::shamir;

/// Brokers requests between requesters and the shareholders.
///
/// Pull: collects a quorum itself, reconstructs and answers with the secret.
/// Push: forwards the requester's callback endpoint to every shareholder and
/// answers with how many of them took the request.
pub struct Coordinator {
    config: Arc<CoordinatorConfig>,
    listener: TcpListener,
    endpoint: Endpoint,
}

impl Coordinator {
    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }
}

#[async_trait]
impl Role for Coordinator {
    type Config = CoordinatorConfig;
    type Output = ();

    async fn bind(config: CoordinatorConfig) -> ProtocolResult<Self> {
        let listener = TcpListener::bind(config.bind.addr()).await?;
        let endpoint = Endpoint::from(listener.local_addr()?);
        info!(
            "[COORDINATOR] listening on {}, {} shareholders, threshold {}",
            endpoint,
            config.shareholders.len(),
            config.threshold
        );
        Ok(Self {
            config: Arc::new(config),
            listener,
            endpoint,
        })
    }

    async fn run(self) -> ProtocolResult<()> {
        let mut requests = JoinSet::new();
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let config = self.config.clone();
                        requests.spawn(async move {
                            let mut conn = Connection::new(stream, peer);
                            if let Err(e) = serve(&mut conn, &config).await {
                                warn!("[COORDINATOR] request from {} failed: {}", peer, e);
                            }
                        });
                    }
                    Err(e) => {
                        warn!("[COORDINATOR] accept failed: {}", e);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                },
                Some(_) = requests.join_next(), if !requests.is_empty() => {}
            }
        }
    }
}

async fn serve(conn: &mut Connection, config: &CoordinatorConfig) -> Result<(), WireError> {
    let first = tokio::time::timeout(config.connect_timeout, conn.recv())
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "no request before timeout"))??;
    let callback = match first {
        Message::Request { token, callback } if token == config.token => callback,
        Message::Request { .. } => {
            warn!("[COORDINATOR] bad token from {}, ignored", conn.peer());
            return Ok(());
        }
        other => {
            return Err(WireError::Unexpected {
                expected: "request",
                got: other.kind(),
            })
        }
    };

    let reply = match callback {
        None => {
            info!("[COORDINATOR] pull request from {}", conn.peer());
            retrieve(config).await
        }
        Some(requester) => {
            info!("[COORDINATOR] push request from {} -> {}", conn.peer(), requester);
            let dispatched = forward(config, requester).await;
            Message::Forwarded { dispatched }
        }
    };
    conn.send(&reply).await
}

/// Pull topology: race-to-M over all shareholders, then interpolate.
async fn retrieve(config: &CoordinatorConfig) -> Message {
    let request = Message::Request {
        token: config.token.clone(),
        callback: None,
    };
    let collected = quorum::collect(
        &config.shareholders,
        config.threshold,
        &request,
        config.quorum_timeout,
        config.connect_timeout,
    )
    .await;

    let secret = collected.and_then(|shares| {
        let indices: Vec<u16> = shares.iter().map(shamir::Share::index).collect();
        debug!("[COORDINATOR] reconstructing from shares {:?}", indices);
        Ok(Zeroizing::new(shamir::reconstruct(&shares, config.threshold)?))
    });

    match secret {
        Ok(secret) => {
            info!("[COORDINATOR] secret reconstructed");
            Message::Secret {
                value: hex::encode(secret.as_slice()),
            }
        }
        Err(e) => {
            warn!("[COORDINATOR] retrieval failed: {}", e);
            Message::Failure { cause: (&e).into() }
        }
    }
}

/// Push topology: hand the requester's endpoint to every shareholder.
/// Returns how many of them accepted the forwarded request.
async fn forward(config: &CoordinatorConfig, requester: Endpoint) -> usize {
    let request = Message::Request {
        token: config.token.clone(),
        callback: Some(requester),
    };
    let mut sends = JoinSet::new();
    for &shareholder in &config.shareholders {
        let request = request.clone();
        let connect_timeout = config.connect_timeout;
        sends.spawn(async move {
            let mut conn = Connection::connect(shareholder, connect_timeout).await?;
            conn.send(&request).await?;
            Ok::<_, WireError>(shareholder)
        });
    }

    let mut dispatched = 0;
    while let Some(joined) = sends.join_next().await {
        match joined {
            Ok(Ok(_)) => dispatched += 1,
            Ok(Err(e)) => warn!("[COORDINATOR] forward failed: {}", e),
            Err(e) => warn!("[COORDINATOR] forward task died: {}", e),
        }
    }
    info!(
        "[COORDINATOR] forwarded to {}/{} shareholders",
        dispatched,
        config.shareholders.len()
    );
    dispatched
}
