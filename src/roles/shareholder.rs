use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::Role;
use crate::config::{Behavior, ShareholderConfig};
use crate::error::{ProtocolResult, WireError};
use crate::net::{Connection, Endpoint, Message};

/// Payload a `Corrupt` shareholder sends instead of its share.
const CORRUPT_REPLY: &[u8] = b"{\"type\":\"share\",\"share\":\"not-a-share\"}\n";

/// Holds exactly one share and hands it out once per request.
pub struct Shareholder {
    config: Arc<ShareholderConfig>,
    listener: TcpListener,
    endpoint: Endpoint,
}

impl Shareholder {
    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    pub fn index(&self) -> u16 {
        self.config.share.index()
    }
}

#[async_trait]
impl Role for Shareholder {
    type Config = ShareholderConfig;
    type Output = ();

    async fn bind(config: ShareholderConfig) -> ProtocolResult<Self> {
        let listener = TcpListener::bind(config.bind.addr()).await?;
        let endpoint = Endpoint::from(listener.local_addr()?);
        info!(
            "[SHAREHOLDER {}] listening on {} ({:?})",
            config.share.index(),
            endpoint,
            config.behavior
        );
        Ok(Self {
            config: Arc::new(config),
            listener,
            endpoint,
        })
    }

    /// Serves until the task is aborted.
    async fn run(self) -> ProtocolResult<()> {
        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let config = self.config.clone();
                        connections.spawn(serve(Connection::new(stream, peer), config));
                    }
                    Err(e) => {
                        warn!("[SHAREHOLDER {}] accept failed: {}", self.index(), e);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }
    }
}

async fn serve(mut conn: Connection, config: Arc<ShareholderConfig>) {
    let index = config.share.index();
    let first = match tokio::time::timeout(config.connect_timeout, conn.recv()).await {
        Ok(first) => first,
        Err(_) => {
            debug!("[SHAREHOLDER {}] no request from {}, closing", index, conn.peer());
            return;
        }
    };
    let callback = match first {
        Ok(Message::Request { token, callback }) if token == config.token => callback,
        Ok(Message::Request { .. }) => {
            warn!("[SHAREHOLDER {}] bad token from {}, ignored", index, conn.peer());
            return;
        }
        Ok(other) => {
            warn!(
                "[SHAREHOLDER {}] unexpected {} from {}, ignored",
                index,
                other.kind(),
                conn.peer()
            );
            return;
        }
        Err(e) => {
            debug!("[SHAREHOLDER {}] unreadable request: {}", index, e);
            return;
        }
    };

    match callback {
        None => {
            if config.behavior == Behavior::Silent {
                conn.drain_until_closed().await;
                return;
            }
            pause(&config.behavior).await;
            if let Err(e) = answer(&mut conn, &config).await {
                debug!("[SHAREHOLDER {}] reply to {} lost: {}", index, conn.peer(), e);
            }
        }
        Some(destination) => {
            // Push: nothing goes back on the inbound connection.
            drop(conn);
            if config.behavior == Behavior::Silent {
                return;
            }
            pause(&config.behavior).await;
            match deliver(destination, &config).await {
                Ok(()) => debug!("[SHAREHOLDER {}] pushed share to {}", index, destination),
                // Redundant shareholders cover for a failed delivery.
                Err(e) => warn!(
                    "[SHAREHOLDER {}] push to {} failed: {}",
                    index, destination, e
                ),
            }
        }
    }
}

async fn pause(behavior: &Behavior) {
    if let Behavior::Delayed { delay } = behavior {
        tokio::time::sleep(*delay).await;
    }
}

async fn answer(conn: &mut Connection, config: &ShareholderConfig) -> Result<(), WireError> {
    match config.behavior {
        Behavior::Corrupt => conn.send_raw(CORRUPT_REPLY).await,
        _ => conn.send(&Message::Share { share: config.share }).await,
    }
}

async fn deliver(destination: Endpoint, config: &ShareholderConfig) -> Result<(), WireError> {
    let mut conn = Connection::connect(destination, config.connect_timeout).await?;
    answer(&mut conn, config).await
}
