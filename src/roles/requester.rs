use async_trait::async_trait;
use tokio::time::Instant;
use tracing::info;

use super::Role;
use crate::config::{RequesterConfig, Topology};
use crate::error::{ProtocolError, ProtocolResult, WireError};
use crate::net::{Connection, Message};
use crate::quorum::Inbox;
use crate::shamir;

/// Asks the coordinator for the secret once and returns it.
pub struct Requester {
    config: RequesterConfig,
}

#[async_trait]
impl Role for Requester {
    type Config = RequesterConfig;
    type Output = Vec<u8>;

    async fn bind(config: RequesterConfig) -> ProtocolResult<Self> {
        Ok(Self { config })
    }

    async fn run(self) -> ProtocolResult<Vec<u8>> {
        match self.config.topology {
            Topology::Pull => self.pull().await,
            Topology::Push => self.push().await,
        }
    }
}

impl Requester {
    async fn pull(&self) -> ProtocolResult<Vec<u8>> {
        let started = Instant::now();
        // The coordinator spends up to quorum_timeout collecting, plus its own connects.
        let deadline = started + self.config.quorum_timeout + self.config.connect_timeout;

        let mut conn =
            Connection::connect(self.config.coordinator, self.config.connect_timeout).await?;
        conn.send(&Message::Request {
            token: self.config.token.clone(),
            callback: None,
        })
        .await?;
        info!("[REQUESTER] pull request sent to {}", self.config.coordinator);

        match self.await_reply(&mut conn, started, deadline).await? {
            Message::Secret { value } => Ok(hex::decode(value).map_err(WireError::from)?),
            Message::Failure { cause } => Err(cause.into()),
            other => Err(WireError::Unexpected {
                expected: "secret",
                got: other.kind(),
            }
            .into()),
        }
    }

    async fn push(&self) -> ProtocolResult<Vec<u8>> {
        // Listen first so that no shareholder finds the door closed.
        let inbox = Inbox::bind(self.config.callback_host).await?;
        let started = Instant::now();
        let deadline = started + self.config.quorum_timeout;

        let mut conn =
            Connection::connect(self.config.coordinator, self.config.connect_timeout).await?;
        conn.send(&Message::Request {
            token: self.config.token.clone(),
            callback: Some(inbox.endpoint()),
        })
        .await?;
        info!(
            "[REQUESTER] push request sent to {}, callback {}",
            self.config.coordinator,
            inbox.endpoint()
        );

        let dispatched = match self.await_reply(&mut conn, started, deadline).await? {
            Message::Forwarded { dispatched } => dispatched,
            Message::Failure { cause } => return Err(cause.into()),
            other => {
                return Err(WireError::Unexpected {
                    expected: "forwarded",
                    got: other.kind(),
                }
                .into())
            }
        };
        drop(conn);
        info!("[REQUESTER] coordinator reached {} shareholders", dispatched);

        let shares = inbox
            .collect(dispatched, self.config.threshold, started, deadline)
            .await?;
        Ok(shamir::reconstruct(&shares, self.config.threshold)?)
    }

    async fn await_reply(
        &self,
        conn: &mut Connection,
        started: Instant,
        deadline: Instant,
    ) -> ProtocolResult<Message> {
        match tokio::time::timeout_at(deadline, conn.recv()).await {
            Ok(reply) => Ok(reply?),
            Err(_) => Err(ProtocolError::QuorumTimeout {
                accepted: 0,
                threshold: self.config.threshold,
                elapsed: started.elapsed(),
            }),
        }
    }
}
