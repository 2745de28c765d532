//! The three cooperating roles. Each one owns its own listener and config;
//! they share nothing but messages on the network.

mod coordinator;
mod requester;
mod shareholder;

use async_trait::async_trait;

pub use coordinator::Coordinator;
pub use requester::Requester;
pub use shareholder::Shareholder;

use crate::error::ProtocolResult;

#[async_trait]
pub trait Role: Sized + Send {
    type Config: Send + 'static;
    type Output: Send;

    /// Claims the role's network resources (listening socket, if any).
    async fn bind(config: Self::Config) -> ProtocolResult<Self>;

    async fn run(self) -> ProtocolResult<Self::Output>;

    async fn start(config: Self::Config) -> ProtocolResult<Self::Output> {
        Self::bind(config).await?.run().await
    }
}
