mod endpoint;
pub mod wire;

pub use endpoint::Endpoint;
pub use wire::{Connection, Failure, Message};
