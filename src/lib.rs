//! Threshold secret retrieval: a secret is split into n Shamir shares held by
//! separate shareholders, and any t of them are raced for and recombined on
//! request, either by the coordinator (pull) or by the requester (push).

pub mod config;
pub mod error;
pub mod math;
pub mod net;
pub mod quorum;
pub mod roles;
pub mod shamir;
pub mod simulation;

pub use config::{Behavior, ClusterConfig, Topology};
pub use error::{ProtocolError, SharingError, WireError};
pub use shamir::{reconstruct, split, Share};
