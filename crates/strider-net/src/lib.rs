//! Strider Net - Movement reconciliation between client and server
//!
//! Transport-agnostic: the caller moves the messages.
//! - [`ClientPrediction`] simulates locally, saves moves and replays them after a correction
//! - [`ServerMoveHandler`] re-simulates client moves and queues corrections
//! - [`ReplicatedMovement`] snapshots drive simulated proxies

mod base;
pub mod client;
pub mod config;
pub mod error;
pub mod messages;
pub mod replicated;
pub mod server;

pub use client::{ClientPrediction, SavedMove};
pub use config::NetConfig;
pub use error::NetError;
pub use messages::{decode, encode, ClientMove, ServerAdjustment, ServerResponse};
pub use replicated::ReplicatedMovement;
pub use server::ServerMoveHandler;
