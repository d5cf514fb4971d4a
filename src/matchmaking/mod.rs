//! Matchmaking queue interface

pub mod queue;
pub mod service;

pub use queue::QueueKey;
pub use service::{MatchmakingService, QueueTicket};
