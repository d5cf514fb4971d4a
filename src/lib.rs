//! Turn Board Server - authoritative server for turn-based board games
//!
//! Hosts rooms for a token race, a disc-striking board and a pocket game:
//! - WebSocket sessions with reconnection windows
//! - Per-room actors owning rules, turns and replicated state
//! - Room codes, presence and matchmaking queues
//! - An ordered move journal (in memory or PostgREST)

pub mod app;
pub mod config;
pub mod game;
pub mod http;
pub mod matchmaking;
pub mod store;
pub mod util;
pub mod ws;
