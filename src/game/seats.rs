//! Seats and the per-seat score table

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{GameType, SessionId, UserId};

/// A connection slot bound to one user within one room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Seat {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub display_name: String,
    pub symbol: String,
    pub connected: bool,
}

impl Seat {
    pub fn new(session_id: SessionId, user_id: UserId, display_name: String, symbol: String) -> Self {
        Self {
            session_id,
            user_id,
            display_name,
            symbol,
            connected: true,
        }
    }
}

/// Seats keyed by session id, with their scores
#[derive(Debug, Clone, Default)]
pub struct SeatTable {
    seats: HashMap<SessionId, Seat>,
    scores: HashMap<SessionId, u32>,
}

impl SeatTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.seats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seats.is_empty()
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.seats.contains_key(session_id)
    }

    pub fn get(&self, session_id: &str) -> Option<&Seat> {
        self.seats.get(session_id)
    }

    pub fn get_mut(&mut self, session_id: &str) -> Option<&mut Seat> {
        self.seats.get_mut(session_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Seat> {
        self.seats.values()
    }

    pub fn connected_count(&self) -> usize {
        self.seats.values().filter(|s| s.connected).count()
    }

    /// Session currently bound to a user, if seated
    pub fn session_of(&self, user_id: &str) -> Option<SessionId> {
        self.seats
            .values()
            .find(|s| s.user_id == user_id)
            .map(|s| s.session_id.clone())
    }

    /// First palette symbol not held by a seated player
    pub fn allocate_symbol(&self, game_type: GameType) -> String {
        game_type
            .symbols()
            .iter()
            .find(|sym| !self.seats.values().any(|s| s.symbol == **sym))
            .map(|sym| sym.to_string())
            .unwrap_or_else(|| format!("P{}", self.seats.len() + 1))
    }

    pub fn insert(&mut self, seat: Seat) {
        self.scores.insert(seat.session_id.clone(), 0);
        self.seats.insert(seat.session_id.clone(), seat);
    }

    pub fn remove(&mut self, session_id: &str) -> Option<Seat> {
        self.scores.remove(session_id);
        self.seats.remove(session_id)
    }

    /// Rebind a seat and its score to a new session id
    pub fn migrate(&mut self, old: &str, new: &str) -> bool {
        let Some(mut seat) = self.seats.remove(old) else {
            return false;
        };
        let score = self.scores.remove(old).unwrap_or(0);
        seat.session_id = new.to_string();
        self.seats.insert(new.to_string(), seat);
        self.scores.insert(new.to_string(), score);
        true
    }

    pub fn score(&self, session_id: &str) -> u32 {
        self.scores.get(session_id).copied().unwrap_or(0)
    }

    /// Add to a score, capped at `cap`. Returns (from, to).
    pub fn add_score(&mut self, session_id: &str, gain: u32, cap: u32) -> (u32, u32) {
        let entry = self.scores.entry(session_id.to_string()).or_insert(0);
        let from = *entry;
        let to = from.saturating_add(gain).min(cap).max(from);
        *entry = to;
        (from, to)
    }

    pub fn scores(&self) -> &HashMap<SessionId, u32> {
        &self.scores
    }
}
