//! Authoritative room state (owned by the room task)

use std::collections::HashMap;

use super::race::RacePlayer;
use super::seats::SeatTable;
use super::turn::TurnState;
use super::{GameType, Phase, UserId};

/// Everything a room replicates to its clients
#[derive(Debug, Clone)]
pub struct RoomState {
    pub room_code: String,
    pub game_type: GameType,
    pub max_players: usize,
    pub target_score: u32,
    pub status_message: String,
    pub winner_user_id: Option<UserId>,
    /// Pending die value, 0 when none
    pub dice_value: u8,
    pub movable_token_ids: Vec<u8>,
    pub turn: TurnState,
    pub seats: SeatTable,
    pub race: HashMap<UserId, RacePlayer>,
}

impl RoomState {
    pub fn new(room_code: String, game_type: GameType, max_players: usize) -> Self {
        Self {
            room_code,
            game_type,
            max_players,
            target_score: game_type.target_score(),
            status_message: game_type.start_message().to_string(),
            winner_user_id: None,
            dice_value: 0,
            movable_token_ids: Vec::new(),
            turn: TurnState::new(),
            seats: SeatTable::new(),
            race: HashMap::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.turn.phase()
    }

    pub fn is_full(&self) -> bool {
        self.seats.len() >= self.max_players
    }

    /// Display name of the player holding the turn
    pub fn current_player_name(&self) -> String {
        self.turn
            .current()
            .and_then(|sid| self.seats.get(sid))
            .map(|s| s.display_name.clone())
            .unwrap_or_else(|| "Player".to_string())
    }

    /// User id of the player holding the turn, empty when nobody does
    pub fn current_user_id(&self) -> String {
        self.turn
            .current()
            .and_then(|sid| self.seats.get(sid))
            .map(|s| s.user_id.clone())
            .unwrap_or_default()
    }

    /// Clear the per-turn fields and announce whose turn it is
    pub fn reset_turn_transients(&mut self) {
        self.dice_value = 0;
        self.movable_token_ids.clear();
        self.status_message = format!("{} turn", self.current_player_name());
    }

    /// Pass the turn on. Returns false when the rotation is empty.
    pub fn advance_turn(&mut self) -> bool {
        if !self.turn.advance() {
            return false;
        }
        self.reset_turn_transients();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::seats::Seat;

    #[test]
    fn advance_clears_transients() {
        let mut state = RoomState::new("ABC123".into(), GameType::Race, 2);
        for (sid, uid, name) in [("a", "1", "Ann"), ("b", "2", "Bob")] {
            state
                .seats
                .insert(Seat::new(sid.into(), uid.into(), name.into(), "RED".into()));
            state.turn.push(sid.into());
        }
        state.dice_value = 4;
        state.movable_token_ids = vec![1, 2];

        assert!(state.advance_turn());
        assert_eq!(state.dice_value, 0);
        assert!(state.movable_token_ids.is_empty());
        assert_eq!(state.status_message, "Bob turn");
        assert_eq!(state.current_user_id(), "2");
    }
}
