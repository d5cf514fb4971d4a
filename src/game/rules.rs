//! Rule engine strategy, selected once per room by game type

use serde_json::Value;

use crate::ws::protocol::RejectReason;

use super::arcade::{ArcadeRules, ArcadeVariant};
use super::race::RaceRules;
use super::seats::Seat;
use super::state::RoomState;
use super::{GameType, SessionId, UserId};

/// A gameplay intent from the player holding the turn
#[derive(Debug, Clone, PartialEq)]
pub enum GameCommand {
    /// Roll the die (race)
    Roll,
    /// Move one token by the pending die value (race)
    MoveToken { token_id: Option<Value> },
    /// Strike or shot with a declared power (arcade)
    Play {
        action: Option<Value>,
        power: Option<Value>,
    },
}

/// Why a command did not apply
#[derive(Debug, thiserror::Error)]
pub enum MoveError {
    #[error("move rejected: {0}")]
    Rejected(RejectReason),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<RejectReason> for MoveError {
    fn from(reason: RejectReason) -> Self {
        MoveError::Rejected(reason)
    }
}

/// What the turn state machine does after an accepted move
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEffect {
    /// Same player keeps the turn
    Hold,
    /// Pass the turn now
    Advance,
    /// Pass the turn after the room's advance delay
    AdvanceAfterDelay,
    /// The mover won
    Finish { winner: SessionId },
}

/// Journal entry for an accepted move, before the room numbers it
#[derive(Debug, Clone, PartialEq)]
pub struct JournalDraft {
    pub user_id: UserId,
    pub action_type: &'static str,
    pub payload: Value,
}

/// Accepted move result
#[derive(Debug, Clone, PartialEq)]
pub struct MoveOutcome {
    pub journal: JournalDraft,
    pub effect: TurnEffect,
}

/// Per-game-type move validation and resolution.
///
/// The room checks phase and turn ownership before calling `handle`; an
/// engine must not mutate `state` when it returns an error.
pub trait RuleEngine: Send {
    /// Hook for per-seat game state on join
    fn seat_created(&mut self, _state: &mut RoomState, _seat: &Seat) {}

    /// Hook for per-seat game state on permanent removal
    fn seat_removed(&mut self, _state: &mut RoomState, _seat: &Seat) {}

    fn handle(
        &mut self,
        state: &mut RoomState,
        session_id: &str,
        command: GameCommand,
    ) -> Result<MoveOutcome, MoveError>;
}

/// Build the engine for a game type
pub fn engine_for(game_type: GameType, seed: u64) -> Box<dyn RuleEngine> {
    match game_type {
        GameType::Race => Box::new(RaceRules::new(seed)),
        GameType::Strike => Box::new(ArcadeRules::new(ArcadeVariant::StrikeBoard, seed)),
        GameType::Pocket => Box::new(ArcadeRules::new(ArcadeVariant::Pocket, seed)),
    }
}

/// Read a client number the way browsers send it: a JSON number or a
/// numeric string
pub(crate) fn loose_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) if !s.trim().is_empty() => s.trim().parse().ok(),
        _ => None,
    }
}

/// Serialize a journal payload
pub(crate) fn to_payload<T: serde::Serialize>(payload: &T) -> Result<Value, MoveError> {
    serde_json::to_value(payload).map_err(|e| MoveError::Internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loose_numbers() {
        use serde_json::json;
        assert_eq!(loose_number(&json!(80)), Some(80.0));
        assert_eq!(loose_number(&json!(" 72.5 ")), Some(72.5));
        assert_eq!(loose_number(&json!("abc")), None);
        assert_eq!(loose_number(&json!("")), None);
        assert_eq!(loose_number(&json!(true)), None);
        assert_eq!(loose_number(&json!([1])), None);
    }

    fn rejected_as_invalid_action(result: Result<MoveOutcome, MoveError>) -> bool {
        matches!(result, Err(MoveError::Rejected(RejectReason::InvalidAction)))
    }

    #[test]
    fn engine_follows_game_type() {
        let mut race = engine_for(GameType::Race, 1);
        let mut state = RoomState::new("RULES1".into(), GameType::Race, 2);
        let play = GameCommand::Play { action: None, power: None };
        assert!(rejected_as_invalid_action(race.handle(&mut state, "a", play.clone())));

        for game_type in [GameType::Strike, GameType::Pocket] {
            let mut arcade = engine_for(game_type, 1);
            let mut state = RoomState::new("RULES2".into(), game_type, 2);
            assert!(rejected_as_invalid_action(arcade.handle(&mut state, "a", GameCommand::Roll)));
        }
    }
}
