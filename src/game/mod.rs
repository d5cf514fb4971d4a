//! Game engine modules

pub mod arcade;
pub mod physics;
pub mod race;
pub mod room;
pub mod rules;
pub mod seats;
pub mod snapshot;
pub mod state;
pub mod supervisor;
pub mod turn;

pub use room::{GameRoom, JoinAccepted, JoinError, RoomHandle, RoomSettings};
pub use state::RoomState;
pub use supervisor::{RoomInfo, RoomSupervisor, SupervisorError};
pub use turn::Phase;

use serde::{Deserialize, Serialize};

/// Identifier of one live connection to a room
pub type SessionId = String;

/// Authenticated user identifier (JWT subject)
pub type UserId = String;

/// Game variants hosted by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameType {
    /// Four-token race around a shared ring
    Race,
    /// Disc-striking board
    Strike,
    /// Simplified pocket game
    Pocket,
}

impl GameType {
    /// Fixed seat symbol palette, allocated in order
    pub fn symbols(self) -> &'static [&'static str] {
        match self {
            GameType::Race => &["RED", "GREEN", "YELLOW", "BLUE"],
            GameType::Strike => &["WHITE", "BLACK", "GREEN", "YELLOW"],
            GameType::Pocket => &["SOLID", "STRIPE", "GREEN", "YELLOW"],
        }
    }

    /// Finished tokens (race) or points (arcade) needed to win
    pub fn target_score(self) -> u32 {
        match self {
            GameType::Race => 4,
            GameType::Pocket => 8,
            GameType::Strike => 15,
        }
    }

    pub fn start_message(self) -> &'static str {
        match self {
            GameType::Race => "Roll dice and race all 4 tokens home",
            GameType::Pocket => "Pot balls to reach 8",
            GameType::Strike => "Strike to reach 15 points",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GameType::Race => "RACE",
            GameType::Strike => "STRIKE",
            GameType::Pocket => "POCKET",
        }
    }
}

impl std::fmt::Display for GameType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn game_type_wire_names() {
        assert_eq!(serde_json::to_string(&GameType::Race).unwrap(), "\"RACE\"");
        let parsed: GameType = serde_json::from_str("\"POCKET\"").unwrap();
        assert_eq!(parsed, GameType::Pocket);
    }

    #[test]
    fn target_scores_per_game() {
        assert_eq!(GameType::Race.target_score(), 4);
        assert_eq!(GameType::Pocket.target_score(), 8);
        assert_eq!(GameType::Strike.target_score(), 15);
    }
}
