//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::game::rules::GameCommand;
use crate::game::snapshot::{RoomSnapshot, StatePatch};
use crate::game::{GameType, SessionId, UserId};

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Roll the die (race)
    Roll,

    /// Move a token by the pending die value (race)
    #[serde(rename_all = "camelCase")]
    MoveToken {
        /// Kept as raw JSON so a malformed id reaches the rules as INVALID_TOKEN
        #[serde(default)]
        token_id: Option<Value>,
    },

    /// Strike or shot (arcade)
    Move {
        /// Defaults to the game's own action
        #[serde(default)]
        action: Option<Value>,
        /// 0..=100, defaults to 50
        #[serde(default)]
        power: Option<Value>,
    },

    /// Voluntary leave, skips the reconnection window
    Leave,

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },
}

impl ClientMsg {
    /// Gameplay intent carried by this message, if any
    pub fn into_command(self) -> Option<GameCommand> {
        match self {
            ClientMsg::Roll => Some(GameCommand::Roll),
            ClientMsg::MoveToken { token_id } => Some(GameCommand::MoveToken { token_id }),
            ClientMsg::Move { action, power } => Some(GameCommand::Play { action, power }),
            ClientMsg::Leave | ClientMsg::Ping { .. } => None,
        }
    }
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Full state, sent only to the joining connection
    #[serde(rename_all = "camelCase")]
    Joined {
        session_id: SessionId,
        user_id: UserId,
        version: u64,
        snapshot: RoomSnapshot,
    },

    /// Full state again after this connection fell behind the broadcasts.
    /// Patches at or below `version` are already applied.
    Resync {
        version: u64,
        snapshot: RoomSnapshot,
    },

    /// Changed fields since the previous version
    StatePatch {
        version: u64,
        patch: StatePatch,
    },

    /// Intent refused, sent only to the sender
    MoveRejected {
        reason: RejectReason,
    },

    /// Room filled and play begins
    #[serde(rename_all = "camelCase")]
    GameStarted {
        room_code: String,
        turn_index: usize,
        turn_no: u32,
        game_type: GameType,
        current_turn_user_id: UserId,
    },

    #[serde(rename_all = "camelCase")]
    TurnChanged {
        turn_index: usize,
        turn_no: u32,
        current_turn_user_id: UserId,
    },

    #[serde(rename_all = "camelCase")]
    GameOver {
        winner_user_id: Option<UserId>,
        winner_name: String,
        game_type: GameType,
    },

    /// Error message
    Error {
        code: String,
        message: String,
    },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
    },
}

impl ServerMsg {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ServerMsg::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Why an intent was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectReason {
    #[error("not your turn")]
    NotYourTurn,
    #[error("dice already rolled")]
    DiceAlreadyRolled,
    #[error("invalid token")]
    InvalidToken,
    #[error("token not found")]
    TokenNotFound,
    #[error("move not allowed")]
    MoveNotAllowed,
    #[error("roll dice first")]
    RollDiceFirst,
    #[error("invalid action")]
    InvalidAction,
    #[error("invalid power")]
    InvalidPower,
    #[error("server error")]
    ServerError,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_messages_parse() {
        let msg: ClientMsg = serde_json::from_str(r#"{"type":"move_token","tokenId":2}"#).unwrap();
        assert!(matches!(msg, ClientMsg::MoveToken { token_id: Some(t) } if t == json!(2)));

        let msg: ClientMsg = serde_json::from_str(r#"{"type":"move"}"#).unwrap();
        assert!(matches!(
            msg,
            ClientMsg::Move {
                action: None,
                power: None
            }
        ));

        let msg: ClientMsg = serde_json::from_str(r#"{"type":"move","action":"shot","power":72.5}"#).unwrap();
        assert_eq!(
            msg.into_command(),
            Some(GameCommand::Play {
                action: Some(json!("shot")),
                power: Some(json!(72.5))
            })
        );

        let msg: ClientMsg = serde_json::from_str(r#"{"type":"roll"}"#).unwrap();
        assert_eq!(msg.into_command(), Some(GameCommand::Roll));
    }

    #[test]
    fn mistyped_fields_still_parse() {
        for raw in [
            r#"{"type":"move","power":"80"}"#,
            r#"{"type":"move","power":"abc"}"#,
            r#"{"type":"move","action":5}"#,
            r#"{"type":"move_token","tokenId":"x"}"#,
            r#"{"type":"move_token","tokenId":null}"#,
        ] {
            let msg: ClientMsg = serde_json::from_str(raw).unwrap();
            assert!(msg.into_command().is_some(), "{raw}");
        }

        let msg: ClientMsg = serde_json::from_str(r#"{"type":"move","action":5,"power":"abc"}"#).unwrap();
        assert_eq!(
            msg.into_command(),
            Some(GameCommand::Play {
                action: Some(json!(5)),
                power: Some(json!("abc"))
            })
        );
    }

    #[test]
    fn unknown_type_is_an_error() {
        assert!(serde_json::from_str::<ClientMsg>(r#"{"type":"teleport"}"#).is_err());
    }

    #[test]
    fn server_messages_use_wire_names() {
        let json = serde_json::to_value(ServerMsg::MoveRejected {
            reason: RejectReason::NotYourTurn,
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"type": "move_rejected", "reason": "NOT_YOUR_TURN"}));

        let json = serde_json::to_value(ServerMsg::TurnChanged {
            turn_index: 1,
            turn_no: 3,
            current_turn_user_id: "42".into(),
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "turn_changed", "turnIndex": 1, "turnNo": 3, "currentTurnUserId": "42"})
        );
    }

    #[test]
    fn resync_is_tagged_with_its_version() {
        let state = crate::game::state::RoomState::new("ABC123".into(), GameType::Race, 2);
        let json = serde_json::to_value(ServerMsg::Resync {
            version: 70,
            snapshot: RoomSnapshot::capture(&state),
        })
        .unwrap();
        assert_eq!(json["type"], "resync");
        assert_eq!(json["version"], 70);
        assert_eq!(json["snapshot"]["roomCode"], "ABC123");
    }
}
