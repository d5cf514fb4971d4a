//! Versioned room snapshots and the diff step that replicates them

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::ws::protocol::ServerMsg;

use super::race::{RacePlayer, SAFE_ZONES};
use super::seats::Seat;
use super::state::RoomState;
use super::{GameType, Phase, SessionId, UserId};

/// Full replicated view of a room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub room_code: String,
    pub game_type: GameType,
    pub phase: Phase,
    pub max_players: usize,
    pub turn_index: usize,
    pub turn_no: u32,
    pub winner_user_id: Option<UserId>,
    pub status_message: String,
    pub target_score: u32,
    pub dice_value: u8,
    pub safe_zones: Vec<i32>,
    pub movable_token_ids: Vec<u8>,
    /// Seats in turn order
    pub seats: Vec<Seat>,
    pub scores: BTreeMap<SessionId, u32>,
    pub race: BTreeMap<UserId, RacePlayer>,
}

impl RoomSnapshot {
    pub fn capture(state: &RoomState) -> Self {
        let mut seats: Vec<Seat> = state
            .turn
            .order()
            .iter()
            .filter_map(|sid| state.seats.get(sid).cloned())
            .collect();
        // Seats outside the rotation go last, in a stable order
        let mut stray: Vec<Seat> = state
            .seats
            .iter()
            .filter(|s| !state.turn.order().contains(&s.session_id))
            .cloned()
            .collect();
        stray.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        seats.extend(stray);

        Self {
            room_code: state.room_code.clone(),
            game_type: state.game_type,
            phase: state.phase(),
            max_players: state.max_players,
            turn_index: state.turn.turn_index(),
            turn_no: state.turn.turn_no(),
            winner_user_id: state.winner_user_id.clone(),
            status_message: state.status_message.clone(),
            target_score: state.target_score,
            dice_value: state.dice_value,
            safe_zones: if state.game_type == GameType::Race {
                SAFE_ZONES.to_vec()
            } else {
                Vec::new()
            },
            movable_token_ids: state.movable_token_ids.clone(),
            seats,
            scores: state.seats.scores().iter().map(|(k, v)| (k.clone(), *v)).collect(),
            race: state.race.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        }
    }
}

/// Fields that changed between two snapshots. Static room settings never appear.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_no: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner_user_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dice_value: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub movable_token_ids: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seats: Option<Vec<Seat>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scores: Option<BTreeMap<SessionId, u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub race: Option<BTreeMap<UserId, RacePlayer>>,
}

fn changed<T: PartialEq + Clone>(prev: &T, next: &T) -> Option<T> {
    (prev != next).then(|| next.clone())
}

impl StatePatch {
    pub fn diff(prev: &RoomSnapshot, next: &RoomSnapshot) -> Self {
        Self {
            phase: changed(&prev.phase, &next.phase),
            turn_index: changed(&prev.turn_index, &next.turn_index),
            turn_no: changed(&prev.turn_no, &next.turn_no),
            winner_user_id: changed(&prev.winner_user_id, &next.winner_user_id).flatten(),
            status_message: changed(&prev.status_message, &next.status_message),
            dice_value: changed(&prev.dice_value, &next.dice_value),
            movable_token_ids: changed(&prev.movable_token_ids, &next.movable_token_ids),
            seats: changed(&prev.seats, &next.seats),
            scores: changed(&prev.scores, &next.scores),
            race: changed(&prev.race, &next.race),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Tracks the last published snapshot and its version
pub struct SnapshotBuilder {
    version: u64,
    last: RoomSnapshot,
}

impl SnapshotBuilder {
    pub fn new(state: &RoomState) -> Self {
        Self {
            version: 0,
            last: RoomSnapshot::capture(state),
        }
    }

    /// Capture `state`, returning a patch message if anything changed
    pub fn publish(&mut self, state: &RoomState) -> Option<ServerMsg> {
        let next = RoomSnapshot::capture(state);
        let patch = StatePatch::diff(&self.last, &next);
        if patch.is_empty() {
            return None;
        }
        self.version += 1;
        self.last = next;
        Some(ServerMsg::StatePatch {
            version: self.version,
            patch,
        })
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Last published snapshot
    pub fn current(&self) -> &RoomSnapshot {
        &self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room() -> RoomState {
        let mut state = RoomState::new("SNAP01".into(), GameType::Strike, 3);
        for (sid, uid, sym) in [("z", "1", "WHITE"), ("a", "2", "BLACK")] {
            state.seats.insert(Seat::new(sid.into(), uid.into(), format!("u{}", uid), sym.into()));
            state.turn.push(sid.into());
        }
        state
    }

    #[test]
    fn no_change_publishes_nothing() {
        let state = room();
        let mut builder = SnapshotBuilder::new(&state);
        assert!(builder.publish(&state).is_none());
        assert_eq!(builder.version(), 0);
    }

    #[test]
    fn patch_carries_only_changed_fields() {
        let mut state = room();
        let mut builder = SnapshotBuilder::new(&state);
        state.seats.add_score("a", 2, 15);

        let Some(ServerMsg::StatePatch { version, patch }) = builder.publish(&state) else {
            panic!("expected a patch");
        };
        assert_eq!(version, 1);
        assert_eq!(patch.scores.as_ref().and_then(|s| s.get("a")).copied(), Some(2));
        assert!(patch.phase.is_none());
        assert!(patch.seats.is_none());

        let json = serde_json::to_value(&patch).unwrap();
        assert_eq!(json.as_object().map(|o| o.len()), Some(1));
        assert_eq!(builder.current().scores["a"], 2);
    }

    #[test]
    fn seats_follow_turn_order() {
        let state = room();
        let snapshot = RoomSnapshot::capture(&state);
        let order: Vec<&str> = snapshot.seats.iter().map(|s| s.session_id.as_str()).collect();
        assert_eq!(order, ["z", "a"]);
        assert!(snapshot.safe_zones.is_empty());
    }

    #[test]
    fn race_snapshot_lists_safe_zones() {
        let state = RoomState::new("SNAP02".into(), GameType::Race, 2);
        assert_eq!(RoomSnapshot::capture(&state).safe_zones, SAFE_ZONES.to_vec());
    }
}
