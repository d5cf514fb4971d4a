//! Match and move journal

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::game::{GameType, UserId};

use super::StoreError;

pub type MatchId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchStatus {
    Ongoing,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub id: MatchId,
    pub game_type: GameType,
    pub room_id: Uuid,
    pub room_code: String,
    pub status: MatchStatus,
    pub winner_user_id: Option<UserId>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// One accepted move. Unique by (match_id, turn_no, move_no).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveRecord {
    pub match_id: MatchId,
    pub user_id: UserId,
    pub turn_no: u32,
    pub move_no: u64,
    pub action_type: String,
    pub payload: Value,
    /// Milliseconds since the room started
    pub server_tick: u64,
    pub is_valid: bool,
}

impl MoveRecord {
    pub fn key(&self) -> (MatchId, u32, u64) {
        (self.match_id, self.turn_no, self.move_no)
    }
}

#[async_trait]
pub trait MatchStore: Send + Sync {
    async fn create_match(
        &self,
        game_type: GameType,
        room_id: Uuid,
        room_code: &str,
    ) -> Result<MatchId, StoreError>;

    /// Insert or overwrite the move with the same key
    async fn append_move(&self, record: &MoveRecord) -> Result<(), StoreError>;

    async fn finish_match(&self, match_id: MatchId, winner_user_id: Option<&str>) -> Result<(), StoreError>;
}

/// In-process journal
#[derive(Default)]
pub struct MemoryMatchStore {
    next_id: AtomicI64,
    matches: RwLock<HashMap<MatchId, MatchRecord>>,
    moves: RwLock<BTreeMap<(MatchId, u32, u64), MoveRecord>>,
}

impl MemoryMatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_match(&self, match_id: MatchId) -> Option<MatchRecord> {
        self.matches.read().get(&match_id).cloned()
    }

    /// Moves of a match in (turn, move) order
    pub fn moves_for(&self, match_id: MatchId) -> Vec<MoveRecord> {
        self.moves
            .read()
            .range((match_id, 0, 0)..=(match_id, u32::MAX, u64::MAX))
            .map(|(_, m)| m.clone())
            .collect()
    }
}

#[async_trait]
impl MatchStore for MemoryMatchStore {
    async fn create_match(
        &self,
        game_type: GameType,
        room_id: Uuid,
        room_code: &str,
    ) -> Result<MatchId, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.matches.write().insert(
            id,
            MatchRecord {
                id,
                game_type,
                room_id,
                room_code: room_code.to_string(),
                status: MatchStatus::Ongoing,
                winner_user_id: None,
                started_at: Utc::now(),
                ended_at: None,
            },
        );
        Ok(id)
    }

    async fn append_move(&self, record: &MoveRecord) -> Result<(), StoreError> {
        if !self.matches.read().contains_key(&record.match_id) {
            return Err(StoreError::MatchNotFound(record.match_id));
        }
        self.moves.write().insert(record.key(), record.clone());
        Ok(())
    }

    async fn finish_match(&self, match_id: MatchId, winner_user_id: Option<&str>) -> Result<(), StoreError> {
        let mut matches = self.matches.write();
        let record = matches
            .get_mut(&match_id)
            .ok_or(StoreError::MatchNotFound(match_id))?;
        record.status = MatchStatus::Completed;
        record.winner_user_id = winner_user_id.map(str::to_string);
        record.ended_at = Some(Utc::now());
        Ok(())
    }
}

enum JournalOp {
    Append(MoveRecord),
    Finish {
        match_id: MatchId,
        winner_user_id: Option<UserId>,
    },
}

/// Per-room writer task. Preserves submission order and never blocks the room;
/// failed writes are logged and dropped.
#[derive(Clone)]
pub struct JournalWriter {
    tx: mpsc::UnboundedSender<JournalOp>,
}

impl JournalWriter {
    /// Spawn the writer. It stops once every handle is dropped.
    pub fn spawn(store: Arc<dyn MatchStore>, room_code: String) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(op) = rx.recv().await {
                match op {
                    JournalOp::Append(record) => {
                        if let Err(e) = store.append_move(&record).await {
                            error!(
                                room_code = %room_code,
                                match_id = record.match_id,
                                turn_no = record.turn_no,
                                move_no = record.move_no,
                                error = %e,
                                "Dropping journal entry"
                            );
                        }
                    }
                    JournalOp::Finish {
                        match_id,
                        winner_user_id,
                    } => {
                        if let Err(e) = store.finish_match(match_id, winner_user_id.as_deref()).await {
                            error!(room_code = %room_code, match_id, error = %e, "Failed to close match");
                        }
                    }
                }
            }
            debug!(room_code = %room_code, "Journal writer stopped");
        });

        Self { tx }
    }

    pub fn append(&self, record: MoveRecord) {
        if self.tx.send(JournalOp::Append(record)).is_err() {
            warn!("Journal writer gone, move not recorded");
        }
    }

    pub fn finish_match(&self, match_id: MatchId, winner_user_id: Option<UserId>) {
        let op = JournalOp::Finish {
            match_id,
            winner_user_id,
        };
        if self.tx.send(op).is_err() {
            warn!(match_id, "Journal writer gone, match not closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(match_id: MatchId, turn_no: u32, move_no: u64, tick: u64) -> MoveRecord {
        MoveRecord {
            match_id,
            user_id: "1".into(),
            turn_no,
            move_no,
            action_type: "RACE_ROLL".into(),
            payload: json!({"dice": 4}),
            server_tick: tick,
            is_valid: true,
        }
    }

    #[tokio::test]
    async fn same_key_overwrites_instead_of_duplicating() {
        let store = MemoryMatchStore::new();
        let id = store
            .create_match(GameType::Race, Uuid::new_v4(), "ABC123")
            .await
            .unwrap();

        store.append_move(&record(id, 1, 1, 10)).await.unwrap();
        store.append_move(&record(id, 1, 1, 99)).await.unwrap();
        store.append_move(&record(id, 2, 2, 120)).await.unwrap();

        let moves = store.moves_for(id);
        assert_eq!(moves.len(), 2);
        assert_eq!(moves[0].server_tick, 99);
        assert_eq!(moves[1].move_no, 2);
    }

    #[tokio::test]
    async fn move_for_unknown_match_fails() {
        let store = MemoryMatchStore::new();
        let err = store.append_move(&record(9, 1, 1, 0)).await.unwrap_err();
        assert!(matches!(err, StoreError::MatchNotFound(9)));
    }

    #[tokio::test]
    async fn finish_marks_completed() {
        let store = MemoryMatchStore::new();
        let id = store
            .create_match(GameType::Pocket, Uuid::new_v4(), "XYZ789")
            .await
            .unwrap();
        store.finish_match(id, Some("5")).await.unwrap();
        let m = store.get_match(id).unwrap();
        assert_eq!(m.status, MatchStatus::Completed);
        assert_eq!(m.winner_user_id.as_deref(), Some("5"));
        assert!(m.ended_at.is_some());
    }

    #[tokio::test]
    async fn writer_keeps_order_and_survives_failures() {
        let store = Arc::new(MemoryMatchStore::new());
        let id = store
            .create_match(GameType::Strike, Uuid::new_v4(), "QWE456")
            .await
            .unwrap();
        let writer = JournalWriter::spawn(store.clone(), "QWE456".into());

        writer.append(record(id, 1, 1, 5));
        writer.append(record(id + 100, 1, 2, 6));
        writer.append(record(id, 2, 3, 7));
        writer.finish_match(id, Some("1".into()));
        drop(writer);

        for _ in 0..50 {
            if store.get_match(id).map(|m| m.status) == Some(MatchStatus::Completed) {
                break;
            }
            tokio::task::yield_now().await;
        }
        let moves = store.moves_for(id);
        assert_eq!(moves.iter().map(|m| m.move_no).collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(store.get_match(id).unwrap().status, MatchStatus::Completed);
    }
}
