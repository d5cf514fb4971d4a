//! Room supervisor: creation, code registry, lookup, disposal

use dashmap::DashMap;
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::store::kv::room_code_key;
use crate::store::{JournalWriter, KeyValueStore, MatchStore, PresenceTracker, StoreError};

use super::room::{GameRoom, RoomHandle, RoomParams, RoomSettings};
use super::GameType;

pub const MIN_PLAYERS: usize = 2;
pub const MAX_PLAYERS: usize = 4;
const ROOM_CODE_LEN: usize = 6;
const CODE_ATTEMPTS: usize = 16;

/// Public description of a created room
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomInfo {
    pub room_id: Uuid,
    pub room_code: String,
    pub max_players: usize,
    pub game_type: GameType,
}

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("max players must be between 2 and 4")]
    InvalidMaxPlayers,

    #[error("room code must be 6 letters or digits")]
    InvalidRoomCode,

    #[error("room not found")]
    RoomNotFound,

    #[error("could not allocate a unique room code")]
    CodeSpaceExhausted,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Trim and uppercase a user-supplied code, rejecting anything not `[A-Z0-9]{6}`
pub fn normalize_room_code(raw: &str) -> Result<String, SupervisorError> {
    let code = raw.trim().to_ascii_uppercase();
    let valid = code.len() == ROOM_CODE_LEN
        && code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit());
    if valid {
        Ok(code)
    } else {
        Err(SupervisorError::InvalidRoomCode)
    }
}

fn generate_room_code() -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::thread_rng();
    (0..ROOM_CODE_LEN)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Owns every live room
#[derive(Clone)]
pub struct RoomSupervisor {
    rooms: Arc<DashMap<Uuid, RoomHandle>>,
    registry: Arc<dyn KeyValueStore>,
    journal: Arc<dyn MatchStore>,
    presence: PresenceTracker,
    settings: RoomSettings,
    code_ttl: Duration,
}

impl RoomSupervisor {
    pub fn new(
        registry: Arc<dyn KeyValueStore>,
        journal: Arc<dyn MatchStore>,
        presence: PresenceTracker,
        settings: RoomSettings,
        code_ttl: Duration,
    ) -> Self {
        Self {
            rooms: Arc::new(DashMap::new()),
            registry,
            journal,
            presence,
            settings,
            code_ttl,
        }
    }

    /// Open a room, register its match and code, and start its task
    pub async fn create_room(&self, game_type: GameType, max_players: usize) -> Result<RoomInfo, SupervisorError> {
        if !(MIN_PLAYERS..=MAX_PLAYERS).contains(&max_players) {
            return Err(SupervisorError::InvalidMaxPlayers);
        }

        let code = self.unused_code().await?;
        let room_id = Uuid::new_v4();
        let match_id = self.journal.create_match(game_type, room_id, &code).await?;

        let params = RoomParams {
            id: room_id,
            code: code.clone(),
            game_type,
            max_players,
            match_id,
            seed: rand::thread_rng().gen(),
            settings: self.settings,
        };
        let journal = JournalWriter::spawn(self.journal.clone(), code.clone());
        let (room, handle) = GameRoom::new(params, journal, self.presence.clone());

        self.registry
            .set(&room_code_key(&code), room_id.to_string(), Some(self.code_ttl))
            .await?;
        self.rooms.insert(room_id, handle);

        let rooms = self.rooms.clone();
        let registry = self.registry.clone();
        let cleanup_code = code.clone();
        tokio::spawn(async move {
            room.run().await;
            rooms.remove(&room_id);
            if let Err(e) = registry.delete(&room_code_key(&cleanup_code)).await {
                warn!(room_code = %cleanup_code, error = %e, "Failed to clear room code");
            }
        });

        info!(
            room_id = %room_id,
            room_code = %code,
            game_type = %game_type,
            max_players,
            match_id,
            "Room created"
        );

        Ok(RoomInfo {
            room_id,
            room_code: code,
            max_players,
            game_type,
        })
    }

    async fn unused_code(&self) -> Result<String, SupervisorError> {
        for _ in 0..CODE_ATTEMPTS {
            let code = generate_room_code();
            if self.registry.get(&room_code_key(&code)).await?.is_none() {
                return Ok(code);
            }
        }
        Err(SupervisorError::CodeSpaceExhausted)
    }

    /// Find the live room behind a user-supplied code
    pub async fn resolve(&self, raw_code: &str) -> Result<RoomHandle, SupervisorError> {
        let code = normalize_room_code(raw_code)?;
        let room_id = self
            .registry
            .get(&room_code_key(&code))
            .await?
            .and_then(|id| Uuid::parse_str(&id).ok())
            .ok_or(SupervisorError::RoomNotFound)?;

        self.get(&room_id)
            .filter(|handle| !handle.is_closed())
            .ok_or(SupervisorError::RoomNotFound)
    }

    pub fn get(&self, room_id: &Uuid) -> Option<RoomHandle> {
        self.rooms.get(room_id).map(|r| r.value().clone())
    }

    pub fn active_rooms(&self) -> usize {
        self.rooms.len()
    }

    pub fn total_seats(&self) -> usize {
        self.rooms.iter().map(|r| r.value().seat_count()).sum()
    }
}
