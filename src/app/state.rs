//! Application state shared across routes

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::Config;
use crate::game::RoomSupervisor;
use crate::matchmaking::MatchmakingService;
use crate::store::{
    KeyValueStore, MatchStore, MemoryKv, MemoryMatchStore, PresenceTracker, SupabaseClient,
    SupabaseMatchStore,
};

/// How often expired registry keys are swept
const KV_PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub supervisor: RoomSupervisor,
    pub matchmaking: Arc<MatchmakingService>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);

        let registry = Arc::new(MemoryKv::new());
        registry.spawn_purge(KV_PURGE_INTERVAL);
        let matchmaking = Arc::new(MatchmakingService::new(registry.clone()));
        let kv: Arc<dyn KeyValueStore> = registry;

        let journal: Arc<dyn MatchStore> = match &config.supabase {
            Some(supabase) => {
                info!(url = %supabase.url, "Journaling matches to Supabase");
                Arc::new(SupabaseMatchStore::new(SupabaseClient::new(supabase)))
            }
            None => {
                info!("SUPABASE_URL not set, journaling matches in memory");
                Arc::new(MemoryMatchStore::new())
            }
        };

        let presence = PresenceTracker::new(kv.clone(), config.presence_ttl);

        let supervisor = RoomSupervisor::new(
            kv,
            journal,
            presence,
            config.room_settings(),
            config.room_code_ttl,
        );

        Self {
            config,
            supervisor,
            matchmaking,
        }
    }
}
