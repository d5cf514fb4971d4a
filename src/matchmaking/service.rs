//! Matchmaking service - enqueue and dequeue only, no pairing

use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::game::GameType;
use crate::store::kv::SortedSetStore;
use crate::store::StoreError;
use crate::util::time::unix_millis;

use super::queue::{priority, QueueKey, DEFAULT_RATING};

const QUEUE_KEY_PREFIX: &str = "matchmaking:";

/// Where a player landed in a queue
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueTicket {
    pub queue: String,
    pub user_id: String,
    pub priority: i64,
    pub position: usize,
    pub queue_size: usize,
}

/// Matchmaking service. Each queue is one sorted set scored by priority.
pub struct MatchmakingService {
    queues: Arc<dyn SortedSetStore>,
}

impl MatchmakingService {
    pub fn new(queues: Arc<dyn SortedSetStore>) -> Self {
        Self { queues }
    }

    /// Add (or refresh) a player in the queue for `game_type` and `region`
    pub async fn enqueue(
        &self,
        user_id: &str,
        game_type: GameType,
        rating: Option<i64>,
        region: Option<&str>,
    ) -> Result<QueueTicket, StoreError> {
        let key = QueueKey::new(game_type, region).storage_key();
        let priority = priority(rating.unwrap_or(DEFAULT_RATING), unix_millis());

        let position = self.queues.zadd(&key, user_id, priority).await?;
        let queue_size = self.queues.zcard(&key).await?;

        info!(
            user_id = %user_id,
            queue = %key,
            priority,
            queue_size,
            "Player queued"
        );

        Ok(QueueTicket {
            queue: key,
            user_id: user_id.to_string(),
            priority,
            position,
            queue_size,
        })
    }

    /// Remove a player. Returns false if they were not queued.
    pub async fn dequeue(
        &self,
        user_id: &str,
        game_type: GameType,
        region: Option<&str>,
    ) -> Result<bool, StoreError> {
        let key = QueueKey::new(game_type, region).storage_key();
        let removed = self.queues.zrem(&key, user_id).await?;
        if removed {
            info!(user_id = %user_id, queue = %key, "Player left queue");
        }
        Ok(removed)
    }

    pub async fn queue_len(&self, game_type: GameType, region: Option<&str>) -> Result<usize, StoreError> {
        self.queues
            .zcard(&QueueKey::new(game_type, region).storage_key())
            .await
    }

    pub async fn total_queued(&self) -> Result<usize, StoreError> {
        self.queues.zcard_prefix(QUEUE_KEY_PREFIX).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryKv;

    fn service() -> (MatchmakingService, Arc<MemoryKv>) {
        let store = Arc::new(MemoryKv::new());
        (MatchmakingService::new(store.clone()), store)
    }

    #[tokio::test]
    async fn queues_are_separate_per_region_and_game() {
        let (service, _) = service();
        service.enqueue("1", GameType::Race, None, None).await.unwrap();
        service.enqueue("2", GameType::Race, Some(1500), Some("eu")).await.unwrap();
        service.enqueue("3", GameType::Strike, None, None).await.unwrap();

        assert_eq!(service.queue_len(GameType::Race, None).await.unwrap(), 1);
        assert_eq!(service.queue_len(GameType::Race, Some("eu")).await.unwrap(), 1);
        assert_eq!(service.total_queued().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn enqueue_uses_default_rating() {
        let (service, _) = service();
        let ticket = service.enqueue("1", GameType::Pocket, None, None).await.unwrap();
        assert_eq!(ticket.queue, "matchmaking:POCKET:global");
        assert!(ticket.priority >= DEFAULT_RATING * 10_000_000);

        let again = service.enqueue("1", GameType::Pocket, None, None).await.unwrap();
        assert_eq!(again.queue_size, 1);
    }

    #[tokio::test]
    async fn queue_lives_in_the_store_ordered_by_rating() {
        let (service, store) = service();
        service.enqueue("high", GameType::Race, Some(1200), None).await.unwrap();
        service.enqueue("low", GameType::Race, Some(900), None).await.unwrap();
        let ticket = service.enqueue("mid", GameType::Race, None, None).await.unwrap();
        assert_eq!(ticket.position, 1);
        assert_eq!(ticket.queue_size, 3);

        let members: Vec<String> = store
            .zrange("matchmaking:RACE:global")
            .await
            .unwrap()
            .into_iter()
            .map(|(member, _)| member)
            .collect();
        assert_eq!(members, ["low", "mid", "high"]);
    }

    #[tokio::test]
    async fn dequeue_removes_only_that_user() {
        let (service, _) = service();
        service.enqueue("1", GameType::Race, None, None).await.unwrap();
        service.enqueue("2", GameType::Race, None, None).await.unwrap();

        assert!(service.dequeue("1", GameType::Race, None).await.unwrap());
        assert!(!service.dequeue("1", GameType::Race, None).await.unwrap());
        assert!(!service.dequeue("2", GameType::Strike, None).await.unwrap());
        assert_eq!(service.queue_len(GameType::Race, None).await.unwrap(), 1);
    }
}
