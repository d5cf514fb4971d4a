//! Online presence with short expiry

use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use super::kv::{presence_key, KeyValueStore};
use super::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    InGame,
    Offline,
}

impl Presence {
    pub fn as_str(self) -> &'static str {
        match self {
            Presence::InGame => "in_game",
            Presence::Offline => "offline",
        }
    }
}

#[derive(Clone)]
pub struct PresenceTracker {
    kv: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl PresenceTracker {
    pub fn new(kv: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self { kv, ttl }
    }

    pub async fn set(&self, user_id: &str, presence: Presence) -> Result<(), StoreError> {
        self.kv
            .set(&presence_key(user_id), presence.as_str().to_string(), Some(self.ttl))
            .await
    }

    /// Write presence in the background; failures are only logged
    pub fn report(&self, user_id: &str, presence: Presence) {
        let tracker = self.clone();
        let user_id = user_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = tracker.set(&user_id, presence).await {
                warn!(user_id = %user_id, error = %e, "Failed to write presence");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryKv;

    #[tokio::test(start_paused = true)]
    async fn presence_expires() {
        let kv = Arc::new(MemoryKv::new());
        let tracker = PresenceTracker::new(kv.clone(), Duration::from_secs(60));
        let key = presence_key("7");

        tracker.set("7", Presence::InGame).await.unwrap();
        assert_eq!(kv.get(&key).await.unwrap().as_deref(), Some("in_game"));

        tracker.set("7", Presence::Offline).await.unwrap();
        assert_eq!(kv.get(&key).await.unwrap().as_deref(), Some("offline"));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(kv.get(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn report_writes_in_background() {
        let kv = Arc::new(MemoryKv::new());
        let tracker = PresenceTracker::new(kv.clone(), Duration::from_secs(60));
        tracker.report("8", Presence::InGame);
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(kv.get(&presence_key("8")).await.unwrap().as_deref(), Some("in_game"));
    }
}
