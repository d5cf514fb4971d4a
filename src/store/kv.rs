//! Key-value registry with per-key expiry

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

use super::StoreError;

pub fn room_code_key(code: &str) -> String {
    format!("room_code:{}", code)
}

pub fn presence_key(user_id: &str) -> String {
    format!("user:{}:presence", user_id)
}

pub fn matchmaking_key(game_type: &str, region: &str) -> String {
    format!("matchmaking:{}:{}", game_type, region)
}

/// Shared string registry. Implementations must be safe to call from many rooms.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Store `value`, expiring after `ttl` when given
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Scored member sets, ordered by ascending score then member
#[async_trait]
pub trait SortedSetStore: Send + Sync {
    /// Insert `member`, replacing its previous score. Returns its rank.
    async fn zadd(&self, key: &str, member: &str, score: i64) -> Result<usize, StoreError>;

    /// Returns false if `member` was absent
    async fn zrem(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    async fn zcard(&self, key: &str) -> Result<usize, StoreError>;

    /// Members with their scores, lowest first
    async fn zrange(&self, key: &str) -> Result<Vec<(String, i64)>, StoreError>;

    /// Total members across every set whose key starts with `prefix`
    async fn zcard_prefix(&self, prefix: &str) -> Result<usize, StoreError>;
}

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

/// In-process registry. Keys expire on read and on the purge sweep.
#[derive(Default)]
pub struct MemoryKv {
    entries: DashMap<String, Entry>,
    sets: DashMap<String, Vec<(i64, String)>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys, expired ones included until purged
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Purge expired keys every `every` until the store is dropped
    pub fn spawn_purge(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let store: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                let purged = store.purge_expired();
                if purged > 0 {
                    debug!(purged, remaining = store.len(), "Purged expired keys");
                }
            }
        })
    }

    /// Drop every expired key
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired(now));
        before - self.entries.len()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Instant::now();
        self.entries.remove_if(key, |_, e| e.is_expired(now));
        Ok(self.entries.get(key).map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), StoreError> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries.insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }
}

#[async_trait]
impl SortedSetStore for MemoryKv {
    async fn zadd(&self, key: &str, member: &str, score: i64) -> Result<usize, StoreError> {
        let mut set = self.sets.entry(key.to_string()).or_default();
        set.retain(|(_, m)| m != member);
        let rank = set.partition_point(|(s, m)| (*s, m.as_str()) < (score, member));
        set.insert(rank, (score, member.to_string()));
        Ok(rank)
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let removed = match self.sets.get_mut(key) {
            Some(mut set) => {
                let before = set.len();
                set.retain(|(_, m)| m != member);
                set.len() != before
            }
            None => false,
        };
        self.sets.remove_if(key, |_, set| set.is_empty());
        Ok(removed)
    }

    async fn zcard(&self, key: &str) -> Result<usize, StoreError> {
        Ok(self.sets.get(key).map(|set| set.len()).unwrap_or(0))
    }

    async fn zrange(&self, key: &str) -> Result<Vec<(String, i64)>, StoreError> {
        Ok(self
            .sets
            .get(key)
            .map(|set| set.iter().map(|(s, m)| (m.clone(), *s)).collect())
            .unwrap_or_default())
    }

    async fn zcard_prefix(&self, prefix: &str) -> Result<usize, StoreError> {
        Ok(self
            .sets
            .iter()
            .filter(|set| set.key().starts_with(prefix))
            .map(|set| set.len())
            .sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn keys_expire_after_ttl() {
        let kv = MemoryKv::new();
        kv.set("room_code:ABC123", "room".into(), Some(Duration::from_secs(3600)))
            .await
            .unwrap();
        kv.set("sticky", "x".into(), None).await.unwrap();

        tokio::time::advance(Duration::from_secs(3599)).await;
        assert_eq!(kv.get("room_code:ABC123").await.unwrap().as_deref(), Some("room"));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(kv.get("room_code:ABC123").await.unwrap(), None);
        assert_eq!(kv.get("sticky").await.unwrap().as_deref(), Some("x"));
    }

    #[tokio::test(start_paused = true)]
    async fn purge_drops_only_expired() {
        let kv = MemoryKv::new();
        kv.set("a", "1".into(), Some(Duration::from_secs(1))).await.unwrap();
        kv.set("b", "2".into(), Some(Duration::from_secs(10))).await.unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(kv.purge_expired(), 1);
        assert!(kv.get("b").await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn background_purge_reclaims_unread_keys() {
        let kv = Arc::new(MemoryKv::new());
        kv.set("user:1:presence", "offline".into(), Some(Duration::from_secs(60)))
            .await
            .unwrap();
        kv.set("room_code:ABC123", "room".into(), Some(Duration::from_secs(3600)))
            .await
            .unwrap();
        let sweeper = kv.spawn_purge(Duration::from_secs(30));

        tokio::time::sleep(Duration::from_secs(91)).await;
        assert_eq!(kv.len(), 1);

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert!(kv.is_empty());

        drop(kv);
        tokio::time::sleep(Duration::from_secs(31)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(sweeper.is_finished());
    }

    #[tokio::test]
    async fn sorted_sets_order_by_score_then_member() {
        let kv = MemoryKv::new();
        kv.zadd("q", "late", 500).await.unwrap();
        kv.zadd("q", "early", 100).await.unwrap();
        kv.zadd("q", "b", 300).await.unwrap();
        assert_eq!(kv.zadd("q", "a", 300).await.unwrap(), 1);

        let members: Vec<String> = kv.zrange("q").await.unwrap().into_iter().map(|(m, _)| m).collect();
        assert_eq!(members, ["early", "a", "b", "late"]);
    }

    #[tokio::test]
    async fn zadd_replaces_and_zrem_cleans_up() {
        let kv = MemoryKv::new();
        kv.zadd("q:x", "a", 1).await.unwrap();
        kv.zadd("q:x", "b", 2).await.unwrap();
        assert_eq!(kv.zadd("q:x", "a", 3).await.unwrap(), 1);
        assert_eq!(kv.zcard("q:x").await.unwrap(), 2);
        kv.zadd("q:y", "c", 1).await.unwrap();
        kv.zadd("other", "d", 1).await.unwrap();
        assert_eq!(kv.zcard_prefix("q:").await.unwrap(), 3);

        assert!(kv.zrem("q:x", "a").await.unwrap());
        assert!(!kv.zrem("q:x", "a").await.unwrap());
        assert!(kv.zrem("q:x", "b").await.unwrap());
        assert_eq!(kv.zcard("q:x").await.unwrap(), 0);
        assert!(!kv.zrem("missing", "a").await.unwrap());
    }

    #[tokio::test]
    async fn delete_removes_key() {
        let kv = MemoryKv::new();
        kv.set("k", "v".into(), None).await.unwrap();
        kv.delete("k").await.unwrap();
        assert!(kv.get("k").await.unwrap().is_none());
    }

    #[test]
    fn key_formats() {
        assert_eq!(room_code_key("ABC123"), "room_code:ABC123");
        assert_eq!(presence_key("42"), "user:42:presence");
        assert_eq!(matchmaking_key("RACE", "global"), "matchmaking:RACE:global");
    }
}
