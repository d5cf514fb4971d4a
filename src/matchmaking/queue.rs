//! Matchmaking queue keys and ordering

use crate::game::GameType;
use crate::store::kv::matchmaking_key;

pub const DEFAULT_RATING: i64 = 1000;
pub const DEFAULT_REGION: &str = "global";

/// Rating dominates the priority, enqueue time breaks ties
const RATING_WEIGHT: i64 = 10_000_000;

/// Sorted-set score of a queued player
pub fn priority(rating: i64, queued_at_ms: u64) -> i64 {
    rating
        .saturating_mul(RATING_WEIGHT)
        .saturating_add(queued_at_ms as i64)
}

/// Identifies one queue
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueKey {
    pub game_type: GameType,
    pub region: String,
}

impl QueueKey {
    pub fn new(game_type: GameType, region: Option<&str>) -> Self {
        let region = region
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_REGION)
            .to_ascii_lowercase();
        Self { game_type, region }
    }

    /// Registry key naming this queue
    pub fn storage_key(&self) -> String {
        matchmaking_key(self.game_type.as_str(), &self.region)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_formula() {
        assert_eq!(priority(1000, 1_700_000_000_000), 1000 * 10_000_000 + 1_700_000_000_000);
    }

    #[test]
    fn rating_outweighs_wait_time() {
        assert!(priority(900, 9_000_000_000_000) < priority(1000, 0));
        assert!(priority(1000, 1_000) < priority(1000, 5_000));
    }

    #[test]
    fn region_defaults_to_global() {
        assert_eq!(QueueKey::new(GameType::Race, None).region, "global");
        assert_eq!(QueueKey::new(GameType::Race, Some("  ")).region, "global");
        let key = QueueKey::new(GameType::Pocket, Some("EU"));
        assert_eq!(key.storage_key(), "matchmaking:POCKET:eu");
    }
}
