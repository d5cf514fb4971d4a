//! External collaborators: code registry, presence, match journal

pub mod journal;
pub mod kv;
pub mod presence;
pub mod supabase;

pub use journal::{JournalWriter, MatchId, MatchStore, MemoryMatchStore, MoveRecord};
pub use kv::{KeyValueStore, MemoryKv, SortedSetStore};
pub use presence::{Presence, PresenceTracker};
pub use supabase::{SupabaseClient, SupabaseError, SupabaseMatchStore};

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Supabase(#[from] SupabaseError),

    #[error("match {0} not found")]
    MatchNotFound(MatchId),
}
