//! PostgREST (Supabase) backed match journal using the service_role key

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

use crate::config::SupabaseConfig;
use crate::game::GameType;

use super::journal::{MatchId, MatchStatus, MatchStore, MoveRecord};
use super::StoreError;

const MATCHES_TABLE: &str = "matches";
const MOVES_TABLE: &str = "moves";
const MOVE_CONFLICT_KEY: &str = "match_id,turn_no,move_no";

/// Supabase client for server-side database operations
/// Uses service_role key which bypasses RLS - handle with care!
#[derive(Clone)]
pub struct SupabaseClient {
    client: Client,
    base_url: String,
    service_role_key: String,
}

impl SupabaseClient {
    pub fn new(config: &SupabaseConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.url.trim_end_matches('/').to_string(),
            service_role_key: config.service_role_key.clone(),
        }
    }

    /// Get the REST API URL for a table
    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.service_role_key)
            .header("Authorization", format!("Bearer {}", self.service_role_key))
            .header("Content-Type", "application/json")
    }

    async fn check(response: Response) -> Result<Response, SupabaseError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(SupabaseError::Api {
            status: status.as_u16(),
            body,
        })
    }

    /// Insert one row and return its representation
    pub async fn insert<T: Serialize + Sync, R: DeserializeOwned>(
        &self,
        table: &str,
        data: &T,
    ) -> Result<R, SupabaseError> {
        let request = self
            .authed(self.client.post(self.rest_url(table)))
            .header("Prefer", "return=representation")
            .json(data);
        let response = Self::check(request.send().await?).await?;

        // PostgREST returns an array, get first element
        let rows: Vec<R> = response.json().await.map_err(SupabaseError::Parse)?;
        rows.into_iter().next().ok_or(SupabaseError::NoRowReturned)
    }

    /// PATCH rows matching `query`
    pub async fn update<T: Serialize + Sync>(&self, table: &str, query: &str, data: &T) -> Result<(), SupabaseError> {
        let url = format!("{}?{}", self.rest_url(table), query);
        let request = self.authed(self.client.patch(url)).json(data);
        Self::check(request.send().await?).await?;
        Ok(())
    }

    /// Insert, merging into the existing row on `on_conflict` columns
    pub async fn upsert<T: Serialize + Sync>(&self, table: &str, data: &T, on_conflict: &str) -> Result<(), SupabaseError> {
        let url = format!("{}?on_conflict={}", self.rest_url(table), on_conflict);
        let request = self
            .authed(self.client.post(url))
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(data);
        Self::check(request.send().await?).await?;
        Ok(())
    }
}

/// Supabase errors
#[derive(Debug, thiserror::Error)]
pub enum SupabaseError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("Failed to parse response: {0}")]
    Parse(reqwest::Error),

    #[error("No row returned from insert")]
    NoRowReturned,
}

#[derive(Debug, Serialize)]
struct NewMatch<'a> {
    game_type: GameType,
    room_id: Uuid,
    room_code: &'a str,
    status: MatchStatus,
    started_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct CreatedMatch {
    id: MatchId,
}

#[derive(Debug, Serialize)]
struct MatchCompletion<'a> {
    status: MatchStatus,
    winner_user_id: Option<&'a str>,
    ended_at: DateTime<Utc>,
}

/// Journal stored in the `matches` and `moves` tables
#[derive(Clone)]
pub struct SupabaseMatchStore {
    client: SupabaseClient,
}

impl SupabaseMatchStore {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MatchStore for SupabaseMatchStore {
    async fn create_match(
        &self,
        game_type: GameType,
        room_id: Uuid,
        room_code: &str,
    ) -> Result<MatchId, StoreError> {
        let row = NewMatch {
            game_type,
            room_id,
            room_code,
            status: MatchStatus::Ongoing,
            started_at: Utc::now(),
        };
        let created: CreatedMatch = self.client.insert(MATCHES_TABLE, &row).await?;
        Ok(created.id)
    }

    async fn append_move(&self, record: &MoveRecord) -> Result<(), StoreError> {
        self.client.upsert(MOVES_TABLE, record, MOVE_CONFLICT_KEY).await?;
        Ok(())
    }

    async fn finish_match(&self, match_id: MatchId, winner_user_id: Option<&str>) -> Result<(), StoreError> {
        let update = MatchCompletion {
            status: MatchStatus::Completed,
            winner_user_id,
            ended_at: Utc::now(),
        };
        self.client
            .update(MATCHES_TABLE, &format!("id=eq.{}", match_id), &update)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn move_rows_use_column_names() {
        let record = MoveRecord {
            match_id: 3,
            user_id: "9".into(),
            turn_no: 2,
            move_no: 5,
            action_type: "STRIKE".into(),
            payload: json!({"gain": 1}),
            server_tick: 1200,
            is_valid: true,
        };
        let row = serde_json::to_value(&record).unwrap();
        for column in MOVE_CONFLICT_KEY.split(',') {
            assert!(row.get(column).is_some(), "missing {}", column);
        }
        assert_eq!(row["action_type"], "STRIKE");
    }

    #[test]
    fn base_url_is_normalized() {
        let client = SupabaseClient::new(&SupabaseConfig {
            url: "https://db.example.test/".into(),
            service_role_key: "key".into(),
        });
        assert_eq!(client.rest_url("moves"), "https://db.example.test/rest/v1/moves");
    }
}
