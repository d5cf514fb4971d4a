//! HTTP route definitions

use axum::{
    extract::{Extension, State},
    http::{header, Method, StatusCode},
    middleware,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::app::AppState;
use crate::game::{GameType, RoomInfo, SupervisorError};
use crate::http::middleware::{require_auth, AuthenticatedUser};
use crate::matchmaking::QueueTicket;
use crate::store::StoreError;
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    // CLIENT_ORIGIN may list several origins, comma separated
    let allowed_origins: Vec<header::HeaderValue> = state
        .config
        .client_origin
        .split(',')
        .filter_map(|s| s.trim().parse::<header::HeaderValue>().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true);

    let public_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler));

    let protected_routes = Router::new()
        .route("/rooms", post(create_room_handler))
        .route("/rooms/resolve", post(resolve_room_handler))
        .route("/matchmaking/join", post(matchmaking_join_handler))
        .route("/matchmaking/leave", post(matchmaking_leave_handler))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    active_rooms: usize,
    seated_players: usize,
    queued_players: usize,
}

async fn health_handler(State(state): State<AppState>) -> Result<Json<HealthResponse>, AppError> {
    Ok(Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        active_rooms: state.supervisor.active_rooms(),
        seated_players: state.supervisor.total_seats(),
        queued_players: state.matchmaking.total_queued().await?,
    }))
}

// ============================================================================
// Room endpoints
// ============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateRoomRequest {
    game_type: GameType,
    max_players: usize,
}

async fn create_room_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Json(req): Json<CreateRoomRequest>,
) -> Result<(StatusCode, Json<RoomInfo>), AppError> {
    let room = state
        .supervisor
        .create_room(req.game_type, req.max_players)
        .await?;

    info!(user_id = %auth.user_id, room_code = %room.room_code, "Room opened over HTTP");
    Ok((StatusCode::CREATED, Json(room)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResolveRoomRequest {
    room_code: String,
}

async fn resolve_room_handler(
    State(state): State<AppState>,
    Json(req): Json<ResolveRoomRequest>,
) -> Result<Json<RoomInfo>, AppError> {
    let handle = state.supervisor.resolve(&req.room_code).await?;

    Ok(Json(RoomInfo {
        room_id: handle.id,
        room_code: handle.code,
        max_players: handle.max_players,
        game_type: handle.game_type,
    }))
}

// ============================================================================
// Matchmaking endpoints
// ============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JoinQueueRequest {
    game_type: GameType,
    #[serde(default)]
    rating: Option<i64>,
    #[serde(default)]
    region: Option<String>,
}

async fn matchmaking_join_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Json(req): Json<JoinQueueRequest>,
) -> Result<Json<QueueTicket>, AppError> {
    let ticket = state
        .matchmaking
        .enqueue(&auth.user_id, req.game_type, req.rating, req.region.as_deref())
        .await?;
    Ok(Json(ticket))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LeaveQueueRequest {
    game_type: GameType,
    #[serde(default)]
    region: Option<String>,
}

#[derive(Serialize)]
struct LeaveQueueResponse {
    removed: bool,
}

async fn matchmaking_leave_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Json(req): Json<LeaveQueueRequest>,
) -> Result<Json<LeaveQueueResponse>, AppError> {
    let removed = state
        .matchmaking
        .dequeue(&auth.user_id, req.game_type, req.region.as_deref())
        .await?;
    Ok(Json(LeaveQueueResponse { removed }))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<SupervisorError> for AppError {
    fn from(err: SupervisorError) -> Self {
        match err {
            SupervisorError::InvalidMaxPlayers | SupervisorError::InvalidRoomCode => {
                AppError::BadRequest(err.to_string())
            }
            SupervisorError::RoomNotFound => AppError::NotFound(err.to_string()),
            SupervisorError::CodeSpaceExhausted | SupervisorError::Store(_) => {
                AppError::Internal(err.to_string())
            }
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg.clone())
            }
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
