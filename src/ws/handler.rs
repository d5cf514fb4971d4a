//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::{RoomHandle, SessionId, UserId};
use crate::http::middleware::{verify_jwt, JwtClaims};
use crate::http::routes::AppError;
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Unicast messages queued per connection before the room starts dropping them
const OUTBOX_CAPACITY: usize = 32;
const MAX_NAME_CHARS: usize = 24;

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Room code to join
    #[serde(default)]
    pub code: Option<String>,
    /// JWT token for authentication
    #[serde(default)]
    pub token: Option<String>,
    /// Display name override
    #[serde(default)]
    pub name: Option<String>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    let claims = match query
        .token
        .as_deref()
        .map(|token| verify_jwt(token, &state.config.jwt_secret))
    {
        Some(Ok(claims)) => claims,
        Some(Err(e)) => {
            warn!(error = %e, "WebSocket auth failed");
            return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
        }
        None => {
            warn!("WebSocket upgrade without token");
            return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
        }
    };

    let room = match state
        .supervisor
        .resolve(query.code.as_deref().unwrap_or_default())
        .await
    {
        Ok(room) => room,
        Err(e) => {
            debug!(user_id = %claims.sub, error = %e, "WebSocket room lookup failed");
            return AppError::from(e).into_response();
        }
    };

    let display_name = display_name(query.name.as_deref(), &claims);
    info!(
        user_id = %claims.sub,
        room_code = %room.code,
        "WebSocket upgrade for authenticated user"
    );
    ws.on_upgrade(move |socket| handle_socket(socket, room, claims.sub, display_name))
}

/// Query name, then token name, then `Player-{sub}`
fn display_name(requested: Option<&str>, claims: &JwtClaims) -> String {
    [requested, claims.name.as_deref()]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|name| !name.is_empty())
        .map(|name| name.chars().take(MAX_NAME_CHARS).collect())
        .unwrap_or_else(|| format!("Player-{}", claims.sub))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, room: RoomHandle, user_id: UserId, display_name: String) {
    let session_id: SessionId = Uuid::new_v4().to_string();
    let (mut ws_sink, ws_stream) = socket.split();

    let (outbox_tx, outbox_rx) = mpsc::channel::<ServerMsg>(OUTBOX_CAPACITY);
    // The room owns the only strong sender, so the outbox closes when the
    // room drops this session.
    let reply_tx = outbox_tx.downgrade();

    let (accepted, events) = match room
        .join(session_id.clone(), user_id.clone(), display_name, outbox_tx)
        .await
    {
        Ok(joined) => joined,
        Err(e) => {
            info!(user_id = %user_id, room_code = %room.code, reason = e.code(), "Join refused");
            let _ = send_msg(&mut ws_sink, &ServerMsg::error(e.code(), e.to_string())).await;
            let _ = ws_sink.send(Message::Close(None)).await;
            return;
        }
    };

    info!(
        user_id = %user_id,
        session_id = %session_id,
        room_code = %room.code,
        symbol = %accepted.symbol,
        reconnected = accepted.reconnected,
        "Player connected"
    );

    let consented = run_session(&room, &session_id, ws_sink, ws_stream, outbox_rx, events, reply_tx).await;

    if room.leave(session_id.clone(), consented).await.is_err() {
        debug!(session_id = %session_id, "Room closed before leave");
    }
    info!(user_id = %user_id, session_id = %session_id, consented, "WebSocket connection closed");
}

/// Pump messages both ways until either side ends. Returns true when the
/// client asked to leave.
async fn run_session(
    room: &RoomHandle,
    session_id: &SessionId,
    ws_sink: SplitSink<WebSocket, Message>,
    mut ws_stream: SplitStream<WebSocket>,
    outbox_rx: mpsc::Receiver<ServerMsg>,
    events: broadcast::Receiver<ServerMsg>,
    reply_tx: mpsc::WeakSender<ServerMsg>,
) -> bool {
    let mut writer = tokio::spawn(write_loop(room.clone(), session_id.clone(), ws_sink, outbox_rx, events));
    let rate_limiter = ConnectionRateLimiter::new();
    let mut consented = false;

    loop {
        let frame = tokio::select! {
            frame = ws_stream.next() => frame,
            _ = &mut writer => {
                debug!(session_id = %session_id, "Outbound stream ended");
                break;
            }
        };
        let Some(result) = frame else {
            break;
        };

        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check() {
                    warn!(session_id = %session_id, "Rate limited client message");
                    continue;
                }

                match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(ClientMsg::Leave) => {
                        consented = true;
                        break;
                    }
                    Ok(msg) => {
                        if room.send(session_id.clone(), msg).await.is_err() {
                            debug!(session_id = %session_id, "Room closed");
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(session_id = %session_id, error = %e, "Failed to parse client message");
                        if let Some(tx) = reply_tx.upgrade() {
                            let _ = tx.try_send(ServerMsg::error("INVALID_MESSAGE", e.to_string()));
                        }
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(session_id = %session_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                debug!(session_id = %session_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(session_id = %session_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    writer.abort();
    consented
}

/// Forward unicast and broadcast messages to the socket
async fn write_loop(
    room: RoomHandle,
    session_id: SessionId,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut outbox_rx: mpsc::Receiver<ServerMsg>,
    mut events: broadcast::Receiver<ServerMsg>,
) {
    while let Some(msg) = next_outbound(&room, &session_id, &mut outbox_rx, &mut events).await {
        if let Err(e) = send_msg(&mut ws_sink, &msg).await {
            debug!(session_id = %session_id, error = %e, "WebSocket send failed");
            return;
        }
    }

    let _ = ws_sink.send(Message::Close(None)).await;
}

/// Next message for this connection, unicasts first. A connection that fell
/// behind the broadcast ring gets a full resync in place of the lost patches.
/// `None` once the room has let go of the session.
async fn next_outbound(
    room: &RoomHandle,
    session_id: &str,
    outbox_rx: &mut mpsc::Receiver<ServerMsg>,
    events: &mut broadcast::Receiver<ServerMsg>,
) -> Option<ServerMsg> {
    tokio::select! {
        biased;
        unicast = outbox_rx.recv() => {
            if unicast.is_none() {
                debug!(session_id = %session_id, "Outbox closed");
            }
            unicast
        }
        event = events.recv() => match event {
            Ok(msg) => Some(msg),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(session_id = %session_id, skipped = n, "Client lagged behind room broadcasts, resyncing");
                match room.resync().await {
                    Ok(msg) => Some(msg),
                    Err(_) => {
                        debug!(session_id = %session_id, "Room closed during resync");
                        None
                    }
                }
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!(session_id = %session_id, "Room broadcast closed");
                None
            }
        },
    }
}

/// Send a message over WebSocket
async fn send_msg(sink: &mut SplitSink<WebSocket, Message>, msg: &ServerMsg) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json)).await.map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{GameType, RoomSettings, RoomSupervisor};
    use crate::store::{MemoryKv, MemoryMatchStore, PresenceTracker};
    use std::sync::Arc;
    use std::time::Duration;

    fn claims(sub: &str, name: Option<&str>) -> JwtClaims {
        JwtClaims {
            sub: sub.to_string(),
            exp: None,
            name: name.map(str::to_string),
        }
    }

    #[test]
    fn display_name_fallbacks() {
        assert_eq!(display_name(Some(" Ann "), &claims("1", Some("Token"))), "Ann");
        assert_eq!(display_name(Some("  "), &claims("1", Some("Token"))), "Token");
        assert_eq!(display_name(None, &claims("42", None)), "Player-42");
    }

    #[test]
    fn long_names_are_cut() {
        let long = "x".repeat(60);
        assert_eq!(display_name(Some(&long), &claims("1", None)).len(), MAX_NAME_CHARS);
    }

    #[tokio::test]
    async fn lagging_connection_gets_full_state_again() {
        let kv = Arc::new(MemoryKv::new());
        let supervisor = RoomSupervisor::new(
            kv.clone(),
            Arc::new(MemoryMatchStore::new()),
            PresenceTracker::new(kv, Duration::from_secs(60)),
            RoomSettings::default(),
            Duration::from_secs(3600),
        );
        let info = supervisor.create_room(GameType::Race, 4).await.unwrap();
        let room = supervisor.resolve(&info.room_code).await.unwrap();

        let (tx, mut outbox_rx) = mpsc::channel(OUTBOX_CAPACITY);
        let (_, mut events) = room.join("s1".into(), "1".into(), "Ann".into(), tx).await.unwrap();

        // seats come and go while this connection reads nothing
        let mut visitors = Vec::new();
        for i in 0..40 {
            let (tx, rx) = mpsc::channel(OUTBOX_CAPACITY);
            room.join(format!("t{i}"), "2".into(), "Bob".into(), tx).await.unwrap();
            room.leave(format!("t{i}"), true).await.unwrap();
            visitors.push(rx);
        }
        let expected = room.snapshot().await.unwrap();

        let first = next_outbound(&room, "s1", &mut outbox_rx, &mut events).await;
        assert!(matches!(first, Some(ServerMsg::Joined { .. })));

        match next_outbound(&room, "s1", &mut outbox_rx, &mut events).await {
            Some(ServerMsg::Resync { version, snapshot }) => {
                assert!(version >= 80, "version {version}");
                assert_eq!(snapshot, expected);
                assert_eq!(snapshot.seats.len(), 1);
            }
            other => panic!("expected resync, got {other:?}"),
        }
    }
}
