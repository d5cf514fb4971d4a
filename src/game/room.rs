//! Room actor: one task per room owning its state, fed by a private inbox

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::store::{JournalWriter, MatchId, MoveRecord, Presence, PresenceTracker};
use crate::ws::protocol::{ClientMsg, RejectReason, ServerMsg};

use super::rules::{engine_for, GameCommand, MoveError, MoveOutcome, RuleEngine, TurnEffect};
use super::seats::Seat;
use super::snapshot::{RoomSnapshot, SnapshotBuilder};
use super::state::RoomState;
use super::turn::Removal;
use super::{GameType, Phase, SessionId, UserId};

/// Per-room timings
#[derive(Debug, Clone, Copy)]
pub struct RoomSettings {
    pub reconnect_window: Duration,
    pub turn_advance_delay: Duration,
    pub empty_room_grace: Duration,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            reconnect_window: Duration::from_secs(20),
            turn_advance_delay: Duration::from_millis(900),
            empty_room_grace: Duration::from_secs(30),
        }
    }
}

/// Everything needed to open a room
#[derive(Debug, Clone)]
pub struct RoomParams {
    pub id: Uuid,
    pub code: String,
    pub game_type: GameType,
    pub max_players: usize,
    pub match_id: MatchId,
    /// Seeds the room's dice and gain rolls
    pub seed: u64,
    pub settings: RoomSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    #[error("room is full")]
    RoomFull,
    #[error("game already in progress")]
    RoomLocked,
    #[error("game has finished")]
    RoomFinished,
    #[error("room is closed")]
    RoomClosed,
}

impl JoinError {
    pub fn code(&self) -> &'static str {
        match self {
            JoinError::RoomFull => "ROOM_FULL",
            JoinError::RoomLocked => "ROOM_LOCKED",
            JoinError::RoomFinished => "ROOM_FINISHED",
            JoinError::RoomClosed => "ROOM_CLOSED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    #[error("room is closed")]
    Closed,
}

/// Result of a successful join
#[derive(Debug, Clone)]
pub struct JoinAccepted {
    pub session_id: SessionId,
    pub symbol: String,
    /// The user already held a seat and was rebound to this session
    pub reconnected: bool,
}

enum RoomCommand {
    Join {
        session_id: SessionId,
        user_id: UserId,
        display_name: String,
        outbox: mpsc::Sender<ServerMsg>,
        reply: oneshot::Sender<Result<JoinAccepted, JoinError>>,
    },
    Leave {
        session_id: SessionId,
        consented: bool,
    },
    Client {
        session_id: SessionId,
        msg: ClientMsg,
    },
    Inspect {
        reply: oneshot::Sender<RoomSnapshot>,
    },
    Resync {
        reply: oneshot::Sender<ServerMsg>,
    },
    ReconnectExpired {
        user_id: UserId,
        generation: u64,
    },
    TurnAdvanceDue {
        generation: u64,
    },
    EmptyRoomExpired {
        generation: u64,
    },
}

/// Handle to a running room
#[derive(Clone)]
pub struct RoomHandle {
    pub id: Uuid,
    pub code: String,
    pub game_type: GameType,
    pub max_players: usize,
    commands: mpsc::Sender<RoomCommand>,
    events: broadcast::Sender<ServerMsg>,
    seat_count: Arc<AtomicUsize>,
}

impl RoomHandle {
    pub fn seat_count(&self) -> usize {
        self.seat_count.load(Ordering::Relaxed)
    }

    /// True once the room task has stopped
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// Take a seat (or reclaim one). Broadcasts are subscribed before the
    /// join is processed so no update is missed.
    pub async fn join(
        &self,
        session_id: SessionId,
        user_id: UserId,
        display_name: String,
        outbox: mpsc::Sender<ServerMsg>,
    ) -> Result<(JoinAccepted, broadcast::Receiver<ServerMsg>), JoinError> {
        let events = self.events.subscribe();
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(RoomCommand::Join {
                session_id,
                user_id,
                display_name,
                outbox,
                reply,
            })
            .await
            .map_err(|_| JoinError::RoomClosed)?;
        let accepted = rx.await.map_err(|_| JoinError::RoomClosed)??;
        Ok((accepted, events))
    }

    /// Report a closed connection; `consented` skips the reconnection window
    pub async fn leave(&self, session_id: SessionId, consented: bool) -> Result<(), RoomError> {
        self.commands
            .send(RoomCommand::Leave {
                session_id,
                consented,
            })
            .await
            .map_err(|_| RoomError::Closed)
    }

    pub async fn send(&self, session_id: SessionId, msg: ClientMsg) -> Result<(), RoomError> {
        self.commands
            .send(RoomCommand::Client { session_id, msg })
            .await
            .map_err(|_| RoomError::Closed)
    }

    /// Current full state
    pub async fn snapshot(&self) -> Result<RoomSnapshot, RoomError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(RoomCommand::Inspect { reply })
            .await
            .map_err(|_| RoomError::Closed)?;
        rx.await.map_err(|_| RoomError::Closed)
    }

    /// Latest published snapshot with its version, for a connection that
    /// missed broadcasts
    pub async fn resync(&self) -> Result<ServerMsg, RoomError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(RoomCommand::Resync { reply })
            .await
            .map_err(|_| RoomError::Closed)?;
        rx.await.map_err(|_| RoomError::Closed)
    }
}

struct Timer {
    generation: u64,
    task: JoinHandle<()>,
}

impl Timer {
    fn cancel(self) {
        self.task.abort();
    }
}

/// The authoritative room
pub struct GameRoom {
    id: Uuid,
    match_id: MatchId,
    settings: RoomSettings,
    state: RoomState,
    rules: Box<dyn RuleEngine>,
    commands_rx: mpsc::Receiver<RoomCommand>,
    /// Timers post back through this without keeping the room alive
    inbox: mpsc::WeakSender<RoomCommand>,
    events: broadcast::Sender<ServerMsg>,
    outboxes: HashMap<SessionId, mpsc::Sender<ServerMsg>>,
    seat_count: Arc<AtomicUsize>,
    snapshots: SnapshotBuilder,
    journal: JournalWriter,
    presence: PresenceTracker,
    move_seq: u64,
    opened_at: Instant,
    next_generation: u64,
    reconnect_timers: HashMap<UserId, Timer>,
    advance_timer: Option<Timer>,
    empty_timer: Option<Timer>,
    disposed: bool,
}

impl GameRoom {
    pub fn new(params: RoomParams, journal: JournalWriter, presence: PresenceTracker) -> (Self, RoomHandle) {
        let (commands_tx, commands_rx) = mpsc::channel(256);
        let (events, _) = broadcast::channel(64);
        let seat_count = Arc::new(AtomicUsize::new(0));

        let handle = RoomHandle {
            id: params.id,
            code: params.code.clone(),
            game_type: params.game_type,
            max_players: params.max_players,
            commands: commands_tx.clone(),
            events: events.clone(),
            seat_count: seat_count.clone(),
        };

        let state = RoomState::new(params.code, params.game_type, params.max_players);
        let room = Self {
            id: params.id,
            match_id: params.match_id,
            settings: params.settings,
            snapshots: SnapshotBuilder::new(&state),
            rules: engine_for(params.game_type, params.seed),
            state,
            commands_rx,
            inbox: commands_tx.downgrade(),
            events,
            outboxes: HashMap::new(),
            seat_count,
            journal,
            presence,
            move_seq: 0,
            opened_at: Instant::now(),
            next_generation: 0,
            reconnect_timers: HashMap::new(),
            advance_timer: None,
            empty_timer: None,
            disposed: false,
        };

        (room, handle)
    }

    /// Process commands until the room is disposed
    pub async fn run(mut self) {
        info!(
            room_id = %self.id,
            room_code = %self.state.room_code,
            game_type = %self.state.game_type,
            max_players = self.state.max_players,
            "Room opened"
        );
        self.arm_empty_timer();

        while let Some(command) = self.commands_rx.recv().await {
            self.handle(command);
            if self.disposed {
                break;
            }
        }

        self.cancel_all_timers();
        info!(room_code = %self.state.room_code, moves = self.move_seq, "Room closed");
    }

    fn handle(&mut self, command: RoomCommand) {
        match command {
            RoomCommand::Join {
                session_id,
                user_id,
                display_name,
                outbox,
                reply,
            } => {
                let result = self.handle_join(session_id, user_id, display_name, outbox);
                let _ = reply.send(result);
            }
            RoomCommand::Leave {
                session_id,
                consented,
            } => self.handle_leave(&session_id, consented),
            RoomCommand::Client { session_id, msg } => self.handle_client(&session_id, msg),
            RoomCommand::Inspect { reply } => {
                let _ = reply.send(RoomSnapshot::capture(&self.state));
            }
            RoomCommand::Resync { reply } => {
                let _ = reply.send(ServerMsg::Resync {
                    version: self.snapshots.version(),
                    snapshot: self.snapshots.current().clone(),
                });
            }
            RoomCommand::ReconnectExpired { user_id, generation } => {
                self.handle_reconnect_expired(&user_id, generation)
            }
            RoomCommand::TurnAdvanceDue { generation } => self.handle_advance_due(generation),
            RoomCommand::EmptyRoomExpired { generation } => self.handle_empty_expired(generation),
        }
    }

    // ========================================================================
    // Connections
    // ========================================================================

    fn handle_join(
        &mut self,
        session_id: SessionId,
        user_id: UserId,
        display_name: String,
        outbox: mpsc::Sender<ServerMsg>,
    ) -> Result<JoinAccepted, JoinError> {
        if let Some(existing) = self.state.seats.session_of(&user_id) {
            return Ok(self.rebind_seat(existing, session_id, user_id, outbox));
        }

        match self.state.phase() {
            Phase::Finished => return Err(JoinError::RoomFinished),
            Phase::Active => return Err(JoinError::RoomLocked),
            Phase::Waiting if self.state.is_full() => return Err(JoinError::RoomFull),
            Phase::Waiting => {}
        }

        let symbol = self.state.seats.allocate_symbol(self.state.game_type);
        let seat = Seat::new(session_id.clone(), user_id.clone(), display_name, symbol.clone());
        self.rules.seat_created(&mut self.state, &seat);
        self.state.seats.insert(seat);
        self.state.turn.push(session_id.clone());
        self.outboxes.insert(session_id.clone(), outbox);
        self.seat_count.store(self.state.seats.len(), Ordering::Relaxed);
        self.cancel_empty_timer();
        self.presence.report(&user_id, Presence::InGame);

        info!(
            room_code = %self.state.room_code,
            user_id = %user_id,
            symbol = %symbol,
            seats = self.state.seats.len(),
            max_players = self.state.max_players,
            "Player joined room"
        );

        if self.state.is_full() && self.state.turn.start() {
            self.state.status_message = format!("{} turn", self.state.current_player_name());
            let _ = self.events.send(ServerMsg::GameStarted {
                room_code: self.state.room_code.clone(),
                turn_index: self.state.turn.turn_index(),
                turn_no: self.state.turn.turn_no(),
                game_type: self.state.game_type,
                current_turn_user_id: self.state.current_user_id(),
            });
            info!(room_code = %self.state.room_code, "Game started");
        }

        self.publish_state();
        self.send_joined(&session_id);

        Ok(JoinAccepted {
            session_id,
            symbol,
            reconnected: false,
        })
    }

    /// Move an existing seat onto a new session, keeping score and order
    fn rebind_seat(
        &mut self,
        existing: SessionId,
        session_id: SessionId,
        user_id: UserId,
        outbox: mpsc::Sender<ServerMsg>,
    ) -> JoinAccepted {
        if let Some(timer) = self.reconnect_timers.remove(&user_id) {
            timer.cancel();
        }

        if existing != session_id {
            if let Some(old) = self.outboxes.remove(&existing) {
                let _ = old.try_send(ServerMsg::error("SESSION_REPLACED", "Seat taken over by a new connection"));
            }
            self.state.seats.migrate(&existing, &session_id);
            self.state.turn.replace(&existing, &session_id);
        }

        let symbol = match self.state.seats.get_mut(&session_id) {
            Some(seat) => {
                seat.connected = true;
                seat.symbol.clone()
            }
            None => String::new(),
        };
        self.outboxes.insert(session_id.clone(), outbox);
        self.presence.report(&user_id, Presence::InGame);

        info!(
            room_code = %self.state.room_code,
            user_id = %user_id,
            session_id = %session_id,
            "Player reconnected"
        );

        self.publish_state();
        self.send_joined(&session_id);

        JoinAccepted {
            session_id,
            symbol,
            reconnected: true,
        }
    }

    fn handle_leave(&mut self, session_id: &str, consented: bool) {
        let Some(seat) = self.state.seats.get_mut(session_id) else {
            debug!(session_id = %session_id, "Leave from unseated session");
            return;
        };
        seat.connected = false;
        let user_id = seat.user_id.clone();
        self.outboxes.remove(session_id);
        self.presence.report(&user_id, Presence::Offline);

        if self.state.phase() == Phase::Active && !consented {
            info!(
                room_code = %self.state.room_code,
                user_id = %user_id,
                window_secs = self.settings.reconnect_window.as_secs(),
                "Player dropped, holding seat"
            );
            self.schedule_reconnect(user_id);
            self.publish_state();
        } else {
            self.remove_seat(session_id);
        }
    }

    fn handle_reconnect_expired(&mut self, user_id: &str, generation: u64) {
        if self.reconnect_timers.get(user_id).map(|t| t.generation) != Some(generation) {
            return;
        }
        self.reconnect_timers.remove(user_id);

        let Some(session_id) = self.state.seats.session_of(user_id) else {
            return;
        };
        if self.state.seats.get(&session_id).map(|s| s.connected).unwrap_or(false) {
            return;
        }

        info!(room_code = %self.state.room_code, user_id = %user_id, "Reconnection window elapsed");
        self.remove_seat(&session_id);
    }

    /// Drop a seat for good and repair the turn order
    fn remove_seat(&mut self, session_id: &str) {
        let Some(seat) = self.state.seats.remove(session_id) else {
            return;
        };
        self.rules.seat_removed(&mut self.state, &seat);
        self.outboxes.remove(session_id);
        if let Some(timer) = self.reconnect_timers.remove(&seat.user_id) {
            timer.cancel();
        }
        self.seat_count.store(self.state.seats.len(), Ordering::Relaxed);
        let removal = self.state.turn.remove(session_id);

        info!(
            room_code = %self.state.room_code,
            user_id = %seat.user_id,
            seats = self.state.seats.len(),
            "Seat removed"
        );

        if self.state.seats.is_empty() {
            match self.state.phase() {
                Phase::Waiting => {
                    self.state.status_message = "Waiting for players".to_string();
                    self.arm_empty_timer();
                }
                Phase::Active => {
                    self.finish(None);
                    self.dispose("all players left");
                    return;
                }
                Phase::Finished => {
                    self.dispose("all players left");
                    return;
                }
            }
        } else if self.state.phase() == Phase::Active && removal == Removal::RemovedCurrent {
            self.cancel_advance_timer();
            self.state.reset_turn_transients();
            self.broadcast_turn_changed();
        } else if self.state.phase() == Phase::Finished && self.state.seats.connected_count() == 0 {
            self.dispose("players dispersed");
            return;
        }

        self.publish_state();
    }

    // ========================================================================
    // Gameplay
    // ========================================================================

    fn handle_client(&mut self, session_id: &str, msg: ClientMsg) {
        match msg {
            ClientMsg::Ping { t } => self.unicast(session_id, ServerMsg::Pong { t }),
            ClientMsg::Leave => self.handle_leave(session_id, true),
            other => {
                if let Some(command) = other.into_command() {
                    self.handle_move(session_id, command);
                }
            }
        }
    }

    fn handle_move(&mut self, session_id: &str, command: GameCommand) {
        if self.state.phase() != Phase::Active {
            debug!(room_code = %self.state.room_code, session_id = %session_id, "Move outside active play ignored");
            return;
        }
        if !self.state.seats.contains(session_id) {
            warn!(room_code = %self.state.room_code, session_id = %session_id, "Move from unseated session");
            return;
        }
        if !self.state.turn.is_current(session_id) {
            self.reject(session_id, RejectReason::NotYourTurn);
            return;
        }

        match self.rules.handle(&mut self.state, session_id, command) {
            Ok(outcome) => self.apply_outcome(outcome),
            Err(MoveError::Rejected(reason)) => {
                debug!(room_code = %self.state.room_code, session_id = %session_id, reason = %reason, "Move rejected");
                self.reject(session_id, reason);
            }
            Err(MoveError::Internal(message)) => {
                error!(room_code = %self.state.room_code, session_id = %session_id, error = %message, "Move failed");
                self.reject(session_id, RejectReason::ServerError);
            }
        }
    }

    fn apply_outcome(&mut self, outcome: MoveOutcome) {
        self.move_seq += 1;
        self.journal.append(MoveRecord {
            match_id: self.match_id,
            user_id: outcome.journal.user_id,
            turn_no: self.state.turn.turn_no(),
            move_no: self.move_seq,
            action_type: outcome.journal.action_type.to_string(),
            payload: outcome.journal.payload,
            server_tick: self.opened_at.elapsed().as_millis() as u64,
            is_valid: true,
        });

        match outcome.effect {
            TurnEffect::Hold => {}
            TurnEffect::Advance => self.advance_turn(),
            TurnEffect::AdvanceAfterDelay => self.schedule_advance(),
            TurnEffect::Finish { winner } => self.finish(Some(&winner)),
        }

        self.publish_state();
    }

    fn advance_turn(&mut self) {
        self.cancel_advance_timer();
        if self.state.advance_turn() {
            self.broadcast_turn_changed();
        }
    }

    fn handle_advance_due(&mut self, generation: u64) {
        if self.advance_timer.as_ref().map(|t| t.generation) != Some(generation) {
            return;
        }
        self.advance_timer = None;
        if self.state.phase() != Phase::Active {
            return;
        }
        self.advance_turn();
        self.publish_state();
    }

    /// Enter FINISHED. `winner` is a session id.
    fn finish(&mut self, winner: Option<&str>) {
        if self.state.phase() == Phase::Finished {
            return;
        }
        self.state.turn.finish();
        self.cancel_advance_timer();
        for (_, timer) in self.reconnect_timers.drain() {
            timer.cancel();
        }

        let winner = winner.and_then(|sid| self.state.seats.get(sid)).cloned();
        self.state.winner_user_id = winner.as_ref().map(|s| s.user_id.clone());
        self.state.dice_value = 0;
        self.state.movable_token_ids.clear();
        if winner.is_none() {
            self.state.status_message = "Game over".to_string();
        }

        self.journal
            .finish_match(self.match_id, self.state.winner_user_id.clone());
        let _ = self.events.send(ServerMsg::GameOver {
            winner_user_id: self.state.winner_user_id.clone(),
            winner_name: winner.map(|s| s.display_name).unwrap_or_default(),
            game_type: self.state.game_type,
        });

        info!(
            room_code = %self.state.room_code,
            winner_user_id = ?self.state.winner_user_id,
            moves = self.move_seq,
            "Game over"
        );
    }

    // ========================================================================
    // Timers
    // ========================================================================

    fn spawn_timer(&mut self, delay: Duration, command: impl FnOnce(u64) -> RoomCommand + Send + 'static) -> Timer {
        self.next_generation += 1;
        let generation = self.next_generation;
        let inbox = self.inbox.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(tx) = inbox.upgrade() {
                let _ = tx.send(command(generation)).await;
            }
        });
        Timer { generation, task }
    }

    fn schedule_reconnect(&mut self, user_id: UserId) {
        let timer_user = user_id.clone();
        let timer = self.spawn_timer(self.settings.reconnect_window, move |generation| {
            RoomCommand::ReconnectExpired {
                user_id: timer_user,
                generation,
            }
        });
        if let Some(previous) = self.reconnect_timers.insert(user_id, timer) {
            previous.cancel();
        }
    }

    fn schedule_advance(&mut self) {
        self.cancel_advance_timer();
        let timer = self.spawn_timer(self.settings.turn_advance_delay, |generation| {
            RoomCommand::TurnAdvanceDue { generation }
        });
        self.advance_timer = Some(timer);
    }

    fn cancel_advance_timer(&mut self) {
        if let Some(timer) = self.advance_timer.take() {
            timer.cancel();
        }
    }

    fn arm_empty_timer(&mut self) {
        self.cancel_empty_timer();
        let timer = self.spawn_timer(self.settings.empty_room_grace, |generation| {
            RoomCommand::EmptyRoomExpired { generation }
        });
        self.empty_timer = Some(timer);
    }

    fn cancel_empty_timer(&mut self) {
        if let Some(timer) = self.empty_timer.take() {
            timer.cancel();
        }
    }

    fn handle_empty_expired(&mut self, generation: u64) {
        if self.empty_timer.as_ref().map(|t| t.generation) != Some(generation) {
            return;
        }
        self.empty_timer = None;
        if self.state.seats.is_empty() {
            self.dispose("empty room grace elapsed");
        }
    }

    fn cancel_all_timers(&mut self) {
        self.cancel_advance_timer();
        self.cancel_empty_timer();
        for (_, timer) in self.reconnect_timers.drain() {
            timer.cancel();
        }
    }

    fn dispose(&mut self, reason: &str) {
        self.cancel_all_timers();
        self.disposed = true;
        info!(room_code = %self.state.room_code, reason = %reason, "Disposing room");
    }

    // ========================================================================
    // Outbound
    // ========================================================================

    fn publish_state(&mut self) {
        if let Some(msg) = self.snapshots.publish(&self.state) {
            let _ = self.events.send(msg);
        }
    }

    fn broadcast_turn_changed(&self) {
        let _ = self.events.send(ServerMsg::TurnChanged {
            turn_index: self.state.turn.turn_index(),
            turn_no: self.state.turn.turn_no(),
            current_turn_user_id: self.state.current_user_id(),
        });
    }

    fn send_joined(&self, session_id: &str) {
        let Some(seat) = self.state.seats.get(session_id) else {
            return;
        };
        self.unicast(
            session_id,
            ServerMsg::Joined {
                session_id: session_id.to_string(),
                user_id: seat.user_id.clone(),
                version: self.snapshots.version(),
                snapshot: self.snapshots.current().clone(),
            },
        );
    }

    fn reject(&self, session_id: &str, reason: RejectReason) {
        self.unicast(session_id, ServerMsg::MoveRejected { reason });
    }

    fn unicast(&self, session_id: &str, msg: ServerMsg) {
        if let Some(outbox) = self.outboxes.get(session_id) {
            if let Err(e) = outbox.try_send(msg) {
                warn!(room_code = %self.state.room_code, session_id = %session_id, error = %e, "Dropping unicast message");
            }
        }
    }
}
