//! Token-race rules: movability, blocks, capture, safe zones, extra turns
//!
//! Progress encoding per token:
//! - `-1` in base
//! - `0..=51` on the shared ring, relative to the owner's start offset
//! - `52..=57` on the private home stretch
//! - `99` finished

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

use crate::ws::protocol::RejectReason;

use super::rules::{loose_number, to_payload, GameCommand, JournalDraft, MoveError, MoveOutcome, RuleEngine, TurnEffect};
use super::seats::Seat;
use super::state::RoomState;
use super::UserId;

pub const BASE: i32 = -1;
pub const RING_CELLS: i32 = 52;
pub const LAST_RING_PROGRESS: i32 = 51;
pub const HOME_END: i32 = 57;
pub const FINISHED: i32 = 99;
pub const TOKENS_PER_PLAYER: u8 = 4;

/// Ring cells where tokens cannot be captured
pub const SAFE_ZONES: [i32; 8] = [0, 8, 13, 21, 26, 34, 39, 47];

/// Consecutive sixes that forfeit the turn
const SIX_STREAK_LIMIT: u8 = 3;

pub const ROLL_ACTION: &str = "RACE_ROLL";
pub const MOVE_ACTION: &str = "RACE_MOVE";

/// Ring offset where a color enters the board
pub fn start_offset(color: &str) -> i32 {
    match color {
        "GREEN" => 13,
        "YELLOW" => 26,
        "BLUE" => 39,
        _ => 0,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    pub token_id: u8,
    pub progress: i32,
}

impl Token {
    pub fn on_ring(&self) -> bool {
        (0..=LAST_RING_PROGRESS).contains(&self.progress)
    }
}

/// Per-user race state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RacePlayer {
    pub user_id: UserId,
    pub color: String,
    pub start_offset: i32,
    /// Last die value rolled by this player
    pub dice_value: u8,
    pub six_streak: u8,
    pub finished_count: u8,
    pub tokens: Vec<Token>,
}

impl RacePlayer {
    pub fn new(user_id: UserId, color: String) -> Self {
        Self {
            start_offset: start_offset(&color),
            user_id,
            color,
            dice_value: 0,
            six_streak: 0,
            finished_count: 0,
            tokens: (0..TOKENS_PER_PLAYER)
                .map(|token_id| Token {
                    token_id,
                    progress: BASE,
                })
                .collect(),
        }
    }

    fn token(&self, token_id: u8) -> Option<&Token> {
        self.tokens.iter().find(|t| t.token_id == token_id)
    }

    fn token_mut(&mut self, token_id: u8) -> Option<&mut Token> {
        self.tokens.iter_mut().find(|t| t.token_id == token_id)
    }
}

/// Progress after moving `dice` steps, or `None` if the move is illegal
pub fn target_progress(progress: i32, dice: u8) -> Option<i32> {
    if !(1..=6).contains(&dice) {
        return None;
    }
    let dice = dice as i32;
    match progress {
        BASE => (dice == 6).then_some(0),
        0..=56 => {
            let sum = progress + dice;
            match sum.cmp(&HOME_END) {
                std::cmp::Ordering::Less => Some(sum),
                std::cmp::Ordering::Equal => Some(FINISHED),
                std::cmp::Ordering::Greater => None,
            }
        }
        _ => None,
    }
}

/// Absolute ring cell for a relative ring progress
pub fn absolute_cell(start_offset: i32, progress: i32) -> i32 {
    (start_offset + progress).rem_euclid(RING_CELLS)
}

pub fn is_safe_zone(cell: i32) -> bool {
    SAFE_ZONES.contains(&cell)
}

/// True if a single opponent of `user_id` has two or more tokens on `cell`
pub fn opponent_block_at(players: &HashMap<UserId, RacePlayer>, user_id: &str, cell: i32) -> bool {
    players
        .values()
        .filter(|p| p.user_id != user_id)
        .any(|p| {
            p.tokens
                .iter()
                .filter(|t| t.on_ring() && absolute_cell(p.start_offset, t.progress) == cell)
                .count()
                >= 2
        })
}

fn blocked_in_path(
    players: &HashMap<UserId, RacePlayer>,
    player: &RacePlayer,
    from: i32,
    dice: u8,
) -> bool {
    let ring_steps = (dice as i32).min((LAST_RING_PROGRESS - from).max(0));
    (1..=ring_steps).any(|step| {
        opponent_block_at(
            players,
            &player.user_id,
            absolute_cell(player.start_offset, from + step),
        )
    })
}

fn can_move(players: &HashMap<UserId, RacePlayer>, player: &RacePlayer, token: &Token, dice: u8) -> bool {
    let Some(target) = target_progress(token.progress, dice) else {
        return false;
    };

    if token.on_ring() && blocked_in_path(players, player, token.progress, dice) {
        return false;
    }

    if (0..=LAST_RING_PROGRESS).contains(&target)
        && opponent_block_at(players, &player.user_id, absolute_cell(player.start_offset, target))
    {
        return false;
    }

    true
}

/// Token ids `user_id` may move with `dice`
pub fn movable_tokens(players: &HashMap<UserId, RacePlayer>, user_id: &str, dice: u8) -> Vec<u8> {
    let Some(player) = players.get(user_id) else {
        return Vec::new();
    };
    player
        .tokens
        .iter()
        .filter(|t| can_move(players, player, t, dice))
        .map(|t| t.token_id)
        .collect()
}

/// A token sent back to base
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedToken {
    pub user_id: UserId,
    pub token_id: u8,
}

/// Send opposing tokens on `cell` back to base unless it is a safe zone
pub fn capture_at(
    players: &mut HashMap<UserId, RacePlayer>,
    user_id: &str,
    cell: i32,
) -> Vec<CapturedToken> {
    if is_safe_zone(cell) {
        return Vec::new();
    }
    let mut captured = Vec::new();
    for player in players.values_mut().filter(|p| p.user_id != user_id) {
        let start = player.start_offset;
        for token in player.tokens.iter_mut() {
            if token.on_ring() && absolute_cell(start, token.progress) == cell {
                token.progress = BASE;
                captured.push(CapturedToken {
                    user_id: player.user_id.clone(),
                    token_id: token.token_id,
                });
            }
        }
    }
    captured
}

/// Journal payload of a roll
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollPayload {
    pub dice: u8,
    pub movable: Vec<u8>,
    pub six_streak: u8,
    pub forfeited: bool,
}

/// Journal payload of a token move
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovePayload {
    pub token_id: u8,
    pub dice: u8,
    pub from: i32,
    pub to: i32,
    pub captured: Vec<CapturedToken>,
}

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum ReplayError {
    #[error("unknown player {0}")]
    UnknownPlayer(UserId),

    #[error("unknown token {0}")]
    UnknownToken(u8),

    #[error("token is at {actual}, journal recorded {expected}")]
    FromMismatch { expected: i32, actual: i32 },

    #[error("journal target {journaled} disagrees with rules ({computed:?})")]
    TargetMismatch { journaled: i32, computed: Option<i32> },
}

/// Re-apply a journaled move to race state, checking it against the rules.
/// Returns the tokens captured by the replay.
pub fn replay_move(
    players: &mut HashMap<UserId, RacePlayer>,
    user_id: &str,
    payload: &MovePayload,
) -> Result<Vec<CapturedToken>, ReplayError> {
    let player = players
        .get_mut(user_id)
        .ok_or_else(|| ReplayError::UnknownPlayer(user_id.to_string()))?;
    let start = player.start_offset;
    let token = player
        .token_mut(payload.token_id)
        .ok_or(ReplayError::UnknownToken(payload.token_id))?;

    if token.progress != payload.from {
        return Err(ReplayError::FromMismatch {
            expected: payload.from,
            actual: token.progress,
        });
    }
    let computed = target_progress(payload.from, payload.dice);
    if computed != Some(payload.to) {
        return Err(ReplayError::TargetMismatch {
            journaled: payload.to,
            computed,
        });
    }

    token.progress = payload.to;
    if payload.to == FINISHED {
        player.finished_count += 1;
    }

    if (0..=LAST_RING_PROGRESS).contains(&payload.to) {
        Ok(capture_at(players, user_id, absolute_cell(start, payload.to)))
    } else {
        Ok(Vec::new())
    }
}

/// Accepts 0..=3 as a JSON number or numeric string
fn parse_token_id(raw: Option<&Value>) -> Result<u8, RejectReason> {
    match raw.and_then(loose_number) {
        Some(v) if v.is_finite() && v.fract() == 0.0 && (0.0..TOKENS_PER_PLAYER as f64).contains(&v) => {
            Ok(v as u8)
        }
        _ => Err(RejectReason::InvalidToken),
    }
}

fn missing_race_state(user_id: &str) -> MoveError {
    MoveError::Internal(format!("no race state for user {}", user_id))
}

fn seat_of<'a>(state: &'a RoomState, session_id: &str) -> Result<&'a Seat, MoveError> {
    state
        .seats
        .get(session_id)
        .ok_or_else(|| MoveError::Internal(format!("no seat for session {}", session_id)))
}

/// Token-race rule engine
pub struct RaceRules {
    rng: ChaCha8Rng,
}

impl RaceRules {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Resolve a roll of `dice` for the current player
    pub fn apply_roll(
        &mut self,
        state: &mut RoomState,
        session_id: &str,
        dice: u8,
    ) -> Result<MoveOutcome, MoveError> {
        if state.dice_value != 0 {
            return Err(RejectReason::DiceAlreadyRolled.into());
        }
        let seat = seat_of(state, session_id)?;
        let user_id = seat.user_id.clone();
        let name = seat.display_name.clone();

        let streak = {
            let player = state
                .race
                .get_mut(&user_id)
                .ok_or_else(|| missing_race_state(&user_id))?;
            player.dice_value = dice;
            player.six_streak = if dice == 6 { player.six_streak + 1 } else { 0 };
            player.six_streak
        };
        state.dice_value = dice;

        let (movable, forfeited, effect) = if streak >= SIX_STREAK_LIMIT {
            state.movable_token_ids.clear();
            state.status_message = format!("{} rolled triple six. Turn skipped.", name);
            (Vec::new(), true, TurnEffect::AdvanceAfterDelay)
        } else {
            let movable = movable_tokens(&state.race, &user_id, dice);
            state.movable_token_ids = movable.clone();
            if movable.is_empty() {
                state.status_message = format!("{} rolled {} and has no valid move.", name, dice);
                (movable, false, TurnEffect::AdvanceAfterDelay)
            } else {
                state.status_message = format!("{} rolled {}. Select token.", name, dice);
                (movable, false, TurnEffect::Hold)
            }
        };

        if effect == TurnEffect::AdvanceAfterDelay {
            if let Some(player) = state.race.get_mut(&user_id) {
                player.six_streak = 0;
            }
        }

        debug!(user_id = %user_id, dice, streak, forfeited, "Race roll");

        let payload = RollPayload {
            dice,
            movable,
            six_streak: streak,
            forfeited,
        };
        Ok(MoveOutcome {
            journal: JournalDraft {
                user_id,
                action_type: ROLL_ACTION,
                payload: to_payload(&payload)?,
            },
            effect,
        })
    }

    /// Move one of the current player's tokens by the pending die value
    pub fn move_token(
        &mut self,
        state: &mut RoomState,
        session_id: &str,
        token_id: Option<Value>,
    ) -> Result<MoveOutcome, MoveError> {
        let dice = state.dice_value;
        if dice == 0 {
            return Err(RejectReason::RollDiceFirst.into());
        }
        let token_id = parse_token_id(token_id.as_ref())?;

        let seat = seat_of(state, session_id)?;
        let user_id = seat.user_id.clone();
        let name = seat.display_name.clone();

        let player = state.race.get(&user_id).ok_or_else(|| missing_race_state(&user_id))?;
        let token = player.token(token_id).ok_or(RejectReason::TokenNotFound)?;
        if !state.movable_token_ids.contains(&token_id) {
            return Err(RejectReason::MoveNotAllowed.into());
        }
        let from = token.progress;
        let to = target_progress(from, dice).ok_or(RejectReason::MoveNotAllowed)?;
        let start = player.start_offset;

        let finished_count = {
            let player = state
                .race
                .get_mut(&user_id)
                .ok_or_else(|| missing_race_state(&user_id))?;
            if let Some(token) = player.token_mut(token_id) {
                token.progress = to;
            }
            if to == FINISHED {
                player.finished_count += 1;
            }
            player.finished_count
        };

        let captured = if (0..=LAST_RING_PROGRESS).contains(&to) {
            capture_at(&mut state.race, &user_id, absolute_cell(start, to))
        } else {
            Vec::new()
        };

        state.movable_token_ids.clear();
        state.dice_value = 0;

        let effect = if finished_count >= TOKENS_PER_PLAYER {
            state.status_message = format!("{} wins the race", name);
            TurnEffect::Finish {
                winner: session_id.to_string(),
            }
        } else if dice == 6 || !captured.is_empty() {
            state.status_message = format!("{} gets extra turn", name);
            TurnEffect::Hold
        } else {
            if let Some(player) = state.race.get_mut(&user_id) {
                player.six_streak = 0;
            }
            TurnEffect::Advance
        };

        debug!(
            user_id = %user_id,
            token_id,
            from,
            to,
            captured = captured.len(),
            "Race move"
        );

        let payload = MovePayload {
            token_id,
            dice,
            from,
            to,
            captured,
        };
        Ok(MoveOutcome {
            journal: JournalDraft {
                user_id,
                action_type: MOVE_ACTION,
                payload: to_payload(&payload)?,
            },
            effect,
        })
    }
}

impl RuleEngine for RaceRules {
    fn seat_created(&mut self, state: &mut RoomState, seat: &Seat) {
        state.race.insert(
            seat.user_id.clone(),
            RacePlayer::new(seat.user_id.clone(), seat.symbol.clone()),
        );
    }

    fn seat_removed(&mut self, state: &mut RoomState, seat: &Seat) {
        state.race.remove(&seat.user_id);
    }

    fn handle(
        &mut self,
        state: &mut RoomState,
        session_id: &str,
        command: GameCommand,
    ) -> Result<MoveOutcome, MoveError> {
        match command {
            GameCommand::Roll => {
                let dice = self.rng.gen_range(1..=6);
                self.apply_roll(state, session_id, dice)
            }
            GameCommand::MoveToken { token_id } => self.move_token(state, session_id, token_id),
            GameCommand::Play { .. } => Err(RejectReason::InvalidAction.into()),
        }
    }
}
