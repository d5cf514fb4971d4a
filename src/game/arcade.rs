//! Strike-board and pocket rules: declared power in, score gain out

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::ws::protocol::RejectReason;

use super::rules::{loose_number, to_payload, GameCommand, JournalDraft, MoveError, MoveOutcome, RuleEngine, TurnEffect};
use super::seats::SeatTable;
use super::state::RoomState;

const DEFAULT_POWER: f64 = 50.0;
const MAX_POWER: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArcadeVariant {
    StrikeBoard,
    Pocket,
}

impl ArcadeVariant {
    /// The only action this variant accepts
    pub fn action_tag(&self) -> &'static str {
        match self {
            ArcadeVariant::StrikeBoard => "STRIKE",
            ArcadeVariant::Pocket => "SHOT",
        }
    }

    fn roll_gain(&self, rng: &mut impl Rng, power: f64) -> u32 {
        match self {
            ArcadeVariant::Pocket => {
                if power >= 70.0 {
                    rng.gen_range(1..=2)
                } else {
                    rng.gen_range(0..=1)
                }
            }
            ArcadeVariant::StrikeBoard => {
                let base = if power >= 75.0 {
                    rng.gen_range(1..=3)
                } else {
                    rng.gen_range(0..=2)
                };
                base + u32::from(rng.gen_ratio(1, 12))
            }
        }
    }
}

/// Check the declared action, defaulting to the variant's tag.
/// Anything but a string is refused.
pub fn validate_action(variant: ArcadeVariant, action: Option<&Value>) -> Result<(), RejectReason> {
    match action {
        None | Some(Value::Null) => Ok(()),
        Some(Value::String(action)) if action.trim().eq_ignore_ascii_case(variant.action_tag()) => Ok(()),
        Some(_) => Err(RejectReason::InvalidAction),
    }
}

/// Check the declared power, defaulting to 50. Numeric strings count.
pub fn validate_power(power: Option<&Value>) -> Result<f64, RejectReason> {
    let power = match power {
        None | Some(Value::Null) => DEFAULT_POWER,
        Some(raw) => loose_number(raw).ok_or(RejectReason::InvalidPower)?,
    };
    if power.is_finite() && (0.0..=MAX_POWER).contains(&power) {
        Ok(power)
    } else {
        Err(RejectReason::InvalidPower)
    }
}

/// Journal payload of a strike or shot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArcadePayload {
    pub power: f64,
    pub gain: u32,
    pub from: u32,
    pub to: u32,
}

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum ArcadeReplayError {
    #[error("score is {actual}, journal recorded {expected}")]
    FromMismatch { expected: u32, actual: u32 },

    #[error("journal recorded {journaled}, rules give {computed}")]
    ToMismatch { journaled: u32, computed: u32 },
}

/// Re-apply a journaled play to a score table
pub fn replay_play(
    seats: &mut SeatTable,
    session_id: &str,
    payload: &ArcadePayload,
    target: u32,
) -> Result<(), ArcadeReplayError> {
    let actual = seats.score(session_id);
    if actual != payload.from {
        return Err(ArcadeReplayError::FromMismatch {
            expected: payload.from,
            actual,
        });
    }
    let computed = payload.from.saturating_add(payload.gain).min(target);
    if computed != payload.to {
        return Err(ArcadeReplayError::ToMismatch {
            journaled: payload.to,
            computed,
        });
    }
    seats.add_score(session_id, payload.gain, target);
    Ok(())
}

pub struct ArcadeRules {
    variant: ArcadeVariant,
    rng: ChaCha8Rng,
}

impl ArcadeRules {
    pub fn new(variant: ArcadeVariant, seed: u64) -> Self {
        Self {
            variant,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    fn play(
        &mut self,
        state: &mut RoomState,
        session_id: &str,
        action: Option<&Value>,
        power: Option<&Value>,
    ) -> Result<MoveOutcome, MoveError> {
        validate_action(self.variant, action)?;
        let power = validate_power(power)?;

        let seat = state
            .seats
            .get(session_id)
            .ok_or_else(|| MoveError::Internal(format!("no seat for session {}", session_id)))?;
        let user_id = seat.user_id.clone();
        let name = seat.display_name.clone();

        let gain = self.variant.roll_gain(&mut self.rng, power);
        let (from, to) = state.seats.add_score(session_id, gain, state.target_score);

        let effect = if to >= state.target_score {
            state.status_message = format!("{} wins with {} points", name, to);
            TurnEffect::Finish {
                winner: session_id.to_string(),
            }
        } else {
            state.status_message = format!("{} scored {}", name, gain);
            TurnEffect::Advance
        };

        debug!(user_id = %user_id, power, gain, from, to, "Arcade play");

        let payload = ArcadePayload { power, gain, from, to };
        Ok(MoveOutcome {
            journal: JournalDraft {
                user_id,
                action_type: self.variant.action_tag(),
                payload: to_payload(&payload)?,
            },
            effect,
        })
    }
}

impl RuleEngine for ArcadeRules {
    fn handle(
        &mut self,
        state: &mut RoomState,
        session_id: &str,
        command: GameCommand,
    ) -> Result<MoveOutcome, MoveError> {
        match command {
            GameCommand::Play { action, power } => self.play(state, session_id, action.as_ref(), power.as_ref()),
            GameCommand::Roll | GameCommand::MoveToken { .. } => Err(RejectReason::InvalidAction.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use crate::game::seats::Seat;
    use crate::game::GameType;

    fn room(game_type: GameType) -> RoomState {
        let mut state = RoomState::new("ARC001".into(), game_type, 2);
        for (sid, uid, name) in [("a", "1", "Ann"), ("b", "2", "Bob")] {
            let symbol = state.seats.allocate_symbol(game_type);
            state.seats.insert(Seat::new(sid.into(), uid.into(), name.into(), symbol));
            state.turn.push(sid.into());
        }
        state.turn.start();
        state
    }

    fn play(power: Option<f64>, action: Option<&str>) -> GameCommand {
        GameCommand::Play {
            action: action.map(|a| json!(a)),
            power: power.map(|p| json!(p)),
        }
    }

    #[test]
    fn action_defaults_and_ignores_case() {
        assert!(validate_action(ArcadeVariant::StrikeBoard, None).is_ok());
        assert!(validate_action(ArcadeVariant::StrikeBoard, Some(&json!(null))).is_ok());
        assert!(validate_action(ArcadeVariant::StrikeBoard, Some(&json!("strike"))).is_ok());
        assert!(validate_action(ArcadeVariant::Pocket, Some(&json!(" Shot "))).is_ok());
        assert_eq!(
            validate_action(ArcadeVariant::Pocket, Some(&json!("STRIKE"))),
            Err(RejectReason::InvalidAction)
        );
    }

    #[test]
    fn non_string_action_is_invalid() {
        for bad in [json!(5), json!(true), json!(["shot"])] {
            assert_eq!(
                validate_action(ArcadeVariant::Pocket, Some(&bad)),
                Err(RejectReason::InvalidAction)
            );
        }
    }

    #[test]
    fn power_bounds() {
        assert_eq!(validate_power(None), Ok(50.0));
        assert_eq!(validate_power(Some(&json!(null))), Ok(50.0));
        assert_eq!(validate_power(Some(&json!(0))), Ok(0.0));
        assert_eq!(validate_power(Some(&json!(100.0))), Ok(100.0));
        assert_eq!(validate_power(Some(&json!(100.5))), Err(RejectReason::InvalidPower));
        assert_eq!(validate_power(Some(&json!(-1))), Err(RejectReason::InvalidPower));
    }

    #[test]
    fn power_accepts_numeric_strings() {
        assert_eq!(validate_power(Some(&json!("80"))), Ok(80.0));
        assert_eq!(validate_power(Some(&json!(" 12.5 "))), Ok(12.5));
        assert_eq!(validate_power(Some(&json!("101"))), Err(RejectReason::InvalidPower));
        for bad in [json!("abc"), json!(""), json!(true), json!({"p": 1})] {
            assert_eq!(validate_power(Some(&bad)), Err(RejectReason::InvalidPower), "{bad}");
        }
    }

    #[test]
    fn mistyped_payloads_are_rejected_moves() {
        let mut state = room(GameType::Pocket);
        let mut rules = ArcadeRules::new(ArcadeVariant::Pocket, 3);

        let bad_power = GameCommand::Play { action: None, power: Some(json!("abc")) };
        assert!(matches!(
            rules.handle(&mut state, "a", bad_power),
            Err(MoveError::Rejected(RejectReason::InvalidPower))
        ));
        let bad_action = GameCommand::Play { action: Some(json!(5)), power: None };
        assert!(matches!(
            rules.handle(&mut state, "a", bad_action),
            Err(MoveError::Rejected(RejectReason::InvalidAction))
        ));
        assert_eq!(state.seats.score("a"), 0);

        let stringly = GameCommand::Play { action: Some(json!("shot")), power: Some(json!("80")) };
        let outcome = rules.handle(&mut state, "a", stringly).unwrap();
        let payload: ArcadePayload = serde_json::from_value(outcome.journal.payload).unwrap();
        assert_eq!(payload.power, 80.0);
    }

    #[test]
    fn gains_stay_in_range() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        for _ in 0..500 {
            assert!((1..=2).contains(&ArcadeVariant::Pocket.roll_gain(&mut rng, 80.0)));
            assert!(ArcadeVariant::Pocket.roll_gain(&mut rng, 10.0) <= 1);
            assert!((1..=4).contains(&ArcadeVariant::StrikeBoard.roll_gain(&mut rng, 90.0)));
            assert!(ArcadeVariant::StrikeBoard.roll_gain(&mut rng, 20.0) <= 3);
        }
    }

    #[test]
    fn invalid_play_leaves_score_untouched() {
        let mut state = room(GameType::Strike);
        let mut rules = ArcadeRules::new(ArcadeVariant::StrikeBoard, 1);
        let err = rules
            .handle(&mut state, "a", play(Some(250.0), None))
            .unwrap_err();
        assert!(matches!(err, MoveError::Rejected(RejectReason::InvalidPower)));
        let err = rules.handle(&mut state, "a", GameCommand::Roll).unwrap_err();
        assert!(matches!(err, MoveError::Rejected(RejectReason::InvalidAction)));
        assert_eq!(state.seats.score("a"), 0);
    }

    #[test]
    fn play_advances_until_target_then_finishes() {
        let mut state = room(GameType::Pocket);
        let mut rules = ArcadeRules::new(ArcadeVariant::Pocket, 11);

        let mut last = 0;
        loop {
            let outcome = rules.handle(&mut state, "a", play(Some(90.0), Some("shot"))).unwrap();
            let payload: ArcadePayload = serde_json::from_value(outcome.journal.payload).unwrap();
            assert_eq!(payload.from, last);
            assert!(payload.to >= payload.from);
            assert!(payload.to <= 8);
            assert_eq!(outcome.journal.action_type, "SHOT");
            last = payload.to;

            if payload.to == 8 {
                assert_eq!(outcome.effect, TurnEffect::Finish { winner: "a".into() });
                break;
            }
            assert_eq!(outcome.effect, TurnEffect::Advance);
        }
        assert_eq!(state.seats.score("a"), 8);
    }

    #[test]
    fn journaled_play_replays_to_same_score() {
        let mut state = room(GameType::Strike);
        let mut rules = ArcadeRules::new(ArcadeVariant::StrikeBoard, 5);
        state.seats.add_score("a", 14, 15);
        let mut replayed = state.seats.clone();

        let outcome = rules.handle(&mut state, "a", play(Some(80.0), None)).unwrap();
        let payload: ArcadePayload = serde_json::from_value(outcome.journal.payload).unwrap();
        assert_eq!(payload.to, 15);

        replay_play(&mut replayed, "a", &payload, 15).unwrap();
        assert_eq!(replayed.score("a"), state.seats.score("a"));
        assert!(replay_play(&mut replayed, "a", &payload, 15).is_err());
    }
}
