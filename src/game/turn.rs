//! Turn order and phase state machine

use serde::{Deserialize, Serialize};

use super::SessionId;

/// Room phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    /// Accepting joins
    Waiting,
    /// Gameplay in progress
    Active,
    /// Terminal
    Finished,
}

/// Turn rotation over seated sessions.
///
/// `turn_index` always points inside `order` while it is non-empty and is
/// `0` otherwise. The phase only moves forward: Waiting -> Active -> Finished.
#[derive(Debug, Clone)]
pub struct TurnState {
    phase: Phase,
    order: Vec<SessionId>,
    turn_index: usize,
    turn_no: u32,
}

/// Result of removing a session from the rotation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// Session was not in the rotation
    Absent,
    /// Removed, the current player is unchanged
    Removed,
    /// Removed the session that held the turn
    RemovedCurrent,
}

impl TurnState {
    pub fn new() -> Self {
        Self {
            phase: Phase::Waiting,
            order: Vec::new(),
            turn_index: 0,
            turn_no: 1,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn order(&self) -> &[SessionId] {
        &self.order
    }

    pub fn turn_index(&self) -> usize {
        self.turn_index
    }

    pub fn turn_no(&self) -> u32 {
        self.turn_no
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Session holding the current turn
    pub fn current(&self) -> Option<&SessionId> {
        self.order.get(self.turn_index)
    }

    pub fn is_current(&self, session_id: &str) -> bool {
        self.current().map(|s| s == session_id).unwrap_or(false)
    }

    /// Append a session at the end of the rotation
    pub fn push(&mut self, session_id: SessionId) {
        if !self.order.contains(&session_id) {
            self.order.push(session_id);
        }
    }

    /// WAITING -> ACTIVE. Returns true only the first time.
    pub fn start(&mut self) -> bool {
        if self.phase != Phase::Waiting {
            return false;
        }
        self.phase = Phase::Active;
        true
    }

    pub fn finish(&mut self) {
        self.phase = Phase::Finished;
    }

    /// Move to the next seat. Returns false when there is nobody to pass to.
    pub fn advance(&mut self) -> bool {
        if self.order.is_empty() {
            self.turn_index = 0;
            return false;
        }
        self.turn_index = (self.turn_index + 1) % self.order.len();
        self.turn_no += 1;
        true
    }

    /// Rebind a seat to a new session without moving it in the rotation
    pub fn replace(&mut self, old: &str, new: &str) -> bool {
        let mut replaced = false;
        for id in self.order.iter_mut() {
            if id == old {
                *id = new.to_string();
                replaced = true;
            }
        }
        replaced
    }

    /// Drop a session and compact the rotation.
    ///
    /// Seats behind the current one shift the index down so the same player
    /// keeps the turn. Removing the current seat hands the turn to whoever
    /// slides into its slot, wrapping to 0 past the end.
    pub fn remove(&mut self, session_id: &str) -> Removal {
        let Some(pos) = self.order.iter().position(|id| id == session_id) else {
            return Removal::Absent;
        };
        self.order.remove(pos);

        let removal = if pos < self.turn_index {
            self.turn_index -= 1;
            Removal::Removed
        } else if pos == self.turn_index {
            Removal::RemovedCurrent
        } else {
            Removal::Removed
        };

        if self.turn_index >= self.order.len() {
            self.turn_index = 0;
        }
        removal
    }
}

impl Default for TurnState {
    fn default() -> Self {
        Self::new()
    }
}
