//! Structured rejection codes for outbound `ERROR` frames.
//!
//! Codes serialize as `SCREAMING_SNAKE_CASE` strings (e.g. `"ROOM_NOT_FOUND"`)
//! so gateways and clients can branch on them without parsing prose.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Structured code identifying why a request was rejected.
///
/// Use [`description()`](RejectCode::description) for a human-readable
/// explanation suitable for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectCode {
    // Lookup failures
    RoomNotFound,
    PlayerNotFound,

    // Authentication
    Unauthorized,
    ReconnectExpired,

    // Game state
    InvalidTransition,
    GuardFailed,
    ValidationFailed,

    // Collaborators
    ContentUnavailable,
    RoomClosed,
}

impl RejectCode {
    /// Returns a human-readable description of this code.
    pub fn description(&self) -> &'static str {
        match self {
            Self::RoomNotFound => {
                "The requested room could not be found. It may have expired or the code is wrong."
            }
            Self::PlayerNotFound => {
                "No player with that id is a member of this room."
            }
            Self::Unauthorized => {
                "The supplied token does not match. Rejoin to obtain a new one."
            }
            Self::ReconnectExpired => {
                "The reconnection window has elapsed. Join the room again as a new player."
            }
            Self::InvalidTransition => {
                "That action is not available in the current phase of the game."
            }
            Self::GuardFailed => {
                "The conditions for that action are not met right now."
            }
            Self::ValidationFailed => {
                "The request payload was malformed or referenced unknown data."
            }
            Self::ContentUnavailable => {
                "Candidate content could not be fetched right now. Try again shortly."
            }
            Self::RoomClosed => {
                "The room has shut down and no longer accepts events."
            }
        }
    }
}

impl fmt::Display for RejectCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}
