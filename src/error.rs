//! Error types for the Counterfact server core.

use thiserror::Error;

use crate::error_codes::RejectCode;

/// Errors produced while validating or applying game and registry
/// operations.
///
/// Every variant is recoverable and local to the offending request: it is
/// reported to the sender and never corrupts room state or crosses over to
/// other players.
#[derive(Debug, Error)]
pub enum GameError {
    /// The referenced room does not exist (or has been reaped).
    #[error("room not found")]
    RoomNotFound,

    /// The referenced player is not a member of the room.
    #[error("player not found")]
    PlayerNotFound,

    /// A bearer token did not match.
    #[error("invalid token")]
    Unauthorized,

    /// The reconnection grace window has elapsed.
    #[error("reconnection window expired")]
    ExpiredReconnect,

    /// The event is not accepted in the current phase.
    #[error("event not accepted in phase {phase}")]
    InvalidTransition {
        /// Phase the session was in when the event arrived.
        phase: &'static str,
    },

    /// A transition guard was not satisfied; state is untouched.
    #[error("guard failed: {0}")]
    GuardFailed(&'static str),

    /// The event payload is malformed or references unknown data.
    #[error("invalid payload: {0}")]
    ValidationFailed(String),

    /// Candidate content could not be fetched after bounded retries.
    #[error("content temporarily unavailable")]
    ContentUnavailable,

    /// The room's event loop has shut down and no longer accepts events.
    #[error("room task has shut down")]
    RoomClosed,
}

impl GameError {
    /// Structured code carried by outbound `ERROR` frames.
    pub fn code(&self) -> RejectCode {
        match self {
            Self::RoomNotFound => RejectCode::RoomNotFound,
            Self::PlayerNotFound => RejectCode::PlayerNotFound,
            Self::Unauthorized => RejectCode::Unauthorized,
            Self::ExpiredReconnect => RejectCode::ReconnectExpired,
            Self::InvalidTransition { .. } => RejectCode::InvalidTransition,
            Self::GuardFailed(_) => RejectCode::GuardFailed,
            Self::ValidationFailed(_) => RejectCode::ValidationFailed,
            Self::ContentUnavailable => RejectCode::ContentUnavailable,
            Self::RoomClosed => RejectCode::RoomClosed,
        }
    }
}

/// A specialized [`Result`] type for core operations.
pub type Result<T> = std::result::Result<T, GameError>;
