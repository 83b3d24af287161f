//! Wire-facing types: identifiers, content items, and the frames exchanged
//! with the transport gateway.
//!
//! Inbound frames arrive as `{type, payload}` JSON; the gateway stamps the
//! sender identity before handing them to the orchestrator. Outbound frames
//! use the same adjacent tagging with camelCase payload keys.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error_codes::RejectCode;
use crate::view::View;

// ── Type aliases ────────────────────────────────────────────────────

/// Unique identifier for players, scoped to a room.
pub type PlayerId = Uuid;

/// Opaque identifier for an answer-set entry.
///
/// Deliberately unrelated to player ids so an answer id can never leak
/// authorship.
pub type AnswerId = Uuid;

// ── Content ─────────────────────────────────────────────────────────

/// One candidate trivia item offered to a player during research.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentItem {
    /// Collaborator-assigned identifier, opaque to the core.
    pub id: String,
    pub title: String,
    /// Extract the expert reads and summarizes.
    pub body: String,
    pub source_url: String,
}

// ── Inbound frames ──────────────────────────────────────────────────

/// Frames a connected client may send after the gateway has resolved its
/// identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ClientFrame {
    /// Host or VIP requests the game start.
    #[serde(rename = "START_GAME")]
    StartGame,
    /// Advance an event-driven phase (tutorial, presenting, reveal).
    #[serde(rename = "NEXT_PHASE")]
    NextPhase,
    /// Player picks a topic from their current offer.
    #[serde(rename = "CHOOSE_TOPIC", rename_all = "camelCase")]
    ChooseTopic { content_id: String },
    /// Player swaps the visible half of their offer for the reserve half.
    #[serde(rename = "REROLL_TOPICS")]
    RerollTopics,
    /// Player submits the true write-up for one of their selections.
    #[serde(rename = "SUBMIT_SUMMARY", rename_all = "camelCase")]
    SubmitSummary { content_id: String, text: String },
    /// Non-expert player submits a decoy for the current round.
    #[serde(rename = "SUBMIT_LIE")]
    SubmitLie { text: String },
    /// Player votes for an answer-set entry.
    #[serde(rename = "SUBMIT_VOTE", rename_all = "camelCase")]
    SubmitVote { answer_id: AnswerId },
}

// ── Outbound frames ─────────────────────────────────────────────────

/// Frames the core emits for the gateway to deliver.
///
/// `SyncState` is broadcast per recipient after every mutation; the other
/// variants target a single connection.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload")]
pub enum ServerFrame {
    /// Per-recipient projection of the current game state.
    #[serde(rename = "SYNC_STATE")]
    SyncState(Box<View>),
    /// Join acknowledgement carrying the credentials a player must retain
    /// to reconnect.
    #[serde(rename = "ROOM_JOINED", rename_all = "camelCase")]
    RoomJoined {
        player_id: PlayerId,
        reconnect_token: String,
    },
    /// Rejection delivered to the offending sender only.
    #[serde(rename = "ERROR")]
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<RejectCode>,
    },
}

impl ServerFrame {
    /// Build an `ERROR` frame from a core error.
    pub fn from_error(err: &crate::error::GameError) -> Self {
        Self::Error {
            message: err.to_string(),
            code: Some(err.code()),
        }
    }
}
