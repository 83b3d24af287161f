#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Wire-format tests for the Counterfact server core.
//!
//! Verifies the adjacent tagging and camelCase payload keys of inbound and
//! outbound frames, the SCREAMING_SNAKE_CASE phase and rejection-code
//! encodings, and the frame-to-event translation.

use counterfact_server::game::{GameEvent, Sender};
use counterfact_server::view::{Recipient, RosterEntry, View, ViewDetail};
use counterfact_server::{
    ClientFrame, ContentItem, GameError, GameSession, Phase, RejectCode, RoomConfig, ServerFrame,
};
use uuid::Uuid;

mod common;

// ════════════════════════════════════════════════════════════════════
// Inbound frames
// ════════════════════════════════════════════════════════════════════

#[test]
fn choose_topic_frame_parses_camel_case_payload() {
    let json = r#"{"type":"CHOOSE_TOPIC","payload":{"contentId":"7431"}}"#;
    let frame: ClientFrame = serde_json::from_str(json).unwrap();
    if let ClientFrame::ChooseTopic { content_id } = frame {
        assert_eq!(content_id, "7431");
    } else {
        panic!("expected ChooseTopic, got {frame:?}");
    }
}

#[test]
fn submit_vote_frame_parses_answer_id() {
    let answer = Uuid::from_u128(42);
    let json = format!(r#"{{"type":"SUBMIT_VOTE","payload":{{"answerId":"{answer}"}}}}"#);
    let frame: ClientFrame = serde_json::from_str(&json).unwrap();
    if let ClientFrame::SubmitVote { answer_id } = frame {
        assert_eq!(answer_id, answer);
    } else {
        panic!("expected SubmitVote, got {frame:?}");
    }
}

#[test]
fn unit_frames_round_trip() {
    for (frame, tag) in [
        (ClientFrame::StartGame, "START_GAME"),
        (ClientFrame::NextPhase, "NEXT_PHASE"),
        (ClientFrame::RerollTopics, "REROLL_TOPICS"),
    ] {
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains(tag), "{json} should carry {tag}");
        let back: ClientFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(
            std::mem::discriminant(&frame),
            std::mem::discriminant(&back)
        );
    }
}

#[test]
fn submit_summary_frame_round_trips() {
    let frame = ClientFrame::SubmitSummary {
        content_id: "7431".into(),
        text: "A concise true write-up.".into(),
    };
    let json = serde_json::to_string(&frame).unwrap();
    assert!(json.contains("\"contentId\":\"7431\""));
    let back: ClientFrame = serde_json::from_str(&json).unwrap();
    if let ClientFrame::SubmitSummary { content_id, text } = back {
        assert_eq!(content_id, "7431");
        assert_eq!(text, "A concise true write-up.");
    } else {
        panic!("expected SubmitSummary");
    }
}

// ════════════════════════════════════════════════════════════════════
// Frame → event translation
// ════════════════════════════════════════════════════════════════════

#[test]
fn frames_translate_to_sender_stamped_events() {
    let player = Sender::Player(Uuid::from_u128(7));
    let event = GameEvent::from_frame(ClientFrame::StartGame, Sender::Host);
    assert!(matches!(
        event,
        GameEvent::StartRequested {
            sender: Sender::Host
        }
    ));

    let event = GameEvent::from_frame(
        ClientFrame::SubmitLie {
            text: "a decoy".into(),
        },
        player,
    );
    match event {
        GameEvent::LieSubmitted { sender, text } => {
            assert_eq!(sender, player);
            assert_eq!(text, "a decoy");
        }
        other => panic!("expected LieSubmitted, got {other:?}"),
    }
}

#[test]
fn internal_events_have_no_rejection_target() {
    assert!(GameEvent::Tick.sender().is_none());
    assert!(GameEvent::CandidatesFailed {
        player_id: Uuid::from_u128(1)
    }
    .sender()
    .is_none());
    let event = GameEvent::from_frame(ClientFrame::NextPhase, Sender::Host);
    assert_eq!(event.sender(), Some(Sender::Host));
}

// ════════════════════════════════════════════════════════════════════
// Outbound frames
// ════════════════════════════════════════════════════════════════════

#[test]
fn room_joined_frame_uses_camel_case_keys() {
    let frame = ServerFrame::RoomJoined {
        player_id: Uuid::from_u128(9),
        reconnect_token: "tok-abc".into(),
    };
    let json = serde_json::to_string(&frame).unwrap();
    assert!(json.contains("\"type\":\"ROOM_JOINED\""));
    assert!(json.contains("\"playerId\""));
    assert!(json.contains("\"reconnectToken\":\"tok-abc\""));
}

#[test]
fn error_frame_carries_structured_code() {
    let err = GameError::GuardFailed("at least 3 players are required");
    let frame = ServerFrame::from_error(&err);
    let json = serde_json::to_string(&frame).unwrap();
    assert!(json.contains("\"type\":\"ERROR\""));
    assert!(json.contains("GUARD_FAILED"));
    assert!(json.contains("at least 3 players"));
}

#[test]
fn sync_state_frame_wraps_a_view() {
    let view = View {
        room_code: "GLXY".into(),
        phase: Phase::Lobby,
        timer: None,
        players: vec![RosterEntry {
            name: "Ada".into(),
            score: 0,
            connected: true,
        }],
        round: None,
        detail: ViewDetail::Lobby { can_start: false },
    };
    let json = serde_json::to_string(&ServerFrame::SyncState(Box::new(view))).unwrap();
    assert!(json.contains("\"type\":\"SYNC_STATE\""));
    assert!(json.contains("\"roomCode\":\"GLXY\""));
    assert!(json.contains("\"phase\":\"LOBBY\""));
    assert!(json.contains("\"canStart\":false"));
}

#[test]
fn projected_views_serialize_through_the_frame() {
    common::init_tracing();
    let mut session = GameSession::new("GLXY", RoomConfig::default());
    session
        .apply(GameEvent::PlayerJoined {
            player_id: Uuid::from_u128(1),
            name: "Ada".into(),
        })
        .unwrap();
    let view = counterfact_server::project(&session, Recipient::Player(Uuid::from_u128(1)));
    let json = serde_json::to_string(&ServerFrame::SyncState(Box::new(view))).unwrap();
    assert!(json.contains("\"players\":[{\"name\":\"Ada\""));
}

// ════════════════════════════════════════════════════════════════════
// Enums and payload structs
// ════════════════════════════════════════════════════════════════════

#[test]
fn phases_serialize_screaming_snake_case() {
    for (phase, tag) in [
        (Phase::Lobby, "\"LOBBY\""),
        (Phase::TopicSelection, "\"TOPIC_SELECTION\""),
        (Phase::Writing, "\"WRITING\""),
        (Phase::Guessing, "\"GUESSING\""),
        (Phase::Presenting, "\"PRESENTING\""),
        (Phase::Voting, "\"VOTING\""),
        (Phase::Reveal, "\"REVEAL\""),
        (Phase::Leaderboard, "\"LEADERBOARD\""),
    ] {
        assert_eq!(serde_json::to_string(&phase).unwrap(), tag);
    }
}

#[test]
fn reject_codes_serialize_screaming_snake_case() {
    assert_eq!(
        serde_json::to_string(&RejectCode::RoomNotFound).unwrap(),
        "\"ROOM_NOT_FOUND\""
    );
    assert_eq!(
        serde_json::to_string(&RejectCode::ReconnectExpired).unwrap(),
        "\"RECONNECT_EXPIRED\""
    );
    let back: RejectCode = serde_json::from_str("\"VALIDATION_FAILED\"").unwrap();
    assert_eq!(back, RejectCode::ValidationFailed);
    assert!(!RejectCode::RoomNotFound.description().is_empty());
}

#[test]
fn content_item_round_trips_with_camel_case_source_url() {
    let item = common::item("wiki", 3);
    let json = serde_json::to_string(&item).unwrap();
    assert!(json.contains("\"sourceUrl\""));
    let back: ContentItem = serde_json::from_str(&json).unwrap();
    assert_eq!(back, item);
}
