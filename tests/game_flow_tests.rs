#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! End-to-end flow tests: a full single-round game driven through the
//! orchestrator, registry/session wiring, and the room runtime with a
//! scripted content source.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::mpsc;

use counterfact_server::content::ContentError;
use counterfact_server::game::{Effect, GameEvent, Sender};
use counterfact_server::registry::Endpoint;
use counterfact_server::round::AnswerAuthor;
use counterfact_server::view::{OfferView, Recipient, ViewDetail};
use counterfact_server::{
    project, ContentItem, ContentSource, GameSession, Phase, PlayerId, RoomConfig, RoomRuntime,
    ServerFrame, SessionRegistry,
};

mod common;

fn flow_config() -> RoomConfig {
    RoomConfig::default()
        .with_timers(4, 4, 2, 4)
        .with_research_rounds(1)
        .with_round_limit(1)
        .with_everyone_lies_chance(0.0)
}

fn tick_until(session: &mut GameSession, phase: Phase) {
    let mut guard = 0;
    while session.phase() != phase {
        session.apply(GameEvent::Tick).unwrap();
        guard += 1;
        assert!(guard < 1000, "session never reached {phase:?}");
    }
}

/// The §-by-§ scenario: create → 3 joins → start → tutorial → research →
/// writing → guessing (2 decoys) → 3-entry answer set → presenting →
/// voting (1 correct, 1 incorrect) → tally → reveal → leaderboard.
#[test]
fn full_single_round_game_reaches_leaderboard() {
    let mut registry = SessionRegistry::new();
    let now = Instant::now();
    let (code, host_token) = registry.create_room(now);
    assert!(registry.validate_host_token(&code, &host_token));

    let mut session = GameSession::new(code.clone(), flow_config());
    let mut players = Vec::new();
    for name in ["Ada", "Brin", "Cleo"] {
        let (id, _token) = registry.add_player(&code, name).unwrap();
        session
            .apply(GameEvent::PlayerJoined {
                player_id: id,
                name: name.into(),
            })
            .unwrap();
        players.push(id);
    }

    session
        .apply(GameEvent::StartRequested {
            sender: Sender::Host,
        })
        .unwrap();
    assert_eq!(session.phase(), Phase::Tutorial);

    let effects = session
        .apply(GameEvent::AdvanceRequested {
            sender: Sender::Host,
        })
        .unwrap();
    assert_eq!(session.phase(), Phase::TopicSelection);
    assert_eq!(effects.len(), 3);

    // Deliver offers and make synthetic selections.
    for (idx, effect) in effects.into_iter().enumerate() {
        let Effect::FetchCandidates { player_id, count } = effect;
        session
            .apply(GameEvent::CandidatesReady {
                player_id,
                items: common::offer(&format!("p{idx}"), count),
            })
            .unwrap();
        session
            .apply(GameEvent::TopicChosen {
                sender: Sender::Player(player_id),
                content_id: format!("p{idx}-0"),
            })
            .unwrap();
    }
    assert_eq!(session.phase(), Phase::Writing);

    for (idx, id) in players.iter().enumerate() {
        session
            .apply(GameEvent::SummarySubmitted {
                sender: Sender::Player(*id),
                content_id: format!("p{idx}-0"),
                text: format!("The truthful summary of player {idx}."),
            })
            .unwrap();
    }
    tick_until(&mut session, Phase::Guessing);

    // Two decoys from the non-experts; the expert is rejected.
    let expert = session.current_round().unwrap().expert_id;
    let liars: Vec<PlayerId> = players.iter().copied().filter(|p| *p != expert).collect();
    assert_eq!(liars.len(), 2);
    assert!(session
        .apply(GameEvent::LieSubmitted {
            sender: Sender::Player(expert),
            text: "Expert interference.".into(),
        })
        .is_err());
    for (i, liar) in liars.iter().enumerate() {
        session
            .apply(GameEvent::LieSubmitted {
                sender: Sender::Player(*liar),
                text: format!("Plausible decoy number {i}."),
            })
            .unwrap();
    }
    assert_eq!(session.current_round().unwrap().lie_count(), 2);

    tick_until(&mut session, Phase::Presenting);
    let round = session.current_round().unwrap();
    assert_eq!(round.answers().len(), 3);
    assert_eq!(round.answers().iter().filter(|a| a.is_truth()).count(), 1);

    tick_until(&mut session, Phase::Voting);

    // One correct vote, one incorrect vote.
    let truth_id = session
        .current_round()
        .unwrap()
        .answers()
        .iter()
        .find(|a| a.is_truth())
        .map(|a| a.id)
        .unwrap();
    // The "incorrect" vote lands on the other liar's decoy.
    let wrong_id = session
        .current_round()
        .unwrap()
        .answers()
        .iter()
        .find(|a| a.author == AnswerAuthor::Player(liars[0]))
        .map(|a| a.id)
        .unwrap();
    session
        .apply(GameEvent::VoteSubmitted {
            sender: Sender::Player(liars[0]),
            answer_id: truth_id,
        })
        .unwrap();
    session
        .apply(GameEvent::VoteSubmitted {
            sender: Sender::Player(liars[1]),
            answer_id: wrong_id,
        })
        .unwrap();

    tick_until(&mut session, Phase::Reveal);
    // liars[0] found the truth (500) and fooled liars[1] (250).
    let finder = session.seats().iter().find(|s| s.id == liars[0]).unwrap();
    assert_eq!(finder.score, 750);
    let fooled = session.seats().iter().find(|s| s.id == liars[1]).unwrap();
    assert_eq!(fooled.score, 0);
    let expert_seat = session.seats().iter().find(|s| s.id == expert).unwrap();
    assert_eq!(expert_seat.score, 0);

    // Single-round session: reveal advances straight to the leaderboard.
    session
        .apply(GameEvent::AdvanceRequested {
            sender: Sender::Host,
        })
        .unwrap();
    assert_eq!(session.phase(), Phase::Leaderboard);

    // Leaderboard standings are visible to every recipient.
    let view = project(&session, Recipient::Player(players[0]));
    let ViewDetail::Leaderboard { standings } = &view.detail else {
        panic!("expected leaderboard detail");
    };
    assert_eq!(standings[0].score, 750);
}

#[test]
fn concurrent_room_creation_yields_unique_codes() {
    let registry = SessionRegistry::new().into_shared();
    let mut handles = Vec::new();
    for _ in 0..8 {
        let registry = Arc::clone(&registry);
        handles.push(std::thread::spawn(move || {
            let mut codes = Vec::new();
            for _ in 0..50 {
                let mut guard = registry.write().unwrap();
                codes.push(guard.create_room(Instant::now()).0);
            }
            codes
        }));
    }
    let mut all: Vec<String> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    all.sort();
    all.dedup();
    assert_eq!(all.len(), 400);
}

// ════════════════════════════════════════════════════════════════════
// Runtime wiring with a scripted content source
// ════════════════════════════════════════════════════════════════════

struct ScriptedSource;

#[async_trait]
impl ContentSource for ScriptedSource {
    async fn fetch_candidates(&self, count: usize) -> Result<Vec<ContentItem>, ContentError> {
        Ok(common::offer("fetched", count))
    }
}

async fn next_view(
    rx: &mut mpsc::UnboundedReceiver<ServerFrame>,
) -> counterfact_server::View {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(30), rx.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("channel closed");
        if let ServerFrame::SyncState(view) = frame {
            return *view;
        }
    }
}

/// Wait until a projected view satisfies the predicate, draining stale
/// frames along the way.
async fn wait_for<F>(rx: &mut mpsc::UnboundedReceiver<ServerFrame>, mut pred: F) -> counterfact_server::View
where
    F: FnMut(&counterfact_server::View) -> bool,
{
    for _ in 0..2000 {
        let view = next_view(rx).await;
        if pred(&view) {
            return view;
        }
    }
    panic!("predicate never satisfied");
}

#[tokio::test(start_paused = true)]
async fn runtime_carries_a_room_from_lobby_into_writing() {
    common::init_tracing();
    let registry = SessionRegistry::new().into_shared();
    let code = registry.write().unwrap().create_room(Instant::now()).0;

    let mut player_rx = HashMap::new();
    let mut player_ids = Vec::new();
    for name in ["Ada", "Brin", "Cleo"] {
        let (id, _token) = registry.write().unwrap().add_player(&code, name).unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        registry
            .write()
            .unwrap()
            .attach_socket(&code, Endpoint::Player(id), tx)
            .unwrap();
        player_rx.insert(id, rx);
        player_ids.push(id);
    }

    let mut runtime = RoomRuntime::spawn(
        code.clone(),
        RoomConfig::default().with_research_rounds(1),
        Arc::clone(&registry),
        Arc::new(ScriptedSource),
    );
    for (id, name) in player_ids.iter().zip(["Ada", "Brin", "Cleo"]) {
        runtime
            .submit(GameEvent::PlayerJoined {
                player_id: *id,
                name: name.into(),
            })
            .unwrap();
    }
    runtime
        .submit(GameEvent::StartRequested {
            sender: Sender::Host,
        })
        .unwrap();
    runtime
        .submit(GameEvent::AdvanceRequested {
            sender: Sender::Host,
        })
        .unwrap();

    // Every player eventually sees their own ready offer and picks the
    // first visible item.
    for id in &player_ids {
        let rx = player_rx.get_mut(id).unwrap();
        let view = wait_for(rx, |v| {
            matches!(
                &v.detail,
                ViewDetail::Research {
                    offer: OfferView::Ready(items),
                    ..
                } if !items.is_empty()
            )
        })
        .await;
        let ViewDetail::Research {
            offer: OfferView::Ready(items),
            ..
        } = &view.detail
        else {
            unreachable!();
        };
        runtime
            .submit(GameEvent::TopicChosen {
                sender: Sender::Player(*id),
                content_id: items[0].id.clone(),
            })
            .unwrap();
    }

    // All three selections push the room into the writing phase.
    let rx = player_rx.get_mut(&player_ids[0]).unwrap();
    let view = wait_for(rx, |v| v.phase == Phase::Writing).await;
    assert!(view.timer.is_some());

    runtime.shutdown().await;
}
