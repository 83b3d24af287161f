//! Per-recipient view projection.
//!
//! [`project`] derives, from an immutable session snapshot, the subset of
//! state one recipient is allowed to see. The asymmetry is the core
//! anti-cheat property: during the research half a player sees only their
//! own offers and selections; during the answer half everyone sees the
//! shared answer set but authorship and votes stay hidden until reveal.
//!
//! Views are Serialize-only: they are outbound payloads, never parsed back.

use serde::Serialize;

use crate::game::{ContentOffer, GameSession, Phase, Seat};
use crate::protocol::{AnswerId, ContentItem, PlayerId};
use crate::round::AnswerAuthor;

/// Who a view is projected for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    Host,
    Player(PlayerId),
}

/// One roster line: public facts about a player.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub name: String,
    pub score: u64,
    pub connected: bool,
}

/// Position within the round sequence, shown during the answer half.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundPosition {
    pub index: usize,
    pub total: usize,
}

/// Per-player submission status line for host screens. Never carries draft
/// text.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionStatus {
    pub name: String,
    pub ready: bool,
}

/// The recipient's candidate offer, research half only.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", content = "items", rename_all = "camelCase")]
pub enum OfferView {
    Loading,
    Unavailable,
    Ready(Vec<ContentItem>),
}

/// A writing assignment: one of the recipient's own selections.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WritingAssignment {
    pub item: ContentItem,
    pub submitted: bool,
}

/// One answer-set entry as shown to voters: id and text, nothing else.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerEntry {
    pub id: AnswerId,
    pub text: String,
}

/// One answer-set entry after reveal, with authorship and votes disclosed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevealEntry {
    pub id: AnswerId,
    pub text: String,
    pub is_truth: bool,
    /// `None` for the synthesized house decoy.
    pub author: Option<String>,
    pub voters: Vec<String>,
}

/// Phase-specific portion of a view.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ViewDetail {
    #[serde(rename_all = "camelCase")]
    Lobby { can_start: bool },
    #[serde(rename_all = "camelCase")]
    Tutorial { vip_name: Option<String> },
    /// Player, research half: own offer and progress only.
    #[serde(rename_all = "camelCase")]
    Research {
        offer: OfferView,
        chosen_title: Option<String>,
        has_submitted: bool,
        can_reroll: bool,
        research_round: usize,
        research_rounds: usize,
    },
    /// Host, research half: who is ready, nothing of what they picked.
    #[serde(rename_all = "camelCase")]
    Status { submissions: Vec<SubmissionStatus> },
    /// Player, writing phase: own assignments.
    #[serde(rename_all = "camelCase")]
    Writing { assignments: Vec<WritingAssignment> },
    /// Player, guessing phase. `truth_text` is present only for the expert
    /// (it is their own write-up).
    #[serde(rename_all = "camelCase")]
    Guessing {
        item_title: String,
        is_expert: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        truth_text: Option<String>,
        has_submitted: bool,
    },
    /// Host, guessing phase.
    #[serde(rename_all = "camelCase")]
    GuessingStatus {
        item_title: String,
        expert_name: String,
        submissions: Vec<SubmissionStatus>,
    },
    /// Presenting and voting: the shared answer set, ids and text only.
    #[serde(rename_all = "camelCase")]
    AnswerBoard {
        item_title: String,
        answers: Vec<AnswerEntry>,
        presenter_name: Option<String>,
        is_expert: bool,
        has_voted: bool,
    },
    /// Reveal: authorship and votes become public.
    #[serde(rename_all = "camelCase")]
    Reveal {
        item_title: String,
        results: Vec<RevealEntry>,
    },
    #[serde(rename_all = "camelCase")]
    Leaderboard { standings: Vec<RosterEntry> },
}

/// A phase-tagged, per-recipient projection of session state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct View {
    pub room_code: String,
    pub phase: Phase,
    pub timer: Option<u32>,
    pub players: Vec<RosterEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub round: Option<RoundPosition>,
    #[serde(flatten)]
    pub detail: ViewDetail,
}

/// Project the session for one recipient.
pub fn project(session: &GameSession, recipient: Recipient) -> View {
    let detail = match session.phase() {
        Phase::Lobby => ViewDetail::Lobby {
            can_start: session.seats().len() >= 3,
        },
        Phase::Tutorial => ViewDetail::Tutorial {
            vip_name: session.vip().and_then(|id| seat_name(session, id)),
        },
        Phase::TopicSelection => match recipient {
            Recipient::Player(id) => research_detail(session, id),
            Recipient::Host => ViewDetail::Status {
                submissions: research_status(session),
            },
        },
        Phase::Writing => match recipient {
            Recipient::Player(id) => writing_detail(session, id),
            Recipient::Host => ViewDetail::Status {
                submissions: writing_status(session),
            },
        },
        Phase::Guessing => guessing_detail(session, recipient),
        Phase::Presenting | Phase::Voting => answer_board_detail(session, recipient),
        Phase::Reveal => reveal_detail(session),
        Phase::Leaderboard => ViewDetail::Leaderboard {
            standings: standings(session),
        },
    };

    View {
        room_code: session.room_code().to_owned(),
        phase: session.phase(),
        timer: session.timer(),
        players: session.seats().iter().map(roster_entry).collect(),
        round: round_position(session),
        detail,
    }
}

// ── Detail builders ─────────────────────────────────────────────────

fn roster_entry(seat: &Seat) -> RosterEntry {
    RosterEntry {
        name: seat.name.clone(),
        score: seat.score,
        connected: seat.connected,
    }
}

fn seat_name(session: &GameSession, id: PlayerId) -> Option<String> {
    session
        .seats()
        .iter()
        .find(|s| s.id == id)
        .map(|s| s.name.clone())
}

fn round_position(session: &GameSession) -> Option<RoundPosition> {
    match session.phase() {
        Phase::Guessing | Phase::Presenting | Phase::Voting | Phase::Reveal => {
            session.current_round().map(|r| RoundPosition {
                index: r.index,
                total: session.round_total(),
            })
        }
        _ => None,
    }
}

fn research_detail(session: &GameSession, id: PlayerId) -> ViewDetail {
    let per_offer = session.config.candidates_per_offer;
    let (offer, can_reroll) = match session.offers.get(&id) {
        None | Some(ContentOffer::Pending) => (OfferView::Loading, false),
        Some(ContentOffer::Unavailable) => (OfferView::Unavailable, false),
        Some(offer @ ContentOffer::Ready { items, rerolled }) => (
            OfferView::Ready(offer.visible(per_offer).to_vec()),
            !*rerolled && items.len() > per_offer,
        ),
    };
    let current = session
        .selections
        .get(&id)
        .and_then(|sels| sels.get(session.research_round()));
    ViewDetail::Research {
        offer,
        chosen_title: current.map(|s| s.item.title.clone()),
        has_submitted: current.is_some(),
        can_reroll: can_reroll && current.is_none(),
        research_round: session.research_round(),
        research_rounds: session.config.research_rounds,
    }
}

fn research_status(session: &GameSession) -> Vec<SubmissionStatus> {
    let need = session.research_round() + 1;
    session
        .seats()
        .iter()
        .map(|seat| SubmissionStatus {
            name: seat.name.clone(),
            ready: session
                .selections
                .get(&seat.id)
                .map_or(0, |sels| sels.len())
                >= need,
        })
        .collect()
}

fn writing_detail(session: &GameSession, id: PlayerId) -> ViewDetail {
    let assignments = session
        .selections
        .get(&id)
        .map(|sels| {
            sels.iter()
                .map(|sel| WritingAssignment {
                    item: sel.item.clone(),
                    submitted: sel.summary.is_some(),
                })
                .collect()
        })
        .unwrap_or_default();
    ViewDetail::Writing { assignments }
}

fn writing_status(session: &GameSession) -> Vec<SubmissionStatus> {
    session
        .seats()
        .iter()
        .map(|seat| SubmissionStatus {
            name: seat.name.clone(),
            ready: session
                .selections
                .get(&seat.id)
                .is_some_and(|sels| !sels.is_empty() && sels.iter().all(|s| s.summary.is_some())),
        })
        .collect()
}

fn guessing_detail(session: &GameSession, recipient: Recipient) -> ViewDetail {
    let Some(round) = session.current_round() else {
        return ViewDetail::Status {
            submissions: Vec::new(),
        };
    };
    match recipient {
        Recipient::Player(id) => {
            let is_expert = round.expert_id == id;
            ViewDetail::Guessing {
                item_title: round.item.title.clone(),
                is_expert,
                truth_text: is_expert.then(|| round.truth_text.clone()),
                has_submitted: round.has_lied(id),
            }
        }
        Recipient::Host => ViewDetail::GuessingStatus {
            item_title: round.item.title.clone(),
            expert_name: seat_name(session, round.expert_id).unwrap_or_default(),
            submissions: session
                .seats()
                .iter()
                .filter(|seat| seat.id != round.expert_id)
                .map(|seat| SubmissionStatus {
                    name: seat.name.clone(),
                    ready: round.has_lied(seat.id),
                })
                .collect(),
        },
    }
}

fn answer_board_detail(session: &GameSession, recipient: Recipient) -> ViewDetail {
    let Some(round) = session.current_round() else {
        return ViewDetail::Status {
            submissions: Vec::new(),
        };
    };
    let answers = round
        .answers()
        .iter()
        .map(|a| AnswerEntry {
            id: a.id,
            text: a.text.clone(),
        })
        .collect();
    let (is_expert, has_voted) = match recipient {
        Recipient::Player(id) => (round.expert_id == id, round.has_voted(id)),
        Recipient::Host => (false, false),
    };
    ViewDetail::AnswerBoard {
        item_title: round.item.title.clone(),
        answers,
        presenter_name: session
            .current_presenter()
            .and_then(|id| seat_name(session, id)),
        is_expert,
        has_voted,
    }
}

fn reveal_detail(session: &GameSession) -> ViewDetail {
    let Some(round) = session.current_round() else {
        return ViewDetail::Status {
            submissions: Vec::new(),
        };
    };
    ViewDetail::Reveal {
        item_title: round.item.title.clone(),
        results: round
            .answers()
            .iter()
            .map(|answer| RevealEntry {
                id: answer.id,
                text: answer.text.clone(),
                is_truth: answer.is_truth(),
                author: match answer.author {
                    AnswerAuthor::Expert => seat_name(session, round.expert_id),
                    AnswerAuthor::Player(p) => seat_name(session, p),
                    AnswerAuthor::House => None,
                },
                voters: round
                    .votes_for(answer.id)
                    .into_iter()
                    .filter_map(|voter| seat_name(session, voter))
                    .collect(),
            })
            .collect(),
    }
}

fn standings(session: &GameSession) -> Vec<RosterEntry> {
    let mut entries: Vec<RosterEntry> = session.seats().iter().map(roster_entry).collect();
    entries.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.name.cmp(&b.name)));
    entries
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::config::RoomConfig;
    use crate::game::{Seat, Selection};
    use crate::round::Round;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use uuid::Uuid;

    fn pid(n: u128) -> PlayerId {
        Uuid::from_u128(n)
    }

    fn item(id: &str, title: &str) -> ContentItem {
        ContentItem {
            id: id.into(),
            title: title.into(),
            body: format!("{title} in depth. Plenty of facts."),
            source_url: format!("https://example.test/{id}"),
        }
    }

    fn seat(n: u128, name: &str) -> Seat {
        Seat {
            id: pid(n),
            name: name.into(),
            score: 0,
            connected: true,
        }
    }

    fn base_session() -> GameSession {
        let config = RoomConfig::default().with_everyone_lies_chance(0.0);
        let mut session = GameSession::with_rng("GLXY", config, StdRng::seed_from_u64(3));
        session.seats = vec![seat(1, "Ada"), seat(2, "Brin"), seat(3, "Cleo")];
        session.vip = Some(pid(1));
        session
    }

    /// Session parked in the voting phase with a built answer set, two
    /// recorded lies, and one recorded vote.
    fn voting_session() -> GameSession {
        let mut session = base_session();
        let mut round = Round::new(0, pid(1), item("w1", "Glass Frog"), "The actual truth.".into());
        round.record_lie(pid(2), "Brin's sneaky decoy".into()).unwrap();
        round.record_lie(pid(3), "Cleo's sneaky decoy".into()).unwrap();
        let mut rng = StdRng::seed_from_u64(9);
        round.build_answers(None, &mut rng);
        let target = round.answers()[0].id;
        if round.record_vote(pid(2), target).is_err() {
            // pid(2) authored answers[0]; vote for another entry instead.
            let other = round.answers()[1].id;
            round.record_vote(pid(2), other).unwrap();
        }
        session.rounds.push(round);
        session.round_total = 1;
        session.phase = Phase::Voting;
        session.timer = Some(30);
        session
    }

    #[test]
    fn lobby_view_reports_start_readiness() {
        let mut session = base_session();
        session.seats.pop();
        let view = project(&session, Recipient::Host);
        assert!(matches!(view.detail, ViewDetail::Lobby { can_start: false }));

        session.seats.push(seat(3, "Cleo"));
        let view = project(&session, Recipient::Host);
        assert!(matches!(view.detail, ViewDetail::Lobby { can_start: true }));
        assert_eq!(view.players.len(), 3);
    }

    #[test]
    fn research_view_shows_only_the_recipients_offer() {
        let mut session = base_session();
        session.phase = Phase::TopicSelection;
        session.offers.insert(
            pid(1),
            ContentOffer::Ready {
                items: vec![item("a1", "Ada Topic One"), item("a2", "Ada Topic Two")],
                rerolled: false,
            },
        );
        session.offers.insert(
            pid(2),
            ContentOffer::Ready {
                items: vec![item("b1", "Brin Secret Topic")],
                rerolled: false,
            },
        );

        let view = project(&session, Recipient::Player(pid(1)));
        let json = serde_json::to_string(&view).unwrap();
        assert!(json.contains("Ada Topic One"));
        assert!(!json.contains("Brin Secret Topic"));

        // The host sees readiness, not anyone's topics.
        let host_json = serde_json::to_string(&project(&session, Recipient::Host)).unwrap();
        assert!(!host_json.contains("Ada Topic One"));
        assert!(!host_json.contains("Brin Secret Topic"));
    }

    #[test]
    fn pending_offer_projects_as_loading() {
        let mut session = base_session();
        session.phase = Phase::TopicSelection;
        session.offers.insert(pid(1), ContentOffer::Pending);
        let view = project(&session, Recipient::Player(pid(1)));
        let ViewDetail::Research { offer, .. } = view.detail else {
            panic!("expected research detail");
        };
        assert!(matches!(offer, OfferView::Loading));
    }

    #[test]
    fn writing_view_lists_only_own_assignments() {
        let mut session = base_session();
        session.phase = Phase::Writing;
        session.selections.insert(
            pid(1),
            vec![Selection {
                item: item("a1", "Ada Topic One"),
                summary: None,
                played: false,
            }],
        );
        session.selections.insert(
            pid(2),
            vec![Selection {
                item: item("b1", "Brin Secret Topic"),
                summary: Some("Brin's draft".into()),
                played: false,
            }],
        );
        let json =
            serde_json::to_string(&project(&session, Recipient::Player(pid(1)))).unwrap();
        assert!(json.contains("Ada Topic One"));
        assert!(!json.contains("Brin Secret Topic"));
        assert!(!json.contains("Brin's draft"));
    }

    #[test]
    fn guessing_view_reveals_truth_only_to_the_expert() {
        let mut session = voting_session();
        session.phase = Phase::Guessing;
        let expert_json =
            serde_json::to_string(&project(&session, Recipient::Player(pid(1)))).unwrap();
        assert!(expert_json.contains("The actual truth."));

        let other = project(&session, Recipient::Player(pid(2)));
        let ViewDetail::Guessing {
            is_expert,
            truth_text,
            ..
        } = &other.detail
        else {
            panic!("expected guessing detail");
        };
        assert!(!is_expert);
        assert!(truth_text.is_none());
    }

    #[test]
    fn pre_reveal_views_never_leak_authorship_or_votes() {
        let session = voting_session();
        for recipient in [
            Recipient::Host,
            Recipient::Player(pid(2)),
            Recipient::Player(pid(3)),
        ] {
            let json = serde_json::to_string(&project(&session, recipient)).unwrap();
            assert!(!json.contains("author"), "authorship leaked: {json}");
            assert!(!json.contains("voters"), "votes leaked: {json}");
            assert!(!json.contains("isTruth"), "truth marker leaked: {json}");
        }
        // The shared answer set itself is visible to everyone.
        let json = serde_json::to_string(&project(&session, Recipient::Player(pid(3)))).unwrap();
        assert!(json.contains("sneaky decoy"));
        assert!(json.contains("The actual truth."));
    }

    #[test]
    fn reveal_view_discloses_authorship_and_votes() {
        let mut session = voting_session();
        session.phase = Phase::Reveal;
        session.timer = None;
        let view = project(&session, Recipient::Host);
        let ViewDetail::Reveal { results, .. } = &view.detail else {
            panic!("expected reveal detail");
        };
        assert_eq!(results.iter().filter(|r| r.is_truth).count(), 1);
        let truth = results.iter().find(|r| r.is_truth).unwrap();
        assert_eq!(truth.author.as_deref(), Some("Ada"));
        let voted: usize = results.iter().map(|r| r.voters.len()).sum();
        assert_eq!(voted, 1);
    }

    #[test]
    fn leaderboard_standings_sort_by_score_descending() {
        let mut session = base_session();
        session.phase = Phase::Leaderboard;
        session.seats[1].score = 900;
        session.seats[2].score = 400;
        let view = project(&session, Recipient::Player(pid(1)));
        let ViewDetail::Leaderboard { standings } = &view.detail else {
            panic!("expected leaderboard detail");
        };
        let names: Vec<&str> = standings.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Brin", "Cleo", "Ada"]);
    }
}
