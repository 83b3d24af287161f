//! Phase orchestrator: the finite-state machine that owns a room's game
//! state, validates inbound events against the roster and round data, and
//! decides phase transitions.
//!
//! The orchestrator is deliberately synchronous: [`GameSession::apply`]
//! mutates state and returns [`Effect`]s describing side work (candidate
//! fetches) for the runtime to execute. Fetch completion re-enters the
//! session as an ordinary event, so one room is only ever mutated by its
//! single logical writer.
//!
//! Guards run before any mutation; a failed guard leaves state untouched
//! and yields a rejection for the sender alone. Timers decrement on an
//! external once-per-second tick and fire the phase's deadline at zero, so
//! a round can never stall indefinitely on disengaged players.

use std::collections::HashMap;
use std::fmt;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::RoomConfig;
use crate::error::{GameError, Result};
use crate::protocol::{AnswerId, ClientFrame, ContentItem, PlayerId};
use crate::round::{self, Round};

// ── Phases ──────────────────────────────────────────────────────────

/// The game's phases, in play order. `Leaderboard` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Lobby,
    Tutorial,
    TopicSelection,
    Writing,
    Guessing,
    Presenting,
    Voting,
    Reveal,
    Leaderboard,
}

impl Phase {
    /// Wire/display name of the phase.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Lobby => "LOBBY",
            Self::Tutorial => "TUTORIAL",
            Self::TopicSelection => "TOPIC_SELECTION",
            Self::Writing => "WRITING",
            Self::Guessing => "GUESSING",
            Self::Presenting => "PRESENTING",
            Self::Voting => "VOTING",
            Self::Reveal => "REVEAL",
            Self::Leaderboard => "LEADERBOARD",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── Events & effects ────────────────────────────────────────────────

/// Identity attached to an inbound event by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sender {
    Host,
    Player(PlayerId),
}

/// Inbound events the orchestrator accepts.
///
/// Roster events (`PlayerJoined`, `PlayerLeft`, `PlayerReconnected`) are
/// produced by the gateway from registry operations; `CandidatesReady` /
/// `CandidatesFailed` are fetch completions re-entering the stream; `Tick`
/// arrives once per second from the room runtime.
#[derive(Debug, Clone)]
pub enum GameEvent {
    PlayerJoined { player_id: PlayerId, name: String },
    PlayerLeft { player_id: PlayerId },
    PlayerReconnected { player_id: PlayerId },
    StartRequested { sender: Sender },
    AdvanceRequested { sender: Sender },
    TopicChosen { sender: Sender, content_id: String },
    RerollRequested { sender: Sender },
    SummarySubmitted { sender: Sender, content_id: String, text: String },
    LieSubmitted { sender: Sender, text: String },
    VoteSubmitted { sender: Sender, answer_id: AnswerId },
    CandidatesReady { player_id: PlayerId, items: Vec<ContentItem> },
    CandidatesFailed { player_id: PlayerId },
    Tick,
}

impl GameEvent {
    /// Translate a gateway frame into an event, stamping the sender.
    pub fn from_frame(frame: ClientFrame, sender: Sender) -> Self {
        match frame {
            ClientFrame::StartGame => Self::StartRequested { sender },
            ClientFrame::NextPhase => Self::AdvanceRequested { sender },
            ClientFrame::ChooseTopic { content_id } => Self::TopicChosen { sender, content_id },
            ClientFrame::RerollTopics => Self::RerollRequested { sender },
            ClientFrame::SubmitSummary { content_id, text } => Self::SummarySubmitted {
                sender,
                content_id,
                text,
            },
            ClientFrame::SubmitLie { text } => Self::LieSubmitted { sender, text },
            ClientFrame::SubmitVote { answer_id } => Self::VoteSubmitted { sender, answer_id },
        }
    }

    /// Where a rejection of this event should be delivered, if anywhere.
    pub fn sender(&self) -> Option<Sender> {
        match self {
            Self::PlayerJoined { player_id, .. }
            | Self::PlayerLeft { player_id }
            | Self::PlayerReconnected { player_id } => Some(Sender::Player(*player_id)),
            Self::StartRequested { sender }
            | Self::AdvanceRequested { sender }
            | Self::TopicChosen { sender, .. }
            | Self::RerollRequested { sender }
            | Self::SummarySubmitted { sender, .. }
            | Self::LieSubmitted { sender, .. }
            | Self::VoteSubmitted { sender, .. } => Some(*sender),
            Self::CandidatesReady { .. } | Self::CandidatesFailed { .. } | Self::Tick => None,
        }
    }
}

/// Side work requested by a successful transition, executed by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Fetch candidate items for one player's research offer.
    FetchCandidates { player_id: PlayerId, count: usize },
}

// ── Session state ───────────────────────────────────────────────────

/// One entry of the roster snapshot.
#[derive(Debug, Clone)]
pub struct Seat {
    pub id: PlayerId,
    pub name: String,
    pub score: u64,
    pub connected: bool,
}

/// A player's candidate-content offer for the current research sub-round.
#[derive(Debug, Clone)]
pub enum ContentOffer {
    /// Fetch in flight.
    Pending,
    /// Items available. The first half is shown; the reserve half backs
    /// the one-shot reroll.
    Ready {
        items: Vec<ContentItem>,
        rerolled: bool,
    },
    /// Fetch exhausted its retries; the player sees an unavailable state.
    Unavailable,
}

impl ContentOffer {
    /// The half of the offer the player currently sees.
    pub fn visible(&self, per_offer: usize) -> &[ContentItem] {
        match self {
            Self::Ready { items, rerolled } => {
                if *rerolled {
                    items.get(per_offer..).unwrap_or(&[])
                } else {
                    items.get(..per_offer).unwrap_or(items)
                }
            }
            Self::Pending | Self::Unavailable => &[],
        }
    }
}

/// A topic a player selected during research, later carrying their true
/// write-up.
#[derive(Debug, Clone)]
pub struct Selection {
    pub item: ContentItem,
    pub summary: Option<String>,
    /// Whether a round has already featured this entry.
    pub played: bool,
}

/// The orchestrator's full state for one room. Owned exclusively by the
/// room's event loop; the registry never reads or writes it.
#[derive(Debug)]
pub struct GameSession {
    pub(crate) code: String,
    pub(crate) config: RoomConfig,
    pub(crate) phase: Phase,
    pub(crate) seats: Vec<Seat>,
    pub(crate) vip: Option<PlayerId>,
    pub(crate) timer: Option<u32>,
    pub(crate) research_round: usize,
    pub(crate) offers: HashMap<PlayerId, ContentOffer>,
    pub(crate) selections: HashMap<PlayerId, Vec<Selection>>,
    pub(crate) rounds: Vec<Round>,
    pub(crate) round_total: usize,
    pub(crate) presenters: Vec<PlayerId>,
    pub(crate) presenter_idx: usize,
    rng: StdRng,
}

impl GameSession {
    /// Create a session in the lobby phase.
    pub fn new(code: impl Into<String>, config: RoomConfig) -> Self {
        Self::with_rng(code, config, StdRng::from_entropy())
    }

    /// Create a session with an explicit rng, for deterministic tests.
    pub fn with_rng(code: impl Into<String>, config: RoomConfig, rng: StdRng) -> Self {
        Self {
            code: code.into(),
            config,
            phase: Phase::Lobby,
            seats: Vec::new(),
            vip: None,
            timer: None,
            research_round: 0,
            offers: HashMap::new(),
            selections: HashMap::new(),
            rounds: Vec::new(),
            round_total: 0,
            presenters: Vec::new(),
            presenter_idx: 0,
            rng,
        }
    }

    // ── Accessors ───────────────────────────────────────────────────

    pub fn room_code(&self) -> &str {
        &self.code
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn timer(&self) -> Option<u32> {
        self.timer
    }

    pub fn seats(&self) -> &[Seat] {
        &self.seats
    }

    /// The VIP: the first player to join, permitted to advance host-gated
    /// phases.
    pub fn vip(&self) -> Option<PlayerId> {
        self.vip
    }

    pub fn rounds(&self) -> &[Round] {
        &self.rounds
    }

    pub fn current_round(&self) -> Option<&Round> {
        self.rounds.last()
    }

    /// Total guessing rounds this session will play; fixed when writing
    /// closes.
    pub fn round_total(&self) -> usize {
        self.round_total
    }

    /// Zero-based index of the current research sub-round.
    pub fn research_round(&self) -> usize {
        self.research_round
    }

    /// The player currently presenting, if the session is in that phase.
    pub fn current_presenter(&self) -> Option<PlayerId> {
        if self.phase == Phase::Presenting {
            self.presenters.get(self.presenter_idx).copied()
        } else {
            None
        }
    }

    // ── Event entry point ───────────────────────────────────────────

    /// Validate and apply one inbound event.
    ///
    /// # Errors
    ///
    /// Returns the rejection for the sender; state is untouched on error.
    pub fn apply(&mut self, event: GameEvent) -> Result<Vec<Effect>> {
        match event {
            GameEvent::PlayerJoined { player_id, name } => self.on_player_joined(player_id, name),
            GameEvent::PlayerLeft { player_id } => self.on_player_left(player_id),
            GameEvent::PlayerReconnected { player_id } => self.on_player_reconnected(player_id),
            GameEvent::StartRequested { sender } => self.on_start(sender),
            GameEvent::AdvanceRequested { sender } => self.on_advance(sender),
            GameEvent::TopicChosen { sender, content_id } => {
                self.on_topic_chosen(sender, &content_id)
            }
            GameEvent::RerollRequested { sender } => self.on_reroll(sender),
            GameEvent::SummarySubmitted {
                sender,
                content_id,
                text,
            } => self.on_summary(sender, &content_id, &text),
            GameEvent::LieSubmitted { sender, text } => self.on_lie(sender, &text),
            GameEvent::VoteSubmitted { sender, answer_id } => self.on_vote(sender, answer_id),
            GameEvent::CandidatesReady { player_id, items } => {
                Ok(self.on_candidates(player_id, Some(items)))
            }
            GameEvent::CandidatesFailed { player_id } => Ok(self.on_candidates(player_id, None)),
            GameEvent::Tick => Ok(self.on_tick()),
        }
    }

    // ── Guard helpers ───────────────────────────────────────────────

    fn wrong_phase(&self) -> GameError {
        GameError::InvalidTransition {
            phase: self.phase.name(),
        }
    }

    fn player_sender(&self, sender: Sender) -> Result<PlayerId> {
        match sender {
            Sender::Player(id) if self.seats.iter().any(|s| s.id == id) => Ok(id),
            Sender::Player(_) => Err(GameError::PlayerNotFound),
            Sender::Host => Err(GameError::ValidationFailed(
                "this event requires a player sender".into(),
            )),
        }
    }

    /// Host or VIP: the identities allowed to drive host-gated advances.
    fn is_privileged(&self, sender: Sender) -> bool {
        match sender {
            Sender::Host => true,
            Sender::Player(id) => self.vip == Some(id),
        }
    }

    fn validate_text(&self, text: &str) -> Result<String> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(GameError::ValidationFailed("text must not be empty".into()));
        }
        if trimmed.chars().count() > self.config.max_text_len {
            return Err(GameError::ValidationFailed(format!(
                "text exceeds the {}-character cap",
                self.config.max_text_len
            )));
        }
        Ok(trimmed.to_owned())
    }

    // ── Roster events ───────────────────────────────────────────────

    fn on_player_joined(&mut self, player_id: PlayerId, name: String) -> Result<Vec<Effect>> {
        if self.phase != Phase::Lobby {
            return Err(self.wrong_phase());
        }
        if self.seats.len() >= self.config.max_players {
            return Err(GameError::GuardFailed("room is full"));
        }
        if self.seats.iter().any(|s| s.id == player_id) {
            return Err(GameError::ValidationFailed("player already seated".into()));
        }
        self.seats.push(Seat {
            id: player_id,
            name,
            score: 0,
            connected: true,
        });
        if self.vip.is_none() {
            self.vip = Some(player_id);
        }
        Ok(Vec::new())
    }

    fn on_player_left(&mut self, player_id: PlayerId) -> Result<Vec<Effect>> {
        if self.phase == Phase::Lobby {
            // In the lobby a departure removes the seat outright.
            self.seats.retain(|s| s.id != player_id);
            if self.vip == Some(player_id) {
                self.vip = self.seats.first().map(|s| s.id);
            }
        } else {
            let seat = self
                .seats
                .iter_mut()
                .find(|s| s.id == player_id)
                .ok_or(GameError::PlayerNotFound)?;
            // Mid-game the seat stays; the game clock is room-global and
            // keeps running.
            seat.connected = false;
        }
        debug!(room = %self.code, %player_id, "player left");
        Ok(Vec::new())
    }

    fn on_player_reconnected(&mut self, player_id: PlayerId) -> Result<Vec<Effect>> {
        let seat = self
            .seats
            .iter_mut()
            .find(|s| s.id == player_id)
            .ok_or(GameError::PlayerNotFound)?;
        seat.connected = true;
        // A player who missed the research fan-out still needs an offer.
        let mut effects = Vec::new();
        if self.phase == Phase::TopicSelection
            && !matches!(
                self.offers.get(&player_id),
                Some(ContentOffer::Pending | ContentOffer::Ready { .. })
            )
        {
            self.offers.insert(player_id, ContentOffer::Pending);
            effects.push(Effect::FetchCandidates {
                player_id,
                count: self.config.candidates_per_fetch(),
            });
        }
        Ok(effects)
    }

    // ── Lobby → tutorial → research ─────────────────────────────────

    fn on_start(&mut self, sender: Sender) -> Result<Vec<Effect>> {
        if self.phase != Phase::Lobby {
            return Err(self.wrong_phase());
        }
        if !self.is_privileged(sender) {
            return Err(GameError::GuardFailed("only the host or vip may start"));
        }
        if self.seats.len() < 3 {
            return Err(GameError::GuardFailed("at least 3 players are required"));
        }
        self.set_phase(Phase::Tutorial, None);
        Ok(Vec::new())
    }

    fn on_advance(&mut self, sender: Sender) -> Result<Vec<Effect>> {
        if !matches!(
            self.phase,
            Phase::Tutorial | Phase::TopicSelection | Phase::Presenting | Phase::Reveal
        ) {
            return Err(self.wrong_phase());
        }
        if !self.is_privileged(sender) {
            return Err(GameError::GuardFailed("only the host or vip may advance"));
        }
        match self.phase {
            Phase::Tutorial => Ok(self.enter_topic_selection()),
            Phase::TopicSelection => {
                self.enter_writing();
                Ok(Vec::new())
            }
            Phase::Presenting => {
                self.advance_presenter();
                Ok(Vec::new())
            }
            Phase::Reveal => {
                if self.rounds.len() < self.round_total {
                    self.start_round();
                } else {
                    self.set_phase(Phase::Leaderboard, None);
                }
                Ok(Vec::new())
            }
            _ => Err(self.wrong_phase()),
        }
    }

    fn enter_topic_selection(&mut self) -> Vec<Effect> {
        self.set_phase(Phase::TopicSelection, None);
        self.request_missing_offers()
    }

    /// Queue a fetch for every connected player without a live offer.
    fn request_missing_offers(&mut self) -> Vec<Effect> {
        let count = self.config.candidates_per_fetch();
        let mut effects = Vec::new();
        let offers = &mut self.offers;
        for seat in self.seats.iter().filter(|s| s.connected) {
            let live = matches!(
                offers.get(&seat.id),
                Some(ContentOffer::Pending | ContentOffer::Ready { .. })
            );
            if !live {
                offers.insert(seat.id, ContentOffer::Pending);
                effects.push(Effect::FetchCandidates {
                    player_id: seat.id,
                    count,
                });
            }
        }
        effects
    }

    // ── Research: offers, selection, reroll ─────────────────────────

    fn on_candidates(&mut self, player_id: PlayerId, items: Option<Vec<ContentItem>>) -> Vec<Effect> {
        // Internal completion event: only meaningful while the offer is
        // still pending; anything else is a harmless late arrival.
        if self.phase != Phase::TopicSelection
            || !matches!(self.offers.get(&player_id), Some(ContentOffer::Pending))
        {
            return Vec::new();
        }
        let offer = match items {
            Some(items) if !items.is_empty() => ContentOffer::Ready {
                items,
                rerolled: false,
            },
            _ => ContentOffer::Unavailable,
        };
        self.offers.insert(player_id, offer);
        Vec::new()
    }

    fn on_topic_chosen(&mut self, sender: Sender, content_id: &str) -> Result<Vec<Effect>> {
        if self.phase != Phase::TopicSelection {
            return Err(self.wrong_phase());
        }
        let player_id = self.player_sender(sender)?;
        let already = self
            .selections
            .get(&player_id)
            .map_or(0, |s| s.len());
        if already > self.research_round {
            return Err(GameError::ValidationFailed(
                "selection already recorded for this sub-round".into(),
            ));
        }
        let item = match self.offers.get(&player_id) {
            Some(offer @ ContentOffer::Ready { .. }) => offer
                .visible(self.config.candidates_per_offer)
                .iter()
                .find(|i| i.id == content_id)
                .cloned()
                .ok_or_else(|| GameError::ValidationFailed("unknown content id".into()))?,
            Some(ContentOffer::Pending) => {
                return Err(GameError::ValidationFailed(
                    "candidates are still loading".into(),
                ))
            }
            Some(ContentOffer::Unavailable) | None => return Err(GameError::ContentUnavailable),
        };
        self.selections.entry(player_id).or_default().push(Selection {
            item,
            summary: None,
            played: false,
        });

        // All connected players done with this sub-round?
        let need = self.research_round + 1;
        let all_submitted = self
            .seats
            .iter()
            .filter(|s| s.connected)
            .all(|s| self.selections.get(&s.id).map_or(0, |sel| sel.len()) >= need);
        if all_submitted {
            Ok(self.advance_sub_round())
        } else {
            Ok(Vec::new())
        }
    }

    fn advance_sub_round(&mut self) -> Vec<Effect> {
        self.research_round += 1;
        if self.research_round >= self.config.research_rounds {
            self.enter_writing();
            Vec::new()
        } else {
            // Fresh offers for the next sub-round.
            self.offers.clear();
            self.request_missing_offers()
        }
    }

    fn on_reroll(&mut self, sender: Sender) -> Result<Vec<Effect>> {
        if self.phase != Phase::TopicSelection {
            return Err(self.wrong_phase());
        }
        let player_id = self.player_sender(sender)?;
        if self
            .selections
            .get(&player_id)
            .map_or(0, |s| s.len())
            > self.research_round
        {
            return Err(GameError::ValidationFailed(
                "selection already recorded for this sub-round".into(),
            ));
        }
        let per_offer = self.config.candidates_per_offer;
        match self.offers.get_mut(&player_id) {
            Some(ContentOffer::Ready { items, rerolled }) => {
                if *rerolled {
                    return Err(GameError::ValidationFailed(
                        "reroll already used this sub-round".into(),
                    ));
                }
                if items.len() <= per_offer {
                    return Err(GameError::ValidationFailed(
                        "no reserve candidates to reroll into".into(),
                    ));
                }
                *rerolled = true;
                Ok(Vec::new())
            }
            Some(ContentOffer::Pending) => Err(GameError::ValidationFailed(
                "candidates are still loading".into(),
            )),
            Some(ContentOffer::Unavailable) | None => Err(GameError::ContentUnavailable),
        }
    }

    // ── Writing ─────────────────────────────────────────────────────

    fn enter_writing(&mut self) {
        let secs = self.config.writing_secs;
        self.set_phase(Phase::Writing, Some(secs));
    }

    fn on_summary(&mut self, sender: Sender, content_id: &str, text: &str) -> Result<Vec<Effect>> {
        if self.phase != Phase::Writing {
            return Err(self.wrong_phase());
        }
        let player_id = self.player_sender(sender)?;
        let text = self.validate_text(text)?;
        let selection = self
            .selections
            .get_mut(&player_id)
            .and_then(|sels| sels.iter_mut().find(|s| s.item.id == content_id))
            .ok_or_else(|| GameError::ValidationFailed("unknown content id".into()))?;
        // Revision is allowed until the writing deadline freezes entries.
        selection.summary = Some(text);
        Ok(Vec::new())
    }

    /// Writing deadline: freeze unsubmitted entries and fix the round
    /// count.
    fn close_writing(&mut self) {
        for sels in self.selections.values_mut() {
            for sel in sels.iter_mut() {
                if sel.summary.is_none() {
                    sel.summary = Some(String::new());
                }
            }
        }
        let written: usize = self
            .selections
            .values()
            .flatten()
            .filter(|s| s.summary.as_deref().is_some_and(|t| !t.is_empty()))
            .count();
        self.round_total = self
            .config
            .round_limit
            .map_or(written, |limit| written.min(limit));
        debug!(room = %self.code, rounds = self.round_total, "writing closed");
        if self.round_total == 0 {
            // Nothing playable was written; the session ends.
            self.set_phase(Phase::Leaderboard, None);
        } else {
            self.start_round();
        }
    }

    // ── Rounds: guessing → presenting → voting → reveal ─────────────

    /// Create the next round by expert rotation and open decoy writing.
    fn start_round(&mut self) {
        let prior: Vec<PlayerId> = self.rounds.iter().map(|r| r.expert_id).collect();
        let eligible: Vec<PlayerId> = self
            .seats
            .iter()
            .filter(|seat| {
                self.selections.get(&seat.id).is_some_and(|sels| {
                    sels.iter().any(|s| {
                        !s.played && s.summary.as_deref().is_some_and(|t| !t.is_empty())
                    })
                })
            })
            .map(|seat| seat.id)
            .collect();
        let Some(expert_id) = round::assign_expert(&eligible, &prior) else {
            self.set_phase(Phase::Leaderboard, None);
            return;
        };
        let Some(selection) = self.selections.get_mut(&expert_id).and_then(|sels| {
            sels.iter_mut()
                .find(|s| !s.played && s.summary.as_deref().is_some_and(|t| !t.is_empty()))
        }) else {
            self.set_phase(Phase::Leaderboard, None);
            return;
        };
        selection.played = true;
        let item = selection.item.clone();
        let truth = selection.summary.clone().unwrap_or_default();
        let index = self.rounds.len();
        self.rounds.push(Round::new(index, expert_id, item, truth));
        debug!(room = %self.code, round = index, %expert_id, "round started");
        let secs = self.config.lie_secs;
        self.set_phase(Phase::Guessing, Some(secs));
    }

    fn on_lie(&mut self, sender: Sender, text: &str) -> Result<Vec<Effect>> {
        if self.phase != Phase::Guessing {
            return Err(self.wrong_phase());
        }
        let player_id = self.player_sender(sender)?;
        let text = self.validate_text(text)?;
        let round = self
            .rounds
            .last_mut()
            .ok_or_else(|| GameError::ValidationFailed("no active round".into()))?;
        if text.eq_ignore_ascii_case(round.truth_text.trim()) {
            return Err(GameError::ValidationFailed(
                "that matches the true write-up".into(),
            ));
        }
        round.record_lie(player_id, text)?;
        Ok(Vec::new())
    }

    /// Guessing deadline: lock the answer set and begin presentation.
    fn close_guessing(&mut self) {
        let extra = self.maybe_house_decoy();
        if let Some(round) = self.rounds.last_mut() {
            round.build_answers(extra, &mut self.rng);
        }
        self.presenters = self
            .seats
            .iter()
            .filter(|s| s.connected)
            .map(|s| s.id)
            .collect();
        self.presenter_idx = 0;
        if self.presenters.is_empty() {
            self.enter_voting();
        } else {
            let secs = self.config.present_secs;
            self.set_phase(Phase::Presenting, Some(secs));
        }
    }

    /// Roll the everyone-lies chance and synthesize the extra decoy from a
    /// candidate the expert passed over, so set size carries no signal.
    fn maybe_house_decoy(&mut self) -> Option<String> {
        let chance = self.config.everyone_lies_chance.clamp(0.0, 1.0);
        if chance <= 0.0 || !self.rng.gen_bool(chance) {
            return None;
        }
        let round = self.rounds.last()?;
        let chosen: Vec<&str> = self
            .selections
            .get(&round.expert_id)
            .map(|sels| sels.iter().map(|s| s.item.id.as_str()).collect())
            .unwrap_or_default();
        let leftover = match self.offers.get(&round.expert_id) {
            Some(ContentOffer::Ready { items, .. }) => {
                items.iter().find(|i| !chosen.contains(&i.id.as_str()))
            }
            _ => None,
        }?;
        Some(round::synthesize_decoy(leftover, self.config.max_text_len))
    }

    /// Step the presenter pointer; exhaustion opens voting.
    fn advance_presenter(&mut self) {
        self.presenter_idx += 1;
        if self.presenter_idx >= self.presenters.len() {
            self.enter_voting();
        } else {
            self.timer = Some(self.config.present_secs);
        }
    }

    fn enter_voting(&mut self) {
        let secs = self.config.vote_secs;
        self.set_phase(Phase::Voting, Some(secs));
    }

    fn on_vote(&mut self, sender: Sender, answer_id: AnswerId) -> Result<Vec<Effect>> {
        if self.phase != Phase::Voting {
            return Err(self.wrong_phase());
        }
        let player_id = self.player_sender(sender)?;
        let round = self
            .rounds
            .last_mut()
            .ok_or_else(|| GameError::ValidationFailed("no active round".into()))?;
        round.record_vote(player_id, answer_id)?;
        Ok(Vec::new())
    }

    /// Voting deadline: tally, apply deltas, and reveal.
    fn close_voting(&mut self) {
        let rules = self.config.score_rules;
        let deltas = match self.rounds.last_mut() {
            Some(round) => round.tally(&rules).clone(),
            None => HashMap::new(),
        };
        for seat in self.seats.iter_mut() {
            if let Some(delta) = deltas.get(&seat.id) {
                seat.score += delta;
            }
        }
        self.set_phase(Phase::Reveal, None);
    }

    // ── Timer ───────────────────────────────────────────────────────

    /// Handle one external tick. A tick with no active timer is an
    /// idempotent no-op (e.g. a late tick after a phase already advanced).
    fn on_tick(&mut self) -> Vec<Effect> {
        match self.timer {
            None => Vec::new(),
            Some(0) => self.fire_deadline(),
            Some(t) => {
                let t = t - 1;
                if t == 0 {
                    self.fire_deadline()
                } else {
                    self.timer = Some(t);
                    Vec::new()
                }
            }
        }
    }

    fn fire_deadline(&mut self) -> Vec<Effect> {
        self.timer = None;
        match self.phase {
            Phase::Writing => self.close_writing(),
            Phase::Guessing => self.close_guessing(),
            Phase::Presenting => self.advance_presenter(),
            Phase::Voting => self.close_voting(),
            // No other phase declares a duration.
            _ => {}
        }
        Vec::new()
    }

    fn set_phase(&mut self, phase: Phase, timer: Option<u32>) {
        debug!(room = %self.code, from = %self.phase, to = %phase, "phase transition");
        self.phase = phase;
        self.timer = timer;
    }
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
    use uuid::Uuid;

    fn test_config() -> RoomConfig {
        RoomConfig::default()
            .with_timers(3, 3, 2, 3)
            .with_research_rounds(1)
            .with_everyone_lies_chance(0.0)
    }

    fn session() -> GameSession {
        GameSession::with_rng("GLXY", test_config(), StdRng::seed_from_u64(7))
    }

    fn pid(n: u128) -> PlayerId {
        Uuid::from_u128(n)
    }

    fn join(session: &mut GameSession, n: u128, name: &str) -> PlayerId {
        let id = pid(n);
        session
            .apply(GameEvent::PlayerJoined {
                player_id: id,
                name: name.into(),
            })
            .unwrap();
        id
    }

    fn items(prefix: &str, n: usize) -> Vec<ContentItem> {
        (0..n)
            .map(|i| ContentItem {
                id: format!("{prefix}-{i}"),
                title: format!("Topic {prefix} {i}"),
                body: format!("Body of topic {prefix} {i}. More detail follows."),
                source_url: format!("https://example.test/{prefix}/{i}"),
            })
            .collect()
    }

    /// Drive a three-player session into topic selection with offers
    /// delivered.
    fn session_in_research() -> (GameSession, [PlayerId; 3]) {
        let mut s = session();
        let a = join(&mut s, 1, "Ada");
        let b = join(&mut s, 2, "Brin");
        let c = join(&mut s, 3, "Cleo");
        s.apply(GameEvent::StartRequested {
            sender: Sender::Host,
        })
        .unwrap();
        let effects = s
            .apply(GameEvent::AdvanceRequested {
                sender: Sender::Host,
            })
            .unwrap();
        assert_eq!(effects.len(), 3);
        for (idx, id) in [a, b, c].into_iter().enumerate() {
            s.apply(GameEvent::CandidatesReady {
                player_id: id,
                items: items(&format!("p{idx}"), 6),
            })
            .unwrap();
        }
        (s, [a, b, c])
    }

    /// Continue through selection and writing into guessing.
    fn session_in_guessing() -> (GameSession, [PlayerId; 3]) {
        let (mut s, players) = session_in_research();
        for (idx, id) in players.into_iter().enumerate() {
            s.apply(GameEvent::TopicChosen {
                sender: Sender::Player(id),
                content_id: format!("p{idx}-0"),
            })
            .unwrap();
        }
        assert_eq!(s.phase(), Phase::Writing);
        for (idx, id) in players.into_iter().enumerate() {
            s.apply(GameEvent::SummarySubmitted {
                sender: Sender::Player(id),
                content_id: format!("p{idx}-0"),
                text: format!("True summary from player {idx}."),
            })
            .unwrap();
        }
        // Run the writing timer down.
        while s.phase() == Phase::Writing {
            s.apply(GameEvent::Tick).unwrap();
        }
        assert_eq!(s.phase(), Phase::Guessing);
        (s, players)
    }

    #[test]
    fn start_requires_three_players() {
        let mut s = session();
        join(&mut s, 1, "Ada");
        join(&mut s, 2, "Brin");
        let err = s
            .apply(GameEvent::StartRequested {
                sender: Sender::Host,
            })
            .unwrap_err();
        assert!(matches!(err, GameError::GuardFailed(_)));
        assert_eq!(s.phase(), Phase::Lobby);

        join(&mut s, 3, "Cleo");
        s.apply(GameEvent::StartRequested {
            sender: Sender::Host,
        })
        .unwrap();
        assert_eq!(s.phase(), Phase::Tutorial);
    }

    #[test]
    fn vip_is_first_joiner_and_may_advance_tutorial() {
        let mut s = session();
        let a = join(&mut s, 1, "Ada");
        let b = join(&mut s, 2, "Brin");
        join(&mut s, 3, "Cleo");
        assert_eq!(s.vip(), Some(a));
        s.apply(GameEvent::StartRequested {
            sender: Sender::Host,
        })
        .unwrap();

        let err = s
            .apply(GameEvent::AdvanceRequested {
                sender: Sender::Player(b),
            })
            .unwrap_err();
        assert!(matches!(err, GameError::GuardFailed(_)));
        assert_eq!(s.phase(), Phase::Tutorial);

        s.apply(GameEvent::AdvanceRequested {
            sender: Sender::Player(a),
        })
        .unwrap();
        assert_eq!(s.phase(), Phase::TopicSelection);
    }

    #[test]
    fn lobby_departure_reassigns_vip() {
        let mut s = session();
        let a = join(&mut s, 1, "Ada");
        let b = join(&mut s, 2, "Brin");
        s.apply(GameEvent::PlayerLeft { player_id: a }).unwrap();
        assert_eq!(s.vip(), Some(b));
        assert_eq!(s.seats().len(), 1);
    }

    #[test]
    fn join_rejected_when_room_full() {
        let mut s = GameSession::with_rng(
            "GLXY",
            test_config().with_max_players(2),
            StdRng::seed_from_u64(7),
        );
        join(&mut s, 1, "Ada");
        join(&mut s, 2, "Brin");
        let err = s
            .apply(GameEvent::PlayerJoined {
                player_id: pid(3),
                name: "Cleo".into(),
            })
            .unwrap_err();
        assert!(matches!(err, GameError::GuardFailed(_)));
    }

    #[test]
    fn tick_without_timer_is_a_no_op() {
        let mut s = session();
        join(&mut s, 1, "Ada");
        assert!(s.apply(GameEvent::Tick).unwrap().is_empty());
        assert_eq!(s.phase(), Phase::Lobby);
        assert_eq!(s.timer(), None);
    }

    #[test]
    fn choosing_from_the_reserve_half_requires_a_reroll() {
        let (mut s, [a, _, _]) = session_in_research();
        // Item 4 sits in the reserve half of a six-item offer.
        let err = s
            .apply(GameEvent::TopicChosen {
                sender: Sender::Player(a),
                content_id: "p0-4".into(),
            })
            .unwrap_err();
        assert!(matches!(err, GameError::ValidationFailed(_)));

        s.apply(GameEvent::RerollRequested {
            sender: Sender::Player(a),
        })
        .unwrap();
        s.apply(GameEvent::TopicChosen {
            sender: Sender::Player(a),
            content_id: "p0-4".into(),
        })
        .unwrap();
    }

    #[test]
    fn reroll_is_one_shot_and_blocked_after_selection() {
        let (mut s, [a, b, _]) = session_in_research();
        s.apply(GameEvent::RerollRequested {
            sender: Sender::Player(a),
        })
        .unwrap();
        let err = s
            .apply(GameEvent::RerollRequested {
                sender: Sender::Player(a),
            })
            .unwrap_err();
        assert!(matches!(err, GameError::ValidationFailed(_)));

        s.apply(GameEvent::TopicChosen {
            sender: Sender::Player(b),
            content_id: "p1-1".into(),
        })
        .unwrap();
        let err = s
            .apply(GameEvent::RerollRequested {
                sender: Sender::Player(b),
            })
            .unwrap_err();
        assert!(matches!(err, GameError::ValidationFailed(_)));
    }

    #[test]
    fn failed_fetch_marks_offer_unavailable_but_room_survives() {
        let (mut s, [a, _, _]) = session_in_research();
        // Replay a failure for a player whose offer is re-pending after a
        // disconnect + reconnect.
        s.apply(GameEvent::PlayerLeft { player_id: a }).unwrap();
        s.offers.remove(&a);
        let effects = s
            .apply(GameEvent::PlayerReconnected { player_id: a })
            .unwrap();
        assert_eq!(effects.len(), 1);
        s.apply(GameEvent::CandidatesFailed { player_id: a }).unwrap();

        let err = s
            .apply(GameEvent::TopicChosen {
                sender: Sender::Player(a),
                content_id: "p0-0".into(),
            })
            .unwrap_err();
        assert!(matches!(err, GameError::ContentUnavailable));
        assert_eq!(s.phase(), Phase::TopicSelection);
    }

    #[test]
    fn all_selections_advance_research_into_writing() {
        let (mut s, [a, b, c]) = session_in_research();
        for (idx, id) in [a, b, c].into_iter().enumerate() {
            assert_eq!(s.phase(), Phase::TopicSelection);
            s.apply(GameEvent::TopicChosen {
                sender: Sender::Player(id),
                content_id: format!("p{idx}-0"),
            })
            .unwrap();
        }
        assert_eq!(s.phase(), Phase::Writing);
        assert_eq!(s.timer(), Some(3));
    }

    #[test]
    fn multi_sub_round_research_reissues_offers() {
        let mut s = GameSession::with_rng(
            "GLXY",
            test_config().with_research_rounds(2),
            StdRng::seed_from_u64(7),
        );
        let a = join(&mut s, 1, "Ada");
        let b = join(&mut s, 2, "Brin");
        let c = join(&mut s, 3, "Cleo");
        s.apply(GameEvent::StartRequested {
            sender: Sender::Host,
        })
        .unwrap();
        s.apply(GameEvent::AdvanceRequested {
            sender: Sender::Host,
        })
        .unwrap();
        for (idx, id) in [a, b, c].into_iter().enumerate() {
            s.apply(GameEvent::CandidatesReady {
                player_id: id,
                items: items(&format!("p{idx}"), 6),
            })
            .unwrap();
        }
        let mut effects = Vec::new();
        for (idx, id) in [a, b, c].into_iter().enumerate() {
            effects = s
                .apply(GameEvent::TopicChosen {
                    sender: Sender::Player(id),
                    content_id: format!("p{idx}-0"),
                })
                .unwrap();
        }
        // Second sub-round: everyone gets a fresh fetch.
        assert_eq!(s.research_round(), 1);
        assert_eq!(s.phase(), Phase::TopicSelection);
        assert_eq!(effects.len(), 3);
    }

    #[test]
    fn writing_deadline_freezes_and_starts_first_round() {
        let (s, players) = session_in_guessing();
        assert_eq!(s.round_total(), 3);
        let round = s.current_round().unwrap();
        assert!(players.contains(&round.expert_id));
        assert!(round.truth_text.starts_with("True summary"));
    }

    #[test]
    fn unwritten_entries_are_excluded_from_rounds() {
        let (mut s, players) = session_in_research();
        for (idx, id) in players.into_iter().enumerate() {
            s.apply(GameEvent::TopicChosen {
                sender: Sender::Player(id),
                content_id: format!("p{idx}-0"),
            })
            .unwrap();
        }
        // Only one player writes before the deadline.
        s.apply(GameEvent::SummarySubmitted {
            sender: Sender::Player(players[0]),
            content_id: "p0-0".into(),
            text: "The only written truth.".into(),
        })
        .unwrap();
        while s.phase() == Phase::Writing {
            s.apply(GameEvent::Tick).unwrap();
        }
        assert_eq!(s.round_total(), 1);
        assert_eq!(s.current_round().unwrap().expert_id, players[0]);
    }

    #[test]
    fn expert_lie_rejected_and_answer_set_locks_on_deadline() {
        let (mut s, players) = session_in_guessing();
        let expert = s.current_round().unwrap().expert_id;
        let liars: Vec<PlayerId> = players.iter().copied().filter(|p| *p != expert).collect();

        let err = s
            .apply(GameEvent::LieSubmitted {
                sender: Sender::Player(expert),
                text: "I know the real answer.".into(),
            })
            .unwrap_err();
        assert!(matches!(err, GameError::ValidationFailed(_)));

        for (i, liar) in liars.iter().enumerate() {
            s.apply(GameEvent::LieSubmitted {
                sender: Sender::Player(*liar),
                text: format!("Convincing decoy {i}."),
            })
            .unwrap();
        }
        while s.phase() == Phase::Guessing {
            s.apply(GameEvent::Tick).unwrap();
        }
        assert_eq!(s.phase(), Phase::Presenting);
        let round = s.current_round().unwrap();
        assert_eq!(round.answers().len(), 3);
        assert_eq!(round.answers().iter().filter(|a| a.is_truth()).count(), 1);
    }

    #[test]
    fn presenting_timer_advances_each_presenter_then_voting() {
        let (mut s, _players) = session_in_guessing();
        while s.phase() == Phase::Guessing {
            s.apply(GameEvent::Tick).unwrap();
        }
        assert_eq!(s.phase(), Phase::Presenting);
        let first = s.current_presenter().unwrap();
        // present_secs is 2 in the test config.
        s.apply(GameEvent::Tick).unwrap();
        s.apply(GameEvent::Tick).unwrap();
        let second = s.current_presenter().unwrap();
        assert_ne!(first, second);

        while s.phase() == Phase::Presenting {
            s.apply(GameEvent::Tick).unwrap();
        }
        assert_eq!(s.phase(), Phase::Voting);
        assert_eq!(s.timer(), Some(3));
    }

    #[test]
    fn scores_apply_on_reveal_and_next_round_opens() {
        let (mut s, players) = session_in_guessing();
        let expert = s.current_round().unwrap().expert_id;
        while s.phase() != Phase::Voting {
            s.apply(GameEvent::Tick).unwrap();
        }
        let truth_id = s
            .current_round()
            .unwrap()
            .answers()
            .iter()
            .find(|a| a.is_truth())
            .map(|a| a.id)
            .unwrap();
        let voter = players.iter().copied().find(|p| *p != expert).unwrap();
        s.apply(GameEvent::VoteSubmitted {
            sender: Sender::Player(voter),
            answer_id: truth_id,
        })
        .unwrap();
        while s.phase() == Phase::Voting {
            s.apply(GameEvent::Tick).unwrap();
        }
        assert_eq!(s.phase(), Phase::Reveal);
        let score = s.seats().iter().find(|st| st.id == voter).unwrap().score;
        assert_eq!(score, 500);

        // Three rounds total in this session; play them out.
        s.apply(GameEvent::AdvanceRequested {
            sender: Sender::Host,
        })
        .unwrap();
        assert_eq!(s.phase(), Phase::Guessing);
    }

    #[test]
    fn reveal_lands_on_leaderboard_when_rounds_are_exhausted() {
        let (mut s, _players) = session_in_guessing();
        s.round_total = 1;
        while s.phase() != Phase::Reveal {
            s.apply(GameEvent::Tick).unwrap();
        }
        s.apply(GameEvent::AdvanceRequested {
            sender: Sender::Host,
        })
        .unwrap();
        assert_eq!(s.phase(), Phase::Leaderboard);
    }

    #[test]
    fn events_out_of_phase_are_rejected_without_mutation() {
        let mut s = session();
        join(&mut s, 1, "Ada");
        let err = s
            .apply(GameEvent::LieSubmitted {
                sender: Sender::Player(pid(1)),
                text: "early lie".into(),
            })
            .unwrap_err();
        assert!(matches!(err, GameError::InvalidTransition { .. }));
        assert_eq!(s.phase(), Phase::Lobby);

        let err = s
            .apply(GameEvent::VoteSubmitted {
                sender: Sender::Player(pid(1)),
                answer_id: Uuid::new_v4(),
            })
            .unwrap_err();
        assert!(matches!(err, GameError::InvalidTransition { .. }));
    }
}
