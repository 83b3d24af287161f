//! Round model: the data for one guessing round and the pure functions
//! that assemble its answer set and tally votes into score deltas.

use std::collections::HashMap;

use rand::seq::SliceRandom;
use rand::Rng;
use uuid::Uuid;

use crate::config::ScoreRules;
use crate::error::{GameError, Result};
use crate::protocol::{AnswerId, ContentItem, PlayerId};

/// Who wrote an answer-set entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerAuthor {
    /// The round's expert; marks the true write-up.
    Expert,
    /// A non-expert player's decoy.
    Player(PlayerId),
    /// A synthesized decoy injected so set size is not a reliable tell.
    House,
}

/// One entry of a round's answer set.
#[derive(Debug, Clone)]
pub struct Answer {
    pub id: AnswerId,
    pub text: String,
    pub author: AnswerAuthor,
}

impl Answer {
    /// Whether this entry is the expert's true write-up.
    pub fn is_truth(&self) -> bool {
        matches!(self.author, AnswerAuthor::Expert)
    }
}

/// Pick the next expert: fewest prior turns first, tiebroken by roster
/// order, never repeating the immediately previous expert when any
/// alternative is eligible.
pub fn assign_expert(roster: &[PlayerId], prior: &[PlayerId]) -> Option<PlayerId> {
    let turns = |id: PlayerId| prior.iter().filter(|p| **p == id).count();
    let fewest = roster.iter().map(|id| turns(*id)).min()?;
    let candidates: Vec<PlayerId> = roster
        .iter()
        .copied()
        .filter(|id| turns(*id) == fewest)
        .collect();
    let last = prior.last().copied();
    candidates
        .iter()
        .copied()
        .find(|id| Some(*id) != last)
        .or_else(|| candidates.first().copied())
}

/// Build the synthesized decoy text from a leftover candidate item: its
/// leading sentence, clipped to the configured text cap.
pub fn synthesize_decoy(item: &ContentItem, max_len: usize) -> String {
    let sentence = item
        .body
        .split_inclusive(['.', '!', '?'])
        .next()
        .unwrap_or(&item.body)
        .trim();
    if sentence.chars().count() > max_len {
        sentence.chars().take(max_len).collect()
    } else {
        sentence.to_owned()
    }
}

/// One guessing round.
///
/// Created on entry to the guessing phase, mutated by decoy and vote
/// events, scored and frozen on the transition into reveal, and retained
/// for leaderboard display until the session ends.
#[derive(Debug, Clone)]
pub struct Round {
    pub index: usize,
    /// The player whose true write-up anchors this round.
    pub expert_id: PlayerId,
    /// The content item in play.
    pub item: ContentItem,
    /// The expert's true write-up.
    pub truth_text: String,
    lies: HashMap<PlayerId, String>,
    votes: HashMap<PlayerId, AnswerId>,
    answers: Vec<Answer>,
    deltas: Option<HashMap<PlayerId, u64>>,
}

impl Round {
    pub fn new(index: usize, expert_id: PlayerId, item: ContentItem, truth_text: String) -> Self {
        Self {
            index,
            expert_id,
            item,
            truth_text,
            lies: HashMap::new(),
            votes: HashMap::new(),
            answers: Vec::new(),
            deltas: None,
        }
    }

    /// The answer set; empty until [`build_answers`](Self::build_answers)
    /// runs.
    pub fn answers(&self) -> &[Answer] {
        &self.answers
    }

    /// Whether the answer set has been constructed (and is thus frozen).
    pub fn answers_built(&self) -> bool {
        !self.answers.is_empty()
    }

    pub fn has_lied(&self, player: PlayerId) -> bool {
        self.lies.contains_key(&player)
    }

    pub fn has_voted(&self, player: PlayerId) -> bool {
        self.votes.contains_key(&player)
    }

    pub fn lie_count(&self) -> usize {
        self.lies.len()
    }

    /// Voters who picked the given entry. Used for the reveal projection.
    pub fn votes_for(&self, answer_id: AnswerId) -> Vec<PlayerId> {
        self.votes
            .iter()
            .filter(|(_, choice)| **choice == answer_id)
            .map(|(voter, _)| *voter)
            .collect()
    }

    /// Record (or revise) a player's decoy.
    ///
    /// # Errors
    ///
    /// Rejects the round's expert and any submission after the answer set
    /// has been constructed.
    pub fn record_lie(&mut self, author: PlayerId, text: String) -> Result<()> {
        if author == self.expert_id {
            return Err(GameError::ValidationFailed(
                "the expert cannot submit a decoy".into(),
            ));
        }
        if self.answers_built() {
            return Err(GameError::ValidationFailed(
                "the answer set is already locked".into(),
            ));
        }
        self.lies.insert(author, text);
        Ok(())
    }

    /// Construct the answer set: the truth plus every decoy, plus an
    /// optional synthesized extra, shuffled exactly once. A second call is
    /// a no-op; the set is immutable for the rest of the round.
    pub fn build_answers(&mut self, extra_decoy: Option<String>, rng: &mut impl Rng) {
        if self.answers_built() {
            return;
        }
        let mut answers = Vec::with_capacity(self.lies.len() + 2);
        answers.push(Answer {
            id: Uuid::new_v4(),
            text: self.truth_text.clone(),
            author: AnswerAuthor::Expert,
        });
        // Stable source order so id assignment is reproducible per round.
        let mut authors: Vec<PlayerId> = self.lies.keys().copied().collect();
        authors.sort_unstable();
        for author in authors {
            if let Some(text) = self.lies.get(&author) {
                answers.push(Answer {
                    id: Uuid::new_v4(),
                    text: text.clone(),
                    author: AnswerAuthor::Player(author),
                });
            }
        }
        if let Some(text) = extra_decoy {
            answers.push(Answer {
                id: Uuid::new_v4(),
                text,
                author: AnswerAuthor::House,
            });
        }
        answers.shuffle(rng);
        self.answers = answers;
    }

    /// Record a vote.
    ///
    /// # Errors
    ///
    /// Rejects the expert, repeat voters, unknown answer ids, and votes
    /// for the voter's own entry.
    pub fn record_vote(&mut self, voter: PlayerId, answer_id: AnswerId) -> Result<()> {
        if !self.answers_built() {
            return Err(GameError::ValidationFailed("voting is not open".into()));
        }
        if voter == self.expert_id {
            return Err(GameError::ValidationFailed(
                "the expert cannot vote in their own round".into(),
            ));
        }
        if self.votes.contains_key(&voter) {
            return Err(GameError::ValidationFailed("vote already recorded".into()));
        }
        let answer = self
            .answers
            .iter()
            .find(|a| a.id == answer_id)
            .ok_or_else(|| GameError::ValidationFailed("unknown answer id".into()))?;
        if answer.author == AnswerAuthor::Player(voter) {
            return Err(GameError::ValidationFailed(
                "cannot vote for your own entry".into(),
            ));
        }
        self.votes.insert(voter, answer_id);
        Ok(())
    }

    /// Tally the round into per-player score deltas and freeze it.
    ///
    /// Deterministic over (answer set, votes): iteration runs over the
    /// answer set, so vote arrival order cannot change the result. The
    /// expert never earns from the tally. Idempotent; later calls return
    /// the frozen result.
    pub fn tally(&mut self, rules: &ScoreRules) -> &HashMap<PlayerId, u64> {
        if self.deltas.is_none() {
            let mut deltas: HashMap<PlayerId, u64> = HashMap::new();
            for answer in &self.answers {
                let voters = self.votes_for(answer.id);
                match answer.author {
                    AnswerAuthor::Expert => {
                        for voter in voters {
                            *deltas.entry(voter).or_default() += rules.truth_reward;
                        }
                    }
                    AnswerAuthor::Player(author) => {
                        let fooled = voters.iter().filter(|v| **v != author).count() as u64;
                        if fooled > 0 {
                            *deltas.entry(author).or_default() += rules.fool_reward * fooled;
                        }
                    }
                    AnswerAuthor::House => {}
                }
            }
            self.deltas = Some(deltas);
        }
        // Just stored above when absent.
        self.deltas.get_or_insert_with(HashMap::new)
    }

    /// The frozen deltas, if the round has been scored.
    pub fn deltas(&self) -> Option<&HashMap<PlayerId, u64>> {
        self.deltas.as_ref()
    }

    pub fn is_scored(&self) -> bool {
        self.deltas.is_some()
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
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn item() -> ContentItem {
        ContentItem {
            id: "7431".into(),
            title: "Glass Frog".into(),
            body: "The glass frog's skin is translucent. Its organs are visible.".into(),
            source_url: "https://example.test/glass-frog".into(),
        }
    }

    fn ids(n: usize) -> Vec<PlayerId> {
        (1..=n as u128).map(Uuid::from_u128).collect()
    }

    fn built_round(expert: PlayerId, liars: &[PlayerId]) -> Round {
        let mut round = Round::new(0, expert, item(), "The truth.".into());
        for (i, liar) in liars.iter().enumerate() {
            round.record_lie(*liar, format!("Lie number {i}")).unwrap();
        }
        let mut rng = StdRng::seed_from_u64(11);
        round.build_answers(None, &mut rng);
        round
    }

    #[test]
    fn expert_rotation_prefers_fewest_turns() {
        let roster = ids(3);
        assert_eq!(assign_expert(&roster, &[]), Some(roster[0]));
        assert_eq!(assign_expert(&roster, &[roster[0]]), Some(roster[1]));
        assert_eq!(
            assign_expert(&roster, &[roster[0], roster[1]]),
            Some(roster[2])
        );
    }

    #[test]
    fn expert_rotation_avoids_immediate_repeat() {
        let roster = ids(3);
        // Everyone has had one turn; the last expert must not go again.
        let prior = vec![roster[0], roster[1], roster[2]];
        assert_eq!(assign_expert(&roster, &prior), Some(roster[0]));
    }

    #[test]
    fn single_player_roster_may_repeat() {
        let roster = ids(1);
        assert_eq!(assign_expert(&roster, &[roster[0]]), Some(roster[0]));
        assert_eq!(assign_expert(&[], &[]), None);
    }

    #[test]
    fn expert_cannot_submit_a_decoy() {
        let players = ids(3);
        let mut round = Round::new(0, players[0], item(), "The truth.".into());
        assert!(matches!(
            round.record_lie(players[0], "A sneaky lie".into()),
            Err(GameError::ValidationFailed(_))
        ));
        assert!(round.record_lie(players[1], "A fine lie".into()).is_ok());
    }

    #[test]
    fn answer_set_has_one_truth_and_expected_size() {
        let players = ids(4);
        let round = built_round(players[0], &players[1..]);
        // 3 decoys + the truth.
        assert_eq!(round.answers().len(), 4);
        assert_eq!(round.answers().iter().filter(|a| a.is_truth()).count(), 1);
    }

    #[test]
    fn synthesized_extra_decoy_grows_the_set_by_one() {
        let players = ids(4);
        let mut round = Round::new(0, players[0], item(), "The truth.".into());
        for liar in &players[1..] {
            round.record_lie(*liar, "Lie".into()).unwrap();
        }
        let mut rng = StdRng::seed_from_u64(5);
        round.build_answers(Some("A house decoy.".into()), &mut rng);
        assert_eq!(round.answers().len(), 5);
        assert_eq!(round.answers().iter().filter(|a| a.is_truth()).count(), 1);
        assert_eq!(
            round
                .answers()
                .iter()
                .filter(|a| a.author == AnswerAuthor::House)
                .count(),
            1
        );
    }

    #[test]
    fn answer_set_is_immutable_once_built() {
        let players = ids(3);
        let mut round = built_round(players[0], &players[1..]);
        let before: Vec<AnswerId> = round.answers().iter().map(|a| a.id).collect();

        // Rebuilding is a no-op; late lies are rejected.
        let mut rng = StdRng::seed_from_u64(99);
        round.build_answers(Some("late extra".into()), &mut rng);
        let after: Vec<AnswerId> = round.answers().iter().map(|a| a.id).collect();
        assert_eq!(before, after);
        assert!(round.record_lie(players[1], "too late".into()).is_err());
    }

    #[test]
    fn vote_validation_rejects_expert_repeats_and_unknown_ids() {
        let players = ids(4);
        let mut round = built_round(players[0], &players[1..]);
        let truth_id = round
            .answers()
            .iter()
            .find(|a| a.is_truth())
            .map(|a| a.id)
            .unwrap();

        assert!(matches!(
            round.record_vote(players[0], truth_id),
            Err(GameError::ValidationFailed(_))
        ));
        assert!(matches!(
            round.record_vote(players[1], Uuid::new_v4()),
            Err(GameError::ValidationFailed(_))
        ));
        assert!(round.record_vote(players[1], truth_id).is_ok());
        assert!(matches!(
            round.record_vote(players[1], truth_id),
            Err(GameError::ValidationFailed(_))
        ));
    }

    #[test]
    fn voting_for_your_own_entry_is_rejected() {
        let players = ids(3);
        let mut round = built_round(players[0], &players[1..]);
        let own = round
            .answers()
            .iter()
            .find(|a| a.author == AnswerAuthor::Player(players[1]))
            .map(|a| a.id)
            .unwrap();
        assert!(matches!(
            round.record_vote(players[1], own),
            Err(GameError::ValidationFailed(_))
        ));
    }

    #[test]
    fn tally_rewards_truth_finders_and_foolers() {
        let players = ids(4);
        let mut round = built_round(players[0], &players[1..]);
        let truth_id = round
            .answers()
            .iter()
            .find(|a| a.is_truth())
            .map(|a| a.id)
            .unwrap();
        let lie_of_1 = round
            .answers()
            .iter()
            .find(|a| a.author == AnswerAuthor::Player(players[1]))
            .map(|a| a.id)
            .unwrap();

        round.record_vote(players[1], truth_id).unwrap();
        round.record_vote(players[2], lie_of_1).unwrap();
        round.record_vote(players[3], lie_of_1).unwrap();

        let rules = ScoreRules::default();
        let deltas = round.tally(&rules).clone();
        assert_eq!(deltas.get(&players[1]).copied(), Some(500 + 2 * 250));
        assert!(!deltas.contains_key(&players[2]));
        assert!(!deltas.contains_key(&players[3]));
        // The expert never earns from the tally.
        assert!(!deltas.contains_key(&players[0]));
        assert!(round.is_scored());
    }

    #[test]
    fn tally_is_independent_of_vote_arrival_order() {
        let players = ids(4);
        let base = built_round(players[0], &players[1..]);
        let truth_id = base
            .answers()
            .iter()
            .find(|a| a.is_truth())
            .map(|a| a.id)
            .unwrap();
        let some_lie = base
            .answers()
            .iter()
            .find(|a| a.author == AnswerAuthor::Player(players[3]))
            .map(|a| a.id)
            .unwrap();

        let rules = ScoreRules::default();
        let mut forward = base.clone();
        forward.record_vote(players[1], truth_id).unwrap();
        forward.record_vote(players[2], some_lie).unwrap();
        let forward_deltas = forward.tally(&rules).clone();

        let mut reverse = base;
        reverse.record_vote(players[2], some_lie).unwrap();
        reverse.record_vote(players[1], truth_id).unwrap();
        let reverse_deltas = reverse.tally(&rules).clone();

        assert_eq!(forward_deltas, reverse_deltas);
    }

    #[test]
    fn synthesize_decoy_clips_to_first_sentence() {
        let text = synthesize_decoy(&item(), 280);
        assert_eq!(text, "The glass frog's skin is translucent.");
        let clipped = synthesize_decoy(&item(), 9);
        assert_eq!(clipped.chars().count(), 9);
    }
}
