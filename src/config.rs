//! Per-room configuration.

use serde::{Deserialize, Serialize};

/// Point values applied when a round is tallied.
///
/// These are configuration, not contract: deployments tune them freely. The
/// tally guarantees (expert never scores, order independence) hold for any
/// values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreRules {
    /// Awarded to each voter who picks the true write-up.
    pub truth_reward: u64,
    /// Awarded to a decoy's author per voter fooled by it.
    pub fool_reward: u64,
}

impl Default for ScoreRules {
    fn default() -> Self {
        Self {
            truth_reward: 500,
            fool_reward: 250,
        }
    }
}

/// Immutable per-room configuration, fixed at room creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomConfig {
    /// Maximum number of players the lobby admits.
    pub max_players: usize,
    /// Candidate items shown per offer. Fetches request twice this so a
    /// reroll can swap in a fresh batch.
    pub candidates_per_offer: usize,
    /// Number of topic-selection sub-rounds.
    pub research_rounds: usize,
    /// Countdown for the writing phase, in seconds.
    pub writing_secs: u32,
    /// Countdown for the decoy-writing (guessing) phase, in seconds.
    pub lie_secs: u32,
    /// Countdown per presenter during the presentation phase, in seconds.
    pub present_secs: u32,
    /// Countdown for the voting phase, in seconds.
    pub vote_secs: u32,
    /// Probability that an extra synthesized decoy joins the answer set, so
    /// guessers cannot assume one fewer lie than players.
    pub everyone_lies_chance: f64,
    /// Upper bound on submitted summary and decoy text, in characters.
    pub max_text_len: usize,
    /// Cap on guessing rounds. `None` plays one round per written entry.
    pub round_limit: Option<usize>,
    /// Point values for the tally.
    pub score_rules: ScoreRules,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            max_players: 8,
            candidates_per_offer: 3,
            research_rounds: 3,
            writing_secs: 180,
            lie_secs: 60,
            present_secs: 120,
            vote_secs: 30,
            everyone_lies_chance: 0.15,
            max_text_len: 280,
            round_limit: None,
            score_rules: ScoreRules::default(),
        }
    }
}

impl RoomConfig {
    /// Set the maximum player count.
    #[must_use]
    pub fn with_max_players(mut self, max_players: usize) -> Self {
        self.max_players = max_players;
        self
    }

    /// Set the number of topic-selection sub-rounds. Clamped to at least 1.
    #[must_use]
    pub fn with_research_rounds(mut self, research_rounds: usize) -> Self {
        self.research_rounds = research_rounds.max(1);
        self
    }

    /// Set all phase countdowns at once (writing, lie, present, vote).
    #[must_use]
    pub fn with_timers(mut self, writing: u32, lie: u32, present: u32, vote: u32) -> Self {
        self.writing_secs = writing;
        self.lie_secs = lie;
        self.present_secs = present;
        self.vote_secs = vote;
        self
    }

    /// Set the synthesized-decoy probability. Clamped to `[0, 1]`.
    #[must_use]
    pub fn with_everyone_lies_chance(mut self, chance: f64) -> Self {
        self.everyone_lies_chance = chance.clamp(0.0, 1.0);
        self
    }

    /// Cap the number of guessing rounds.
    #[must_use]
    pub fn with_round_limit(mut self, limit: usize) -> Self {
        self.round_limit = Some(limit);
        self
    }

    /// Set the tally point values.
    #[must_use]
    pub fn with_score_rules(mut self, score_rules: ScoreRules) -> Self {
        self.score_rules = score_rules;
        self
    }

    /// Items fetched per offer: the visible batch plus a reroll reserve.
    pub fn candidates_per_fetch(&self) -> usize {
        self.candidates_per_offer * 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = RoomConfig::default();
        assert_eq!(config.max_players, 8);
        assert_eq!(config.candidates_per_offer, 3);
        assert_eq!(config.research_rounds, 3);
        assert_eq!(config.writing_secs, 180);
        assert_eq!(config.lie_secs, 60);
        assert_eq!(config.vote_secs, 30);
        assert!((config.everyone_lies_chance - 0.15).abs() < f64::EPSILON);
        assert_eq!(config.score_rules.truth_reward, 500);
        assert_eq!(config.score_rules.fool_reward, 250);
        assert!(config.round_limit.is_none());
    }

    #[test]
    fn builder_clamps_chance_and_research_rounds() {
        let config = RoomConfig::default()
            .with_everyone_lies_chance(1.7)
            .with_research_rounds(0);
        assert!((config.everyone_lies_chance - 1.0).abs() < f64::EPSILON);
        assert_eq!(config.research_rounds, 1);
    }

    #[test]
    fn fetch_count_covers_a_reroll() {
        let config = RoomConfig::default();
        assert_eq!(config.candidates_per_fetch(), 6);
    }
}
