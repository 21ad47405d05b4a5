//! Score tracking and the breakpoint rule that converts score into attacks.
//!
//! Every time a player's cumulative score reaches their next breakpoint, the
//! breakpoint moves up by one unit and opponents receive one point of attack
//! strength. The result depends only on the score trace and the breakpoint
//! size, so server and clients derive identical attacks.

use crate::player::PlayerId;
use std::collections::HashMap;

pub const SCORE_BREAKPOINT_SIZE: u64 = 40_000;

#[derive(Debug, Clone)]
pub struct PlayerScores {
    breakpoint_size: u64,
    scores: HashMap<PlayerId, u64>,
    /// Breakpoints already converted into attacks. Absent means none.
    crossed: HashMap<PlayerId, u64>,
}

impl Default for PlayerScores {
    fn default() -> Self {
        Self::new()
    }
}

impl PlayerScores {
    pub fn new() -> Self {
        Self::with_breakpoint_size(SCORE_BREAKPOINT_SIZE)
    }

    /// A zero size would never advance; it is bumped to 1.
    pub fn with_breakpoint_size(breakpoint_size: u64) -> Self {
        Self {
            breakpoint_size: breakpoint_size.max(1),
            scores: HashMap::new(),
            crossed: HashMap::new(),
        }
    }

    pub fn breakpoint_size(&self) -> u64 {
        self.breakpoint_size
    }

    pub fn score_for(&self, player: PlayerId) -> u64 {
        self.scores.get(&player).copied().unwrap_or(0)
    }

    /// Next score at which an attack is emitted. Saturates at `u64::MAX`.
    pub fn next_breakpoint_for(&self, player: PlayerId) -> u64 {
        self.breakpoints_crossed(player)
            .saturating_add(1)
            .saturating_mul(self.breakpoint_size)
    }

    /// Total breakpoints this player has crossed since the last `clear`.
    pub fn breakpoints_crossed(&self, player: PlayerId) -> u64 {
        self.crossed.get(&player).copied().unwrap_or(0)
    }

    /// Records a score without deriving any attack.
    ///
    /// Used by a client for its own score, where the server is responsible
    /// for telling everyone else.
    pub fn update_score_ignore_breakpoints(&mut self, player: PlayerId, score: u64) {
        self.scores.insert(player, score);
    }

    /// Advances the player's breakpoint past their current score and returns
    /// how many breakpoints were crossed. A lower score never un-crosses a
    /// breakpoint. The count is uncapped up to `u32::MAX`.
    pub fn advance_breakpoints(&mut self, player: PlayerId) -> u32 {
        let reached = self.score_for(player) / self.breakpoint_size;
        let previous = self.breakpoints_crossed(player);
        if reached <= previous {
            return 0;
        }

        self.crossed.insert(player, reached);
        u32::try_from(reached - previous).unwrap_or(u32::MAX)
    }

    /// Records a score and returns the attack strength it produces.
    pub fn record(&mut self, player: PlayerId, score: u64) -> u32 {
        self.update_score_ignore_breakpoints(player, score);
        self.advance_breakpoints(player)
    }

    pub fn remove(&mut self, player: PlayerId) {
        self.scores.remove(&player);
        self.crossed.remove(&player);
    }

    /// Forgets every score and breakpoint, ready for a new round.
    pub fn clear(&mut self) {
        self.scores.clear();
        self.crossed.clear();
    }

    /// Scores sorted highest first; ties ordered by player id.
    pub fn ranking(&self) -> Vec<(PlayerId, u64)> {
        let mut ranking: Vec<(PlayerId, u64)> =
            self.scores.iter().map(|(id, score)| (*id, *score)).collect();
        ranking.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        ranking
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_breakpoint_trace() {
        let mut scores = PlayerScores::new();
        let crossed: Vec<u32> = [0, 39_999, 40_000, 90_000]
            .iter()
            .map(|score| scores.record(1, *score))
            .collect();

        assert_eq!(crossed, vec![0, 0, 1, 1]);
        assert_eq!(scores.breakpoints_crossed(1), 2);
        assert_eq!(scores.next_breakpoint_for(1), 120_000);
    }

    #[test]
    fn test_single_update_crossing_many_breakpoints() {
        let mut scores = PlayerScores::new();
        assert_eq!(scores.record(1, 400_000), 10);
        assert_eq!(scores.advance_breakpoints(1), 0);
    }

    #[test]
    fn test_huge_score_returns_promptly() {
        let start = std::time::Instant::now();
        let mut scores = PlayerScores::new();

        assert_eq!(scores.record(1, 40_000 * 200_000_000), 200_000_000);
        assert_eq!(scores.record(1, u64::MAX), u32::MAX);
        assert_eq!(scores.breakpoints_crossed(1), u64::MAX / SCORE_BREAKPOINT_SIZE);
        assert_eq!(scores.next_breakpoint_for(1), u64::MAX);

        // Already crossed, so repeating the score is not another attack.
        assert_eq!(scores.record(1, u64::MAX), 0);
        assert!(start.elapsed().as_millis() < 100);
    }

    #[test]
    fn test_lower_score_does_not_recross() {
        let mut scores = PlayerScores::new();
        assert_eq!(scores.record(1, 85_000), 2);
        assert_eq!(scores.record(1, 10_000), 0);
        assert_eq!(scores.record(1, 85_000), 0);
        assert_eq!(scores.record(1, 120_000), 1);
    }

    #[test]
    fn test_players_tracked_independently() {
        let mut scores = PlayerScores::new();
        assert_eq!(scores.record(1, 45_000), 1);
        assert_eq!(scores.record(2, 10_000), 0);
        assert_eq!(scores.next_breakpoint_for(2), SCORE_BREAKPOINT_SIZE);
    }

    #[test]
    fn test_ignore_breakpoints_defers_derivation() {
        let mut scores = PlayerScores::new();
        scores.update_score_ignore_breakpoints(3, 85_000);
        assert_eq!(scores.score_for(3), 85_000);
        assert_eq!(scores.next_breakpoint_for(3), SCORE_BREAKPOINT_SIZE);
        assert_eq!(scores.advance_breakpoints(3), 2);
    }

    #[test]
    fn test_clear_resets_round() {
        let mut scores = PlayerScores::with_breakpoint_size(100);
        scores.record(1, 250);
        scores.clear();

        assert_eq!(scores.score_for(1), 0);
        assert_eq!(scores.breakpoints_crossed(1), 0);
        assert_eq!(scores.record(1, 100), 1);
    }

    #[test]
    fn test_ranking_orders_by_score() {
        let mut scores = PlayerScores::new();
        scores.record(1, 500);
        scores.record(2, 9_000);
        scores.record(3, 500);
        scores.remove(3);

        assert_eq!(scores.ranking(), vec![(2, 9_000), (1, 500)]);
    }
}
