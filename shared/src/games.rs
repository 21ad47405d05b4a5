//! Catalogue of minigames the server can hand out.

use rand::seq::SliceRandom;
use rand::Rng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameInfo {
    pub id: &'static str,
    /// Beta titles are only assigned when the server opts in.
    pub beta: bool,
}

pub const ALL: &[GameInfo] = &[
    GameInfo { id: "asteroids", beta: false },
    GameInfo { id: "breakout", beta: false },
    GameInfo { id: "missile-command", beta: false },
    GameInfo { id: "snake", beta: false },
    GameInfo { id: "space-invaders", beta: false },
    GameInfo { id: "tempest", beta: false },
    GameInfo { id: "tetris", beta: false },
    GameInfo { id: "pacman", beta: true },
];

pub fn find(id: &str) -> Option<&'static GameInfo> {
    ALL.iter().find(|game| game.id == id)
}

pub fn available(include_beta: bool) -> Vec<&'static GameInfo> {
    ALL.iter().filter(|game| include_beta || !game.beta).collect()
}

pub fn random_game<R: Rng + ?Sized>(rng: &mut R, include_beta: bool) -> &'static str {
    available(include_beta)
        .choose(rng)
        .map(|game| game.id)
        .unwrap_or(ALL[0].id)
}
