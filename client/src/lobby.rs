//! Local lobby flow: host or join, wait for players, count down, launch.
//!
//! The state is never sent to the server. Each peer walks through it on its
//! own, driven by what its session proxy reports.

use std::fmt;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Length of the countdown between `BeginGame` and launching the minigame.
pub const COUNTDOWN_DURATION: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LobbyState {
    Splash,
    ConnectingToServer,
    StartingServer,
    ClientReady,
    ServerWaitingForClients,
    ServerReadyToStart,
    CountdownToGame,
    /// Carries the minigame this peer was assigned.
    LaunchingGame(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LobbyAction {
    AttemptToStartServer,
    StartedServer,
    AttemptToJoinServer,
    JoinedServer,
    ClientsUpdated,
    BeginGame,
    CountdownComplete(String),
}

impl fmt::Display for LobbyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LobbyState::LaunchingGame(game) => write!(f, "LaunchingGame({})", game),
            other => write!(f, "{:?}", other),
        }
    }
}

impl fmt::Display for LobbyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LobbyAction::CountdownComplete(game) => write!(f, "CountdownComplete({})", game),
            other => write!(f, "{:?}", other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid lobby transition: {action} in {state}")]
pub struct InvalidTransition {
    pub state: LobbyState,
    pub action: LobbyAction,
}

/// The transition table. Any pair not listed is invalid.
pub fn transition(state: &LobbyState, action: LobbyAction) -> Result<LobbyState, InvalidTransition> {
    use LobbyAction as A;
    use LobbyState as S;

    let next = match (state, &action) {
        (S::Splash, A::AttemptToStartServer) => S::StartingServer,
        (S::Splash, A::AttemptToJoinServer) => S::ConnectingToServer,
        (S::StartingServer, A::StartedServer) => S::ServerWaitingForClients,
        (S::ConnectingToServer, A::JoinedServer) => S::ClientReady,
        (S::ServerWaitingForClients, A::ClientsUpdated) => S::ServerReadyToStart,
        (S::ServerReadyToStart, A::BeginGame) => S::CountdownToGame,
        (S::ClientReady, A::ClientsUpdated) => S::ClientReady,
        (S::ClientReady, A::BeginGame) => S::CountdownToGame,
        (S::CountdownToGame, A::CountdownComplete(game)) => S::LaunchingGame(game.clone()),
        _ => {
            return Err(InvalidTransition {
                state: state.clone(),
                action,
            })
        }
    };

    Ok(next)
}

/// Lobby state plus the countdown clock.
#[derive(Debug)]
pub struct Lobby {
    state: LobbyState,
    countdown_started: Option<Instant>,
    countdown: Duration,
}

impl Default for Lobby {
    fn default() -> Self {
        Self::new()
    }
}

impl Lobby {
    pub fn new() -> Self {
        Self::with_countdown(COUNTDOWN_DURATION)
    }

    pub fn with_countdown(countdown: Duration) -> Self {
        Self {
            state: LobbyState::Splash,
            countdown_started: None,
            countdown,
        }
    }

    pub fn state(&self) -> &LobbyState {
        &self.state
    }

    pub fn can(&self, action: &LobbyAction) -> bool {
        transition(&self.state, action.clone()).is_ok()
    }

    /// Applies an action.
    ///
    /// # Panics
    ///
    /// On any pair missing from the transition table. An invalid action is
    /// a bug in the caller, not a runtime condition.
    pub fn dispatch(&mut self, action: LobbyAction) -> &LobbyState {
        let starts_countdown = action == LobbyAction::BeginGame;

        match transition(&self.state, action) {
            Ok(next) => {
                log::debug!("Lobby: {} -> {}", self.state, next);
                self.state = next;
            }
            Err(e) => panic!("{}", e),
        }

        if starts_countdown {
            self.countdown_started = Some(Instant::now());
        }

        &self.state
    }

    /// Time left on the countdown, or `None` outside `CountdownToGame`.
    pub fn countdown_remaining(&self, now: Instant) -> Option<Duration> {
        match (&self.state, self.countdown_started) {
            (LobbyState::CountdownToGame, Some(started)) => {
                Some(self.countdown.saturating_sub(now.saturating_duration_since(started)))
            }
            _ => None,
        }
    }

    /// Completes the countdown with `game` once it has run out. Returns true
    /// if the lobby moved to `LaunchingGame`.
    pub fn poll_countdown(&mut self, now: Instant, game: &str) -> bool {
        match self.countdown_remaining(now) {
            Some(remaining) if remaining.is_zero() => {
                self.countdown_started = None;
                self.dispatch(LobbyAction::CountdownComplete(game.to_string()));
                true
            }
            _ => false,
        }
    }
}
