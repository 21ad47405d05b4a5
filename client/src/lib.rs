//! # Session Client Library
//!
//! The client side of the arcade party session. Each player runs a minigame
//! locally; this library keeps that minigame in step with the rest of the
//! room without ever simulating anyone else's game.
//!
//! ## Architecture Overview
//!
//! ### Mirror, Never Assert
//! The client holds a copy of the room (who is present, their minigame,
//! status and score) that only changes when a server broadcast arrives.
//! Calls like [`network::Client::update_score`] just send a request; the
//! local copy catches up when the server echoes the change back. This keeps
//! every peer converging on the same view.
//!
//! ### Attacks
//! When an opponent's score crosses a breakpoint the server broadcasts an
//! attack. The client sums incoming strength into a damage queue that the
//! minigame drains once per frame with [`network::Client::take_damage`].
//!
//! ### Threading
//! A background task owns the socket. It updates the mirror, sets dirty
//! flags and invokes the installed listeners. A render loop can either
//! react to listeners or poll [`network::Client::poll_changes`] each frame.
//!
//! ## Module Organization
//!
//! ### Session Module (`session`)
//! The room mirror, the damage queue and the dirty flags.
//!
//! ### Network Module (`network`)
//! Connection setup, the listener set, outbound calls and keep-alives.
//!
//! ### Lobby Module (`lobby`)
//! The local host/join/countdown/launch state machine.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::{Client, ClientOptions, Listeners};
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), shared::TransportError> {
//! let client = Client::connect(ClientOptions::default()).await?;
//! client.listen(
//!     Listeners::new()
//!         .on_score_changed(|id, score| println!("player {} has {}", id, score))
//!         .on_network_closed(|graceful| println!("closed (graceful: {})", graceful)),
//! );
//!
//! let me = client.registered(Duration::from_secs(5)).await?;
//! println!("playing {} as player {}", me.game, me.id);
//!
//! client.update_score(1_500)?;
//! let attacks = client.take_damage();
//! # let _ = attacks;
//! client.close();
//! # Ok(())
//! # }
//! ```

pub mod lobby;
pub mod network;
pub mod session;
