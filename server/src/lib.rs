//! # Coordination Server Library
//!
//! The authoritative side of the arcade party session. The server never
//! simulates a game: each client runs its own mini-game locally and only
//! reports scores and lifecycle changes. The server groups players into
//! rooms, decides who is in the round, turns score growth into attacks and
//! fans every change out to the rest of the room.
//!
//! ## Architecture
//!
//! ### Single Event Loop
//! One task owns all state. Per-connection reader tasks decode frames and
//! forward them over a channel; the loop applies them to [`game::GameState`]
//! and queues the resulting messages on per-connection writer tasks. Since
//! only the loop mutates state, broadcasts leave in the order changes were
//! applied.
//!
//! ### Transport
//! Plain TCP, with either length-prefixed bincode or newline-delimited JSON
//! framing (see [`shared::codec`]). A frame that fails to decode is logged
//! and skipped; it never tears down the connection.
//!
//! ## Module Organization
//!
//! ### Config Module (`config`)
//! Listening address, room mode and the lifecycle timeouts.
//!
//! ### Room Manager Module (`room_manager`)
//! Room allocation per mode and capacity enforcement.
//!
//! ### Game Module (`game`)
//! Registration ordering, status transitions, score breakpoints, round
//! finalization and the inactivity sweep.
//!
//! ### Network Module (`network`)
//! Connection tasks, the event loop and [`network::ServerHandle`] for
//! running a server in-process.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::ServerHandle;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = ServerHandle::spawn(ServerConfig::default()).await?;
//!     println!("listening on {}", server.local_addr());
//!
//!     tokio::signal::ctrl_c().await?;
//!     server.stop().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod game;
pub mod network;
pub mod room_manager;
