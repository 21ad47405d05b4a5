//! Types shared by the coordination server and the client session proxy.
//!
//! Everything that crosses the wire lives here: the message set, the two
//! framings that carry it, the player model, and the breakpoint rule that
//! turns score growth into attacks. Both peers must agree on this crate's
//! definitions, so changes to tag names or payload keys are breaking.

pub mod codec;
pub mod directory;
pub mod error;
pub mod games;
pub mod player;
pub mod protocol;
pub mod scores;

pub use codec::WireFormat;
pub use error::{ProtocolError, RegistrationError, TransportError};
pub use player::{Player, PlayerId, PlayerStatus, RoomId};
pub use protocol::Message;
pub use scores::{PlayerScores, SCORE_BREAKPOINT_SIZE};

/// Version code sent in `RegisterPlayer` and `OnPlayerAdded`.
pub const PROTOCOL_VERSION: u32 = 9;

pub const DEFAULT_PORT: u16 = 8080;

/// Frames larger than this are treated as a protocol violation.
pub const MAX_FRAME_SIZE: usize = 64 * 1024;
