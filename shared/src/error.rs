use crate::player::RoomId;
use std::time::Duration;
use thiserror::Error;

/// A frame that could not be turned into a [`crate::Message`], or could not
/// be framed at all.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("unknown message type '{0}'")]
    UnknownTag(String),
    #[error("malformed payload for '{tag}': {reason}")]
    MalformedPayload { tag: String, reason: String },
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
    #[error("frame of {0} bytes exceeds the maximum frame size")]
    FrameTooLarge(usize),
    #[error("encode error: {0}")]
    Encode(String),
}

impl From<bincode::Error> for ProtocolError {
    fn from(e: bincode::Error) -> Self {
        ProtocolError::MalformedFrame(e.to_string())
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        ProtocolError::MalformedFrame(e.to_string())
    }
}

/// Why the server refused to place a connection in a room.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("connection is already registered")]
    AlreadyRegistered,
    #[error("room {0} is full")]
    RoomFull(RoomId),
    #[error("all {0} rooms are in use")]
    ServerFull(usize),
    #[error("room {0} does not exist")]
    UnknownRoom(RoomId),
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("timed out connecting to {addr} after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },
    #[error("connection closed")]
    Closed,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
