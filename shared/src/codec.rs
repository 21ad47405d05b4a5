//! Framing for [`Message`] on a byte stream.
//!
//! Two interchangeable framings carry the same message set:
//! - `Binary`: a 4-byte big-endian length prefix followed by a bincode body.
//! - `Json`: one JSON envelope per line, `{"_m": tag, "_p": payload}`.
//!
//! Decoding failures are reported as [`ProtocolError`]s so callers can log
//! and skip a bad frame; only framing errors (an oversized or truncated
//! frame) leave the stream unusable.

use crate::error::{ProtocolError, TransportError};
use crate::protocol::Message;
use crate::MAX_FRAME_SIZE;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireFormat {
    #[default]
    Binary,
    Json,
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireFormat::Binary => f.write_str("binary"),
            WireFormat::Json => f.write_str("json"),
        }
    }
}

impl FromStr for WireFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "binary" | "bincode" => Ok(WireFormat::Binary),
            "json" => Ok(WireFormat::Json),
            other => Err(format!("unknown wire format '{}'", other)),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "_m")]
    tag: String,
    #[serde(rename = "_p", default)]
    payload: serde_json::Value,
}

/// Serializes a message body without any framing.
pub fn encode_body(format: WireFormat, message: &Message) -> Result<Vec<u8>, ProtocolError> {
    match format {
        WireFormat::Binary => {
            bincode::serialize(message).map_err(|e| ProtocolError::Encode(e.to_string()))
        }
        WireFormat::Json => {
            let value =
                serde_json::to_value(message).map_err(|e| ProtocolError::Encode(e.to_string()))?;
            let (tag, payload) = match value {
                serde_json::Value::Object(map) if map.len() == 1 => match map.into_iter().next() {
                    Some(entry) => entry,
                    None => return Err(ProtocolError::Encode("empty message".to_string())),
                },
                other => {
                    return Err(ProtocolError::Encode(format!(
                        "unexpected message shape: {}",
                        other
                    )))
                }
            };

            serde_json::to_vec(&Envelope { tag, payload })
                .map_err(|e| ProtocolError::Encode(e.to_string()))
        }
    }
}

/// Parses a message body that has already been split out of the stream.
pub fn decode_body(format: WireFormat, body: &[u8]) -> Result<Message, ProtocolError> {
    match format {
        WireFormat::Binary => decode_binary(body),
        WireFormat::Json => decode_json(body),
    }
}

fn decode_binary(body: &[u8]) -> Result<Message, ProtocolError> {
    // bincode writes the variant index as a little-endian u32 up front.
    if body.len() >= 4 {
        let index = u32::from_le_bytes([body[0], body[1], body[2], body[3]]) as usize;
        if index >= Message::TAGS.len() {
            return Err(ProtocolError::UnknownTag(format!("#{}", index)));
        }
        let tag = Message::TAGS[index];
        return bincode::deserialize(body).map_err(|e| ProtocolError::MalformedPayload {
            tag: tag.to_string(),
            reason: e.to_string(),
        });
    }

    Err(ProtocolError::MalformedFrame(format!(
        "{} byte body is too short",
        body.len()
    )))
}

fn decode_json(body: &[u8]) -> Result<Message, ProtocolError> {
    let envelope: Envelope = serde_json::from_slice(body)?;

    if !Message::is_known_tag(&envelope.tag) {
        return Err(ProtocolError::UnknownTag(envelope.tag));
    }

    let payload = match envelope.payload {
        serde_json::Value::Null => serde_json::Value::Object(serde_json::Map::new()),
        payload => payload,
    };

    let mut tagged = serde_json::Map::new();
    tagged.insert(envelope.tag.clone(), payload);

    serde_json::from_value(serde_json::Value::Object(tagged)).map_err(|e| {
        ProtocolError::MalformedPayload {
            tag: envelope.tag,
            reason: e.to_string(),
        }
    })
}

/// Encodes and writes one framed message, flushing the writer.
pub async fn write_message<W>(
    writer: &mut W,
    format: WireFormat,
    message: &Message,
) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    let body = encode_body(format, message)?;
    if body.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(body.len()).into());
    }

    match format {
        WireFormat::Binary => {
            writer.write_u32(body.len() as u32).await?;
            writer.write_all(&body).await?;
        }
        WireFormat::Json => {
            writer.write_all(&body).await?;
            writer.write_all(b"\n").await?;
        }
    }

    writer.flush().await?;
    Ok(())
}

/// Reads the next frame body. Returns `Ok(None)` on a clean end of stream.
pub async fn read_frame<R>(reader: &mut R, format: WireFormat) -> Result<Option<Vec<u8>>, TransportError>
where
    R: AsyncBufRead + Unpin,
{
    match format {
        WireFormat::Binary => {
            let mut len_bytes = [0u8; 4];
            match reader.read_exact(&mut len_bytes).await {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
                Err(e) => return Err(e.into()),
            }

            let len = u32::from_be_bytes(len_bytes) as usize;
            if len > MAX_FRAME_SIZE {
                return Err(ProtocolError::FrameTooLarge(len).into());
            }

            let mut body = vec![0u8; len];
            reader.read_exact(&mut body).await?;
            Ok(Some(body))
        }
        WireFormat::Json => loop {
            let mut line = Vec::new();
            let read = (&mut *reader)
                .take(MAX_FRAME_SIZE as u64 + 1)
                .read_until(b'\n', &mut line)
                .await?;

            if read == 0 {
                return Ok(None);
            }

            if line.last() == Some(&b'\n') {
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
            } else if line.len() > MAX_FRAME_SIZE {
                return Err(ProtocolError::FrameTooLarge(line.len()).into());
            }

            if line.iter().all(|b| b.is_ascii_whitespace()) {
                continue;
            }

            return Ok(Some(line));
        },
    }
}

/// Reads and decodes the next message.
///
/// The outer `Result` carries transport failures (the stream is done); the
/// inner one carries per-frame decode failures that the caller may skip.
pub async fn read_message<R>(
    reader: &mut R,
    format: WireFormat,
) -> Result<Option<Result<Message, ProtocolError>>, TransportError>
where
    R: AsyncBufRead + Unpin,
{
    Ok(read_frame(reader, format)
        .await?
        .map(|body| decode_body(format, &body)))
}
