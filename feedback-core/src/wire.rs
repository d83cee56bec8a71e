//! Framing: length-prefix (4 bytes BE) + UTF-8 JSON body.

use crate::protocol::{Message, KNOWN_TYPES};

pub const LEN_SIZE: usize = 4;
pub const MAX_FRAME_LEN: u32 = 10 * 1024 * 1024; // 10 MiB

/// Encode a message into a single frame: 4 bytes BE length + JSON body.
pub fn encode_frame(msg: &Message) -> Result<Vec<u8>, FrameEncodeError> {
    let payload = serde_json::to_vec(msg).map_err(FrameEncodeError::Encode)?;
    if payload.len() > MAX_FRAME_LEN as usize {
        return Err(FrameEncodeError::TooLarge(payload.len()));
    }
    let len = payload.len() as u32;
    let mut out = Vec::with_capacity(LEN_SIZE + payload.len());
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Error encoding a message into a frame (serialization or size limit).
#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("frame too large: {0} bytes")]
    TooLarge(usize),
}

/// Read the declared body length from a 4-byte header and check it against the limits.
pub fn parse_len(header: [u8; LEN_SIZE]) -> Result<usize, FrameDecodeError> {
    let len = u32::from_be_bytes(header);
    if len == 0 {
        return Err(FrameDecodeError::Empty);
    }
    if len > MAX_FRAME_LEN {
        return Err(FrameDecodeError::TooLarge(len));
    }
    Ok(len as usize)
}

/// Decode one frame from the front of `bytes`. Returns the message and the number of bytes consumed.
/// Call with partial buffer; returns `NeedMore` if not enough bytes (caller should try again after more data).
pub fn decode_frame(bytes: &[u8]) -> Result<(Message, usize), FrameDecodeError> {
    if bytes.len() < LEN_SIZE {
        return Err(FrameDecodeError::NeedMore);
    }
    let len = parse_len([bytes[0], bytes[1], bytes[2], bytes[3]])?;
    if bytes.len() < LEN_SIZE + len {
        return Err(FrameDecodeError::NeedMore);
    }
    let msg = parse_body(&bytes[LEN_SIZE..LEN_SIZE + len])?;
    Ok((msg, LEN_SIZE + len))
}

/// Parse a frame body into a typed message.
///
/// Goes through `serde_json::Value` first so that a body which is valid JSON but carries an
/// unknown or missing `type` is told apart from one that is not JSON at all.
pub fn parse_body(body: &[u8]) -> Result<Message, FrameDecodeError> {
    let value: serde_json::Value = serde_json::from_slice(body).map_err(FrameDecodeError::Json)?;
    let kind = match value.get("type").and_then(|t| t.as_str()) {
        Some(k) => k.to_owned(),
        None => return Err(FrameDecodeError::MissingType),
    };
    if !KNOWN_TYPES.contains(&kind.as_str()) {
        return Err(FrameDecodeError::UnsupportedType(kind));
    }
    serde_json::from_value(value).map_err(|e| FrameDecodeError::InvalidMessage {
        kind,
        reason: e.to_string(),
    })
}

/// Error decoding a frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("need more bytes")]
    NeedMore,
    #[error("declared frame length is zero")]
    Empty,
    #[error("frame too large: {0} bytes")]
    TooLarge(u32),
    #[error("malformed json: {0}")]
    Json(serde_json::Error),
    #[error("message has no type")]
    MissingType,
    #[error("unsupported message type: {0}")]
    UnsupportedType(String),
    #[error("invalid {kind} message: {reason}")]
    InvalidMessage { kind: String, reason: String },
}

impl FrameDecodeError {
    /// Whether the stream can no longer be trusted after this error.
    /// Non-fatal errors cover a fully read frame whose content we cannot use; skip it and go on.
    pub fn is_fatal(&self) -> bool {
        match self {
            FrameDecodeError::NeedMore
            | FrameDecodeError::MissingType
            | FrameDecodeError::UnsupportedType(_)
            | FrameDecodeError::InvalidMessage { .. } => false,
            FrameDecodeError::Empty | FrameDecodeError::TooLarge(_) | FrameDecodeError::Json(_) => {
                true
            }
        }
    }
}
