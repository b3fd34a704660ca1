//! Length-prefixed framing for envelopes.
//!
//! Frame format:
//! ```text
//! +----------------+---------------+----------------------+
//! | length (u32 BE)| opcode (i16 BE)| body (JSON, optional)|
//! +----------------+---------------+----------------------+
//! ```
//! `length` counts the opcode and body bytes.

use crate::{Envelope, Opcode, ProtocolError};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde_json::{Map, Value};

/// Size of the length prefix.
pub const HEADER_SIZE: usize = 4;

pub const OPCODE_SIZE: usize = 2;

/// Largest accepted opcode + body length (64 KiB).
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Encode an envelope into a complete frame.
pub fn encode(envelope: &Envelope) -> Result<Bytes, ProtocolError> {
    let opcode = envelope.opcode();
    let encode_error = |source| ProtocolError::Encode { opcode, source };

    // Struct variants serialize as `{"NAME": {fields}}`, unit variants as `"NAME"`.
    let body = match serde_json::to_value(envelope).map_err(encode_error)? {
        Value::Object(mut tagged) => {
            let fields = tagged.remove(opcode.name()).unwrap_or(Value::Null);
            serde_json::to_vec(&fields).map_err(encode_error)?
        }
        _ => Vec::new(),
    };

    let len = OPCODE_SIZE + body.len();
    if len > MAX_FRAME_SIZE {
        return Err(ProtocolError::TooLarge {
            len,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut frame = BytesMut::with_capacity(HEADER_SIZE + len);
    frame.put_u32(len as u32);
    frame.put_i16(opcode as i16);
    frame.put_slice(&body);
    Ok(frame.freeze())
}

/// Decode the first frame in `buf`.
///
/// Returns the envelope and the bytes following it, or `None` when `buf` does
/// not yet hold a complete frame. A header that can never become valid fails
/// immediately instead of waiting for more bytes.
pub fn decode(buf: &[u8]) -> Result<Option<(Envelope, &[u8])>, ProtocolError> {
    if buf.len() < HEADER_SIZE {
        return Ok(None);
    }

    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if len < OPCODE_SIZE {
        return Err(ProtocolError::Truncated(len));
    }
    if len > MAX_FRAME_SIZE {
        return Err(ProtocolError::TooLarge {
            len,
            max: MAX_FRAME_SIZE,
        });
    }
    if buf.len() < HEADER_SIZE + len {
        return Ok(None);
    }

    let (frame, rest) = buf[HEADER_SIZE..].split_at(len);
    let raw = i16::from_be_bytes([frame[0], frame[1]]);
    let opcode = Opcode::from_i16(raw).ok_or(ProtocolError::UnknownOpcode(raw))?;
    let envelope = decode_body(opcode, &frame[OPCODE_SIZE..])?;

    Ok(Some((envelope, rest)))
}

fn decode_body(opcode: Opcode, body: &[u8]) -> Result<Envelope, ProtocolError> {
    let body_error = |source| ProtocolError::Body { opcode, source };

    let tagged = if opcode.has_fields() {
        let fields: Value = serde_json::from_slice(body).map_err(body_error)?;
        let mut tagged = Map::new();
        tagged.insert(opcode.name().to_string(), fields);
        Value::Object(tagged)
    } else {
        // Field-less opcodes may still carry `null` or `{}`; anything else must at least be JSON.
        if !body.is_empty() {
            serde_json::from_slice::<serde::de::IgnoredAny>(body).map_err(body_error)?;
        }
        Value::String(opcode.name().to_string())
    };

    serde_json::from_value(tagged).map_err(body_error)
}

/// Reassembly buffer for one stream. Bytes go in as they are read, complete
/// envelopes come out in order.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: BytesMut,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Pop the next complete envelope, if any.
    pub fn next_envelope(&mut self) -> Result<Option<Envelope>, ProtocolError> {
        let (envelope, consumed) = match decode(&self.buf)? {
            Some((envelope, rest)) => (envelope, self.buf.len() - rest.len()),
            None => return Ok(None),
        };
        self.buf.advance(consumed);
        Ok(Some(envelope))
    }

    /// Bytes held for a frame that is not complete yet.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}
