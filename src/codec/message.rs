//! Binary record framing: `varint(type) | varint(size) | body`.
//!
//! A [`Message`] supplies its numeric type, body size, and body
//! serialization; [`encode`] and [`decode`] wrap that in the varint header.
//! Both varints are validated against hard caps before any body byte is
//! interpreted, so a malformed or hostile header can never trigger a large
//! allocation or a misframed read.

use bytes::BytesMut;

use super::registry::{MessagePool, MessageRegistry};
use super::varint::{put_uvarint, read_uvarint, uvarint_len};
use crate::error::{Result, SesswireError};

/// Maximum message body size (1 GiB).
pub const MAX_BODY_SIZE: u64 = 1 << 30;

/// Maximum message type number (2^31).
pub const MAX_TYPE_ID: u64 = 1 << 31;

/// A message that can travel on the binary protocol.
///
/// Implementors provide the numeric type, the exact body size, and
/// serialize-append/deserialize-in-place for the body bytes. Instances may be
/// recycled through a [`MessagePool`]; `decode_body` must fully overwrite any
/// previous state.
pub trait Message: Send + 'static {
    /// Numeric wire type of this message (`<= 2^31`).
    fn type_id(&self) -> u64;

    /// Exact byte size of the encoded body.
    fn body_len(&self) -> usize;

    /// Append the body bytes to `buf`. Must write exactly [`Self::body_len`]
    /// bytes.
    fn encode_body(&self, buf: &mut BytesMut);

    /// Replace this message's state from `body`.
    fn decode_body(&mut self, body: &[u8]) -> Result<()>;
}

/// Encode one message as `varint(type) | varint(size) | body`.
///
/// Fails with a typed [`SesswireError::Overflow`] if the type or body size
/// exceeds its cap, and with a protocol error if the implementor wrote a
/// different number of body bytes than it declared.
pub fn encode(msg: &dyn Message) -> Result<BytesMut> {
    let type_id = msg.type_id();
    if type_id > MAX_TYPE_ID {
        return Err(SesswireError::Overflow {
            subject: "message type",
            value: type_id,
            max: MAX_TYPE_ID,
        });
    }
    let body_len = msg.body_len();
    if body_len as u64 > MAX_BODY_SIZE {
        return Err(SesswireError::Overflow {
            subject: "message body",
            value: body_len as u64,
            max: MAX_BODY_SIZE,
        });
    }

    let mut buf = BytesMut::with_capacity(uvarint_len(type_id) + uvarint_len(body_len as u64) + body_len);
    put_uvarint(&mut buf, type_id);
    put_uvarint(&mut buf, body_len as u64);
    let body_start = buf.len();
    msg.encode_body(&mut buf);
    let written = buf.len() - body_start;
    if written != body_len {
        return Err(SesswireError::Protocol(format!(
            "message type {type_id} declared a {body_len}-byte body but wrote {written}"
        )));
    }
    Ok(buf)
}

/// Decode one message from the front of `buf`.
///
/// The instance is drawn from `pool` when one is idle for the decoded type,
/// otherwise constructed through `registry`. Returns `(bytes consumed,
/// message)`. Fails with [`SesswireError::ShortBuffer`] when the full record
/// is not yet present, so callers can keep accumulating input and retry.
pub fn decode(
    buf: &[u8],
    registry: &MessageRegistry,
    mut pool: Option<&mut MessagePool>,
) -> Result<(usize, Box<dyn Message>)> {
    let (type_id, size, header_len) = peek_header(buf)?;
    let total = header_len + size as usize;
    if buf.len() < total {
        return Err(SesswireError::ShortBuffer);
    }

    let mut msg = match pool.as_deref_mut().and_then(|p| p.get(type_id)) {
        Some(idle) => idle,
        None => registry.new_message(type_id)?,
    };
    msg.decode_body(&buf[header_len..total])?;
    Ok((total, msg))
}

/// Decode the record header without consuming input.
///
/// Returns `(type, body size, header length)` after validating both values
/// against their caps.
pub fn peek_header(buf: &[u8]) -> Result<(u64, u64, usize)> {
    let (type_id, n_type) = read_uvarint(buf)?;
    if type_id > MAX_TYPE_ID {
        return Err(SesswireError::Overflow {
            subject: "message type",
            value: type_id,
            max: MAX_TYPE_ID,
        });
    }
    let (size, n_size) = read_uvarint(&buf[n_type..])?;
    if size > MAX_BODY_SIZE {
        return Err(SesswireError::Overflow {
            subject: "message body",
            value: size,
            max: MAX_BODY_SIZE,
        });
    }
    Ok((type_id, size, n_type + n_size))
}

/// Decode just the type number from a record header, without consuming input.
pub fn peek_type(buf: &[u8]) -> Result<u64> {
    peek_header(buf).map(|(type_id, _, _)| type_id)
}

/// Decode just the body size from a record header, without consuming input.
pub fn peek_size(buf: &[u8]) -> Result<u64> {
    peek_header(buf).map(|(_, size, _)| size)
}
