//! Codec module - varint framing for the binary protocol.
//!
//! The binary wire format is `varint(type) | varint(size) | body`:
//! - [`put_uvarint`]/[`read_uvarint`] implement the LEB128-style varint
//! - [`Message`] is the contract a binary message type implements
//! - [`encode`]/[`decode`] frame and unframe whole records
//! - [`MessageRegistry`] maps type numbers to constructors; [`MessagePool`]
//!   recycles decoded instances
//! - [`JsonCodec`] serializes structured message bodies

mod json;
mod message;
mod registry;
mod varint;

pub use json::JsonCodec;
pub use message::{
    decode, encode, peek_header, peek_size, peek_type, Message, MAX_BODY_SIZE, MAX_TYPE_ID,
};
pub use registry::{MessageFactory, MessagePool, MessageRegistry, DEFAULT_POOL_CAP_PER_TYPE};
pub use varint::{put_uvarint, read_uvarint, uvarint_len, MAX_VARINT_LEN};
