//! Session configuration.

use std::time::Duration;

use crate::buffer::{DEFAULT_MAX_IDLE_PAGES, DEFAULT_PAGE_SIZE};
use crate::codec::MAX_BODY_SIZE;

/// Wire protocol negotiated by the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    /// Varint-framed binary messages.
    Binary,
    /// Textual line/array commands.
    Text,
}

impl ContentType {
    /// Integer carried on the `hello` line.
    pub fn wire_value(self) -> i64 {
        match self {
            ContentType::Binary => 1,
            ContentType::Text => 2,
        }
    }

    /// Decode the `hello` line integer.
    pub fn from_wire(v: i64) -> Option<Self> {
        match v {
            1 => Some(ContentType::Binary),
            2 => Some(ContentType::Text),
            _ => None,
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContentType::Binary => f.write_str("binary"),
            ContentType::Text => f.write_str("text"),
        }
    }
}

/// Configuration for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Page size of the outbound queue (power of two).
    pub page_size: usize,
    /// Pages the outbound queue retains when idle.
    pub max_idle_pages: usize,
    /// Optional bound on how long one record read may take.
    pub read_timeout: Option<Duration>,
    /// Maximum accepted binary message body, capped at
    /// [`MAX_BODY_SIZE`](crate::codec::MAX_BODY_SIZE).
    pub max_body_size: u64,
    /// When set, this side opens the handshake by sending
    /// `+hello <contentType>` as soon as the session starts.
    pub initiate: Option<ContentType>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            max_idle_pages: DEFAULT_MAX_IDLE_PAGES,
            read_timeout: None,
            max_body_size: MAX_BODY_SIZE,
            initiate: None,
        }
    }
}
