//! Caller-facing handler contracts and the bounded message body reader.
//!
//! Handlers run synchronously inside the session's read loop, so per-session
//! ordering is preserved by construction: a slow handler delays further reads
//! on its own session only.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf, Take};

use super::config::ContentType;
use super::session::SessionHandle;
use crate::error::{Result, SesswireError};
use crate::textual::Command;

/// Reader over one binary message body, bounded to its declared size.
///
/// Handed to [`SessionEventHandler::on_message`]; whatever the handler
/// leaves unread is discarded by the session before the next record, so a
/// short read can never corrupt the following record's framing.
pub struct BodyReader<'a> {
    inner: Take<&'a mut (dyn AsyncRead + Unpin + Send)>,
}

impl<'a> BodyReader<'a> {
    pub(crate) fn new(src: &'a mut (dyn AsyncRead + Unpin + Send), len: u64) -> Self {
        Self {
            inner: src.take(len),
        }
    }

    /// Bytes of the body not yet read.
    pub fn remaining(&self) -> u64 {
        self.inner.limit()
    }
}

impl AsyncRead for BodyReader<'_> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

/// Lifecycle and binary-message callbacks for one session.
///
/// All methods have defaults, so implementors override only what they need;
/// a textual-only server can skip `on_message` entirely.
#[async_trait]
pub trait SessionEventHandler: Send + Sync + 'static {
    /// Called once before the loops start.
    async fn on_open(&self, _session: &SessionHandle) {}

    /// Called exactly once at teardown with the terminal error
    /// (`None` on clean shutdown).
    async fn on_close(&self, _err: Option<&SesswireError>) {}

    /// Accept or reject the negotiated content type.
    ///
    /// An error here is reported to the peer as a `-` line and tears the
    /// connection down.
    async fn on_handshake(&self, _content_type: ContentType) -> Result<()> {
        Ok(())
    }

    /// Handle one binary message.
    ///
    /// `body` is bounded to the declared message size; unread bytes are
    /// discarded after this returns. An error is terminal for the session.
    async fn on_message(
        &self,
        _session: &SessionHandle,
        type_id: u64,
        _body: &mut BodyReader<'_>,
    ) -> Result<()> {
        Err(SesswireError::Protocol(format!(
            "no handler for binary message type {type_id}"
        )))
    }
}

/// Command callbacks, consulted only when the negotiated content type is
/// textual.
#[async_trait]
pub trait CommandHandler: Send + Sync + 'static {
    /// Names this handler serves; anything else gets an `unknown command`
    /// reply. Matching is case-insensitive.
    fn commands(&self) -> &[&str];

    /// Handle one command. An error is terminal for the session.
    async fn on_command(&self, session: &SessionHandle, cmd: &Command<'_>) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_body_reader_bounds_the_source() {
        let mut src: &[u8] = b"0123456789tail";
        let mut dynref: &mut (dyn AsyncRead + Unpin + Send) = &mut src;

        let mut body = BodyReader::new(&mut *dynref, 10);
        assert_eq!(body.remaining(), 10);

        let mut out = Vec::new();
        body.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"0123456789");
        assert_eq!(body.remaining(), 0);

        // The source keeps the bytes past the bound.
        let mut rest = Vec::new();
        src.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"tail");
    }

    #[tokio::test]
    async fn test_body_reader_partial_read() {
        let mut src: &[u8] = b"abcdef";
        let mut dynref: &mut (dyn AsyncRead + Unpin + Send) = &mut src;

        let mut body = BodyReader::new(&mut *dynref, 6);
        let mut out = [0u8; 2];
        body.read_exact(&mut out).await.unwrap();
        assert_eq!(&out, b"ab");
        assert_eq!(body.remaining(), 4);
    }
}
