//! # sesswire
//!
//! A connection-oriented session layer that multiplexes two wire protocols
//! over a single byte stream: a varint-framed binary message protocol and a
//! textual line/array command protocol. A negotiated handshake selects which
//! protocol governs the rest of the connection.
//!
//! ## Architecture
//!
//! - **Handshake** (textual, always first): `+hello <contentType>` selects
//!   binary or textual mode for the remainder of the connection
//! - **Binary mode**: `varint(type) | varint(size) | body` records,
//!   dispatched to [`SessionEventHandler::on_message`] through a
//!   size-bounded reader
//! - **Textual mode**: array-of-bulk-string or inline commands, dispatched
//!   to [`CommandHandler::on_command`]
//!
//! Outbound bytes are staged on a page-allocated queue ([`PageBuffer`]) and
//! drained by a dedicated write loop, so writes from handlers never block on
//! connection I/O and stay ordered.
//!
//! ## Example
//!
//! ```ignore
//! use sesswire::{CommandHandler, Session, SessionHandle};
//!
//! struct Ping;
//!
//! #[async_trait::async_trait]
//! impl CommandHandler for Ping {
//!     fn commands(&self) -> &[&str] {
//!         &["ping"]
//!     }
//!
//!     async fn on_command(
//!         &self,
//!         session: &SessionHandle,
//!         _cmd: &sesswire::textual::Command<'_>,
//!     ) -> sesswire::error::Result<()> {
//!         session.write(b"+PONG\r\n")?;
//!         Ok(())
//!     }
//! }
//!
//! # async fn run(stream: tokio::net::TcpStream) -> sesswire::error::Result<()> {
//! Session::new().commands(Ping).serve(stream).await
//! # }
//! ```

pub mod buffer;
pub mod codec;
pub mod error;
pub mod session;
pub mod textual;

pub use buffer::PageBuffer;
pub use codec::{Message, MessagePool, MessageRegistry};
pub use error::{Result, SesswireError};
pub use session::{
    BodyReader, CommandHandler, ContentType, Session, SessionConfig, SessionEventHandler,
    SessionHandle,
};
pub use textual::{Command, Value};
