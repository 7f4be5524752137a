//! Session module - the connection-owning runtime.
//!
//! Provides:
//! - [`Session`] - builder-style session that runs the read and write loops
//! - [`SessionHandle`] - clonable write/close handle
//! - [`SessionEventHandler`]/[`CommandHandler`] - caller contracts
//! - [`BodyReader`] - size-bounded reader over one binary message body

mod config;
mod handler;
mod session;

pub use config::{ContentType, SessionConfig};
pub use handler::{BodyReader, CommandHandler, SessionEventHandler};
pub use session::{Session, SessionHandle};
