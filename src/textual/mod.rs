//! Textual protocol module - the zero-copy value/command model.
//!
//! Implements the classic five-type textual wire format (simple string,
//! error, integer, bulk string, array) over a single reusable backing
//! buffer:
//!
//! - [`Value`] - arena-style value tree with `set_*` writers and an async
//!   [`Value::read_from`] parser
//! - [`Command`] - name/arguments view over a parsed value
//! - [`btoi64`]/[`btou64`]/[`append_int`] - decimal parse/format helpers

mod command;
mod number;
mod value;

pub use command::Command;
pub use number::{append_int, btoi64, btou64};
pub use value::{Kind, SlotMut, Value, ValueRef, MAX_ARRAY_LEN, MAX_BULK_LEN, MAX_INLINE_LEN};
