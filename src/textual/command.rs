//! Command view over a parsed textual value.
//!
//! A command arrives either as an array of bulk strings
//! (`*2\r\n$4\r\nECHO\r\n$2\r\nhi\r\n`), as an inline line already split by
//! the parser, or as a simple-string line (`+hello 2`) whose content is
//! space-separated words. [`Command`] normalizes all three into a name plus
//! arguments without copying any payload bytes.
//!
//! # Example
//!
//! ```
//! use sesswire::textual::{Command, Value};
//!
//! let mut value = Value::new();
//! value.set_array(2);
//! value.item_mut(0).set_bytes(b"ECHO");
//! value.item_mut(1).set_bytes(b"hi");
//!
//! let cmd = Command::parse(&value).unwrap();
//! assert!(cmd.name_eq("echo"));
//! assert_eq!(cmd.narg(), 1);
//! assert_eq!(cmd.arg(0), Some(&b"hi"[..]));
//! ```

use super::value::{Kind, Value};

/// A textual command: a name and zero or more byte-string arguments.
pub struct Command<'a> {
    /// Name followed by arguments, each a window into the value's buffer.
    words: Vec<&'a [u8]>,
}

impl<'a> Command<'a> {
    /// Interpret the root of a parsed value as a command.
    ///
    /// Returns `None` for values that cannot be commands: integers, errors,
    /// nil or empty arrays, and blank lines.
    pub fn parse(value: &'a Value) -> Option<Self> {
        let root = value.root();
        let words: Vec<&[u8]> = match root.kind() {
            Kind::Array if !root.is_nil() => (0..root.len())
                .map(|i| root.item(i).map_or(&b""[..], |item| item.payload()))
                .collect(),
            Kind::String | Kind::Bulk if !root.is_nil() => root
                .payload()
                .split(|&b| b == b' ')
                .filter(|w| !w.is_empty())
                .collect(),
            _ => return None,
        };
        if words.is_empty() || words[0].is_empty() {
            return None;
        }
        Some(Self { words })
    }

    /// The command name (first word).
    pub fn name(&self) -> &'a [u8] {
        self.words[0]
    }

    /// Case-insensitive name comparison.
    pub fn name_eq(&self, name: &str) -> bool {
        self.words[0].eq_ignore_ascii_case(name.as_bytes())
    }

    /// Number of arguments after the name.
    pub fn narg(&self) -> usize {
        self.words.len() - 1
    }

    /// Argument `i` (zero-based, not counting the name).
    pub fn arg(&self, i: usize) -> Option<&'a [u8]> {
        self.words.get(i + 1).copied()
    }
}

impl std::fmt::Debug for Command<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("name", &String::from_utf8_lossy(self.name()))
            .field("narg", &self.narg())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn parse_wire(wire: &[u8]) -> Value {
        let mut value = Value::new();
        let mut src = wire;
        value.read_from(&mut src).await.unwrap();
        value
    }

    #[tokio::test]
    async fn test_array_command() {
        let value = parse_wire(b"*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nvalue\r\n").await;
        let cmd = Command::parse(&value).unwrap();

        assert_eq!(cmd.name(), b"SET");
        assert!(cmd.name_eq("set"));
        assert_eq!(cmd.narg(), 2);
        assert_eq!(cmd.arg(0), Some(&b"key"[..]));
        assert_eq!(cmd.arg(1), Some(&b"value"[..]));
        assert_eq!(cmd.arg(2), None);
    }

    #[tokio::test]
    async fn test_inline_command() {
        let value = parse_wire(b"PING abc\r\n").await;
        let cmd = Command::parse(&value).unwrap();
        assert!(cmd.name_eq("ping"));
        assert_eq!(cmd.narg(), 1);
        assert_eq!(cmd.arg(0), Some(&b"abc"[..]));
    }

    #[tokio::test]
    async fn test_simple_string_command() {
        let value = parse_wire(b"+hello 2\r\n").await;
        let cmd = Command::parse(&value).unwrap();
        assert!(cmd.name_eq("hello"));
        assert_eq!(cmd.narg(), 1);
        assert_eq!(cmd.arg(0), Some(&b"2"[..]));
    }

    #[tokio::test]
    async fn test_no_arg_command() {
        let value = parse_wire(b"*1\r\n$4\r\nPING\r\n").await;
        let cmd = Command::parse(&value).unwrap();
        assert!(cmd.name_eq("ping"));
        assert_eq!(cmd.narg(), 0);
        assert_eq!(cmd.arg(0), None);
    }

    #[tokio::test]
    async fn test_non_commands() {
        assert!(Command::parse(&parse_wire(b":42\r\n").await).is_none());
        assert!(Command::parse(&parse_wire(b"-ERR x\r\n").await).is_none());
        assert!(Command::parse(&parse_wire(b"*-1\r\n").await).is_none());
        assert!(Command::parse(&parse_wire(b"*0\r\n").await).is_none());
        assert!(Command::parse(&parse_wire(b"$-1\r\n").await).is_none());
    }
}
