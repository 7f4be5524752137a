//! Textual protocol value tree.
//!
//! A [`Value`] is an arena: one growing byte buffer plus a pool of node
//! slots addressed by `(begin, end)` windows into it. Writers append the
//! wire representation and record where the payload landed, so serialization
//! needs no second copy; the parser appends payload bytes as they arrive off
//! the wire and hands out windows the same way. The root value is created
//! once per session and recycled across commands with [`Value::reset`].
//!
//! The five wire types mirror the classic request/reply format: simple
//! string (`+`), error (`-`), integer (`:`), bulk string (`$`, nilable) and
//! array (`*`, nilable, recursive). A line with no recognized tag is an
//! inline command: its space-separated words become an implicit array of
//! bulk strings.
//!
//! # Example
//!
//! ```
//! use sesswire::textual::Value;
//!
//! let mut value = Value::new();
//! value.set_string("OK");
//! assert_eq!(value.wire(), b"+OK\r\n");
//!
//! value.set_array(2);
//! value.item_mut(0).set_integer(1);
//! value.item_mut(1).set_nil();
//! assert_eq!(value.wire(), b"*2\r\n:1\r\n$-1\r\n");
//! ```

use std::future::Future;
use std::io;
use std::pin::Pin;

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt};

use super::number::{append_int, btoi64};
use crate::error::{Result, SesswireError};

/// Maximum accepted line length (simple strings, errors, inline commands).
pub const MAX_INLINE_LEN: usize = 64 * 1024;

/// Maximum accepted bulk string payload (512 MiB).
pub const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Maximum accepted array element count.
pub const MAX_ARRAY_LEN: usize = 1024 * 1024;

/// Maximum array nesting depth while parsing.
const MAX_PARSE_DEPTH: u32 = 32;

/// Node slot count the pool is trimmed back to on reset.
const SLOT_TRIM: usize = 64;

/// Type tag of a textual value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Kind {
    /// Unset slot.
    #[default]
    None,
    /// Simple string (`+...`).
    String,
    /// Error (`-...`).
    Error,
    /// Integer (`:...`).
    Integer,
    /// Bulk string (`$<len>`), possibly nil.
    Bulk,
    /// Array (`*<count>`), possibly nil.
    Array,
}

#[derive(Debug, Default)]
struct Node {
    kind: Kind,
    begin: usize,
    end: usize,
    absent: bool,
    children: Vec<usize>,
}

/// A reusable textual value tree backed by one byte buffer.
pub struct Value {
    /// Backing buffer; payload windows of every node point into it.
    raw: BytesMut,
    /// Slot pool; slot 0 is the root.
    nodes: Vec<Node>,
    /// Running count of slots in use.
    used: usize,
    /// Scratch buffer for line reads.
    line: Vec<u8>,
}

impl Value {
    /// Create an empty value.
    pub fn new() -> Self {
        Self {
            raw: BytesMut::new(),
            nodes: vec![Node::default()],
            used: 1,
            line: Vec::new(),
        }
    }

    /// Clear the value for reuse.
    ///
    /// Keeps the backing buffer's allocation and up to [`SLOT_TRIM`] node
    /// slots so steady-state traffic does not reallocate.
    pub fn reset(&mut self) {
        self.raw.clear();
        self.used = 1;
        self.reset_node(0);
        if self.nodes.len() > SLOT_TRIM {
            self.nodes.truncate(SLOT_TRIM);
        }
    }

    fn reset_node(&mut self, idx: usize) {
        let node = &mut self.nodes[idx];
        node.kind = Kind::None;
        node.begin = 0;
        node.end = 0;
        node.absent = false;
        node.children.clear();
    }

    /// Take the next slot from the pool, growing it if exhausted.
    fn alloc(&mut self) -> usize {
        let idx = self.used;
        if idx < self.nodes.len() {
            self.reset_node(idx);
        } else {
            self.nodes.push(Node::default());
        }
        self.used += 1;
        idx
    }

    /// Serialized bytes accumulated by the `set_*` writers.
    pub fn wire(&self) -> &[u8] {
        &self.raw
    }

    /// Read-only view of the root node.
    pub fn root(&self) -> ValueRef<'_> {
        ValueRef { value: self, idx: 0 }
    }

    // Writers. Each resets the tree and appends the wire representation of
    // the new content, recording the payload window as it goes.

    /// Set a simple string (`+<s>\r\n`).
    pub fn set_string(&mut self, s: &str) {
        self.reset();
        self.write_string(0, s);
    }

    /// Set an error (`-<msg>\r\n`).
    pub fn set_error(&mut self, msg: &str) {
        self.reset();
        self.write_error(0, msg);
    }

    /// Set an integer (`:<v>\r\n`).
    pub fn set_integer(&mut self, v: i64) {
        self.reset();
        self.write_integer(0, v);
    }

    /// Set a bulk string (`$<len>\r\n<bytes>\r\n`).
    pub fn set_bytes(&mut self, b: &[u8]) {
        self.reset();
        self.write_bytes(0, b);
    }

    /// Set a nil bulk string (`$-1\r\n`).
    pub fn set_nil(&mut self) {
        self.reset();
        self.write_nil(0);
    }

    /// Set a nil array (`*-1\r\n`).
    pub fn set_nil_array(&mut self) {
        self.reset();
        self.write_nil_array(0);
    }

    /// Start an array of `len` elements (`*<len>\r\n`).
    ///
    /// Fill the elements in order with [`Value::item_mut`]; the wire bytes
    /// are only complete once every element has been set.
    pub fn set_array(&mut self, len: usize) {
        self.reset();
        self.write_array_header(0, len);
    }

    /// Writer for root array element `i`.
    ///
    /// # Panics
    ///
    /// Panics if the root is not an array or `i` is out of bounds; both are
    /// caller bugs, not wire conditions.
    pub fn item_mut(&mut self, i: usize) -> SlotMut<'_> {
        assert_eq!(self.nodes[0].kind, Kind::Array, "root is not an array");
        let idx = self.nodes[0].children[i];
        SlotMut { value: self, idx }
    }

    fn write_string(&mut self, idx: usize, s: &str) {
        self.raw.put_u8(b'+');
        let begin = self.raw.len();
        self.raw.put_slice(s.as_bytes());
        let end = self.raw.len();
        self.raw.put_slice(b"\r\n");
        let node = &mut self.nodes[idx];
        node.kind = Kind::String;
        node.begin = begin;
        node.end = end;
    }

    fn write_error(&mut self, idx: usize, msg: &str) {
        self.raw.put_u8(b'-');
        let begin = self.raw.len();
        self.raw.put_slice(msg.as_bytes());
        let end = self.raw.len();
        self.raw.put_slice(b"\r\n");
        let node = &mut self.nodes[idx];
        node.kind = Kind::Error;
        node.begin = begin;
        node.end = end;
    }

    fn write_integer(&mut self, idx: usize, v: i64) {
        self.raw.put_u8(b':');
        let begin = self.raw.len();
        append_int(&mut self.raw, v);
        let end = self.raw.len();
        self.raw.put_slice(b"\r\n");
        let node = &mut self.nodes[idx];
        node.kind = Kind::Integer;
        node.begin = begin;
        node.end = end;
    }

    fn write_bytes(&mut self, idx: usize, b: &[u8]) {
        self.raw.put_u8(b'$');
        append_int(&mut self.raw, b.len() as i64);
        self.raw.put_slice(b"\r\n");
        let begin = self.raw.len();
        self.raw.put_slice(b);
        let end = self.raw.len();
        self.raw.put_slice(b"\r\n");
        let node = &mut self.nodes[idx];
        node.kind = Kind::Bulk;
        node.begin = begin;
        node.end = end;
    }

    fn write_nil(&mut self, idx: usize) {
        self.raw.put_slice(b"$-1\r\n");
        let at = self.raw.len();
        let node = &mut self.nodes[idx];
        node.kind = Kind::Bulk;
        node.begin = at;
        node.end = at;
        node.absent = true;
    }

    fn write_nil_array(&mut self, idx: usize) {
        self.raw.put_slice(b"*-1\r\n");
        let at = self.raw.len();
        let node = &mut self.nodes[idx];
        node.kind = Kind::Array;
        node.begin = at;
        node.end = at;
        node.absent = true;
    }

    fn write_array_header(&mut self, idx: usize, len: usize) {
        self.raw.put_u8(b'*');
        append_int(&mut self.raw, len as i64);
        self.raw.put_slice(b"\r\n");
        let at = self.raw.len();
        let children: Vec<usize> = (0..len).map(|_| self.alloc()).collect();
        let node = &mut self.nodes[idx];
        node.kind = Kind::Array;
        node.begin = at;
        node.end = at;
        node.children = children;
    }

    /// Parse one value from `reader`, replacing this tree's content.
    ///
    /// Returns [`SesswireError::ConnectionClosed`] when the stream ends
    /// cleanly before the first tag byte; EOF anywhere inside a value is an
    /// I/O error.
    pub async fn read_from<R>(&mut self, reader: &mut R) -> Result<()>
    where
        R: AsyncBufRead + Unpin + Send,
    {
        self.reset();
        self.parse_node(0, reader, 0).await
    }

    fn parse_node<'a, R>(
        &'a mut self,
        idx: usize,
        reader: &'a mut R,
        depth: u32,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>
    where
        R: AsyncBufRead + Unpin + Send,
    {
        Box::pin(async move {
            if depth > MAX_PARSE_DEPTH {
                return Err(SesswireError::Protocol(
                    "array nesting too deep".to_string(),
                ));
            }
            let tag = read_tag(&mut *reader, depth == 0).await?;
            match tag {
                b'+' => {
                    read_line(&mut *reader, &mut self.line).await?;
                    let begin = self.raw.len();
                    self.raw.extend_from_slice(&self.line);
                    let node = &mut self.nodes[idx];
                    node.kind = Kind::String;
                    node.begin = begin;
                    node.end = begin + self.line.len();
                }
                b'-' => {
                    read_line(&mut *reader, &mut self.line).await?;
                    let begin = self.raw.len();
                    self.raw.extend_from_slice(&self.line);
                    let node = &mut self.nodes[idx];
                    node.kind = Kind::Error;
                    node.begin = begin;
                    node.end = begin + self.line.len();
                }
                b':' => {
                    read_line(&mut *reader, &mut self.line).await?;
                    btoi64(&self.line)?;
                    let begin = self.raw.len();
                    self.raw.extend_from_slice(&self.line);
                    let node = &mut self.nodes[idx];
                    node.kind = Kind::Integer;
                    node.begin = begin;
                    node.end = begin + self.line.len();
                }
                b'$' => {
                    read_line(&mut *reader, &mut self.line).await?;
                    let declared = btoi64(&self.line)?;
                    if declared < 0 {
                        let at = self.raw.len();
                        let node = &mut self.nodes[idx];
                        node.kind = Kind::Bulk;
                        node.begin = at;
                        node.end = at;
                        node.absent = true;
                        return Ok(());
                    }
                    let len = declared as usize;
                    if len > MAX_BULK_LEN {
                        return Err(SesswireError::Overflow {
                            subject: "bulk string",
                            value: len as u64,
                            max: MAX_BULK_LEN as u64,
                        });
                    }
                    let begin = self.raw.len();
                    self.raw.resize(begin + len, 0);
                    reader.read_exact(&mut self.raw[begin..]).await?;
                    consume_line_ending(&mut *reader).await?;
                    let node = &mut self.nodes[idx];
                    node.kind = Kind::Bulk;
                    node.begin = begin;
                    node.end = begin + len;
                }
                b'*' => {
                    read_line(&mut *reader, &mut self.line).await?;
                    let declared = btoi64(&self.line)?;
                    if declared < 0 {
                        let at = self.raw.len();
                        let node = &mut self.nodes[idx];
                        node.kind = Kind::Array;
                        node.begin = at;
                        node.end = at;
                        node.absent = true;
                        return Ok(());
                    }
                    let count = declared as usize;
                    if count > MAX_ARRAY_LEN {
                        return Err(SesswireError::Overflow {
                            subject: "array",
                            value: count as u64,
                            max: MAX_ARRAY_LEN as u64,
                        });
                    }
                    let children: Vec<usize> = (0..count).map(|_| self.alloc()).collect();
                    {
                        let node = &mut self.nodes[idx];
                        node.kind = Kind::Array;
                        node.children = children.clone();
                    }
                    for kid in children {
                        self.parse_node(kid, &mut *reader, depth + 1).await?;
                    }
                }
                first => {
                    // No recognized tag: one inline line, space-split into
                    // an implicit array of bulk strings.
                    read_line(&mut *reader, &mut self.line).await?;
                    let begin = self.raw.len();
                    self.raw.put_u8(first);
                    self.raw.extend_from_slice(&self.line);
                    let end = self.raw.len();

                    let mut children = Vec::new();
                    let mut at = begin;
                    while at < end {
                        if self.raw[at] == b' ' {
                            at += 1;
                            continue;
                        }
                        let word_begin = at;
                        while at < end && self.raw[at] != b' ' {
                            at += 1;
                        }
                        let kid = self.alloc();
                        let node = &mut self.nodes[kid];
                        node.kind = Kind::Bulk;
                        node.begin = word_begin;
                        node.end = at;
                        children.push(kid);
                    }
                    let node = &mut self.nodes[idx];
                    node.kind = Kind::Array;
                    node.begin = begin;
                    node.end = end;
                    node.children = children;
                }
            }
            Ok(())
        })
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Value")
            .field("kind", &self.nodes[0].kind)
            .field("raw_len", &self.raw.len())
            .field("slots", &self.used)
            .finish()
    }
}

/// Read the next type tag, skipping stray CR/LF/space bytes.
///
/// `at_boundary` marks the position before a value starts, where a clean
/// EOF is a normal end of stream rather than a truncation.
async fn read_tag<R: AsyncRead + Unpin>(reader: &mut R, at_boundary: bool) -> Result<u8> {
    loop {
        let b = match reader.read_u8().await {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof && at_boundary => {
                return Err(SesswireError::ConnectionClosed)
            }
            Err(e) => return Err(e.into()),
        };
        match b {
            b'\r' | b'\n' | b' ' => continue,
            other => return Ok(other),
        }
    }
}

/// Read one line into `line` (terminator stripped), bounded by
/// [`MAX_INLINE_LEN`].
async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R, line: &mut Vec<u8>) -> Result<()> {
    line.clear();
    let mut limited = reader.take((MAX_INLINE_LEN + 2) as u64);
    let n = limited.read_until(b'\n', line).await?;
    if n == 0 {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "line truncated").into());
    }
    if line.last() != Some(&b'\n') {
        return Err(if line.len() > MAX_INLINE_LEN {
            SesswireError::Overflow {
                subject: "line",
                value: line.len() as u64,
                max: MAX_INLINE_LEN as u64,
            }
        } else {
            io::Error::new(io::ErrorKind::UnexpectedEof, "line truncated").into()
        });
    }
    line.pop();
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    Ok(())
}

/// Consume the `\r\n` (or bare `\n`) after a bulk payload.
async fn consume_line_ending<R: AsyncRead + Unpin>(reader: &mut R) -> Result<()> {
    match reader.read_u8().await? {
        b'\n' => Ok(()),
        b'\r' => match reader.read_u8().await? {
            b'\n' => Ok(()),
            other => Err(SesswireError::Protocol(format!(
                "expected LF after bulk payload, got {other:#04x}"
            ))),
        },
        other => Err(SesswireError::Protocol(format!(
            "expected line ending after bulk payload, got {other:#04x}"
        ))),
    }
}

/// Read-only view of one node in a [`Value`].
#[derive(Clone, Copy)]
pub struct ValueRef<'a> {
    value: &'a Value,
    idx: usize,
}

impl<'a> ValueRef<'a> {
    fn node(&self) -> &'a Node {
        &self.value.nodes[self.idx]
    }

    /// Type tag of this node.
    pub fn kind(&self) -> Kind {
        self.node().kind
    }

    /// Whether this value is the nil bulk/array.
    pub fn is_nil(&self) -> bool {
        self.node().absent
    }

    /// Payload bytes (empty for nil values).
    pub fn payload(&self) -> &'a [u8] {
        let node = self.node();
        &self.value.raw[node.begin..node.end]
    }

    /// Parse the payload as a signed integer.
    pub fn integer(&self) -> Result<i64> {
        btoi64(self.payload())
    }

    /// Number of array elements (zero for non-arrays).
    pub fn len(&self) -> usize {
        self.node().children.len()
    }

    /// Whether this node has no array elements.
    pub fn is_empty(&self) -> bool {
        self.node().children.is_empty()
    }

    /// View of array element `i`.
    pub fn item(&self, i: usize) -> Option<ValueRef<'a>> {
        self.node().children.get(i).map(|&idx| ValueRef {
            value: self.value,
            idx,
        })
    }
}

impl std::fmt::Debug for ValueRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueRef")
            .field("kind", &self.kind())
            .field("nil", &self.is_nil())
            .field("payload_len", &self.payload().len())
            .field("children", &self.len())
            .finish()
    }
}

/// Writer for one allocated node slot (an array element).
pub struct SlotMut<'a> {
    value: &'a mut Value,
    idx: usize,
}

impl SlotMut<'_> {
    /// Write a simple string into this slot.
    pub fn set_string(&mut self, s: &str) {
        self.value.write_string(self.idx, s);
    }

    /// Write an error into this slot.
    pub fn set_error(&mut self, msg: &str) {
        self.value.write_error(self.idx, msg);
    }

    /// Write an integer into this slot.
    pub fn set_integer(&mut self, v: i64) {
        self.value.write_integer(self.idx, v);
    }

    /// Write a bulk string into this slot.
    pub fn set_bytes(&mut self, b: &[u8]) {
        self.value.write_bytes(self.idx, b);
    }

    /// Write a nil bulk into this slot.
    pub fn set_nil(&mut self) {
        self.value.write_nil(self.idx);
    }

    /// Start a nested array in this slot.
    pub fn set_array(&mut self, len: usize) {
        self.value.write_array_header(self.idx, len);
    }

    /// Writer for nested array element `i`.
    ///
    /// # Panics
    ///
    /// Panics if this slot is not an array or `i` is out of bounds.
    pub fn item_mut(&mut self, i: usize) -> SlotMut<'_> {
        assert_eq!(
            self.value.nodes[self.idx].kind,
            Kind::Array,
            "slot is not an array"
        );
        let idx = self.value.nodes[self.idx].children[i];
        SlotMut {
            value: self.value,
            idx,
        }
    }
}
