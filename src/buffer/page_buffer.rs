//! Page-allocated circular byte queue.
//!
//! [`PageBuffer`] stores a single logical byte stream in a list of fixed-size
//! pages, so the outbound backlog never needs one contiguous allocation
//! proportional to total traffic. Writes append at the logical tail, reads
//! copy from the logical head, and consumed pages are recycled in place.
//!
//! The write side and the read side run on different execution paths (the
//! session stages bytes from any task, the write loop drains them), so both
//! operations are plain slice copies that never block and never deep-copy the
//! whole backlog.
//!
//! # Example
//!
//! ```
//! use sesswire::buffer::PageBuffer;
//! use std::io::{Read, Write};
//!
//! let mut buf = PageBuffer::new(8, 2);
//! buf.write_all(b"hello world").unwrap();
//!
//! let mut out = [0u8; 5];
//! buf.read_exact(&mut out).unwrap();
//! assert_eq!(&out, b"hello");
//! assert_eq!(buf.len(), 6);
//! ```

use std::io;

/// Default page size in bytes.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Default number of pages retained when the buffer is idle.
pub const DEFAULT_MAX_IDLE_PAGES: usize = 16;

/// A growable queue of fixed-size byte pages forming one logical stream.
///
/// The read cursor is kept as `(page index, offset within page)`; the write
/// frontier is derived from the cursor plus the logical length, so the two
/// never disagree.
pub struct PageBuffer {
    /// Page size in bytes (power of two, immutable after construction).
    page_size: usize,
    /// `log2(page_size)`, for page-index arithmetic.
    page_shift: u32,
    /// `page_size - 1`, for offset-within-page arithmetic.
    page_mask: usize,
    /// Ordered page list; unread data starts at `(read_page, read_off)`.
    pages: Vec<Box<[u8]>>,
    /// Page index of the read cursor.
    read_page: usize,
    /// Offset of the read cursor within its page (always `< page_size`).
    read_off: usize,
    /// Number of unread bytes.
    len: usize,
    /// Pages retained when the buffer is reset while idle.
    max_idle_pages: usize,
}

impl PageBuffer {
    /// Create a buffer with the given page size and idle-page cap.
    ///
    /// # Panics
    ///
    /// Panics if `page_size` is not a power of two `>= 2` or if
    /// `max_idle_pages` is zero. These are construction-time configuration
    /// errors, not runtime conditions.
    pub fn new(page_size: usize, max_idle_pages: usize) -> Self {
        assert!(
            page_size.is_power_of_two() && page_size >= 2,
            "page size must be a power of two >= 2"
        );
        assert!(max_idle_pages >= 1, "idle-page cap must be >= 1");
        Self {
            page_size,
            page_shift: page_size.trailing_zeros(),
            page_mask: page_size - 1,
            pages: vec![vec![0u8; page_size].into_boxed_slice()],
            read_page: 0,
            read_off: 0,
            len: 0,
            max_idle_pages,
        }
    }

    /// Number of unread bytes in the buffer.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check whether the buffer holds no unread bytes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Total byte capacity of the currently allocated pages.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.pages.len() << self.page_shift
    }

    /// Configured page size.
    #[inline]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Absolute byte position of the read cursor.
    #[inline]
    fn read_abs(&self) -> usize {
        (self.read_page << self.page_shift) + self.read_off
    }

    /// Drop consumed content and trim the page list back to the idle cap.
    ///
    /// Unread bytes (if any) keep their position relative to the cursor;
    /// consumed full pages are rotated out of the window first, then surplus
    /// pages beyond `max(pages needed, idle cap)` are freed.
    pub fn reset(&mut self) {
        if self.read_page > 0 {
            self.pages.rotate_left(self.read_page);
            self.read_page = 0;
        }
        if self.len == 0 {
            self.read_off = 0;
        }
        let used = self.read_off + self.len;
        let needed = (used + self.page_mask) >> self.page_shift;
        let keep = needed.max(self.max_idle_pages).max(1);
        if self.pages.len() > keep {
            self.pages.truncate(keep);
        }
    }

    /// Make room for `additional` bytes past the write frontier.
    ///
    /// Consumed pages are reclaimed first by rotating them past the frontier
    /// (cursor wrap-around with page-index arithmetic); only if that is
    /// insufficient are new pages allocated, at least half the current page
    /// count at a time to amortize growth.
    fn ensure_capacity(&mut self, additional: usize) {
        if self.read_abs() + self.len + additional <= self.capacity() {
            return;
        }
        if self.read_page > 0 {
            self.pages.rotate_left(self.read_page);
            self.read_page = 0;
        }
        let needed = self.read_off + self.len + additional;
        if needed <= self.capacity() {
            return;
        }
        let missing = needed - self.capacity();
        let min_pages = (missing + self.page_mask) >> self.page_shift;
        let grow = min_pages.max(self.pages.len() / 2).max(1);
        for _ in 0..grow {
            self.pages.push(vec![0u8; self.page_size].into_boxed_slice());
        }
    }
}

impl io::Write for PageBuffer {
    /// Append `data` at the logical tail.
    ///
    /// Never fails: capacity is reclaimed or grown as needed.
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        self.ensure_capacity(data.len());

        let mut abs = self.read_abs() + self.len;
        let mut rest = data;
        while !rest.is_empty() {
            let page = abs >> self.page_shift;
            let off = abs & self.page_mask;
            let n = (self.page_size - off).min(rest.len());
            self.pages[page][off..off + n].copy_from_slice(&rest[..n]);
            abs += n;
            rest = &rest[n..];
        }
        self.len += data.len();
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Read for PageBuffer {
    /// Copy from the logical head into `out`, advancing the cursor.
    ///
    /// Returns `Ok(0)` when the buffer is empty and `out` is non-empty;
    /// that is the end-of-data signal.
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let want = out.len().min(self.len);
        if want == 0 {
            return Ok(0);
        }

        let mut abs = self.read_abs();
        let mut copied = 0;
        while copied < want {
            let page = abs >> self.page_shift;
            let off = abs & self.page_mask;
            let n = (self.page_size - off).min(want - copied);
            out[copied..copied + n].copy_from_slice(&self.pages[page][off..off + n]);
            abs += n;
            copied += n;
        }

        self.read_page = abs >> self.page_shift;
        self.read_off = abs & self.page_mask;
        self.len -= want;
        Ok(want)
    }
}

impl std::fmt::Debug for PageBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageBuffer")
            .field("page_size", &self.page_size)
            .field("pages", &self.pages.len())
            .field("len", &self.len)
            .field("read_page", &self.read_page)
            .field("read_off", &self.read_off)
            .finish()
    }
}

impl Default for PageBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE, DEFAULT_MAX_IDLE_PAGES)
    }
}
