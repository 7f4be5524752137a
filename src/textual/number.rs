//! Decimal parsing and formatting for the textual protocol.
//!
//! Bulk lengths, array counts, and integer replies are all ASCII decimal on
//! the wire. Parsing has a fast path for short strings that cannot overflow
//! and a cutoff-based slow path that detects overflow explicitly, reporting
//! the clamped value instead of wrapping. Formatting caches the text of a
//! bounded small-integer range so the hot reply path does not allocate.

use std::sync::OnceLock;

use bytes::BufMut;

use crate::error::{Result, SesswireError};

/// Smallest integer with a precomputed formatting.
const CACHE_MIN: i64 = -128;

/// Largest integer with a precomputed formatting.
const CACHE_MAX: i64 = 1024;

/// Longest decimal digit count that can never overflow an `i64`.
const I64_FAST_DIGITS: usize = 18;

/// Longest decimal digit count that can never overflow a `u64`.
const U64_FAST_DIGITS: usize = 19;

fn invalid(s: &[u8]) -> SesswireError {
    SesswireError::Protocol(format!(
        "invalid decimal integer: {:?}",
        String::from_utf8_lossy(s)
    ))
}

/// Parse a signed decimal integer.
///
/// Overflow is reported as [`SesswireError::IntegerRange`] carrying the value
/// clamped to the violated bound.
pub fn btoi64(s: &[u8]) -> Result<i64> {
    let (neg, digits) = match s.first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    if digits.is_empty() {
        return Err(invalid(s));
    }

    // Fast path: short enough that overflow is impossible.
    if digits.len() <= I64_FAST_DIGITS {
        let mut v: i64 = 0;
        for &c in digits {
            if !c.is_ascii_digit() {
                return Err(invalid(s));
            }
            v = v * 10 + i64::from(c - b'0');
        }
        return Ok(if neg { -v } else { v });
    }

    // Slow path: accumulate the magnitude with a cutoff check per digit.
    let bound: u64 = if neg {
        1u64 << 63 // |i64::MIN|
    } else {
        (1u64 << 63) - 1 // i64::MAX
    };
    let cutoff = bound / 10;
    let last = bound % 10;
    let mut v: u64 = 0;
    for &c in digits {
        if !c.is_ascii_digit() {
            return Err(invalid(s));
        }
        let d = u64::from(c - b'0');
        if v > cutoff || (v == cutoff && d > last) {
            return Err(SesswireError::IntegerRange {
                clamped: if neg { i64::MIN } else { i64::MAX },
            });
        }
        v = v * 10 + d;
    }
    Ok(if neg {
        (v as i64).wrapping_neg()
    } else {
        v as i64
    })
}

/// Parse an unsigned decimal integer.
///
/// Overflow clamps to `u64::MAX`, reported through
/// [`SesswireError::IntegerRange`] with the clamp saturated to `i64::MAX`.
pub fn btou64(s: &[u8]) -> Result<u64> {
    let digits = match s.first() {
        Some(b'+') => &s[1..],
        _ => s,
    };
    if digits.is_empty() {
        return Err(invalid(s));
    }

    if digits.len() <= U64_FAST_DIGITS {
        let mut v: u64 = 0;
        for &c in digits {
            if !c.is_ascii_digit() {
                return Err(invalid(s));
            }
            v = v * 10 + u64::from(c - b'0');
        }
        return Ok(v);
    }

    let cutoff = u64::MAX / 10;
    let last = u64::MAX % 10;
    let mut v: u64 = 0;
    for &c in digits {
        if !c.is_ascii_digit() {
            return Err(invalid(s));
        }
        let d = u64::from(c - b'0');
        if v > cutoff || (v == cutoff && d > last) {
            return Err(SesswireError::IntegerRange { clamped: i64::MAX });
        }
        v = v * 10 + d;
    }
    Ok(v)
}

fn cache() -> &'static [Box<[u8]>] {
    static CACHE: OnceLock<Vec<Box<[u8]>>> = OnceLock::new();
    CACHE.get_or_init(|| {
        (CACHE_MIN..=CACHE_MAX)
            .map(|v| v.to_string().into_bytes().into_boxed_slice())
            .collect()
    })
}

/// Append the decimal text of `v` to `buf`.
///
/// Values in the cached range copy precomputed text; anything else formats
/// on the spot.
pub fn append_int<B: BufMut>(buf: &mut B, v: i64) {
    if (CACHE_MIN..=CACHE_MAX).contains(&v) {
        buf.put_slice(&cache()[(v - CACHE_MIN) as usize]);
    } else {
        buf.put_slice(v.to_string().as_bytes());
    }
}
