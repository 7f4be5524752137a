//! JSON codec for structured message bodies.
//!
//! Message bodies on the binary protocol are opaque bytes; types that carry
//! structured data can serialize them with this codec instead of hand-rolling
//! a byte layout.
//!
//! # Example
//!
//! ```
//! use sesswire::codec::JsonCodec;
//!
//! let encoded = JsonCodec::encode(&vec![1, 2, 3]).unwrap();
//! let decoded: Vec<i32> = JsonCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, vec![1, 2, 3]);
//! ```

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// Codec that serializes message bodies as JSON.
///
/// A marker struct with static methods, so codec selection stays a
/// compile-time decision.
pub struct JsonCodec;

impl JsonCodec {
    /// Serialize a value to JSON bytes.
    pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    /// Deserialize a value from JSON bytes.
    pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(data)?)
    }
}
