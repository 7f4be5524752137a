//! Message type registry and reuse pool.
//!
//! The registry maps a numeric wire type to the constructor that produces an
//! empty instance of it. It is an explicit value built at startup and passed
//! by reference into [`decode`](super::decode) and the session, so tests can
//! assemble isolated registries; registration is fallible rather than a
//! process-wide fatal abort.
//!
//! # Example
//!
//! ```
//! use sesswire::codec::{Message, MessageRegistry};
//! use sesswire::error::Result;
//! use bytes::BytesMut;
//!
//! #[derive(Default)]
//! struct Ping;
//!
//! impl Message for Ping {
//!     fn type_id(&self) -> u64 { 1 }
//!     fn body_len(&self) -> usize { 0 }
//!     fn encode_body(&self, _buf: &mut BytesMut) {}
//!     fn decode_body(&mut self, _body: &[u8]) -> Result<()> { Ok(()) }
//! }
//!
//! let mut registry = MessageRegistry::new();
//! registry.register("ping", 1, Ping::default).unwrap();
//! assert!(registry.register("other", 1, Ping::default).is_err());
//! ```

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use super::message::{Message, MAX_TYPE_ID};
use crate::error::{Result, SesswireError};

/// Default number of idle instances retained per type in a [`MessagePool`].
pub const DEFAULT_POOL_CAP_PER_TYPE: usize = 16;

/// Constructor producing an empty message instance.
pub type MessageFactory = Box<dyn Fn() -> Box<dyn Message> + Send + Sync>;

struct Registration {
    /// Module that registered the type, reported on duplicate registration.
    module: String,
    factory: MessageFactory,
}

/// Registry mapping numeric wire types to message constructors.
#[derive(Default)]
pub struct MessageRegistry {
    entries: HashMap<u64, Registration>,
}

impl MessageRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor for `type_id`, attributed to `module`.
    ///
    /// Registering the same numeric type twice is a configuration error and
    /// fails with [`SesswireError::DuplicateType`] naming the first
    /// registrant; call this at startup so the conflict surfaces before any
    /// traffic flows.
    pub fn register<M, F>(&mut self, module: &str, type_id: u64, factory: F) -> Result<()>
    where
        M: Message,
        F: Fn() -> M + Send + Sync + 'static,
    {
        if type_id > MAX_TYPE_ID {
            return Err(SesswireError::Overflow {
                subject: "message type",
                value: type_id,
                max: MAX_TYPE_ID,
            });
        }
        match self.entries.entry(type_id) {
            Entry::Occupied(existing) => Err(SesswireError::DuplicateType {
                module: existing.get().module.clone(),
                type_id,
            }),
            Entry::Vacant(slot) => {
                slot.insert(Registration {
                    module: module.to_string(),
                    factory: Box::new(move || -> Box<dyn Message> { Box::new(factory()) }),
                });
                Ok(())
            }
        }
    }

    /// Construct an empty instance of `type_id`.
    pub fn new_message(&self, type_id: u64) -> Result<Box<dyn Message>> {
        self.entries
            .get(&type_id)
            .map(|r| (r.factory)())
            .ok_or(SesswireError::UnrecognizedType(type_id))
    }

    /// Check whether a constructor is registered for `type_id`.
    pub fn contains(&self, type_id: u64) -> bool {
        self.entries.contains_key(&type_id)
    }

    /// Module that registered `type_id`, if any.
    pub fn module_of(&self, type_id: u64) -> Option<&str> {
        self.entries.get(&type_id).map(|r| r.module.as_str())
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether no types are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Per-type reuse pool for decoded message instances.
///
/// The pool owns idle instances; the caller exclusively owns an instance
/// between [`get`](MessagePool::get) and [`put`](MessagePool::put). Instances
/// put back beyond the per-type cap are dropped.
pub struct MessagePool {
    idle: HashMap<u64, Vec<Box<dyn Message>>>,
    cap_per_type: usize,
}

impl MessagePool {
    /// Create a pool with the default per-type cap.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_POOL_CAP_PER_TYPE)
    }

    /// Create a pool retaining at most `cap_per_type` idle instances per type.
    pub fn with_capacity(cap_per_type: usize) -> Self {
        Self {
            idle: HashMap::new(),
            cap_per_type,
        }
    }

    /// Take an idle instance of `type_id`, if one is pooled.
    pub fn get(&mut self, type_id: u64) -> Option<Box<dyn Message>> {
        self.idle.get_mut(&type_id).and_then(Vec::pop)
    }

    /// Return an instance to the pool.
    ///
    /// Dropped silently if the per-type cap is already reached.
    pub fn put(&mut self, msg: Box<dyn Message>) {
        let slots = self.idle.entry(msg.type_id()).or_default();
        if slots.len() < self.cap_per_type {
            slots.push(msg);
        }
    }

    /// Number of idle instances pooled for `type_id`.
    pub fn idle_count(&self, type_id: u64) -> usize {
        self.idle.get(&type_id).map_or(0, Vec::len)
    }
}

impl Default for MessagePool {
    fn default() -> Self {
        Self::new()
    }
}
