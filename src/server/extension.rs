//! Extension capabilities.
//!
//! The server is built with a fixed set of named capabilities. A client asks
//! for one by name with REGISTER_EXTENSION and receives a message type tag,
//! valid for its session only, starting at [`EXTENSION_TYPE_BASE`]. Frames
//! carrying that tag are dispatched to the capability's handler.
//!
//! # Example
//!
//! ```
//! use bytes::Bytes;
//! use sysexwire::server::{ExtensionRegistry, Reply};
//!
//! let mut registry: ExtensionRegistry<()> = ExtensionRegistry::new();
//! registry.register("echo", |payload: &[u8], _scope: &mut (), _console: &mut _| {
//!     Reply::ok(Bytes::copy_from_slice(payload))
//! });
//! assert!(registry.get("echo").is_some());
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;

use super::capture::Console;
use crate::codec::Armour;
use crate::error::Result;
use crate::protocol::{Status, EXTENSION_TYPE_BASE};
use crate::value::Fault;

/// Response to an extension message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Response status.
    pub status: Status,
    /// Response payload; must be 7-bit.
    pub payload: Bytes,
}

impl Reply {
    /// OK with an opaque payload.
    pub fn ok(payload: Bytes) -> Self {
        Self {
            status: Status::Ok,
            payload,
        }
    }

    /// OK with no payload.
    pub fn empty() -> Self {
        Self::ok(Bytes::new())
    }

    /// ERR carrying a fault.
    pub fn fault(fault: &Fault) -> Result<Self> {
        Ok(Self {
            status: Status::Err,
            payload: Armour::encode_value(fault)?,
        })
    }

    /// FAIL with diagnostic text.
    pub fn fail(message: &str) -> Self {
        Self {
            status: Status::Fail,
            payload: Armour::encode_text(message),
        }
    }
}

/// Highest tag a session may bind.
pub const MAX_EXTENSION_TAG: u8 = 0x7F;

/// Handler for one capability: `(payload, session scope, console) -> reply`.
pub type ExtensionHandler<S> = Arc<dyn Fn(&[u8], &mut S, &mut Console) -> Reply + Send + Sync>;

/// Named capabilities offered by a server.
pub struct ExtensionRegistry<S> {
    handlers: HashMap<String, ExtensionHandler<S>>,
}

impl<S> ExtensionRegistry<S> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Offer a capability. A second registration under the same name replaces the first.
    pub fn register<F>(&mut self, name: &str, handler: F)
    where
        F: Fn(&[u8], &mut S, &mut Console) -> Reply + Send + Sync + 'static,
    {
        self.handlers.insert(name.to_string(), Arc::new(handler));
    }

    /// Look up a capability.
    pub fn get(&self, name: &str) -> Option<ExtensionHandler<S>> {
        self.handlers.get(name).cloned()
    }

    /// Names of every capability, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of capabilities.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Check if no capabilities are offered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl<S> Default for ExtensionRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// Tag assignments of one session.
pub struct SessionExtensions<S> {
    by_tag: HashMap<u8, (String, ExtensionHandler<S>)>,
    next_tag: u8,
}

impl<S> SessionExtensions<S> {
    /// Create an empty tag table.
    pub fn new() -> Self {
        Self {
            by_tag: HashMap::new(),
            next_tag: EXTENSION_TYPE_BASE,
        }
    }

    /// Bind `name` to a tag, reusing the tag if it is already bound.
    ///
    /// Returns `None` once every tag up to 0x7F is in use.
    pub fn bind(&mut self, name: &str, handler: ExtensionHandler<S>) -> Option<u8> {
        if let Some((&tag, _)) = self.by_tag.iter().find(|(_, (bound, _))| bound == name) {
            return Some(tag);
        }
        if self.next_tag > MAX_EXTENSION_TAG {
            return None;
        }
        let tag = self.next_tag;
        self.next_tag += 1;
        self.by_tag.insert(tag, (name.to_string(), handler));
        Some(tag)
    }

    /// Handler bound to `tag`.
    pub fn get(&self, tag: u8) -> Option<ExtensionHandler<S>> {
        self.by_tag.get(&tag).map(|(_, handler)| Arc::clone(handler))
    }

    /// Number of bound tags.
    pub fn len(&self) -> usize {
        self.by_tag.len()
    }

    /// Check if no tags are bound.
    pub fn is_empty(&self) -> bool {
        self.by_tag.is_empty()
    }
}

impl<S> Default for SessionExtensions<S> {
    fn default() -> Self {
        Self::new()
    }
}
