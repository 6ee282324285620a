//! Per-request typed attributes.
//!
//! Filters use attributes to leave request-scoped markers for later stages of
//! the same pipeline traversal. Values are keyed by their type, so a marker is
//! usually a zero-sized struct private to the filter that sets it.
//!
//! ```rust
//! use replica_core::Attributes;
//!
//! struct Seen;
//!
//! let mut attrs = Attributes::new();
//! assert!(!attrs.contains::<Seen>());
//! attrs.insert(Seen);
//! assert!(attrs.contains::<Seen>());
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

/// Type-keyed attribute map attached to a request.
#[derive(Clone, Default)]
pub struct Attributes {
    map: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl Attributes {
    #[inline]
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    /// Insert a value, replacing any previous value of the same type.
    #[inline]
    pub fn insert<T: Send + Sync + 'static>(&mut self, value: T) {
        self.map
            .insert(TypeId::of::<T>(), Arc::new(value) as Arc<dyn Any + Send + Sync>);
    }

    #[inline]
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    #[inline]
    pub fn contains<T: Send + Sync + 'static>(&self) -> bool {
        self.map.contains_key(&TypeId::of::<T>())
    }

    /// Remove a value. Returns true if one was present.
    #[inline]
    pub fn remove<T: Send + Sync + 'static>(&mut self) -> bool {
        self.map.remove(&TypeId::of::<T>()).is_some()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl std::fmt::Debug for Attributes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Attributes")
            .field("count", &self.map.len())
            .finish()
    }
}
