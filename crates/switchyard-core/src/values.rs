//! Layered key/value overlay carried by a single dispatch.
//!
//! [`Values`] is a persistent, append-only list of layers. Adding a value
//! never mutates the existing overlay; it produces a new head that points at
//! the previous one, so handlers that ran earlier keep seeing exactly what
//! they saw, and two dispatches never observe each other's layers.
//!
//! ```rust,ignore
//! let base = Values::new().with("user", 42_i64);
//! let next = base.with("user", 7_i64);
//!
//! assert_eq!(base.get::<i64>("user"), Some(&42));
//! assert_eq!(next.get::<i64>("user"), Some(&7));
//! ```

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A shared, type-erased overlay value.
pub type Value = Arc<dyn Any + Send + Sync>;

struct Layer {
    key: Arc<str>,
    value: Value,
    parent: Option<Arc<Layer>>,
}

/// Immutable key/value overlay with structural sharing.
///
/// Cloning is O(1). Lookups walk from the newest layer to the oldest and stop
/// at the first layer whose key matches.
#[derive(Clone, Default)]
pub struct Values {
    head: Option<Arc<Layer>>,
}

impl Values {
    /// Creates an empty overlay.
    pub fn new() -> Self {
        Self { head: None }
    }

    /// Returns a new overlay with `{key: value}` layered on top of `self`.
    pub fn with<T>(&self, key: impl Into<Arc<str>>, value: T) -> Self
    where
        T: Any + Send + Sync,
    {
        self.with_value(key, Arc::new(value))
    }

    /// Like [`with`](Self::with) but takes an already shared value.
    pub fn with_value(&self, key: impl Into<Arc<str>>, value: Value) -> Self {
        Self {
            head: Some(Arc::new(Layer {
                key: key.into(),
                value,
                parent: self.head.clone(),
            })),
        }
    }

    /// Returns the most recent value stored under `key`, downcast to `T`.
    ///
    /// Older layers for the same key are shadowed: if the newest one holds a
    /// different type, the result is `None`.
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.get_value(key)?.downcast_ref::<T>()
    }

    /// Returns the most recent type-erased value stored under `key`.
    pub fn get_value(&self, key: &str) -> Option<&Value> {
        self.layers()
            .find(|layer| &*layer.key == key)
            .map(|layer| &layer.value)
    }

    /// Returns `true` if any layer stores `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.layers().any(|layer| &*layer.key == key)
    }

    /// Number of layers, counting shadowed ones.
    pub fn depth(&self) -> usize {
        self.layers().count()
    }

    /// Returns `true` if nothing has been layered yet.
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Iterates over the keys from newest to oldest, shadowed keys included.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.layers().map(|layer| &*layer.key)
    }

    fn layers(&self) -> impl Iterator<Item = &Layer> {
        std::iter::successors(self.head.as_deref(), |layer| layer.parent.as_deref())
    }
}

impl fmt::Debug for Values {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.keys()).finish()
    }
}

// Deep overlays are dropped iteratively so a long dispatch cannot overflow
// the stack while tearing down its layers.
impl Drop for Layer {
    fn drop(&mut self) {
        let mut next = self.parent.take();
        while let Some(layer) = next {
            match Arc::try_unwrap(layer) {
                Ok(mut owned) => next = owned.parent.take(),
                Err(_) => break,
            }
        }
    }
}
