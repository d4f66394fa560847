//! Stable identity for a fibre relative to its parent.
//!
//! Grounded on `topo::Id` (`examples/anp-moxie/topo/src/lib.rs`): a child's
//! identity is a hash-cons of its parent, a callsite, and a "slot" value
//! supplied by the caller. Unlike `topo`, which resolves the current
//! identity through a thread-local [`topo::Point`], a `Key` here is an
//! explicit value handed to [`crate::call_context::CallContext::evaluate_child`]
//! — the fibre arena owns identity, not a dynamic scope.

use std::{
    any::Any,
    fmt::{self, Debug},
    hash::{Hash, Hasher},
    rc::Rc,
};

/// Something that can serve as a child's key: hashable, equatable, cheap to
/// clone, and stable across ticks when the caller means the same logical
/// child.
pub trait KeyValue: Debug {
    #[doc(hidden)]
    fn dyn_eq(&self, other: &dyn KeyValue) -> bool;
    #[doc(hidden)]
    fn dyn_hash(&self, state: &mut dyn Hasher);
    #[doc(hidden)]
    fn as_any(&self) -> &dyn Any;
}

impl<T> KeyValue for T
where
    T: Eq + Hash + Debug + 'static,
{
    fn dyn_eq(&self, other: &dyn KeyValue) -> bool {
        if let Some(other) = other.as_any().downcast_ref::<T>() { self == other } else { false }
    }

    fn dyn_hash(&self, mut state: &mut dyn Hasher) {
        // Fold the type into the hash so that values of different types
        // sharing a bit pattern cannot collide as keys.
        std::any::TypeId::of::<T>().hash(&mut state);
        Hash::hash(self, &mut state);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A child's identity relative to its parent fibre.
///
/// Cloning a `Key` is cheap (it shares the underlying value via [`Rc`]).
/// Two `Key`s are equal exactly when they were built from equal values of
/// the same type.
#[derive(Clone)]
pub struct Key(Rc<dyn KeyValue>);

impl Key {
    /// Wrap an arbitrary hashable, equatable value as a child key.
    pub fn new<T: Eq + Hash + Debug + 'static>(value: T) -> Self {
        Key(Rc::new(value))
    }
}

impl<T: Eq + Hash + Debug + 'static> From<T> for Key {
    fn from(value: T) -> Self {
        Key::new(value)
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.0.dyn_eq(&*other.0)
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.dyn_hash(state)
    }
}

impl Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Debug::fmt(&self.0, f)
    }
}

/// The ordered sequence of [`Key`]s from the root to a fibre. Globally
/// unique per fibre, used for diagnostics and the visualization export
/// (`crate::witness::VisualNode`) rather than as the primary lookup
/// structure (the arena's [`crate::fibre::FibreId`] fills that role).
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct KeyPath(pub(crate) Vec<Key>);

impl KeyPath {
    pub(crate) fn root() -> Self {
        KeyPath(Vec::new())
    }

    pub(crate) fn child(&self, key: Key) -> Self {
        let mut path = self.0.clone();
        path.push(key);
        KeyPath(path)
    }

    /// The keys from root to this fibre, in order.
    pub fn keys(&self) -> &[Key] {
        &self.0
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("/")?;
        for (i, key) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            write!(f, "{:?}", key)?;
        }
        Ok(())
    }
}
