//! Top-down context: a value provided by an ancestor fibre and read by any
//! descendant, resolved without a thread-local dynamic scope.
//!
//! `illicit::Layer` (`examples/anp-moxie/illicit/src/lib.rs`) resolves
//! `get::<T>()` by walking a thread-local stack of `Layer`s pushed and
//! popped around a call-stack-shaped `enter`/exit. That assumes every
//! ancestor between the provider and the reader runs in the same call
//! stack frame. Here a reader can be evaluated by the scheduler on a tick
//! where none of its ancestors re-ran (spec §4.5), so there is no call
//! stack to walk — instead [`resolve`] walks the persistent parent chain
//! in the fibre arena directly, the same tree `capture` walks downward.

use crate::{
    erased::{downcast, AnyEq, Equatable},
    fibre::{Arena, FibreId},
};
use std::any::TypeId;

/// Look up the nearest ancestor of `from` (not including `from` itself)
/// that provided a value of type `T`, cloning it out and returning which
/// fibre provided it (so the caller can record a dependency edge).
pub(crate) fn resolve<T: Equatable>(arena: &Arena, from: FibreId) -> Option<(FibreId, T)> {
    let mut current = arena.get(from).parent;
    while let Some(id) = current {
        let fibre = arena.get(id);
        if let Some(value) = fibre.provided_contexts.get(&TypeId::of::<T>()) {
            return Some((id, downcast::<T>(value).clone()));
        }
        current = fibre.parent;
    }
    None
}

/// Record that `fibre` provides `value` as a context of type `T` for this
/// evaluation. Overwrites any value `fibre` provided in a previous
/// evaluation of the same type, matching the rebuild-every-evaluation
/// policy used for `children`.
pub(crate) fn provide<T: Equatable>(arena: &mut Arena, fibre: FibreId, value: T) {
    arena.get_mut(fibre).provided_contexts.insert(TypeId::of::<T>(), Box::new(value) as Box<dyn AnyEq>);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::Key;

    #[test]
    fn resolves_nearest_providing_ancestor() {
        let mut arena = Arena::default();
        let root = arena.alloc_root();
        let mid = arena.alloc_child(root, Key::new("mid"));
        let leaf = arena.alloc_child(mid, Key::new("leaf"));

        provide(&mut arena, root, 1i32);
        provide(&mut arena, mid, 2i32);
        arena.get_mut(mid).children.push(leaf);
        arena.get_mut(root).children.push(mid);

        assert_eq!(resolve::<i32>(&arena, leaf), Some((mid, 2)));
        assert_eq!(resolve::<i32>(&arena, mid), Some((root, 1)));
        assert_eq!(resolve::<i32>(&arena, root), None);
    }

    #[test]
    fn missing_context_resolves_to_none() {
        let mut arena = Arena::default();
        let root = arena.alloc_root();
        assert_eq!(resolve::<&'static str>(&arena, root), None);
    }
}
