//! Bottom-up capture: descendants contribute values of a type, an ancestor
//! reads them folded through a [`Reducer`].
//!
//! There is no direct precedent for this in the teacher — `topo` and
//! `illicit` are both top-down (`env!`/`call!`). The closest relative is
//! `dyn-cache`'s `Namespace` aggregating entries written by many callers
//! into one lookup structure (`examples/anp-moxie/dyn-cache/src/storage.rs`).
//! Borrowing that "collect many writers into one structure" shape: a
//! capture channel is identified by its `(item type, reducer type)` pair,
//! and reading one walks the reading fibre's own subtree collecting every
//! descendant's contribution in evaluation order, exactly as `context`
//! walks upward for providers.

use crate::{
    erased::{downcast, AnyEq, Equatable},
    fibre::{Arena, FibreId},
};
use std::any::TypeId;

/// How a capture channel's contributions combine into one aggregate.
///
/// `Aggregate` need not be the same type as the contributed item — e.g.
/// [`Collect`] aggregates many `T`s into a `Vec<T>`.
pub trait Reducer<T: Equatable>: 'static {
    type Aggregate: Equatable;

    /// The aggregate when no descendant has contributed anything.
    fn identity() -> Self::Aggregate;

    /// Fold one more contribution into the running aggregate, in the
    /// order contributions are discovered (a pre-order walk of the
    /// reading fibre's subtree).
    fn combine(acc: Self::Aggregate, item: T) -> Self::Aggregate;
}

/// Keeps the first contribution seen; later ones are ignored.
#[derive(Clone, Copy, Debug, Default)]
pub struct First;

impl<T: Equatable> Reducer<T> for First {
    type Aggregate = Option<T>;

    fn identity() -> Option<T> {
        None
    }

    fn combine(acc: Option<T>, item: T) -> Option<T> {
        acc.or(Some(item))
    }
}

/// Keeps the most recent contribution seen.
#[derive(Clone, Copy, Debug, Default)]
pub struct Last;

impl<T: Equatable> Reducer<T> for Last {
    type Aggregate = Option<T>;

    fn identity() -> Option<T> {
        None
    }

    fn combine(_acc: Option<T>, item: T) -> Option<T> {
        Some(item)
    }
}

/// Sums every contribution.
#[derive(Clone, Copy, Debug, Default)]
pub struct Sum;

impl<T> Reducer<T> for Sum
where
    T: Equatable + std::ops::Add<Output = T> + Default,
{
    type Aggregate = T;

    fn identity() -> T {
        T::default()
    }

    fn combine(acc: T, item: T) -> T {
        acc + item
    }
}

/// Collects every contribution into a `Vec`, in discovery order.
#[derive(Clone, Copy, Debug, Default)]
pub struct Collect;

impl<T: Equatable> Reducer<T> for Collect {
    type Aggregate = Vec<T>;

    fn identity() -> Vec<T> {
        Vec::new()
    }

    fn combine(mut acc: Vec<T>, item: T) -> Vec<T> {
        acc.push(item);
        acc
    }
}

/// A fibre's single most recent direct contribution to a capture channel,
/// type-erased. Overwritten each time `provide_capture` runs for that
/// channel during an evaluation; a fibre that wants to contribute more
/// than one value to the same channel in one evaluation should combine
/// them itself before calling `provide_capture`.
pub(crate) type CaptureBinding = Box<dyn AnyEq>;

fn channel_id<T: Equatable, R: Reducer<T>>() -> TypeId {
    TypeId::of::<(T, R)>()
}

/// Record `fibre`'s direct contribution of `value` to the `(T, R)`
/// channel for this evaluation.
pub(crate) fn provide<T: Equatable, R: Reducer<T>>(arena: &mut Arena, fibre: FibreId, value: T) {
    let id = channel_id::<T, R>();
    arena.get_mut(fibre).provided_captures.insert(id, Box::new(value) as CaptureBinding);
}

/// The `TypeId` used to validate hook-slot consistency for a `use_capture`
/// read of this channel (spec's Hook Order Law, applied to captures).
pub(crate) fn channel_type_id<T: Equatable, R: Reducer<T>>() -> TypeId {
    channel_id::<T, R>()
}

/// Fold every contribution to channel `(T, R)` found anywhere in `root`'s
/// subtree (including `root` itself), in pre-order, and return which
/// fibres contributed (so the caller can record dependency edges on each).
///
/// `root` is assumed to be mid-evaluation (this is only ever called from
/// `use_capture`, itself only callable from inside a node function), so its
/// committed `children` is still last evaluation's list — recurse through
/// `new_children` for `root` itself, and only fall back to the committed
/// `children` once inside an already-finished descendant.
pub(crate) fn collect<T: Equatable, R: Reducer<T>>(
    arena: &Arena,
    root: FibreId,
) -> (R::Aggregate, Vec<FibreId>) {
    let channel = channel_id::<T, R>();
    let mut providers = Vec::new();
    let fibre = arena.get(root);
    let mut acc = R::identity();
    if let Some(value) = fibre.provided_captures.get(&channel) {
        acc = R::combine(acc, downcast::<T>(value).clone());
        providers.push(root);
    }
    for &child in &fibre.new_children {
        acc = visit::<T, R>(arena, child, channel, acc, &mut providers);
    }
    (acc, providers)
}

fn visit<T: Equatable, R: Reducer<T>>(
    arena: &Arena,
    id: FibreId,
    channel: TypeId,
    mut acc: R::Aggregate,
    providers: &mut Vec<FibreId>,
) -> R::Aggregate {
    let fibre = arena.get(id);
    if let Some(value) = fibre.provided_captures.get(&channel) {
        acc = R::combine(acc, downcast::<T>(value).clone());
        providers.push(id);
    }
    for &child in &fibre.children {
        acc = visit::<T, R>(arena, child, channel, acc, providers);
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::Key;

    #[test]
    fn collect_gathers_whole_subtree_in_order() {
        let mut arena = Arena::default();
        let root = arena.alloc_root();
        let a = arena.alloc_child(root, Key::new("a"));
        let b = arena.alloc_child(root, Key::new("b"));
        arena.get_mut(root).new_children = vec![a, b];

        provide::<i32, Collect>(&mut arena, a, 1);
        provide::<i32, Collect>(&mut arena, b, 2);
        provide::<i32, Collect>(&mut arena, root, 0);

        let (aggregate, providers) = collect::<i32, Collect>(&arena, root);
        assert_eq!(aggregate, vec![0, 1, 2]);
        assert_eq!(providers, vec![root, a, b]);
    }

    #[test]
    fn sum_reduces_to_a_single_total() {
        let mut arena = Arena::default();
        let root = arena.alloc_root();
        let a = arena.alloc_child(root, Key::new("a"));
        let b = arena.alloc_child(root, Key::new("b"));
        arena.get_mut(root).new_children = vec![a, b];

        provide::<i32, Sum>(&mut arena, a, 3);
        provide::<i32, Sum>(&mut arena, b, 4);

        assert_eq!(collect::<i32, Sum>(&arena, root).0, 7);
    }

    #[test]
    fn first_and_last_disagree_on_multiple_contributions() {
        let mut arena = Arena::default();
        let root = arena.alloc_root();
        let a = arena.alloc_child(root, Key::new("a"));
        let b = arena.alloc_child(root, Key::new("b"));
        arena.get_mut(root).new_children = vec![a, b];

        provide::<&'static str, First>(&mut arena, a, "one");
        provide::<&'static str, First>(&mut arena, b, "two");
        assert_eq!(collect::<&'static str, First>(&arena, root).0, Some("one"));

        provide::<&'static str, Last>(&mut arena, a, "one");
        provide::<&'static str, Last>(&mut arena, b, "two");
        assert_eq!(collect::<&'static str, Last>(&arena, root).0, Some("two"));
    }
}
