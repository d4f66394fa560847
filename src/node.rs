//! Node descriptors: the immutable, equatable, callable values that
//! describe a fibre's inputs and behaviour.
//!
//! Spec §9 calls for "a tagged variant over a small closed set of built-in
//! node kinds plus a capability interface for user-defined ones". The
//! behaviour-tree node library itself is out of scope (spec §1), so the
//! closed set here is deliberately tiny — [`FnNode`] is the one built-in,
//! a thin wrapper for describing a node as a plain closure, grounded on
//! how `topo`'s `cache.rs` wraps arbitrary `init`/`with` closures for
//! memoization. Everything else is the capability interface: implement
//! [`Node`] on your own descriptor type.
//!
//! Internally, descriptors and their results are type-erased the same way
//! `topo::AnonRc` and `illicit::AnonRc` erase environment values — a small
//! hand-rolled `dyn Any` wrapper with an equality hook, rather than a
//! `downcast-rs`-derived trait, since the erasure here additionally needs
//! `PartialEq` and cloning.

use crate::{call_context::CallContext, erased::Equatable};
use std::{any::Any, fmt::Debug};

/// A node's committed result: arbitrary, equatable, cloneable, and
/// debug-printable so instrumentation can render it.
pub trait Output: Equatable {}
impl<T: Equatable> Output for T {}

/// A descriptor: an immutable, deep-equatable value describing a node's
/// inputs and its evaluation function.
///
/// Implementations must be cheap to compare and clone — equality is
/// checked on every [`evaluate_child`](CallContext::evaluate_child) call to
/// decide whether memoization applies (spec §3, "Props").
pub trait Node: Debug + Clone + PartialEq + 'static {
    /// The type of value this node produces.
    type Output: Output;

    /// Evaluate this node with the given call context, under normal
    /// (non-analysis) evaluation.
    fn eval(&self, ctx: &mut CallContext<'_>) -> Self::Output;

    /// Evaluate this node in analysis mode (spec §6): by default the same
    /// as [`Node::eval`], but a node can override this to still evaluate
    /// children it would otherwise short-circuit, for visualization
    /// completeness.
    fn eval_analysis(&self, ctx: &mut CallContext<'_>) -> Self::Output {
        self.eval(ctx)
    }
}

/// Wraps a plain closure as a [`Node`], for descriptors that don't need
/// their own named type. The closure's captured environment is the props;
/// it must itself be `Clone + Debug + PartialEq` (usually derived) for
/// this to be useful beyond one-off evaluation.
#[derive(Clone)]
pub struct FnNode<F, O> {
    f: std::rc::Rc<F>,
    label: &'static str,
    _out: std::marker::PhantomData<O>,
}

impl<F, O> FnNode<F, O> {
    /// Build a node from a closure. `label` is used only for `Debug`
    /// output and instrumentation; it does not participate in equality.
    pub fn new(label: &'static str, f: F) -> Self {
        FnNode { f: std::rc::Rc::new(f), label, _out: std::marker::PhantomData }
    }
}

impl<F, O> Debug for FnNode<F, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnNode").field("label", &self.label).finish()
    }
}

impl<F, O> PartialEq for FnNode<F, O> {
    /// Closures carry no externally-observable identity beyond their
    /// captured state, which we cannot compare structurally; we treat two
    /// `FnNode`s as equal only if they share the same closure instance.
    /// This makes `FnNode` memoize like a leaf that always re-evaluates
    /// unless the caller keeps the exact same `Rc` around (e.g. via
    /// `use_memo`), which is the honest behaviour for an opaque closure.
    fn eq(&self, other: &Self) -> bool {
        std::rc::Rc::ptr_eq(&self.f, &other.f)
    }
}

impl<F, O> Node for FnNode<F, O>
where
    F: Fn(&mut CallContext<'_>) -> O + 'static,
    O: Output,
{
    type Output = O;

    fn eval(&self, ctx: &mut CallContext<'_>) -> O {
        (self.f)(ctx)
    }
}

/// Type-erased form of a [`Node`], stored in the fibre arena. Blanket
/// implemented for every [`Node`]; not exposed outside the crate.
pub(crate) trait AnyNode: Debug {
    fn as_any(&self) -> &dyn Any;
    fn dyn_eq(&self, other: &dyn AnyNode) -> bool;
    fn type_name(&self) -> &'static str;
    fn clone_boxed(&self) -> Box<dyn AnyNode>;
}

impl<N: Node> AnyNode for N {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn dyn_eq(&self, other: &dyn AnyNode) -> bool {
        other.as_any().downcast_ref::<N>().map_or(false, |other| self == other)
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<N>()
    }

    fn clone_boxed(&self) -> Box<dyn AnyNode> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct Add(i32, i32);

    impl Node for Add {
        type Output = i32;
        fn eval(&self, _ctx: &mut CallContext<'_>) -> i32 {
            self.0 + self.1
        }
    }

    #[test]
    fn any_node_equality_is_structural() {
        let a: Box<dyn AnyNode> = Box::new(Add(1, 2));
        let b: Box<dyn AnyNode> = Box::new(Add(1, 2));
        let c: Box<dyn AnyNode> = Box::new(Add(1, 3));
        assert!(a.dyn_eq(&*b));
        assert!(!a.dyn_eq(&*c));
    }
}
