//! Small test doubles for asserting on evaluation and lifecycle behavior,
//! without threading private runtime state out through the public API.
//!
//! Grounded on the teacher's `CountsClones`/`BoolWaker`
//! (`examples/anp-moxie/src/testing.rs`): a value that shares a counter
//! across clones via a reference-counted cell, so a test can keep one
//! handle aside while the runtime clones the node every tick.
//! [`CountsEvaluations`] plays the same role for asserting memoization
//! actually skips re-evaluating a node (spec §8's S1/S2); [`EventLog`] plays
//! the `BoolWaker` role for asserting mount/update/unmount order (S6),
//! against [`crate::witness::Instrumentation`] rather than a `Waker`.

use crate::{call_context::CallContext, key::KeyPath, node::Node, witness::Instrumentation};
use std::{
    cell::{Cell, RefCell},
    fmt,
    rc::Rc,
};

/// Wraps a [`Node`], counting how many times its `eval`/`eval_analysis` is
/// actually invoked. Two `CountsEvaluations` wrapping equal inner nodes
/// still compare equal (the count isn't part of the node's identity), so
/// memoization reuse isn't defeated by wrapping a node in this for a test.
pub struct CountsEvaluations<N: Node> {
    inner: N,
    count: Rc<Cell<u64>>,
}

impl<N: Node> CountsEvaluations<N> {
    pub fn new(inner: N) -> Self {
        CountsEvaluations { inner, count: Rc::new(Cell::new(0)) }
    }

    /// How many times this node (or any clone sharing its counter) has run
    /// `eval`/`eval_analysis` so far.
    pub fn eval_count(&self) -> u64 {
        self.count.get()
    }
}

impl<N: Node> Clone for CountsEvaluations<N> {
    fn clone(&self) -> Self {
        CountsEvaluations { inner: self.inner.clone(), count: self.count.clone() }
    }
}

impl<N: Node> fmt::Debug for CountsEvaluations<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CountsEvaluations").field("inner", &self.inner).finish()
    }
}

impl<N: Node> PartialEq for CountsEvaluations<N> {
    fn eq(&self, other: &Self) -> bool {
        self.inner == other.inner
    }
}

impl<N: Node> Node for CountsEvaluations<N> {
    type Output = N::Output;

    fn eval(&self, ctx: &mut CallContext<'_>) -> N::Output {
        self.count.set(self.count.get() + 1);
        self.inner.eval(ctx)
    }

    fn eval_analysis(&self, ctx: &mut CallContext<'_>) -> N::Output {
        self.count.set(self.count.get() + 1);
        self.inner.eval_analysis(ctx)
    }
}

/// Records [`Instrumentation`] callbacks as strings, in call order, for
/// asserting mount/update/unmount ordering in tests. Cloning shares the
/// underlying log, so a clone can be registered with a runtime while the
/// original is kept aside for assertions.
#[derive(Clone, Default)]
pub struct EventLog(Rc<RefCell<Vec<String>>>);

impl EventLog {
    pub fn new() -> Self {
        EventLog::default()
    }

    /// A snapshot of every event recorded so far, in order.
    pub fn events(&self) -> Vec<String> {
        self.0.borrow().clone()
    }
}

impl Instrumentation for EventLog {
    fn on_mount(&mut self, path: &KeyPath, type_name: &'static str) {
        self.0.borrow_mut().push(format!("mount {} {}", path, type_name));
    }

    fn on_update(&mut self, path: &KeyPath, type_name: &'static str) {
        self.0.borrow_mut().push(format!("update {} {}", path, type_name));
    }

    fn on_unmount(&mut self, path: &KeyPath) {
        self.0.borrow_mut().push(format!("unmount {}", path));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::FibreRuntime;

    #[derive(Clone, Debug, PartialEq)]
    struct Const(i32);

    impl Node for Const {
        type Output = i32;
        fn eval(&self, _ctx: &mut CallContext<'_>) -> i32 {
            self.0
        }
    }

    #[test]
    fn counter_is_shared_across_clones_and_reflects_reuse() {
        let counted = CountsEvaluations::new(Const(7));
        let handle = counted.clone();
        let mut runtime = FibreRuntime::new(counted);

        runtime.run_tick().unwrap();
        assert_eq!(handle.eval_count(), 1);

        // Same props, not dirty: the root is memoized and not re-evaluated.
        runtime.run_tick().unwrap();
        assert_eq!(handle.eval_count(), 1);
    }

    #[test]
    fn wrapped_nodes_with_equal_inner_compare_equal() {
        let a = CountsEvaluations::new(Const(1));
        let b = CountsEvaluations::new(Const(1));
        let c = CountsEvaluations::new(Const(2));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn event_log_records_in_call_order() {
        let mut log = EventLog::new();
        let root = KeyPath::root();
        log.on_mount(&root, "Root");
        log.on_update(&root, "Root");
        log.on_unmount(&root);
        assert_eq!(log.events(), vec!["mount / Root", "update / Root", "unmount /"]);
    }
}
