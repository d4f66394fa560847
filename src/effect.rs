//! Type-erased cleanup closures, and the post-commit effect job queue.
//!
//! Grounded on `src/drop_guard.rs`'s `DropGuard<Inner>`
//! (`examples/anp-moxie/src/drop_guard.rs`), which wraps an `Inner` value
//! and a `Box<dyn FnMut(Inner)>` destructor run on drop. `Cleanup` is the
//! same idea without the `Drop` impl: the registry decides exactly when a
//! cleanup runs (at dispose, or when an effect's deps change), rather than
//! relying on a value going out of scope.

use crate::erased::{downcast, AnyEq, Equatable};
use crate::fibre::FibreId;
use std::collections::VecDeque;

/// A one-shot cleanup action: an effect's teardown closure, or a resource's
/// release function with its value already bound in.
pub(crate) struct Cleanup(Box<dyn FnOnce()>);

impl Cleanup {
    pub(crate) fn new(f: impl FnOnce() + 'static) -> Self {
        Cleanup(Box::new(f))
    }

    /// Build a `Cleanup` for a resource's `release(value)` by cloning the
    /// value out of its type-erased storage now, so `release` can take it
    /// by value when it eventually runs.
    pub(crate) fn erase_with<R: Equatable>(
        release: impl FnOnce(R) + 'static,
        value: &Box<dyn AnyEq>,
    ) -> Self {
        let value = downcast::<R>(value).clone();
        Cleanup::new(move || release(value))
    }

    pub(crate) fn run(self) {
        (self.0)()
    }
}

/// A deferred effect body, queued during evaluation and run after the tick
/// commits (spec §4.4: "effects run after the tree they're attached to has
/// committed"). Running it produces the cleanup to store back in the
/// fibre's hook slot, if any.
pub(crate) struct EffectJob {
    pub(crate) fibre: FibreId,
    pub(crate) slot_index: usize,
    pub(crate) prior_cleanup: Option<Cleanup>,
    body: Box<dyn FnOnce() -> Option<Cleanup>>,
}

impl EffectJob {
    pub(crate) fn new(
        fibre: FibreId,
        slot_index: usize,
        prior_cleanup: Option<Cleanup>,
        body: impl FnOnce() -> Option<Cleanup> + 'static,
    ) -> Self {
        EffectJob { fibre, slot_index, prior_cleanup, body: Box::new(body) }
    }
}

/// The per-tick queue of effect jobs, drained in FIFO (evaluation) order
/// after commit. A plain `VecDeque` rather than a priority structure: spec
/// §4.4 only guarantees effects run after commit, not any cross-fibre
/// ordering beyond the order they were scheduled in.
#[derive(Default)]
pub(crate) struct EffectQueue(VecDeque<EffectJob>);

impl EffectQueue {
    pub(crate) fn push(&mut self, job: EffectJob) {
        self.0.push_back(job);
    }

    /// Run every queued job's prior cleanup (if its deps changed) and then
    /// its body, in FIFO order, returning the jobs so the caller can store
    /// each one's new cleanup back into the owning fibre's hook registry.
    pub(crate) fn drain(&mut self) -> Vec<(FibreId, usize, Option<Cleanup>)> {
        let mut results = Vec::with_capacity(self.0.len());
        while let Some(job) = self.0.pop_front() {
            if let Some(prior) = job.prior_cleanup {
                prior.run();
            }
            let new_cleanup = (job.body)();
            results.push((job.fibre, job.slot_index, new_cleanup));
        }
        results
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn cleanup_runs_exactly_once() {
        let ran = Rc::new(RefCell::new(0));
        let ran2 = ran.clone();
        let cleanup = Cleanup::new(move || *ran2.borrow_mut() += 1);
        cleanup.run();
        assert_eq!(*ran.borrow(), 1);
    }

    #[test]
    fn queue_drains_in_fifo_order_and_runs_prior_cleanup_first() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut queue = EffectQueue::default();

        let log1 = log.clone();
        queue.push(EffectJob::new(
            FibreId::root(),
            0,
            Some(Cleanup::new({
                let log = log.clone();
                move || log.borrow_mut().push("cleanup-a")
            })),
            move || {
                log1.borrow_mut().push("body-a");
                None
            },
        ));

        let log2 = log.clone();
        queue.push(EffectJob::new(FibreId::from_index(1), 0, None, move || {
            log2.borrow_mut().push("body-b");
            None
        }));

        queue.drain();
        assert_eq!(*log.borrow(), vec!["cleanup-a", "body-a", "body-b"]);
    }
}
