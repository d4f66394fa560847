//! The per-evaluation handle a node function uses to recurse into
//! children and to call hooks.
//!
//! Grounded on `topo::Point`/the `call!` macro's role as "the thing a
//! component body holds while it runs" (`examples/anp-moxie/topo/src/lib.rs`),
//! generalized from a thread-local into an explicit value threaded through
//! [`crate::node::Node::eval`], for the reasons given in `src/context.rs`.

use crate::{
    capture::{self, Reducer},
    effect::{Cleanup, EffectJob},
    erased::{downcast, AnyEq, Equatable},
    error::RuntimeError,
    fibre::FibreId,
    key::Key,
    node::Node,
    runtime::TickState,
};
use std::{
    any::TypeId,
    cell::RefCell,
    collections::HashSet,
    marker::PhantomData,
    rc::Rc,
};

/// A buffered state write, applied at the next tick boundary rather than
/// immediately (spec §4.1: "updating state during a tick does not affect
/// that tick; it schedules the next one").
pub(crate) struct PendingWrite {
    pub(crate) fibre: FibreId,
    pub(crate) slot_index: usize,
    pub(crate) value: Box<dyn AnyEq>,
}

pub(crate) type WriteQueue = Rc<RefCell<Vec<PendingWrite>>>;

/// A cloneable handle returned by [`CallContext::use_state`], usable from
/// outside evaluation entirely (e.g. from an event callback or a spawned
/// task) to schedule a state update.
pub struct Setter<T> {
    fibre: FibreId,
    slot_index: usize,
    queue: WriteQueue,
    _value: PhantomData<T>,
}

impl<T> Clone for Setter<T> {
    fn clone(&self) -> Self {
        Setter {
            fibre: self.fibre,
            slot_index: self.slot_index,
            queue: self.queue.clone(),
            _value: PhantomData,
        }
    }
}

impl<T: Equatable> Setter<T> {
    /// Schedule this slot to hold `value` starting with the next tick.
    pub fn set(&self, value: T) {
        self.queue.borrow_mut().push(PendingWrite {
            fibre: self.fibre,
            slot_index: self.slot_index,
            value: Box::new(value),
        });
    }
}

/// The handle passed to [`Node::eval`]. Borrowed for exactly the duration
/// of one fibre's evaluation.
pub struct CallContext<'a> {
    pub(crate) tick: &'a mut TickState<'a>,
    pub(crate) fibre: FibreId,
    captured_channels_this_eval: HashSet<TypeId>,
    registered_keys_this_eval: HashSet<Key>,
}

impl<'a> CallContext<'a> {
    pub(crate) fn new(tick: &'a mut TickState<'a>, fibre: FibreId) -> Self {
        CallContext {
            tick,
            fibre,
            captured_channels_this_eval: HashSet::new(),
            registered_keys_this_eval: HashSet::new(),
        }
    }

    /// Whether this evaluation is running for visualization/analysis
    /// rather than a live tick (spec §6): nodes that short-circuit
    /// children under normal evaluation may choose to still visit them
    /// when this is `true`, via [`Node::eval_analysis`].
    pub fn is_analysis(&self) -> bool {
        self.tick.analysis_mode
    }

    fn fail(&self, err: RuntimeError) -> ! {
        std::panic::panic_any(err)
    }

    /// Evaluate a child node identified by `key` relative to this fibre.
    /// The same key across ticks resolves to the same child fibre,
    /// preserving its state (spec §3, Identity); if `node` compares equal
    /// to the child's props from its last evaluation and the child isn't
    /// independently dirty, the child is skipped and its memoized output
    /// reused (spec §3, Memoization).
    pub fn evaluate_child<N: Node>(&mut self, key: impl Into<Key>, node: N) -> N::Output {
        let key = key.into();
        if !self.registered_keys_this_eval.insert(key.clone()) {
            self.fail(RuntimeError::DuplicateKey {
                parent: self.tick.arena.get(self.fibre).key_path.clone(),
                key_debug: format!("{:?}", key),
            });
        }

        let child_id = self.tick.arena.resolve_child(self.fibre, key);
        self.tick.arena.get_mut(self.fibre).new_children.push(child_id);
        self.tick.arena.get_mut(self.fibre).new_predecessors.insert(child_id);

        let output = crate::runtime::evaluate_fibre(&mut *self.tick, child_id, node);
        self.tick.arena.get_mut(child_id).successors.insert(self.fibre);
        output
    }

    /// Evaluate `node` directly against this same fibre's hooks, without
    /// allocating a child fibre. Used by combinators that want to run a
    /// descriptor's logic inline (no separate memoization identity, no
    /// separate dependency edge) — e.g. a wrapper that conditionally
    /// delegates to one of several nodes chosen each evaluation.
    pub fn evaluate_inline<N: Node>(&mut self, node: &N) -> N::Output {
        node.eval(self)
    }

    /// A piece of state private to this fibre, with a setter that can
    /// schedule updates to take effect on the next tick.
    pub fn use_state<T: Equatable>(&mut self, initial: impl FnOnce() -> T) -> (T, Setter<T>) {
        let key_path = self.tick.arena.get(self.fibre).key_path.clone();
        let (index, value) =
            self.tick.arena.get_mut(self.fibre).hooks.state_slot(&key_path, initial).unwrap_or_else(
                |e| self.fail(e),
            );
        let setter = Setter {
            fibre: self.fibre,
            slot_index: index,
            queue: self.tick.pending_writes.clone(),
            _value: PhantomData,
        };
        (value, setter)
    }

    /// Run `effect` after this tick commits, whenever `deps` differs from
    /// the previous evaluation's (or on mount). If `effect` returns
    /// `Some(cleanup)`, `cleanup` runs before the next time `effect` runs,
    /// and on unmount.
    pub fn use_effect<D, F, C>(&mut self, deps: D, effect: F)
    where
        D: Equatable,
        C: FnOnce() + 'static,
        F: FnOnce() -> Option<C> + 'static,
    {
        self.use_effect_impl(Some(Box::new(deps) as Box<dyn AnyEq>), effect)
    }

    /// Like [`CallContext::use_effect`], but runs after every commit this
    /// fibre evaluates, regardless of dependency equality.
    pub fn use_effect_always<F, C>(&mut self, effect: F)
    where
        C: FnOnce() + 'static,
        F: FnOnce() -> Option<C> + 'static,
    {
        self.use_effect_impl(None, effect)
    }

    fn use_effect_impl<F, C>(&mut self, deps: Option<Box<dyn AnyEq>>, effect: F)
    where
        C: FnOnce() + 'static,
        F: FnOnce() -> Option<C> + 'static,
    {
        let key_path = self.tick.arena.get(self.fibre).key_path.clone();
        let fibre = self.fibre;
        let hooks = &mut self.tick.arena.get_mut(fibre).hooks;
        let (index, should_run, prior_cleanup) =
            hooks.effect_slot(&key_path, deps.as_deref()).unwrap_or_else(|e| self.fail(e));
        if should_run {
            self.tick.effect_queue.push(EffectJob::new(fibre, index, prior_cleanup, move || {
                effect().map(|c| Cleanup::new(c))
            }));
        }
    }

    /// A value recomputed only when `deps` changes, cached otherwise
    /// (spec §3's description of `use_memo` as manual memoization layered
    /// on top of the automatic props-based kind).
    pub fn use_memo<D: Equatable, T: Equatable>(
        &mut self,
        deps: D,
        compute: impl FnOnce(&D) -> T,
    ) -> T {
        let key_path = self.tick.arena.get(self.fibre).key_path.clone();
        self.tick
            .arena
            .get_mut(self.fibre)
            .hooks
            .memo_slot(&key_path, deps, compute)
            .unwrap_or_else(|e| self.fail(e))
    }

    /// Acquire a resource whose lifetime spans dependency-equal
    /// evaluations, released via `release` when `deps` changes or the
    /// fibre is disposed.
    pub fn use_resource<D, R>(
        &mut self,
        deps: Option<D>,
        acquire: impl FnOnce(Option<&D>) -> R,
        release: impl FnOnce(R) + 'static,
    ) -> R
    where
        D: Equatable,
        R: Equatable,
    {
        let key_path = self.tick.arena.get(self.fibre).key_path.clone();
        self.tick
            .arena
            .get_mut(self.fibre)
            .hooks
            .resource_slot(&key_path, deps, acquire, release)
            .unwrap_or_else(|e| self.fail(e))
    }

    /// Read the nearest ancestor's provided value of type `T`, panicking
    /// with [`RuntimeError::MissingContext`] if no ancestor provides one.
    pub fn use_context<T: Equatable>(&mut self) -> T {
        let key_path = self.tick.arena.get(self.fibre).key_path.clone();
        self.tick
            .arena
            .get_mut(self.fibre)
            .hooks
            .context_slot(&key_path, TypeId::of::<T>())
            .unwrap_or_else(|e| self.fail(e));
        match crate::context::resolve::<T>(self.tick.arena, self.fibre) {
            Some((provider, value)) => {
                self.tick.arena.get_mut(self.fibre).new_predecessors.insert(provider);
                self.tick.arena.get_mut(provider).successors.insert(self.fibre);
                value
            }
            None => self.fail(RuntimeError::MissingContext {
                fibre: key_path,
                type_name: std::any::type_name::<T>(),
            }),
        }
    }

    /// Provide `value` as a context of type `T` for every descendant of
    /// this fibre (does not consume a hook slot: providing is keyed by
    /// type, not by call position).
    pub fn provide_context<T: Equatable>(&mut self, value: T) {
        crate::context::provide(self.tick.arena, self.fibre, value);
    }

    /// Fold every descendant's (and this fibre's own) contribution to the
    /// `(T, R)` capture channel, in subtree evaluation order. Calling this
    /// more than once for the same channel within one evaluation is a
    /// programmer error (spec §9 open question, resolved as a hard
    /// rejection rather than a silent dedup).
    pub fn use_capture<T: Equatable, R: Reducer<T>>(&mut self) -> R::Aggregate {
        let channel = capture::channel_type_id::<T, R>();
        if !self.captured_channels_this_eval.insert(channel) {
            let key_path = self.tick.arena.get(self.fibre).key_path.clone();
            self.fail(RuntimeError::DuplicateCapture {
                fibre: key_path,
                key_debug: std::any::type_name::<T>().to_string(),
            });
        }
        let key_path = self.tick.arena.get(self.fibre).key_path.clone();
        self.tick
            .arena
            .get_mut(self.fibre)
            .hooks
            .capture_slot(&key_path, channel)
            .unwrap_or_else(|e| self.fail(e));
        let (aggregate, providers) = capture::collect::<T, R>(self.tick.arena, self.fibre);
        for provider in providers {
            self.tick.arena.get_mut(self.fibre).new_predecessors.insert(provider);
            self.tick.arena.get_mut(provider).successors.insert(self.fibre);
        }
        aggregate
    }

    /// Contribute `value` to the `(T, R)` capture channel, visible to any
    /// ancestor that calls `use_capture::<T, R>()` this evaluation.
    pub fn provide_capture<T: Equatable, R: Reducer<T>>(&mut self, value: T) {
        capture::provide::<T, R>(self.tick.arena, self.fibre, value);
    }
}
