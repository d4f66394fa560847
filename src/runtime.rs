//! The tick scheduler: [`FibreRuntime`] owns the fibre arena and drives
//! one tick at a time from the root descriptor down, working level by
//! level through whatever became dirty since the last tick.
//!
//! Grounded on the old `embed::Runtime`/`RootedRuntime` pair
//! (`examples/anp-moxie/src/embed.rs`): a runtime owns one cache/arena,
//! is re-entered once per external "now run" call (`run_once` there,
//! [`FibreRuntime::run_tick`] here), and exposes builder-style setters
//! rather than a config struct — `set_state_change_waker` there becomes
//! [`FibreRuntime::set_dirty_waker`] here, notified whenever a state
//! write would otherwise go unobserved between ticks.

use crate::{
    call_context::{CallContext, PendingWrite, WriteQueue},
    effect::EffectQueue,
    error::{Result, RuntimeError},
    fibre::{Arena, FibreId},
    key::KeyPath,
    node::{AnyNode, Node},
    witness::{Instrumentation, VisualNode},
};
use std::{
    any::TypeId,
    cell::RefCell,
    collections::{HashMap, HashSet, VecDeque},
    panic::{self, AssertUnwindSafe},
    rc::Rc,
    task::Waker,
};
use tracing::{debug, error, trace};

/// State shared by every fibre evaluated during one tick: the arena, the
/// effect queue jobs are appended to, the pending-write sink state
/// setters push into, and whether this is an analysis pass.
pub(crate) struct TickState<'a> {
    pub(crate) arena: &'a mut Arena,
    pub(crate) effect_queue: &'a mut EffectQueue,
    pub(crate) pending_writes: &'a WriteQueue,
    pub(crate) analysis_mode: bool,
    pub(crate) instrumentation: &'a mut Vec<Box<dyn Instrumentation>>,
}

/// Evaluate `node` as fibre `id`, reusing its memoized output if `node`
/// compares equal to its props from the last evaluation and it isn't
/// independently dirty (spec §3, Memoization). This is the single entry
/// point both [`FibreRuntime::run_tick`]'s scheduler loop and
/// [`CallContext::evaluate_child`] use, so a descendant reached either way
/// behaves identically.
pub(crate) fn evaluate_fibre<N: Node>(tick: &mut TickState<'_>, id: FibreId, node: N) -> N::Output {
    let dirty = tick.arena.get(id).dirty;
    let reusable = !dirty
        && tick
            .arena
            .get(id)
            .node
            .as_ref()
            .map_or(false, |existing| existing.dyn_eq(&node));

    if reusable {
        trace!(fibre = %tick.arena.get(id).key_path, "reusing memoized output");
        let output = tick.arena.get(id).output.as_ref().expect("evaluated fibre always has output");
        return crate::erased::downcast::<N::Output>(&**output).clone();
    }

    let key_path = tick.arena.get(id).key_path.clone();
    let was_mount = tick.arena.get(id).node.is_none();
    debug!(fibre = %key_path, mount = was_mount, "evaluating fibre");

    let old_children = std::mem::take(&mut tick.arena.get_mut(id).children);
    let old_predecessors = std::mem::take(&mut tick.arena.get_mut(id).predecessors);
    tick.arena.get_mut(id).new_children.clear();
    tick.arena.get_mut(id).new_predecessors.clear();
    // Taken (not cleared) so the post-eval values can be diffed against
    // these to detect a changed binding even when `output` itself didn't
    // change (spec §4.3: "a change there invalidates this fibre", where
    // "there" is the provided value, not the provider's return value).
    let old_contexts = std::mem::take(&mut tick.arena.get_mut(id).provided_contexts);
    let old_captures = std::mem::take(&mut tick.arena.get_mut(id).provided_captures);
    tick.arena.get_mut(id).hooks.begin(was_mount);

    let output = {
        let mut ctx = CallContext::new(&mut *tick, id);
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            if ctx.is_analysis() {
                node.eval_analysis(&mut ctx)
            } else {
                node.eval(&mut ctx)
            }
        }));
        match result {
            Ok(output) => output,
            Err(payload) => {
                // Attach the fibre that actually panicked before this unwinds
                // through the enclosing `evaluate_fibre` call (if any) that
                // invoked us via `evaluate_child` — a payload that is already
                // a `RuntimeError` (raised via `CallContext::fail` further
                // down) already carries the right fibre and is re-raised as
                // is.
                let err = payload.downcast::<RuntimeError>().map(|boxed| *boxed).unwrap_or_else(|payload| {
                    RuntimeError::NodeFailure { fibre: key_path.clone(), payload }
                });
                panic::panic_any(err);
            }
        }
    };

    if let Err(e) = tick.arena.get(id).hooks.finish(&key_path) {
        panic::panic_any(e);
    }

    let type_name = AnyNode::type_name(&node);
    if was_mount {
        for obs in tick.instrumentation.iter_mut() {
            obs.on_mount(&key_path, type_name);
        }
    }

    // Diff the staged children/predecessors against the prior evaluation's.
    let new_children = std::mem::take(&mut tick.arena.get_mut(id).new_children);
    let new_predecessors = std::mem::take(&mut tick.arena.get_mut(id).new_predecessors);

    let new_child_set: HashSet<FibreId> = new_children.iter().copied().collect();
    for old_child in &old_children {
        if !new_child_set.contains(old_child) {
            dispose_subtree(tick.arena, tick.instrumentation, *old_child);
        }
    }
    for old_pred in &old_predecessors {
        if !new_predecessors.contains(old_pred) {
            tick.arena.get_mut(*old_pred).successors.remove(&id);
        }
    }

    tick.arena.get_mut(id).children = new_children;
    tick.arena.get_mut(id).predecessors = new_predecessors;

    let new_output: Box<dyn crate::erased::AnyEq> = Box::new(output.clone());
    let output_changed = tick.arena.get(id).output.as_ref().map_or(true, |old| !old.dyn_eq(&*new_output));
    let contexts_changed = bindings_differ(&old_contexts, &tick.arena.get(id).provided_contexts);
    let captures_changed = bindings_differ(&old_captures, &tick.arena.get(id).provided_captures);
    let committed_change = output_changed || contexts_changed || captures_changed;

    tick.arena.get_mut(id).output = Some(new_output);
    tick.arena.get_mut(id).node = Some(Box::new(node));
    tick.arena.get_mut(id).dirty = false;

    if !was_mount && committed_change {
        for obs in tick.instrumentation.iter_mut() {
            obs.on_update(&key_path, type_name);
        }
    }

    if committed_change {
        let successors: Vec<FibreId> = tick.arena.get(id).successors.iter().copied().collect();
        for successor in successors {
            mark_dirty(tick.arena, successor);
        }
    }

    output
}

/// Marks `id` dirty and walks up its parent chain doing the same.
///
/// A fibre's own evaluation only recurses into its children by actually
/// calling `node.eval()`; a fibre that is itself memoized (not dirty, equal
/// props) never does, so a descendant marked dirty in isolation would be
/// unreachable from the root. Every ancestor on the path to a dirty fibre
/// must be dirty too, or the scheduler has no way to know to descend into
/// it. Stops as soon as it reaches an already-dirty (or disposed) fibre,
/// since the invariant guarantees everything above that point is already
/// marked (or irrelevant).
fn mark_dirty(arena: &mut Arena, id: FibreId) {
    let mut current = Some(id);
    while let Some(fibre_id) = current {
        let fibre = arena.get_mut(fibre_id);
        if !fibre.is_active() || fibre.dirty {
            break;
        }
        fibre.dirty = true;
        current = fibre.parent;
    }
}

/// Whether a fibre's provided context/capture bindings differ from the
/// previous evaluation's, by key set or by `dyn_eq` on shared keys.
fn bindings_differ(
    old: &HashMap<TypeId, Box<dyn crate::erased::AnyEq>>,
    new: &HashMap<TypeId, Box<dyn crate::erased::AnyEq>>,
) -> bool {
    if old.len() != new.len() {
        return true;
    }
    old.iter().any(|(key, old_value)| match new.get(key) {
        Some(new_value) => !old_value.dyn_eq(&**new_value),
        None => true,
    })
}

/// Apply buffered state writes from the previous tick (or from callbacks
/// fired between ticks) to their target hook slots, marking the owning
/// fibres dirty. A write targeting a fibre that has since been disposed
/// (its `Setter` outlived the fibre it was bound to) is dropped and
/// reported as `DisposedAccess` once every other pending write has still
/// been applied.
fn apply_pending_writes(arena: &mut Arena, pending_writes: &WriteQueue) -> Result<()> {
    let writes: Vec<PendingWrite> = pending_writes.borrow_mut().drain(..).collect();
    let mut first_err = None;
    for write in writes {
        if !arena.get(write.fibre).is_active() {
            if first_err.is_none() {
                let fibre = arena.get(write.fibre).key_path.clone();
                first_err = Some(RuntimeError::DisposedAccess { fibre });
            }
            continue;
        }
        arena.get_mut(write.fibre).hooks.set_state_value(write.slot_index, write.value);
        mark_dirty(arena, write.fibre);
    }
    match first_err {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Drain the effect queue, running each job's prior cleanup and then its
/// body, and store the resulting cleanup back in the owning fibre's hook
/// slot (or run it immediately if that fibre has since been disposed).
fn run_effects(arena: &mut Arena, effect_queue: &mut EffectQueue) {
    if effect_queue.is_empty() {
        return;
    }
    let results = effect_queue.drain();
    for (fibre, slot_index, cleanup) in results {
        if arena.get(fibre).is_active() {
            arena.get_mut(fibre).hooks.set_effect_cleanup(slot_index, cleanup);
        } else if let Some(cleanup) = cleanup {
            cleanup.run();
        }
    }
}

/// Mark `id` and every fibre in its subtree `Disposed`, running their
/// effect cleanups and resource releases (spec: unmount order is
/// depth-first, children before their parent).
fn dispose_subtree(arena: &mut Arena, instrumentation: &mut Vec<Box<dyn Instrumentation>>, id: FibreId) {
    let children = arena.get(id).children.clone();
    for child in children {
        dispose_subtree(arena, instrumentation, child);
    }
    let fibre = arena.get_mut(id);
    fibre.hooks.dispose();
    fibre.status = crate::fibre::Status::Disposed;
    let path = fibre.key_path.clone();
    for obs in instrumentation.iter_mut() {
        obs.on_unmount(&path);
    }
}

/// Guards against re-entering [`FibreRuntime::run_tick`] while a tick is
/// already in progress (spec §5: evaluation must not recurse into another
/// tick). Grounded on the reentrant-call guards built with `scopeguard`
/// elsewhere in this crate's lineage: a bool flag set on entry and reset
/// via a `scopeguard::guard` so a panicking node function can't leave the
/// runtime permanently locked out of future ticks.
pub struct FibreRuntime<N: Node> {
    arena: Arena,
    root: FibreId,
    root_node: N,
    effect_queue: EffectQueue,
    pending_writes: WriteQueue,
    in_tick: bool,
    dirty_waker: Option<Waker>,
    instrumentation: Vec<Box<dyn Instrumentation>>,
}

/// What a tick produced.
#[derive(Debug, Clone)]
pub struct TickOutcome<O> {
    /// The root's committed output, if the tick completed without a
    /// structural or node-function error.
    pub output: O,
    /// Whether any fibre's committed output actually changed this tick
    /// (spec §8, Incrementality: a no-op tick touches nothing).
    pub changed: bool,
}

impl<N: Node> FibreRuntime<N> {
    /// Construct a runtime for `root`. The root descriptor is supplied
    /// once, at construction, not per tick — a later tick only
    /// re-evaluates the root if something it (transitively) depends on
    /// changed, exactly like any other fibre.
    pub fn new(root: N) -> Self {
        let mut arena = Arena::default();
        let root_id = arena.alloc_root();
        FibreRuntime {
            arena,
            root: root_id,
            root_node: root,
            effect_queue: EffectQueue::default(),
            pending_writes: Rc::new(RefCell::new(Vec::new())),
            in_tick: false,
            dirty_waker: None,
            instrumentation: Vec::new(),
        }
    }

    /// Registers a waker to be woken whenever a state setter is called
    /// between ticks, so an embedding event loop knows to schedule
    /// another [`FibreRuntime::run_tick`].
    pub fn set_dirty_waker(&mut self, waker: Waker) {
        self.dirty_waker = Some(waker);
    }

    /// Adds an instrumentation observer. Observers see every mount,
    /// update, and unmount for the lifetime of the runtime, in the order
    /// they occur.
    pub fn add_instrumentation(&mut self, instrumentation: impl Instrumentation + 'static) {
        self.instrumentation.push(Box::new(instrumentation));
    }

    /// Run one tick: apply buffered state writes, evaluate the root (and
    /// transitively whatever is reachable and dirty), commit, then run
    /// queued effects. Returns `Err` if a structural or node-function
    /// error aborted the root's own evaluation; fibres committed earlier
    /// in the same tick keep their results (see `DESIGN.md` for why this
    /// implementation doesn't attempt a full transactional rollback).
    pub fn run_tick(&mut self) -> Result<TickOutcome<N::Output>>
    where
        N: Clone,
    {
        if self.in_tick {
            return Err(RuntimeError::ReentrantTick);
        }
        self.in_tick = true;
        // Guards the flag above even if something below this point panics
        // outside the `catch_unwind` around node evaluation (e.g. a
        // `RefCell` borrow conflict while applying pending writes).
        let _guard = scopeguard::guard(&mut self.in_tick, |flag| *flag = false);

        apply_pending_writes(&mut self.arena, &self.pending_writes)?;

        let root = self.root;
        let root_node = self.root_node.clone();
        let before = self.arena.get(root).output.clone();

        let mut tick = TickState {
            arena: &mut self.arena,
            effect_queue: &mut self.effect_queue,
            pending_writes: &self.pending_writes,
            analysis_mode: false,
            instrumentation: &mut self.instrumentation,
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| evaluate_fibre(&mut tick, root, root_node)));

        let output = match outcome {
            Ok(output) => output,
            Err(payload) => {
                let err = payload.downcast::<RuntimeError>().map(|boxed| *boxed).unwrap_or_else(|payload| {
                    RuntimeError::NodeFailure { fibre: KeyPath::root(), payload }
                });
                error!(error = %err, "tick aborted");
                return Err(err);
            }
        };

        let changed = match &before {
            Some(before) => !before.dyn_eq(&**self.arena.get(root).output.as_ref().unwrap()),
            None => true,
        };

        run_effects(&mut self.arena, &mut self.effect_queue);

        Ok(TickOutcome { output, changed })
    }

    /// Force a full re-evaluation of the tree in analysis mode and export
    /// a read-only snapshot of the result (spec §6). This performs (and
    /// commits) a real tick, so it observes the same memoization and
    /// dirty-propagation rules as [`FibreRuntime::run_tick`] — it differs
    /// only in that every fibre reachable from the root is forced dirty
    /// first, and nodes see `is_analysis() == true`.
    pub fn visualize(&mut self) -> Result<VisualNode>
    where
        N: Clone,
    {
        if self.in_tick {
            return Err(RuntimeError::ReentrantTick);
        }
        self.force_dirty_reachable();
        self.in_tick = true;
        let _guard = scopeguard::guard(&mut self.in_tick, |flag| *flag = false);

        apply_pending_writes(&mut self.arena, &self.pending_writes)?;
        let root = self.root;
        let root_node = self.root_node.clone();
        let mut tick = TickState {
            arena: &mut self.arena,
            effect_queue: &mut self.effect_queue,
            pending_writes: &self.pending_writes,
            analysis_mode: true,
            instrumentation: &mut self.instrumentation,
        };
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| evaluate_fibre(&mut tick, root, root_node)));

        outcome.map_err(|payload| {
            payload
                .downcast::<RuntimeError>()
                .map(|boxed| *boxed)
                .unwrap_or_else(|payload| RuntimeError::NodeFailure { fibre: KeyPath::root(), payload })
        })?;

        run_effects(&mut self.arena, &mut self.effect_queue);
        Ok(self.export(self.root))
    }

    fn force_dirty_reachable(&mut self) {
        let mut queue = VecDeque::from([self.root]);
        while let Some(id) = queue.pop_front() {
            self.arena.get_mut(id).dirty = true;
            queue.extend(self.arena.get(id).children.iter().copied());
        }
    }

    fn export(&self, id: FibreId) -> VisualNode {
        let fibre = self.arena.get(id);
        VisualNode {
            path: fibre.key_path.clone(),
            type_name: fibre.node.as_ref().map_or("<unevaluated>", |n| n.type_name()),
            output_debug: fibre.output.as_ref().map_or_else(String::new, |o| format!("{:?}", o)),
            children: fibre.children.iter().map(|&child| self.export(child)).collect(),
        }
    }

    /// The number of fibres ever allocated, active or disposed (for
    /// diagnostics and tests; not part of the incremental-evaluation
    /// contract).
    pub fn fibre_count(&self) -> usize {
        self.arena.len()
    }
}
