//! The hook registry: a per-fibre, positionally-indexed sequence of hook
//! slots (spec §4.3).
//!
//! Grounded on `dyn-cache`'s `Namespace`/`Liveness` memoization scheme
//! (`examples/anp-moxie/dyn-cache/src/storage.rs`) for the deps-equality
//! gate, and on `src/drop_guard.rs`'s type-erased destructor for effect
//! cleanups and resource releases.

use crate::{
    effect::Cleanup,
    erased::{downcast, AnyEq, Equatable},
    error::{Result, RuntimeError},
    key::KeyPath,
};
use std::any::TypeId;

/// One entry in a fibre's hook list. The discriminant must stay the same
/// across evaluations of an active fibre (spec invariant 4); a mismatch is
/// `HookOrderViolation`.
pub(crate) enum HookSlot {
    State(StateSlot),
    Effect(EffectSlot),
    Memo(MemoSlot),
    Resource(ResourceSlot),
    Context(ContextSlot),
    Capture(CaptureSlot),
}

impl HookSlot {
    fn kind_name(&self) -> &'static str {
        match self {
            HookSlot::State(_) => "state",
            HookSlot::Effect(_) => "effect",
            HookSlot::Memo(_) => "memo",
            HookSlot::Resource(_) => "resource",
            HookSlot::Context(_) => "context",
            HookSlot::Capture(_) => "capture",
        }
    }
}

pub(crate) struct StateSlot {
    pub(crate) value: Box<dyn AnyEq>,
}

pub(crate) struct EffectSlot {
    pub(crate) deps: Option<Box<dyn AnyEq>>,
    pub(crate) cleanup: Option<Cleanup>,
}

pub(crate) struct MemoSlot {
    pub(crate) deps: Box<dyn AnyEq>,
    pub(crate) value: Box<dyn AnyEq>,
}

pub(crate) struct ResourceSlot {
    pub(crate) deps: Option<Box<dyn AnyEq>>,
    pub(crate) value: Box<dyn AnyEq>,
    pub(crate) release: Option<Cleanup>,
}

pub(crate) struct ContextSlot {
    pub(crate) type_id: TypeId,
}

pub(crate) struct CaptureSlot {
    pub(crate) type_id: TypeId,
}

/// The ordered list of hook slots belonging to one fibre, plus the cursor
/// that walks it during one evaluation.
///
/// The cursor resets at the start of every evaluation (`begin`); each
/// `use_*` call advances it by one via [`HookRegistry::next`]. Completing
/// an evaluation (`finish`) checks that every previously-seen slot was
/// visited again, catching the case where a node function stopped calling
/// hooks partway through (spec invariant 4).
#[derive(Default)]
pub(crate) struct HookRegistry {
    slots: Vec<HookSlot>,
    cursor: usize,
    /// Whether a brand-new slot may be appended this evaluation. Only true
    /// on mount: a fibre's hook count must stay fixed across every later
    /// evaluation (spec invariant 4), so calling one more `use_*` than last
    /// time is just as much a violation as calling one fewer.
    growth_allowed: bool,
}

impl HookRegistry {
    pub(crate) fn begin(&mut self, mount: bool) {
        self.cursor = 0;
        self.growth_allowed = mount;
    }

    pub(crate) fn finish(&self, fibre: &KeyPath) -> Result<()> {
        if self.cursor != self.slots.len() {
            return Err(RuntimeError::HookOrderViolation {
                fibre: fibre.clone(),
                slot_index: self.cursor,
                detail: "fewer hooks called than on the previous evaluation",
            });
        }
        Ok(())
    }

    /// Advance the cursor by one slot, creating it via `init` if this is
    /// the first time this position has been visited, and validating that
    /// the slot already there (if any) was created by the same kind of
    /// hook call (`expect_kind`).
    fn advance(
        &mut self,
        fibre: &KeyPath,
        expect_kind: &'static str,
        init: impl FnOnce() -> HookSlot,
    ) -> Result<usize> {
        let index = self.cursor;
        self.cursor += 1;

        if index == self.slots.len() {
            if !self.growth_allowed {
                return Err(RuntimeError::HookOrderViolation {
                    fibre: fibre.clone(),
                    slot_index: index,
                    detail: "more hooks called than on the previous evaluation",
                });
            }
            self.slots.push(init());
        }

        let actual_kind = self.slots[index].kind_name();
        if actual_kind != expect_kind {
            return Err(RuntimeError::HookOrderViolation {
                fibre: fibre.clone(),
                slot_index: index,
                detail: kind_mismatch_detail(expect_kind, actual_kind),
            });
        }

        Ok(index)
    }

    pub(crate) fn state_slot<T: Equatable>(
        &mut self,
        fibre: &KeyPath,
        initial: impl FnOnce() -> T,
    ) -> Result<(usize, T)> {
        let index =
            self.advance(fibre, "state", || HookSlot::State(StateSlot { value: Box::new(initial()) }))?;
        match &self.slots[index] {
            HookSlot::State(slot) => Ok((index, downcast::<T>(&*slot.value).clone())),
            _ => unreachable!("kind already validated"),
        }
    }

    pub(crate) fn set_state_value(&mut self, index: usize, value: Box<dyn AnyEq>) {
        if let HookSlot::State(slot) = &mut self.slots[index] {
            slot.value = value;
        }
    }

    /// Runs the effect's deps-comparison and returns `true` if the body
    /// should run this commit (mount, or deps changed/absent).
    pub(crate) fn effect_slot(
        &mut self,
        fibre: &KeyPath,
        deps: Option<&dyn AnyEq>,
    ) -> Result<(usize, bool, Option<Cleanup>)> {
        let index = self.advance(fibre, "effect", || {
            HookSlot::Effect(EffectSlot { deps: None, cleanup: None })
        })?;
        let slot = match &mut self.slots[index] {
            HookSlot::Effect(slot) => slot,
            _ => unreachable!("kind already validated"),
        };
        let changed = match (deps, &slot.deps) {
            (None, _) => true,
            (Some(_), None) => true,
            (Some(new), Some(old)) => !new.dyn_eq(&**old),
        };
        let mut prior_cleanup = None;
        if changed {
            slot.deps = deps.map(AnyEq::clone_boxed);
            prior_cleanup = slot.cleanup.take();
        }
        Ok((index, changed, prior_cleanup))
    }

    pub(crate) fn set_effect_cleanup(&mut self, index: usize, cleanup: Option<Cleanup>) {
        if let HookSlot::Effect(slot) = &mut self.slots[index] {
            slot.cleanup = cleanup;
        }
    }

    pub(crate) fn memo_slot<D: Equatable, T: Equatable>(
        &mut self,
        fibre: &KeyPath,
        deps: D,
        compute: impl FnOnce(&D) -> T,
    ) -> Result<T> {
        let index = self.advance(fibre, "memo", || {
            let value = compute(&deps);
            HookSlot::Memo(MemoSlot { deps: Box::new(deps.clone()), value: Box::new(value) })
        })?;
        let slot = match &mut self.slots[index] {
            HookSlot::Memo(slot) => slot,
            _ => unreachable!("kind already validated"),
        };
        if !slot.deps.dyn_eq(&deps) {
            slot.deps = Box::new(deps.clone());
            slot.value = Box::new(compute(&deps));
        }
        Ok(downcast::<T>(&*slot.value).clone())
    }

    pub(crate) fn resource_slot<D: Equatable, R: Equatable>(
        &mut self,
        fibre: &KeyPath,
        deps: Option<D>,
        acquire: impl FnOnce(Option<&D>) -> R,
        release: impl FnOnce(R) + 'static,
    ) -> Result<R> {
        let index = self.advance(fibre, "resource", || {
            let value = acquire(deps.as_ref());
            HookSlot::Resource(ResourceSlot {
                deps: deps.clone().map(|d| Box::new(d) as Box<dyn AnyEq>),
                value: Box::new(value),
                release: None,
            })
        })?;
        let slot = match &mut self.slots[index] {
            HookSlot::Resource(slot) => slot,
            _ => unreachable!("kind already validated"),
        };
        let changed = match (&deps, &slot.deps) {
            (None, _) => true,
            (Some(_), None) => true,
            (Some(new), Some(old)) => !old.dyn_eq(new),
        };
        if changed {
            if let Some(release_prev) = slot.release.take() {
                release_prev.run();
            }
            let new_value = acquire(deps.as_ref());
            slot.deps = deps.map(|d| Box::new(d) as Box<dyn AnyEq>);
            slot.value = Box::new(new_value);
        }
        slot.release = Some(Cleanup::erase_with(release, &slot.value));
        Ok(downcast::<R>(&*slot.value).clone())
    }

    pub(crate) fn context_slot(&mut self, fibre: &KeyPath, type_id: TypeId) -> Result<()> {
        let index = self.advance(fibre, "context", || HookSlot::Context(ContextSlot { type_id }))?;
        match &self.slots[index] {
            HookSlot::Context(slot) if slot.type_id == type_id => Ok(()),
            HookSlot::Context(_) => Err(RuntimeError::HookOrderViolation {
                fibre: fibre.clone(),
                slot_index: index,
                detail: "use_context called with a different type than on the previous evaluation",
            }),
            _ => unreachable!("kind already validated"),
        }
    }

    pub(crate) fn capture_slot(&mut self, fibre: &KeyPath, type_id: TypeId) -> Result<()> {
        let index = self.advance(fibre, "capture", || HookSlot::Capture(CaptureSlot { type_id }))?;
        match &self.slots[index] {
            HookSlot::Capture(slot) if slot.type_id == type_id => Ok(()),
            HookSlot::Capture(_) => Err(RuntimeError::HookOrderViolation {
                fibre: fibre.clone(),
                slot_index: index,
                detail: "use_capture called with a different type than on the previous evaluation",
            }),
            _ => unreachable!("kind already validated"),
        }
    }

    /// Runs every remaining cleanup/release, in slot order, for a fibre
    /// that is being disposed (spec: "effects' cleanup callbacks run" on
    /// unmount).
    pub(crate) fn dispose(&mut self) {
        for slot in &mut self.slots {
            match slot {
                HookSlot::Effect(slot) => {
                    if let Some(cleanup) = slot.cleanup.take() {
                        cleanup.run();
                    }
                }
                HookSlot::Resource(slot) => {
                    if let Some(release) = slot.release.take() {
                        release.run();
                    }
                }
                _ => {}
            }
        }
    }
}

fn kind_mismatch_detail(expected: &'static str, actual: &'static str) -> &'static str {
    match (expected, actual) {
        ("state", _) => "expected a use_state call at this position",
        ("effect", _) => "expected a use_effect call at this position",
        ("memo", _) => "expected a use_memo call at this position",
        ("resource", _) => "expected a use_resource call at this position",
        ("context", _) => "expected a use_context call at this position",
        ("capture", _) => "expected a use_capture call at this position",
        _ => "hook call kind changed between evaluations",
    }
}
