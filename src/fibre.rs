//! The fibre arena: the persistent tree of evaluated nodes, never
//! physically freed (spec §4.2 — a disposed fibre's slot is marked, not
//! reclaimed, so stale [`FibreId`]s never alias a different fibre).
//!
//! Grounded on `topo::Id`'s design of identity as a value rather than a
//! pointer (`examples/anp-moxie/topo/src/lib.rs`) and on `dyn-cache`'s
//! arena-of-slots storage (`dyn-cache/src/storage.rs`), adapted here to an
//! explicit `Vec`-backed arena instead of a `HashMap` keyed by hashed
//! call-site, since fibres need stable indices for predecessor/successor
//! edges.

use crate::{
    capture::CaptureBinding,
    erased::AnyEq,
    hooks::HookRegistry,
    key::{Key, KeyPath},
    node::AnyNode,
};
use std::{
    any::TypeId,
    collections::{HashMap, HashSet},
};

/// A stable index into the [`Arena`]. Never reused: a fibre's slot is
/// marked [`Status::Disposed`] rather than removed from the `Vec`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct FibreId(usize);

impl FibreId {
    pub(crate) fn root() -> Self {
        FibreId(0)
    }

    pub(crate) fn from_index(index: usize) -> Self {
        FibreId(index)
    }

    pub(crate) fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for FibreId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "fibre#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Status {
    /// Evaluated at least once and still reachable from the root.
    Active,
    /// No longer reachable; hooks have been torn down, node/output retained
    /// only so stale references can be diagnosed rather than dangling.
    Disposed,
}

/// One node in the fibre tree.
pub(crate) struct Fibre {
    pub(crate) id: FibreId,
    pub(crate) parent: Option<FibreId>,
    /// This fibre's key relative to its parent; `None` only for the root.
    pub(crate) key: Option<Key>,
    pub(crate) key_path: KeyPath,
    pub(crate) status: Status,

    pub(crate) node: Option<Box<dyn AnyNode>>,
    pub(crate) output: Option<Box<dyn AnyEq>>,

    /// Children as committed by this fibre's most recent completed
    /// evaluation.
    pub(crate) children: Vec<FibreId>,
    /// Children registered so far *during the evaluation in progress*.
    /// Swapped into `children` on commit; diffed against the old
    /// `children` to find fibres no longer reachable, which are disposed.
    pub(crate) new_children: Vec<FibreId>,
    /// Lookup from a child's key to its fibre, persisted across
    /// evaluations so a recurring key resolves to the same fibre (spec
    /// §3's "Identity", the basis for memoization and state continuity).
    pub(crate) child_index: HashMap<Key, FibreId>,

    pub(crate) hooks: HookRegistry,

    /// Set whenever this fibre must be re-evaluated on the next tick:
    /// a state setter fired against one of its slots, a provided
    /// context/capture it reads changed, or it was newly mounted.
    pub(crate) dirty: bool,

    /// Fibres read during the most recent completed evaluation (via
    /// `evaluate_child`, `use_context`, or `use_capture`): this fibre is
    /// added to each one's `successors` set, and changes to any of them
    /// dirty this fibre again (spec §4.5, the dependency graph).
    pub(crate) predecessors: HashSet<FibreId>,
    /// Predecessors registered so far *during the evaluation in
    /// progress*; swapped into `predecessors` on commit.
    pub(crate) new_predecessors: HashSet<FibreId>,
    /// Fibres that read this one; enqueued for re-evaluation whenever
    /// this fibre's committed output changes.
    pub(crate) successors: HashSet<FibreId>,

    /// Context values provided directly by this fibre this evaluation,
    /// keyed by the provided type. Rebuilt from scratch every evaluation,
    /// same as `children`.
    pub(crate) provided_contexts: HashMap<TypeId, Box<dyn AnyEq>>,
    /// Capture bindings registered directly by this fibre this
    /// evaluation (spec §3's bottom-up aggregation).
    pub(crate) provided_captures: HashMap<TypeId, CaptureBinding>,
}

impl Fibre {
    fn new(id: FibreId, parent: Option<FibreId>, key: Option<Key>, key_path: KeyPath) -> Self {
        Fibre {
            id,
            parent,
            key,
            key_path,
            status: Status::Active,
            node: None,
            output: None,
            children: Vec::new(),
            new_children: Vec::new(),
            child_index: HashMap::new(),
            hooks: HookRegistry::default(),
            dirty: true,
            predecessors: HashSet::new(),
            new_predecessors: HashSet::new(),
            successors: HashSet::new(),
            provided_contexts: HashMap::new(),
            provided_captures: HashMap::new(),
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.status == Status::Active
    }
}

/// Owns every fibre ever allocated. Indices are stable for the lifetime of
/// the runtime; disposal marks a slot rather than shrinking the `Vec`.
#[derive(Default)]
pub(crate) struct Arena {
    fibres: Vec<Fibre>,
}

impl Arena {
    pub(crate) fn alloc_root(&mut self) -> FibreId {
        debug_assert!(self.fibres.is_empty(), "alloc_root called on a non-empty arena");
        let id = FibreId::from_index(0);
        self.fibres.push(Fibre::new(id, None, None, KeyPath::root()));
        id
    }

    pub(crate) fn alloc_child(&mut self, parent: FibreId, key: Key) -> FibreId {
        let id = FibreId::from_index(self.fibres.len());
        let key_path = self.get(parent).key_path.child(key.clone());
        self.fibres.push(Fibre::new(id, Some(parent), Some(key), key_path));
        id
    }

    /// Find the existing child of `parent` registered under `key`, or
    /// allocate a fresh fibre for it. The returned id is stable across
    /// ticks for as long as `parent` keeps registering `key`.
    pub(crate) fn resolve_child(&mut self, parent: FibreId, key: Key) -> FibreId {
        if let Some(&id) = self.get(parent).child_index.get(&key) {
            return id;
        }
        let id = self.alloc_child(parent, key.clone());
        self.get_mut(parent).child_index.insert(key, id);
        id
    }

    pub(crate) fn get(&self, id: FibreId) -> &Fibre {
        &self.fibres[id.index()]
    }

    pub(crate) fn get_mut(&mut self, id: FibreId) -> &mut Fibre {
        &mut self.fibres[id.index()]
    }

    /// Split-borrow helper: mutable access to two distinct fibres at once,
    /// used when propagating edge changes between a fibre and one of its
    /// (former) predecessors/successors.
    pub(crate) fn get_pair_mut(&mut self, a: FibreId, b: FibreId) -> (&mut Fibre, &mut Fibre) {
        assert_ne!(a.index(), b.index(), "get_pair_mut called with the same id twice");
        if a.index() < b.index() {
            let (left, right) = self.fibres.split_at_mut(b.index());
            (&mut left[a.index()], &mut right[0])
        } else {
            let (left, right) = self.fibres.split_at_mut(a.index());
            (&mut right[0], &mut left[b.index()])
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.fibres.len()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Fibre> {
        self.fibres.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_ids_are_stable_across_relookup() {
        let mut arena = Arena::default();
        let root = arena.alloc_root();
        let child = arena.alloc_child(root, Key::new("a"));
        assert_eq!(arena.get(child).parent, Some(root));
        assert_eq!(arena.get(child).key_path.to_string(), "/\"a\"");
    }

    #[test]
    fn get_pair_mut_works_in_either_order() {
        let mut arena = Arena::default();
        let root = arena.alloc_root();
        let child = arena.alloc_child(root, Key::new(1u32));
        {
            let (a, b) = arena.get_pair_mut(root, child);
            a.dirty = false;
            b.dirty = false;
        }
        {
            let (a, b) = arena.get_pair_mut(child, root);
            assert!(!a.dirty);
            assert!(!b.dirty);
        }
    }
}
