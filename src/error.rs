//! Error kinds, grounded on `illicit::GetFailed`'s hand-written `Display`
//! impl (`examples/anp-moxie/illicit/src/lib.rs`) rather than a
//! `thiserror`-derived enum — the teacher carries no such dependency
//! anywhere in the pack.

use crate::key::KeyPath;
use std::{
    any::Any,
    fmt::{self, Display, Formatter},
};

/// Everything that can go wrong evaluating a fibre tree.
///
/// Per spec §7: `DuplicateKey`, `HookOrderViolation`, `MissingContext`, and
/// `DuplicateCapture` are programmer errors; a tick that hits one aborts
/// with the tree left as close to its pre-tick state as this implementation
/// tracks (see `DESIGN.md` for the one place this falls short of a full
/// transactional rollback). `ReentrantTick` and `DisposedAccess` are misuse
/// of the runtime's API. `NodeFailure` carries a user node function's own
/// panic payload.
#[derive(Debug)]
pub enum RuntimeError {
    /// Two children were registered under the same parent with the same
    /// key during one evaluation.
    DuplicateKey { parent: KeyPath, key_debug: String },
    /// A fibre's hooks were called in a different order, or a different
    /// count, than on its previous evaluation.
    HookOrderViolation { fibre: KeyPath, slot_index: usize, detail: &'static str },
    /// `use_context` found no ancestor providing the requested type.
    MissingContext { fibre: KeyPath, type_name: &'static str },
    /// `run_tick` was called while a tick was already in progress.
    ReentrantTick,
    /// An operation was attempted against a fibre that has already been
    /// disposed.
    DisposedAccess { fibre: KeyPath },
    /// A fibre's node function panicked during evaluation.
    NodeFailure { fibre: KeyPath, payload: Box<dyn Any + Send + 'static> },
    /// More than one `use_capture` call for the same key occurred within a
    /// single fibre's evaluation (open question in spec §9, resolved here
    /// by rejecting repeats rather than silently deduping).
    DuplicateCapture { fibre: KeyPath, key_debug: String },
}

impl Display for RuntimeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::DuplicateKey { parent, key_debug } => write!(
                f,
                "duplicate child key {} registered under fibre {} within one evaluation",
                key_debug, parent
            ),
            RuntimeError::HookOrderViolation { fibre, slot_index, detail } => write!(
                f,
                "hook order violation at slot {} of fibre {}: {}",
                slot_index, fibre, detail
            ),
            RuntimeError::MissingContext { fibre, type_name } => write!(
                f,
                "use_context::<{}>() found no providing ancestor of fibre {}",
                type_name, fibre
            ),
            RuntimeError::ReentrantTick => {
                write!(f, "run_tick() was invoked while a tick was already in progress")
            }
            RuntimeError::DisposedAccess { fibre } => {
                write!(f, "operation attempted on disposed fibre {}", fibre)
            }
            RuntimeError::NodeFailure { fibre, .. } => {
                write!(f, "node function for fibre {} raised an exception", fibre)
            }
            RuntimeError::DuplicateCapture { fibre, key_debug } => write!(
                f,
                "duplicate use_capture({}) within one evaluation of fibre {}",
                key_debug, fibre
            ),
        }
    }
}

impl std::error::Error for RuntimeError {}

/// Convenient alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RuntimeError>;
