//! A small hand-rolled type-erasure wrapper, shared by node outputs
//! ([`crate::node`]), hook state and deps ([`crate::hooks`]), and context/
//! capture bindings ([`crate::context`], [`crate::capture`]).
//!
//! Grounded on `topo::AnonRc` and `illicit::AnonRc`
//! (`examples/anp-moxie/topo/src/lib.rs`, `illicit/src/anon_rc.rs`), which
//! erase environment values behind `Rc<dyn Any>` with a downcast accessor.
//! This crate needs equality and cloning on top of that (to detect changed
//! props, changed deps, and changed committed results), so `AnyEq` adds
//! `dyn_eq`/`clone_boxed` the same way `node::AnyNode` adds `dyn_eq` over a
//! descriptor.

use std::{any::Any, fmt::Debug};

/// Anything that is `Debug + Clone + PartialEq + 'static` can be erased
/// behind this trait. Spec §3/§4.3 require exactly these properties of
/// props, committed results, and hook deps.
pub trait Equatable: Debug + Clone + PartialEq + 'static {}
impl<T> Equatable for T where T: Debug + Clone + PartialEq + 'static {}

pub(crate) trait AnyEq: Debug {
    fn as_any(&self) -> &dyn Any;
    fn dyn_eq(&self, other: &dyn AnyEq) -> bool;
    fn clone_boxed(&self) -> Box<dyn AnyEq>;
}

impl<T: Equatable> AnyEq for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn dyn_eq(&self, other: &dyn AnyEq) -> bool {
        other.as_any().downcast_ref::<T>().map_or(false, |other| self == other)
    }

    fn clone_boxed(&self) -> Box<dyn AnyEq> {
        Box::new(self.clone())
    }
}

pub(crate) fn downcast<T: Equatable>(value: &dyn AnyEq) -> &T {
    value.as_any().downcast_ref::<T>().unwrap_or_else(|| {
        panic!("type-erased value did not hold the expected type {}", std::any::type_name::<T>())
    })
}

impl Clone for Box<dyn AnyEq> {
    fn clone(&self) -> Self {
        self.clone_boxed()
    }
}

impl PartialEq for Box<dyn AnyEq> {
    fn eq(&self, other: &Self) -> bool {
        self.dyn_eq(&**other)
    }
}
