//! Read-only observation of the fibre tree: instrumentation callbacks
//! fired on mount/update/unmount, and a tree export for visualization.
//!
//! Grounded on this crate's own earlier `Witness`/`Recorder` (multiple
//! independent observers seeing the same `see_component` calls as the
//! tree is walked) without the `downcast-rs`/`Mutex`-backed multi-node
//! storage that design needed for a UI backend: a fibre tree has exactly
//! one event type per lifecycle stage, so [`Instrumentation`] is a plain
//! object-safe trait and the runtime just holds a `Vec<Box<dyn
//! Instrumentation>>`.

use crate::key::KeyPath;

/// An observer of fibre lifecycle events. Register one (or several) with
/// [`crate::runtime::FibreRuntime::add_instrumentation`] to watch mounts,
/// updates, and unmounts without altering evaluation.
pub trait Instrumentation {
    fn on_mount(&mut self, _path: &KeyPath, _type_name: &'static str) {}
    fn on_update(&mut self, _path: &KeyPath, _type_name: &'static str) {}
    fn on_unmount(&mut self, _path: &KeyPath) {}
}

/// One node in a [`crate::runtime::FibreRuntime::visualize`] export: a
/// read-only snapshot of a fibre's descriptor type, committed output, and
/// children, safe to hand to a renderer or print for debugging.
#[derive(Debug, Clone)]
pub struct VisualNode {
    pub path: KeyPath,
    pub type_name: &'static str,
    pub output_debug: String,
    pub children: Vec<VisualNode>,
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EventLog {
        events: Vec<String>,
    }

    impl Instrumentation for EventLog {
        fn on_mount(&mut self, path: &KeyPath, type_name: &'static str) {
            self.events.push(format!("mount {} {}", path, type_name));
        }
        fn on_update(&mut self, path: &KeyPath, type_name: &'static str) {
            self.events.push(format!("update {} {}", path, type_name));
        }
        fn on_unmount(&mut self, path: &KeyPath) {
            self.events.push(format!("unmount {}", path));
        }
    }

    #[test]
    fn event_log_records_in_call_order() {
        let mut log = EventLog { events: Vec::new() };
        let root = KeyPath::root();
        log.on_mount(&root, "Root");
        log.on_update(&root, "Root");
        log.on_unmount(&root);
        assert_eq!(log.events, vec!["mount / Root", "update / Root", "unmount /"]);
    }
}
