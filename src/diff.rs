//! Staged graph changes: external inputs and invalidations buffered between
//! builds, applied in one flush at the next evaluation start.

use crate::graph::{DirtyCause, Graph, Version};
use crate::key::{Key, Value};
use crate::progress::{InvalidationState, Progress};
use std::sync::Mutex;
use tracing::debug;

#[derive(Default)]
struct Pending {
    injections: Vec<(Key, Value)>,
    invalidations: Vec<Key>,
    invalidate_errors: bool,
}

/// Buffers changes to apply at the next evaluation start.
#[derive(Default)]
pub struct Differencer {
    pending: Mutex<Pending>,
}

impl Differencer {
    pub fn new() -> Differencer {
        Differencer::default()
    }

    /// Forces `key` to `value` at the next version. Used for build
    /// variables: external inputs that act as graph roots.
    pub fn inject(&self, key: Key, value: Value) {
        self.pending.lock().unwrap().injections.push((key, value));
    }

    /// Marks keys dirty at the next version. Keys with no node are ignored;
    /// there is nothing to invalidate.
    pub fn invalidate(&self, keys: impl IntoIterator<Item = Key>) {
        self.pending.lock().unwrap().invalidations.extend(keys);
    }

    /// Marks every Error node dirty at the next version, re-arming
    /// transient failures for retry.
    pub fn invalidate_errors(&self) {
        self.pending.lock().unwrap().invalidate_errors = true;
    }

    /// Drains the buffer into the graph, bumping the version counter exactly
    /// once. Injections apply first, so a key injected for this build is
    /// Done at the new version before invalidation marking runs.
    pub(crate) fn flush(&self, graph: &Graph, progress: &dyn Progress) -> Version {
        let pending = std::mem::take(&mut *self.pending.lock().unwrap());
        let version = graph.bump_version();

        let mut dirtied = Vec::new();
        for (key, value) in pending.injections {
            let id = graph.intern(&key);
            if graph.inject(id, value, version) {
                let rdeps: Vec<_> = {
                    let node = graph.node(id);
                    let n = node.lock().unwrap();
                    n.rdeps.iter().copied().collect()
                };
                for rdep in rdeps {
                    dirtied.extend(graph.mark_dirty(rdep, DirtyCause::DepChanged));
                }
            }
        }

        for key in pending.invalidations {
            if let Some(id) = graph.lookup_id(&key) {
                dirtied.extend(graph.mark_dirty(id, DirtyCause::Forced));
            }
        }

        if pending.invalidate_errors {
            for key in graph.error_keys() {
                if let Some(id) = graph.lookup_id(&key) {
                    dirtied.extend(graph.mark_dirty(id, DirtyCause::Forced));
                }
            }
        }

        debug!(?version, dirtied = dirtied.len(), "differencer flushed");
        for key in dirtied {
            progress.invalidated(&key, InvalidationState::Dirty);
        }
        version
    }
}
