//! The node store: one record per key, carrying state, value or error,
//! dependency edges, and version stamps.
//!
//! Keys are interned to dense ids. The key index is a sharded concurrent
//! map; node records live in an append-only arena of per-node mutexes, so
//! lookup is concurrent and mutation is serialized per node. Only this
//! module transitions node state.

use crate::densemap::{self, DenseMap};
use crate::error::NodeError;
use crate::key::{Fingerprint, Key, Value};
use dashmap::DashMap;
use rustc_hash::FxHashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::debug;

/// Dense identity of a key within one graph instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

impl From<usize> for NodeId {
    fn from(u: usize) -> NodeId {
        NodeId(u as u32)
    }
}

impl densemap::Index for NodeId {
    fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Monotonic counter bumped once per evaluation; stamps when a node's value
/// was last produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Version(pub u64);

/// Why a node is dirty. Forced dirt requires a function re-run; dep-changed
/// dirt may be cleared by fingerprint revalidation alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirtyCause {
    Forced,
    DepChanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Absent,
    Dirty(DirtyCause),
    Building,
    Done,
    Error,
}

/// Whether dep/rdep edges are retained after completion. Without edges the
/// graph cannot be incrementally invalidated; suitable only for single-shot
/// batch evaluations, in exchange for the memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepEdges {
    Full,
    None,
}

pub(crate) struct Node {
    pub key: Key,
    pub state: NodeState,
    /// Last completed value. Retained while Dirty so revalidation can
    /// compare fingerprints and injected nodes can replay.
    pub value: Option<Value>,
    /// Content fingerprint of `value`, computed once at completion.
    pub value_fp: Option<Fingerprint>,
    pub error: Option<NodeError>,
    /// Deps declared by the last completed evaluation, in request order.
    pub deps: Vec<NodeId>,
    /// Fingerprint each dep's value had when this node last completed;
    /// parallel to `deps`.
    pub dep_fps: Vec<Fingerprint>,
    pub rdeps: FxHashSet<NodeId>,
    pub version: Version,
    /// Version at which the node became dirty; drives dirty-age GC.
    pub dirty_since: Version,
    /// Injected nodes replay their stored value instead of running a
    /// function.
    pub injected: bool,
}

impl Node {
    fn new(key: Key) -> Node {
        Node {
            key,
            state: NodeState::Absent,
            value: None,
            value_fp: None,
            error: None,
            deps: Vec::new(),
            dep_fps: Vec::new(),
            rdeps: FxHashSet::default(),
            version: Version(0),
            dirty_since: Version(0),
            injected: false,
        }
    }

    fn reset(&mut self) {
        self.state = NodeState::Absent;
        self.value = None;
        self.value_fp = None;
        self.error = None;
        self.deps.clear();
        self.dep_fps.clear();
        self.rdeps.clear();
        self.injected = false;
    }
}

/// Read-only snapshot of a node, resolved back to keys.
#[derive(Debug, Clone)]
pub struct NodeView {
    pub key: Key,
    pub state: NodeState,
    pub value: Option<Value>,
    pub error: Option<NodeError>,
    pub version: Version,
    pub deps: Vec<Key>,
    pub rdeps: Vec<Key>,
}

/// Keys evicted by a delete sweep, plus the survivors it dirtied.
#[derive(Debug, Default)]
pub struct DeleteResult {
    pub deleted: Vec<Key>,
    pub dirtied: Vec<Key>,
}

pub struct Graph {
    index: DashMap<Key, NodeId>,
    nodes: RwLock<DenseMap<NodeId, Arc<Mutex<Node>>>>,
    version: AtomicU64,
    keep_edges: KeepEdges,
}

impl Graph {
    pub fn new(keep_edges: KeepEdges) -> Graph {
        Graph {
            index: DashMap::new(),
            nodes: RwLock::new(DenseMap::new()),
            version: AtomicU64::new(0),
            keep_edges,
        }
    }

    pub fn keep_edges(&self) -> KeepEdges {
        self.keep_edges
    }

    pub fn version(&self) -> Version {
        Version(self.version.load(Ordering::SeqCst))
    }

    /// Bumped exactly once per evaluation, by the differencer flush.
    pub(crate) fn bump_version(&self) -> Version {
        Version(self.version.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.read().unwrap().len()
    }

    /// Idempotently creates the node for a key; nodes are born Absent.
    pub(crate) fn intern(&self, key: &Key) -> NodeId {
        if let Some(id) = self.index.get(key) {
            return *id;
        }
        *self.index.entry(key.clone()).or_insert_with(|| {
            self.nodes
                .write()
                .unwrap()
                .push(Arc::new(Mutex::new(Node::new(key.clone()))))
        })
    }

    pub(crate) fn lookup_id(&self, key: &Key) -> Option<NodeId> {
        self.index.get(key).map(|id| *id)
    }

    pub(crate) fn node(&self, id: NodeId) -> Arc<Mutex<Node>> {
        self.nodes.read().unwrap().get(id).clone()
    }

    pub(crate) fn key_of(&self, id: NodeId) -> Key {
        self.node(id).lock().unwrap().key.clone()
    }

    /// Snapshot of a node by key, with edges resolved back to keys.
    pub fn lookup(&self, key: &Key) -> Option<NodeView> {
        let id = self.lookup_id(key)?;
        let (state, value, error, version, dep_ids, rdep_ids) = {
            let node = self.node(id);
            let n = node.lock().unwrap();
            (
                n.state,
                n.value.clone(),
                n.error.clone(),
                n.version,
                n.deps.clone(),
                n.rdeps.iter().copied().collect::<Vec<_>>(),
            )
        };
        Some(NodeView {
            key: key.clone(),
            state,
            value,
            error,
            version,
            deps: dep_ids.iter().map(|&d| self.key_of(d)).collect(),
            rdeps: rdep_ids.iter().map(|&r| self.key_of(r)).collect(),
        })
    }

    /// All keys currently in the graph matching a predicate.
    pub fn keys_matching(&self, pred: impl Fn(&Key) -> bool) -> Vec<Key> {
        let mut keys: Vec<Key> = self
            .index
            .iter()
            .filter(|entry| pred(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        keys
    }

    fn node_arcs(&self) -> Vec<(NodeId, Arc<Mutex<Node>>)> {
        // Snapshot the arena without holding its lock across node locks.
        let nodes = self.nodes.read().unwrap();
        nodes.iter().map(|(id, node)| (id, node.clone())).collect()
    }

    pub(crate) fn error_keys(&self) -> Vec<Key> {
        let mut keys = Vec::new();
        for (_, node) in self.node_arcs() {
            let n = node.lock().unwrap();
            if n.state == NodeState::Error {
                keys.push(n.key.clone());
            }
        }
        keys.sort();
        keys
    }

    /// Atomically transitions Absent/Dirty -> Building. Returns the guard's
    /// prior state so the caller can pick the rebuild strategy.
    pub(crate) fn begin_build(&self, id: NodeId) -> Result<NodeState, NodeState> {
        let node = self.node(id);
        let mut n = node.lock().unwrap();
        match n.state {
            NodeState::Absent | NodeState::Dirty(_) => {
                let prior = n.state;
                n.state = NodeState::Building;
                Ok(prior)
            }
            other => Err(other),
        }
    }

    /// Reverts Building back to the given prior state; used when an
    /// evaluation parks awaiting missing deps.
    pub(crate) fn unbuild(&self, id: NodeId, prior: NodeState) {
        let node = self.node(id);
        let mut n = node.lock().unwrap();
        debug_assert_eq!(n.state, NodeState::Building);
        n.state = prior;
    }

    /// Building -> Done. Rewrites dep/rdep edges diff-based: edges recorded
    /// are exactly those this evaluation declared.
    pub(crate) fn complete(
        &self,
        id: NodeId,
        value: Value,
        deps: Vec<NodeId>,
        dep_fps: Vec<Fingerprint>,
        version: Version,
    ) {
        let keep = self.keep_edges == KeepEdges::Full;
        let old_deps = {
            let node = self.node(id);
            let mut n = node.lock().unwrap();
            debug_assert_eq!(n.state, NodeState::Building);
            n.state = NodeState::Done;
            n.value_fp = Some(value.fingerprint());
            n.value = Some(value);
            n.error = None;
            n.version = version;
            n.injected = false;
            let old = std::mem::take(&mut n.deps);
            if keep {
                n.deps = deps.clone();
                n.dep_fps = dep_fps;
            } else {
                n.dep_fps.clear();
            }
            old
        };
        if keep {
            let new: FxHashSet<NodeId> = deps.iter().copied().collect();
            let old: FxHashSet<NodeId> = old_deps.iter().copied().collect();
            for &dep in old_deps.iter().filter(|d| !new.contains(d)) {
                self.node(dep).lock().unwrap().rdeps.remove(&id);
            }
            for &dep in deps.iter().filter(|d| !old.contains(d)) {
                self.node(dep).lock().unwrap().rdeps.insert(id);
            }
        }
    }

    /// Building -> Error. Existing edges are left as-is; every build start
    /// re-arms error nodes for retry anyway.
    pub(crate) fn fail(&self, id: NodeId, err: NodeError, version: Version) {
        let node = self.node(id);
        let mut n = node.lock().unwrap();
        n.state = NodeState::Error;
        n.error = Some(err);
        n.value = None;
        n.value_fp = None;
        n.version = version;
    }

    /// Dirty -> Done without re-running the function: revalidation found
    /// every dep fingerprint unchanged. Re-asserts rdep edges on deps,
    /// which an eviction may have dropped.
    pub(crate) fn mark_clean(&self, id: NodeId, version: Version) {
        let deps = {
            let node = self.node(id);
            let mut n = node.lock().unwrap();
            debug_assert_eq!(n.state, NodeState::Building);
            n.state = NodeState::Done;
            n.version = version;
            n.deps.clone()
        };
        for dep in deps {
            self.node(dep).lock().unwrap().rdeps.insert(id);
        }
    }

    /// Forces a key to a value at the given version, bypassing any function.
    /// Returns whether the content fingerprint changed (callers dirty rdeps
    /// only then).
    pub(crate) fn inject(&self, id: NodeId, value: Value, version: Version) -> bool {
        let old_deps = {
            let node = self.node(id);
            let mut n = node.lock().unwrap();
            let fp = value.fingerprint();
            let changed = n.value_fp != Some(fp);
            n.state = NodeState::Done;
            n.value = Some(value);
            n.value_fp = Some(fp);
            n.error = None;
            n.version = version;
            n.injected = true;
            n.dep_fps.clear();
            if !changed {
                return false;
            }
            std::mem::take(&mut n.deps)
        };
        for dep in old_deps {
            self.node(dep).lock().unwrap().rdeps.remove(&id);
        }
        true
    }

    /// Marks a node dirty and transitively marks its rdeps. Returns the keys
    /// newly dirtied, for observer notification. Propagation stops at nodes
    /// that are already dirty; it never rebuilds anything.
    pub(crate) fn mark_dirty(&self, id: NodeId, cause: DirtyCause) -> Vec<Key> {
        let version = self.version();
        let mut dirtied = Vec::new();
        let mut work = vec![(id, cause)];
        while let Some((id, cause)) = work.pop() {
            let node = self.node(id);
            let mut n = node.lock().unwrap();
            match n.state {
                NodeState::Done => {
                    n.state = NodeState::Dirty(cause);
                    n.dirty_since = version;
                    dirtied.push(n.key.clone());
                    let rdeps: Vec<NodeId> = n.rdeps.iter().copied().collect();
                    drop(n);
                    work.extend(rdeps.into_iter().map(|r| (r, DirtyCause::DepChanged)));
                }
                NodeState::Error => {
                    n.state = NodeState::Dirty(DirtyCause::Forced);
                    n.dirty_since = version;
                    dirtied.push(n.key.clone());
                    let rdeps: Vec<NodeId> = n.rdeps.iter().copied().collect();
                    drop(n);
                    work.extend(rdeps.into_iter().map(|r| (r, DirtyCause::DepChanged)));
                }
                NodeState::Dirty(DirtyCause::DepChanged) if cause == DirtyCause::Forced => {
                    // Upgrade in place; rdeps were already marked.
                    n.state = NodeState::Dirty(DirtyCause::Forced);
                }
                NodeState::Dirty(_) | NodeState::Absent => {}
                NodeState::Building => {
                    debug_assert!(false, "dirtying {} while building", n.key);
                }
            }
        }
        debug!(count = dirtied.len(), "marked dirty");
        dirtied
    }

    /// Evicts matching nodes: their record is reset to Absent, they are
    /// removed from their deps' rdep sets, and their dependents are dirtied.
    pub fn delete(&self, pred: impl Fn(&Key) -> bool) -> DeleteResult {
        let ids: Vec<NodeId> = self
            .index
            .iter()
            .filter(|entry| pred(entry.key()))
            .map(|entry| *entry.value())
            .collect();
        let mut result = DeleteResult::default();
        for id in ids {
            self.evict(id, &mut result);
        }
        result
    }

    /// Dirty-age garbage collection: evicts nodes that have been
    /// continuously dirty since a version at least `window` bumps ago.
    pub fn delete_dirty_older_than(&self, window: u64) -> DeleteResult {
        let current = self.version();
        let ids: Vec<NodeId> = self
            .node_arcs()
            .into_iter()
            .filter(|(_, node)| {
                let n = node.lock().unwrap();
                matches!(n.state, NodeState::Dirty(_)) && n.dirty_since.0 + window <= current.0
            })
            .map(|(id, _)| id)
            .collect();
        let mut result = DeleteResult::default();
        for id in ids {
            self.evict(id, &mut result);
        }
        result
    }

    fn evict(&self, id: NodeId, result: &mut DeleteResult) {
        let (key, deps, rdeps) = {
            let node = self.node(id);
            let mut n = node.lock().unwrap();
            if n.state == NodeState::Absent {
                return;
            }
            let deps = std::mem::take(&mut n.deps);
            let rdeps: Vec<NodeId> = n.rdeps.iter().copied().collect();
            let key = n.key.clone();
            n.reset();
            (key, deps, rdeps)
        };
        debug!(%key, "evicted");
        result.deleted.push(key);
        for dep in deps {
            self.node(dep).lock().unwrap().rdeps.remove(&id);
        }
        for rdep in rdeps {
            result
                .dirtied
                .extend(self.mark_dirty(rdep, DirtyCause::DepChanged));
        }
    }
}
