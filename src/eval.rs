//! The evaluator: computes values for a requested set of keys, resolving
//! dependencies dynamically, reusing clean nodes, revalidating dirty ones,
//! detecting cycles, and honoring the keep-going policy.
//!
//! Scheduling is a fixed pool of worker threads over a shared ready queue.
//! A node function runs to completion on one worker; "suspension" is the
//! function returning Missing and being re-enqueued once its awaited deps
//! are Done. Cycle detection walks the waits-on relation (not the full dep
//! graph) under the scheduler lock.

use crate::cycle::CycleInfo;
use crate::diff::Differencer;
use crate::error::{EngineError, NodeError};
use crate::graph::{DirtyCause, Graph, NodeId, NodeState, Version};
use crate::key::{Fingerprint, Key, KeyFamily, Value};
use crate::progress::{Outcome, Progress};
use crate::registry::{Evaluation, Registry};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use tracing::{debug, trace};

pub struct EvalOptions {
    pub keep_going: bool,
    pub num_threads: usize,
}

impl Default for EvalOptions {
    fn default() -> Self {
        EvalOptions {
            keep_going: false,
            num_threads: std::thread::available_parallelism()
                .map(usize::from)
                .unwrap_or(1),
        }
    }
}

impl EvalOptions {
    pub fn keep_going(keep_going: bool) -> Self {
        EvalOptions {
            keep_going,
            ..Default::default()
        }
    }
}

/// Per-key outcome of an evaluation. Missing occurs only when an error or
/// interruption elsewhere prevented the key from being computed.
#[derive(Debug, Clone)]
pub enum NodeResult {
    Value(Value),
    Error(NodeError),
    Missing,
}

impl NodeResult {
    pub fn value(&self) -> Option<&Value> {
        match self {
            NodeResult::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&NodeError> {
        match self {
            NodeResult::Error(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, NodeResult::Missing)
    }
}

/// Result map for the requested keys, plus evaluation-wide outcomes.
#[derive(Debug, Default)]
pub struct EvalResult {
    results: BTreeMap<Key, NodeResult>,
    pub interrupted: bool,
    pub cycles: Vec<CycleInfo>,
}

impl EvalResult {
    pub fn get(&self, key: &Key) -> Option<&NodeResult> {
        self.results.get(key)
    }

    pub fn value(&self, key: &Key) -> Option<&Value> {
        self.results.get(key).and_then(NodeResult::value)
    }

    pub fn error(&self, key: &Key) -> Option<&NodeError> {
        self.results.get(key).and_then(NodeResult::error)
    }

    pub fn has_error(&self) -> bool {
        self.results.values().any(|r| r.error().is_some())
    }

    pub fn first_error(&self) -> Option<(&Key, &NodeError)> {
        self.results
            .iter()
            .find_map(|(k, r)| r.error().map(|e| (k, e)))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Key, &NodeResult)> {
        self.results.iter()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// The per-invocation handle through which node functions request other
/// keys. Accumulates every key touched, available or not; that set is the
/// declared dependency list of the invocation.
pub struct Env<'a> {
    graph: &'a Graph,
    cancel: &'a AtomicBool,
    deps: Vec<Key>,
    seen: FxHashSet<Key>,
    fps: FxHashMap<Key, Fingerprint>,
    missing: FxHashSet<Key>,
    dep_errors: FxHashMap<Key, NodeError>,
}

impl<'a> Env<'a> {
    fn new(graph: &'a Graph, cancel: &'a AtomicBool) -> Self {
        Env {
            graph,
            cancel,
            deps: Vec::new(),
            seen: FxHashSet::default(),
            fps: FxHashMap::default(),
            missing: FxHashSet::default(),
            dep_errors: FxHashMap::default(),
        }
    }

    /// Requests a key's value. Returns the value if it is Done in the
    /// current version; otherwise records a missing dependency and returns
    /// None. Callers seeing None eventually return `Missing`.
    pub fn request(&mut self, key: &Key) -> Option<Value> {
        if self.seen.insert(key.clone()) {
            self.deps.push(key.clone());
        }
        let available = self.graph.lookup_id(key).and_then(|id| {
            let node = self.graph.node(id);
            let n = node.lock().unwrap();
            match n.state {
                NodeState::Done => Some((n.value.clone().unwrap(), n.value_fp.unwrap())),
                NodeState::Error => {
                    let err = n.error.clone().unwrap();
                    drop(n);
                    self.dep_errors.entry(key.clone()).or_insert(err);
                    None
                }
                _ => None,
            }
        });
        match available {
            Some((value, fp)) => {
                self.missing.remove(key);
                self.fps.insert(key.clone(), fp);
                Some(value)
            }
            None => {
                self.missing.insert(key.clone());
                None
            }
        }
    }

    /// Whether any request so far came back unavailable.
    pub fn has_missing(&self) -> bool {
        !self.missing.is_empty()
    }

    /// Cooperative cancellation: a function seeing true may return
    /// `Missing(vec![])` to bail out early.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    fn missing_deps(&self) -> Vec<Key> {
        self.deps
            .iter()
            .filter(|k| self.missing.contains(*k))
            .cloned()
            .collect()
    }
}

#[derive(Default)]
struct Scheduler {
    queue: VecDeque<NodeId>,
    queued: FxHashSet<NodeId>,
    /// Parked node -> deps it awaits.
    waiting_on: FxHashMap<NodeId, FxHashSet<NodeId>>,
    /// Dep -> parked nodes awaiting it.
    waiters: FxHashMap<NodeId, Vec<NodeId>>,
    /// Parked node -> awaited deps that entered Error; observed when the
    /// node is re-scheduled (lazy bubbling).
    failed_deps: FxHashMap<NodeId, Vec<NodeId>>,
    in_flight: usize,
    stop: bool,
    done: bool,
    cycles: Vec<CycleInfo>,
    cycle_set: FxHashSet<CycleInfo>,
    engine_error: Option<String>,
}

struct Shared<'a> {
    graph: &'a Graph,
    registry: &'a Registry,
    progress: &'a dyn Progress,
    cancel: &'a AtomicBool,
    keep_going: bool,
    version: Version,
    state: Mutex<Scheduler>,
    cond: Condvar,
}

enum Reval {
    Clean,
    Rebuild,
    /// Node was parked on not-yet-done deps, or failed inside park (cycle);
    /// either way processing of this node is over for now.
    Suspended,
    DepErrors(Vec<NodeId>),
}

pub struct Evaluator<'a> {
    graph: &'a Graph,
    registry: &'a Registry,
    progress: &'a dyn Progress,
    cancel: &'a AtomicBool,
}

impl<'a> Evaluator<'a> {
    pub fn new(
        graph: &'a Graph,
        registry: &'a Registry,
        progress: &'a dyn Progress,
        cancel: &'a AtomicBool,
    ) -> Self {
        Evaluator {
            graph,
            registry,
            progress,
            cancel,
        }
    }

    /// Computes values for the requested keys. Flushes the differencer
    /// first, bumping the graph version exactly once for this evaluation.
    pub fn evaluate(
        &self,
        requested: &[Key],
        diff: &Differencer,
        opts: &EvalOptions,
    ) -> Result<EvalResult, EngineError> {
        let version = diff.flush(self.graph, self.progress);

        let mut roots = Vec::new();
        let mut seen = FxHashSet::default();
        for key in requested {
            if seen.insert(key.clone()) {
                roots.push(key.clone());
            }
        }
        if roots.is_empty() {
            return Ok(EvalResult {
                interrupted: self.cancel.load(Ordering::SeqCst),
                ..Default::default()
            });
        }

        debug!(requested = roots.len(), ?version, "evaluation start");
        let shared = Shared {
            graph: self.graph,
            registry: self.registry,
            progress: self.progress,
            cancel: self.cancel,
            keep_going: opts.keep_going,
            version,
            state: Mutex::new(Scheduler::default()),
            cond: Condvar::new(),
        };

        {
            let mut st = shared.state.lock().unwrap();
            for key in &roots {
                let id = self.graph.intern(key);
                if st.queued.insert(id) {
                    self.progress.enqueueing(key);
                    st.queue.push_back(id);
                }
            }
        }

        let num_threads = opts.num_threads.max(1);
        std::thread::scope(|s| {
            for _ in 0..num_threads {
                let shared = &shared;
                s.spawn(move || worker(shared));
            }
        });

        let st = shared.state.into_inner().unwrap();
        if let Some(msg) = st.engine_error {
            return Err(EngineError(msg));
        }

        let mut results = BTreeMap::new();
        for key in roots {
            let result = match self.graph.lookup(&key) {
                Some(view) => match view.state {
                    NodeState::Done => NodeResult::Value(view.value.unwrap()),
                    NodeState::Error => NodeResult::Error(view.error.unwrap()),
                    _ => NodeResult::Missing,
                },
                None => NodeResult::Missing,
            };
            results.insert(key, result);
        }
        debug!(cycles = st.cycles.len(), "evaluation end");
        Ok(EvalResult {
            results,
            interrupted: self.cancel.load(Ordering::SeqCst),
            cycles: st.cycles,
        })
    }
}

fn worker(shared: &Shared) {
    loop {
        let id = {
            let mut st = shared.state.lock().unwrap();
            loop {
                if st.done {
                    return;
                }
                if shared.cancel.load(Ordering::SeqCst) && !st.stop {
                    st.stop = true;
                    st.queue.clear();
                    st.queued.clear();
                }
                if let Some(id) = st.queue.pop_front() {
                    st.queued.remove(&id);
                    st.in_flight += 1;
                    break id;
                }
                if st.in_flight == 0 {
                    if !st.stop && !st.waiting_on.is_empty() && st.engine_error.is_none() {
                        st.engine_error = Some(format!(
                            "evaluation stalled with {} nodes parked and no runnable work",
                            st.waiting_on.len()
                        ));
                    }
                    st.done = true;
                    shared.cond.notify_all();
                    return;
                }
                st = shared.cond.wait(st).unwrap();
            }
        };

        // A panicking node function must not wedge the pool: convert it to
        // an engine error and shut the evaluation down.
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            process(shared, id);
        }));
        if let Err(panic) = outcome {
            let msg = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic".to_string());
            set_engine_error(shared, format!("node function panicked: {}", msg));
        }

        let mut st = shared.state.lock().unwrap();
        st.in_flight -= 1;
        if st.in_flight == 0 {
            shared.cond.notify_all();
        }
    }
}

fn process(shared: &Shared, id: NodeId) {
    let prior = match shared.graph.begin_build(id) {
        Ok(prior) => prior,
        Err(NodeState::Done) => {
            // Completed while queued (e.g. injected, or enqueued twice via
            // racing waiters); just release anyone parked on it.
            deliver(shared, id, false);
            return;
        }
        Err(NodeState::Error) => {
            deliver(shared, id, true);
            return;
        }
        Err(NodeState::Building) => {
            // A racing duplicate enqueue; the worker that won begin_build
            // owns the node and will deliver to waiters.
            return;
        }
        Err(other) => {
            set_engine_error(
                shared,
                format!("began building node in unexpected state {:?}", other),
            );
            return;
        }
    };

    // A dep this node was parked on failed; observe it now without
    // re-invoking the function.
    let failed: Vec<NodeId> = {
        let mut st = shared.state.lock().unwrap();
        st.failed_deps.remove(&id).unwrap_or_default()
    };
    if !failed.is_empty() {
        bubble(shared, id, prior, &failed);
        return;
    }

    if let NodeState::Dirty(cause) = prior {
        let (injected, has_value, deps, dep_fps) = {
            let node = shared.graph.node(id);
            let n = node.lock().unwrap();
            (
                n.injected,
                n.value.is_some(),
                n.deps.clone(),
                n.dep_fps.clone(),
            )
        };

        // An injected key that was invalidated replays its stored value; no
        // function is consulted.
        if injected && has_value {
            finish_clean(shared, id);
            return;
        }

        if cause == DirtyCause::DepChanged && has_value && !deps.is_empty() {
            match revalidate(shared, id, prior, &deps, &dep_fps) {
                Reval::Clean => {
                    finish_clean(shared, id);
                    return;
                }
                Reval::Suspended => return,
                Reval::DepErrors(failed) => {
                    bubble(shared, id, prior, &failed);
                    return;
                }
                Reval::Rebuild => {}
            }
        }
    }

    invoke(shared, id, prior);
}

/// Change pruning: a dirty node whose previous deps all resolve to the same
/// fingerprints they had at its last completion is re-stamped Done without
/// re-running its function.
fn revalidate(
    shared: &Shared,
    id: NodeId,
    prior: NodeState,
    deps: &[NodeId],
    dep_fps: &[Fingerprint],
) -> Reval {
    if dep_fps.len() != deps.len() {
        return Reval::Rebuild;
    }

    let mut pending = Vec::new();
    let mut errored = Vec::new();
    let mut current_fps = Vec::with_capacity(deps.len());
    for &dep in deps {
        let node = shared.graph.node(dep);
        let n = node.lock().unwrap();
        match n.state {
            NodeState::Done => current_fps.push(n.value_fp),
            NodeState::Error => errored.push(dep),
            _ => {
                pending.push(dep);
                current_fps.push(None);
            }
        }
    }
    if !errored.is_empty() {
        return Reval::DepErrors(errored);
    }
    if !pending.is_empty() {
        park(shared, id, prior, &pending);
        return Reval::Suspended;
    }
    for (i, fp) in current_fps.into_iter().enumerate() {
        if fp != Some(dep_fps[i]) {
            return Reval::Rebuild;
        }
    }
    Reval::Clean
}

/// Invokes the registered function for the node's family and acts on its
/// verdict.
fn invoke(shared: &Shared, id: NodeId, prior: NodeState) {
    let key = shared.graph.key_of(id);

    if key.family() == KeyFamily::BuildVariable {
        // Build variables exist only by injection; reaching here means the
        // façade never injected this one.
        let err = NodeError::new(format!("{} was never injected", key));
        fail_node(shared, id, &key, err);
        return;
    }

    let Some(func) = shared.registry.get(key.family()) else {
        set_engine_error(
            shared,
            format!("no function registered for family {:?}", key.family()),
        );
        shared.graph.unbuild(id, prior);
        return;
    };

    let mut env = Env::new(shared.graph, shared.cancel);
    trace!(%key, "invoking");
    let result = func(&key, &mut env);

    match result {
        Evaluation::Value(value) => {
            if env.has_missing() {
                set_engine_error(
                    shared,
                    format!("function for {} returned a value with unsatisfied deps", key),
                );
                shared.graph.unbuild(id, prior);
                return;
            }
            let mut dep_ids = Vec::with_capacity(env.deps.len());
            let mut dep_fps = Vec::with_capacity(env.deps.len());
            for dep in &env.deps {
                dep_ids.push(shared.graph.intern(dep));
                match env.fps.get(dep) {
                    Some(fp) => dep_fps.push(*fp),
                    None => {
                        set_engine_error(
                            shared,
                            format!("function for {} declared an unrequested dep {}", key, dep),
                        );
                        shared.graph.unbuild(id, prior);
                        return;
                    }
                }
            }
            shared
                .graph
                .complete(id, value.clone(), dep_ids, dep_fps, shared.version);
            shared.progress.evaluated(&key, Some(&value), Outcome::BuiltFresh);
            deliver(shared, id, false);
        }
        Evaluation::Missing(extra) => {
            if !env.dep_errors.is_empty() {
                // Lazy error bubbling: a requested dep is already in Error.
                let failed: Vec<NodeId> = env
                    .dep_errors
                    .keys()
                    .map(|k| shared.graph.intern(k))
                    .collect();
                bubble(shared, id, prior, &failed);
                return;
            }
            let mut missing = env.missing_deps();
            for key in extra {
                if !missing.contains(&key) {
                    missing.push(key);
                }
            }
            if missing.is_empty() {
                if env.is_cancelled() {
                    // Function bailed out cooperatively.
                    shared.graph.unbuild(id, prior);
                    let mut st = shared.state.lock().unwrap();
                    st.stop = true;
                    st.queue.clear();
                    st.queued.clear();
                    shared.cond.notify_all();
                    return;
                }
                set_engine_error(
                    shared,
                    format!("function for {} returned Missing with no missing deps", key),
                );
                shared.graph.unbuild(id, prior);
                return;
            }
            let awaited: Vec<NodeId> = missing.iter().map(|k| shared.graph.intern(k)).collect();
            park(shared, id, prior, &awaited);
        }
        Evaluation::Fail(mut err) => {
            if err.root_causes.is_empty() {
                err.root_causes = vec![key.clone()];
            }
            fail_node(shared, id, &key, err);
        }
    }
}

/// Marks a dirty node clean at the current version without re-invoking its
/// function.
fn finish_clean(shared: &Shared, id: NodeId) {
    shared.graph.mark_clean(id, shared.version);
    let (key, value) = {
        let node = shared.graph.node(id);
        let n = node.lock().unwrap();
        (n.key.clone(), n.value.clone())
    };
    shared
        .progress
        .evaluated(&key, value.as_ref(), Outcome::ReusedClean);
    deliver(shared, id, false);
}

/// Transitions the node to Error and applies the failure policy.
fn fail_node(shared: &Shared, id: NodeId, key: &Key, err: NodeError) {
    shared.graph.fail(id, err, shared.version);
    shared.progress.evaluated(key, None, Outcome::Failed);
    let mut st = shared.state.lock().unwrap();
    if !shared.keep_going {
        st.stop = true;
        st.queue.clear();
        st.queued.clear();
    }
    deliver_locked(shared, &mut st, id, true);
    shared.cond.notify_all();
}

/// The node observed failed deps: it becomes Error itself, with the deps'
/// root causes merged (lazy bubbling along rdeps).
fn bubble(shared: &Shared, id: NodeId, prior: NodeState, failed: &[NodeId]) {
    let key = shared.graph.key_of(id);
    let mut causes: Vec<(Key, NodeError)> = failed
        .iter()
        .filter_map(|&dep| {
            let node = shared.graph.node(dep);
            let n = node.lock().unwrap();
            n.error.clone().map(|e| (n.key.clone(), e))
        })
        .collect();
    causes.sort_by(|(a, _), (b, _)| a.cmp(b));
    if causes.is_empty() {
        // The supposedly-failed deps hold no error; retry the node in place.
        shared.graph.unbuild(id, prior);
        process(shared, id);
        return;
    }
    let (first_key, first_err) = &causes[0];
    let mut err = NodeError::bubbled(first_key, first_err);
    for (dep_key, dep_err) in &causes[1..] {
        let more = NodeError::bubbled(dep_key, dep_err);
        err.root_causes.extend(more.root_causes);
        err.cycles.extend(more.cycles.iter().cloned());
    }
    err.root_causes.sort();
    err.root_causes.dedup();
    fail_node(shared, id, &key, err);
}

/// Parks a node awaiting deps: registers waits-on edges, reverts the node
/// out of Building, schedules un-built deps, and runs cycle detection on
/// the new edges. Any cycle found errors all its participants.
fn park(shared: &Shared, id: NodeId, prior: NodeState, awaited: &[NodeId]) {
    let mut st = shared.state.lock().unwrap();
    if st.stop {
        shared.graph.unbuild(id, prior);
        return;
    }

    // Cycle check before registering: does any awaited dep transitively
    // wait on this node?
    for &dep in awaited {
        let mut path = Vec::new();
        let mut visited = FxHashSet::default();
        if find_path(&st.waiting_on, dep, id, &mut path, &mut visited) {
            let mut participants = vec![id];
            participants.extend(path);
            report_cycle(shared, &mut st, &participants);
            return;
        }
    }

    let awaited_set: FxHashSet<NodeId> = awaited.iter().copied().collect();
    st.waiting_on.insert(id, awaited_set);
    for &dep in awaited {
        st.waiters.entry(dep).or_default().push(id);
    }
    shared.graph.unbuild(id, prior);

    // Schedule deps; observe completions that raced with us.
    for &dep in awaited {
        let state = {
            let node = shared.graph.node(dep);
            let n = node.lock().unwrap();
            n.state
        };
        match state {
            NodeState::Done => {
                if let Some(aw) = st.waiting_on.get_mut(&id) {
                    aw.remove(&dep);
                }
                if let Some(list) = st.waiters.get_mut(&dep) {
                    list.retain(|&w| w != id);
                }
            }
            NodeState::Error => {
                st.failed_deps.entry(id).or_default().push(dep);
                if let Some(aw) = st.waiting_on.get_mut(&id) {
                    aw.remove(&dep);
                }
                if let Some(list) = st.waiters.get_mut(&dep) {
                    list.retain(|&w| w != id);
                }
            }
            NodeState::Building => {}
            NodeState::Absent | NodeState::Dirty(_) => {
                if !st.queued.contains(&dep) && !st.waiting_on.contains_key(&dep) {
                    st.queued.insert(dep);
                    shared.progress.enqueueing(&shared.graph.key_of(dep));
                    st.queue.push_back(dep);
                }
            }
        }
    }

    if st.waiting_on.get(&id).map(|aw| aw.is_empty()).unwrap_or(false) {
        st.waiting_on.remove(&id);
        if st.queued.insert(id) {
            st.queue.push_back(id);
        }
    }
    shared.cond.notify_all();
}

/// DFS over the waits-on relation from `from`, looking for `target`.
/// On success `path` holds the chain from `from` through the node that
/// waits on `target`.
fn find_path(
    waiting_on: &FxHashMap<NodeId, FxHashSet<NodeId>>,
    from: NodeId,
    target: NodeId,
    path: &mut Vec<NodeId>,
    visited: &mut FxHashSet<NodeId>,
) -> bool {
    if from == target {
        return true;
    }
    if !visited.insert(from) {
        return false;
    }
    path.push(from);
    if let Some(next) = waiting_on.get(&from) {
        for &n in next {
            if find_path(waiting_on, n, target, path, visited) {
                return true;
            }
        }
    }
    path.pop();
    false
}

/// Errors every participant of a detected cycle with a shared CycleInfo and
/// releases their waiters.
fn report_cycle(shared: &Shared, st: &mut MutexGuard<'_, Scheduler>, participants: &[NodeId]) {
    let keys: Vec<Key> = participants
        .iter()
        .map(|&p| shared.graph.key_of(p))
        .collect();
    let info = CycleInfo::new(keys);
    debug!(cycle = %info, "cycle detected");
    if st.cycle_set.insert(info.clone()) {
        st.cycles.push(info.clone());
    }

    for &p in participants {
        if let Some(awaited) = st.waiting_on.remove(&p) {
            for dep in awaited {
                if let Some(list) = st.waiters.get_mut(&dep) {
                    list.retain(|&w| w != p);
                }
            }
        }
        st.failed_deps.remove(&p);
        let key = shared.graph.key_of(p);
        let mut err = NodeError::cycle(info.clone());
        err.root_causes = vec![key.clone()];
        shared.graph.fail(p, err, shared.version);
        shared.progress.evaluated(&key, None, Outcome::Failed);
        deliver_locked(shared, st, p, true);
    }

    if !shared.keep_going {
        st.stop = true;
        st.queue.clear();
        st.queued.clear();
    }
    shared.cond.notify_all();
}

fn deliver(shared: &Shared, id: NodeId, failed: bool) {
    let mut st = shared.state.lock().unwrap();
    deliver_locked(shared, &mut st, id, failed);
    shared.cond.notify_all();
}

/// Releases nodes parked on `id`: removes the wait edge, tags failures for
/// lazy bubbling, and re-enqueues any node whose awaited set drained.
fn deliver_locked(shared: &Shared, st: &mut MutexGuard<'_, Scheduler>, id: NodeId, failed: bool) {
    let waiters = st.waiters.remove(&id).unwrap_or_default();
    for w in waiters {
        if failed {
            st.failed_deps.entry(w).or_default().push(id);
        }
        let drained = match st.waiting_on.get_mut(&w) {
            Some(aw) => {
                aw.remove(&id);
                aw.is_empty()
            }
            None => false,
        };
        if drained {
            st.waiting_on.remove(&w);
            if !st.stop && st.queued.insert(w) {
                shared.progress.enqueueing(&shared.graph.key_of(w));
                st.queue.push_back(w);
            }
        }
    }
}

fn set_engine_error(shared: &Shared, msg: String) {
    let mut st = shared.state.lock().unwrap();
    if st.engine_error.is_none() {
        st.engine_error = Some(msg);
    }
    st.stop = true;
    st.queue.clear();
    st.queued.clear();
    shared.cond.notify_all();
}
