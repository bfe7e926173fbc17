//! The driver façade: one stateful object owning the graph, differencer,
//! and registry, exposing the build phases (prepare, configure, analyze,
//! execute) and translating external state changes into graph operations.
//!
//! At most one evaluation runs at a time; injection operations must precede
//! the evaluation they are meant for.

use crate::cycle::CycleReporter;
use crate::diff::Differencer;
use crate::error::{DriverError, NodeErrorKind};
use crate::eval::{EvalOptions, EvalResult, Evaluator, NodeResult};
use crate::graph::{Graph, KeepEdges};
use crate::key::{
    Action, ActionResult, Artifact, BuildVar, ConfigId, ConfigurationCollection, ConfiguredTarget,
    FileState, Key, KeyFamily, Label, Package, PackageId, VarValue, Value, Visibility, config_id,
};
use crate::progress::{
    CountingProgress, EventSink, InvalidationState, LogSink, Outcome, Progress,
};
use crate::registry::Registry;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info, warn};

/// Key families whose functions read the package locator directly; they are
/// invalidated wholesale when the locator changes. An allowlisted static
/// set, not inferred from the graph.
const PACKAGE_LOCATOR_DEPENDENT_FAMILIES: [KeyFamily; 6] = [
    KeyFamily::FileState,
    KeyFamily::File,
    KeyFamily::DirectoryListing,
    KeyFamily::PackageLookup,
    KeyFamily::TargetPattern,
    KeyFamily::WorkspaceFile,
];

fn default_thread_count() -> usize {
    std::thread::available_parallelism()
        .map(usize::from)
        .unwrap_or(1)
}

pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// The external action executor, opaque to the engine. The façade installs
/// it for the duration of an execution phase; the embedder's
/// action-execution function picks it up through the shared slot.
pub trait ActionExecutor: Send + Sync {
    fn execute(&self, action: &Action) -> anyhow::Result<ActionResult>;

    /// Resets throttling counters; called around each execution phase.
    fn reset_resource_usage(&self) {}
}

/// Shared slot holding the executor for the current execution phase.
/// Created by the embedder so its action function can capture a clone
/// before the driver exists.
#[derive(Clone, Default)]
pub struct ExecutorSlot {
    inner: Arc<Mutex<Option<Arc<dyn ActionExecutor>>>>,
}

impl ExecutorSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Arc<dyn ActionExecutor>> {
        self.inner.lock().unwrap().clone()
    }

    fn install(&self, executor: Arc<dyn ActionExecutor>) {
        *self.inner.lock().unwrap() = Some(executor);
    }

    fn clear(&self) {
        *self.inner.lock().unwrap() = None;
    }
}

/// The set of packages treated as deleted and ignored. Shared with the
/// embedder's package-lookup function.
#[derive(Clone, Default)]
pub struct DeletedPackages {
    inner: Arc<RwLock<FxHashSet<PackageId>>>,
}

impl DeletedPackages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &PackageId) -> bool {
        self.inner.read().unwrap().contains(id)
    }

    fn replace(&self, new: FxHashSet<PackageId>) -> FxHashSet<PackageId> {
        std::mem::replace(&mut *self.inner.write().unwrap(), new)
    }
}

/// Per-build stat cache; cleared at build preparation and on interruption.
#[derive(Clone, Default)]
pub struct SyscallCache {
    inner: Arc<Mutex<FxHashMap<Arc<str>, FileState>>>,
}

impl SyscallCache {
    pub fn get(&self, path: &str) -> Option<FileState> {
        self.inner.lock().unwrap().get(path).copied()
    }

    pub fn put(&self, path: Arc<str>, state: FileState) {
        self.inner.lock().unwrap().insert(path, state);
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap().clear();
    }
}

/// Per-build package parsing scratch; survives only within one build, and
/// not across an interruption.
#[derive(Clone, Default)]
pub struct PackageScratch {
    inner: Arc<Mutex<FxHashMap<PackageId, Arc<Package>>>>,
}

impl PackageScratch {
    pub fn get(&self, id: &PackageId) -> Option<Arc<Package>> {
        self.inner.lock().unwrap().get(id).cloned()
    }

    pub fn put(&self, pkg: Arc<Package>) {
        self.inner.lock().unwrap().insert(pkg.id.clone(), pkg);
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap().clear();
    }
}

/// The composed receiver the evaluator sees: registered observers, plus an
/// execution-phase receiver installed only during execute(), plus a flag to
/// suppress invalidation callbacks while the analysis cache is dropped
/// deliberately.
struct DriverProgress {
    receivers: RwLock<Vec<Arc<dyn Progress>>>,
    execution: RwLock<Option<Arc<dyn Progress>>>,
    ignore_invalidations: AtomicBool,
}

impl DriverProgress {
    fn new() -> Self {
        DriverProgress {
            receivers: RwLock::new(Vec::new()),
            execution: RwLock::new(None),
            ignore_invalidations: AtomicBool::new(false),
        }
    }

    fn set_execution(&self, receiver: Option<Arc<dyn Progress>>) {
        *self.execution.write().unwrap() = receiver;
    }
}

impl Progress for DriverProgress {
    fn invalidated(&self, key: &Key, state: InvalidationState) {
        if self.ignore_invalidations.load(Ordering::Relaxed) {
            return;
        }
        for r in self.receivers.read().unwrap().iter() {
            r.invalidated(key, state);
        }
    }

    fn enqueueing(&self, key: &Key) {
        for r in self.receivers.read().unwrap().iter() {
            r.enqueueing(key);
        }
        if let Some(exec) = self.execution.read().unwrap().as_ref() {
            exec.enqueueing(key);
        }
    }

    fn evaluated(&self, key: &Key, value: Option<&Value>, outcome: Outcome) {
        for r in self.receivers.read().unwrap().iter() {
            r.evaluated(key, value, outcome);
        }
        if let Some(exec) = self.execution.read().unwrap().as_ref() {
            exec.evaluated(key, value, outcome);
        }
    }
}

/// Everything the driver is constructed with. The shared handles
/// (executor slot, deleted packages, scratch caches, cancel flag) exist so
/// the embedder's node functions can capture clones of them before the
/// driver itself is built.
pub struct DriverConfig {
    pub registry: Registry,
    pub event_sink: Arc<dyn EventSink>,
    pub workspace_dir: Arc<str>,
    pub keep_edges: KeepEdges,
    /// Names of build-info factories; constant for the process lifetime but
    /// re-injected on every evaluator reset.
    pub build_info_factories: Vec<Arc<str>>,
    /// Artifacts whose contents are invariant for the process lifetime;
    /// injected as Done values before execution, once per evaluator reset.
    pub embedded_artifacts: Vec<(Artifact, u64)>,
    pub executor_slot: ExecutorSlot,
    pub deleted_packages: DeletedPackages,
    pub syscall_cache: SyscallCache,
    pub package_scratch: PackageScratch,
    pub cancel: Arc<AtomicBool>,
    pub allowed_missing_inputs: Arc<dyn Fn(&Artifact) -> bool + Send + Sync>,
    pub clock: Arc<dyn Clock>,
}

impl DriverConfig {
    pub fn new(registry: Registry) -> Self {
        DriverConfig {
            registry,
            event_sink: Arc::new(LogSink),
            workspace_dir: Arc::from("."),
            keep_edges: KeepEdges::Full,
            build_info_factories: Vec::new(),
            embedded_artifacts: Vec::new(),
            executor_slot: ExecutorSlot::new(),
            deleted_packages: DeletedPackages::new(),
            syscall_cache: SyscallCache::default(),
            package_scratch: PackageScratch::default(),
            cancel: Arc::new(AtomicBool::new(false)),
            allowed_missing_inputs: Arc::new(|_| false),
            clock: Arc::new(SystemClock),
        }
    }
}

pub struct Driver {
    graph: Graph,
    diff: Differencer,
    registry: Registry,
    progress: Arc<DriverProgress>,
    counting: Arc<CountingProgress>,
    sink: Arc<dyn EventSink>,
    cycles: Mutex<CycleReporter>,
    cancel: Arc<AtomicBool>,
    active: AtomicBool,
    /// The graph does not support concurrent top-level evaluations.
    eval_lock: Mutex<()>,
    /// Serializes the legacy-support getters.
    value_lookup_lock: Mutex<()>,
    deleted_packages: DeletedPackages,
    executor_slot: ExecutorSlot,
    syscall_cache: SyscallCache,
    package_scratch: PackageScratch,
    pkg_locator: Mutex<Option<Arc<Vec<Arc<str>>>>>,
    config_key: Mutex<Option<Key>>,
    last_workspace_status: Mutex<Option<Arc<Action>>>,
    build_id: Mutex<Option<u64>>,
    modified_files: AtomicUsize,
    need_embedded: AtomicBool,
    keep_edges: KeepEdges,
    workspace_dir: Arc<str>,
    build_info_factories: Arc<Vec<Arc<str>>>,
    embedded_artifacts: Vec<(Artifact, u64)>,
    allowed_missing_inputs: Arc<dyn Fn(&Artifact) -> bool + Send + Sync>,
    clock: Arc<dyn Clock>,
}

impl Driver {
    pub fn new(config: DriverConfig) -> Driver {
        let counting = Arc::new(CountingProgress::new());
        let progress = Arc::new(DriverProgress::new());
        progress.receivers.write().unwrap().push(counting.clone());
        let driver = Driver {
            graph: Graph::new(config.keep_edges),
            diff: Differencer::new(),
            registry: config.registry,
            progress,
            counting,
            sink: config.event_sink,
            cycles: Mutex::new(CycleReporter::new()),
            cancel: config.cancel,
            active: AtomicBool::new(false),
            eval_lock: Mutex::new(()),
            value_lookup_lock: Mutex::new(()),
            deleted_packages: config.deleted_packages,
            executor_slot: config.executor_slot,
            syscall_cache: config.syscall_cache,
            package_scratch: config.package_scratch,
            pkg_locator: Mutex::new(None),
            config_key: Mutex::new(None),
            last_workspace_status: Mutex::new(None),
            build_id: Mutex::new(None),
            modified_files: AtomicUsize::new(0),
            need_embedded: AtomicBool::new(true),
            keep_edges: config.keep_edges,
            workspace_dir: config.workspace_dir,
            build_info_factories: Arc::new(config.build_info_factories),
            embedded_artifacts: config.embedded_artifacts,
            allowed_missing_inputs: config.allowed_missing_inputs,
            clock: config.clock,
        };
        driver.reinject_constants();
        driver
    }

    pub fn add_progress_receiver(&self, receiver: Arc<dyn Progress>) {
        self.progress.receivers.write().unwrap().push(receiver);
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn differencer(&self) -> &Differencer {
        &self.diff
    }

    pub fn packages_loaded(&self) -> usize {
        self.counting.packages_loaded()
    }

    pub fn modified_file_count(&self) -> usize {
        self.modified_files.load(Ordering::Relaxed)
    }

    pub fn counters(&self) -> &CountingProgress {
        &self.counting
    }

    fn evaluator(&self) -> Evaluator<'_> {
        Evaluator::new(
            &self.graph,
            &self.registry,
            self.progress.as_ref(),
            &self.cancel,
        )
    }

    pub fn build_id(&self) -> Option<u64> {
        *self.build_id.lock().unwrap()
    }

    /// The configuration-collection key of the most recent
    /// `evaluate_configurations` call.
    pub fn configuration_key(&self) -> Option<Key> {
        self.config_key.lock().unwrap().clone()
    }

    pub fn last_workspace_status_action(&self) -> Option<Arc<Action>> {
        self.last_workspace_status.lock().unwrap().clone()
    }

    pub fn is_package_deleted(&self, id: &PackageId) -> bool {
        self.deleted_packages.contains(id)
    }

    pub fn is_input_allowed_missing(&self, artifact: &Artifact) -> bool {
        (self.allowed_missing_inputs)(artifact)
    }

    fn check_active(&self) -> Result<(), DriverError> {
        if !self.active.load(Ordering::SeqCst) {
            return Err(DriverError::AbruptExit {
                code: 37,
                msg: "build phase invoked before prepare_loading".to_string(),
            });
        }
        Ok(())
    }

    /// Prepares the evaluator for loading. Must run before every
    /// incremental build.
    pub fn prepare_loading(
        &self,
        locator: Vec<Arc<str>>,
        default_visibility: Visibility,
        defaults_package: &str,
        command_id: u64,
    ) {
        self.active.store(true, Ordering::SeqCst);
        self.set_build_id(command_id);
        self.diff.inject(
            Key::BuildVariable(BuildVar::DefaultVisibility),
            Value::BuildVariable(VarValue::Visibility(default_visibility)),
        );
        self.diff.inject(
            Key::BuildVariable(BuildVar::DefaultsPackageContents),
            Value::BuildVariable(VarValue::Text(Arc::from(defaults_package))),
        );
        self.set_package_locator(locator);
        self.syscall_cache.clear();
        // A previous interrupted build may have left stale entries here.
        self.package_scratch.clear();
        self.counting.reset_packages_loaded();
        // Forget cycles from the last run.
        *self.cycles.lock().unwrap() = CycleReporter::new();
        debug!("prepared for loading");
    }

    /// Per-command entry point: prepare, apply the deleted-package set, and
    /// re-arm errors for retry.
    pub fn sync(
        &self,
        locator: Vec<Arc<str>>,
        default_visibility: Visibility,
        defaults_package: &str,
        command_id: u64,
        deleted_packages: Vec<PackageId>,
    ) {
        self.prepare_loading(locator, default_visibility, defaults_package, command_id);
        self.set_deleted_packages(deleted_packages);
        self.invalidate_errors();
    }

    pub fn set_build_id(&self, id: u64) {
        self.diff.inject(
            Key::BuildVariable(BuildVar::BuildId),
            Value::BuildVariable(VarValue::Id(id)),
        );
        *self.build_id.lock().unwrap() = Some(id);
    }

    fn set_package_locator(&self, locator: Vec<Arc<str>>) {
        let locator = Arc::new(locator);
        let old = self.pkg_locator.lock().unwrap().replace(locator.clone());
        if old.as_deref() == Some(&*locator) {
            return;
        }
        info!("package locator changed, invalidating dependent families");
        self.diff.inject(
            Key::BuildVariable(BuildVar::PackageLocator),
            Value::BuildVariable(VarValue::Paths(locator)),
        );
        let keys = self
            .graph
            .keys_matching(|k| PACKAGE_LOCATOR_DEPENDENT_FAMILIES.contains(&k.family()));
        self.diff.invalidate(keys);
    }

    /// Sets the packages that should be treated as deleted and ignored.
    /// Both the outgoing and incoming sets are invalidated: the old ones may
    /// exist again, the new ones must stop existing.
    pub fn set_deleted_packages(&self, pkgs: Vec<PackageId>) {
        let new: FxHashSet<PackageId> = pkgs.into_iter().collect();
        let old = self.deleted_packages.replace(new.clone());
        self.diff
            .invalidate(old.into_iter().map(Key::PackageLookup));
        self.diff
            .invalidate(new.into_iter().map(Key::PackageLookup));
    }

    /// Translates modified paths into file-state and parent
    /// directory-listing invalidations for the next build.
    pub fn notify_modified_paths(&self, paths: &[&str]) {
        let mut keys = Vec::with_capacity(paths.len() * 2);
        for path in paths {
            keys.push(Key::FileState(Arc::from(*path)));
            keys.push(Key::DirectoryListing(Arc::from(parent_dir(path))));
        }
        self.modified_files.fetch_add(paths.len(), Ordering::Relaxed);
        self.diff.invalidate(keys);
        // Transient errors get another chance whenever the filesystem moves.
        self.diff.invalidate_errors();
    }

    pub fn invalidate_errors(&self) {
        self.diff.invalidate_errors();
    }

    /// Generic evaluation entry: computes the given keys under the façade's
    /// single-evaluation lock and reports any cycles found.
    pub fn evaluate(&self, keys: &[Key], opts: EvalOptions) -> Result<EvalResult, DriverError> {
        self.check_active()?;
        let _guard = self.eval_lock.lock().unwrap();
        let result = self.evaluator().evaluate(keys, &self.diff, &opts)?;
        if !result.cycles.is_empty() {
            if let Some(key) = keys.first() {
                self.cycles
                    .lock()
                    .unwrap()
                    .report(&result.cycles, key, self.sink.as_ref());
            }
        }
        Ok(result)
    }

    /// Builds the configuration collection for the given options and cpus.
    pub fn evaluate_configurations(
        &self,
        options: BTreeMap<Arc<str>, Arc<str>>,
        multi_cpu: Vec<Arc<str>>,
        test_env: BTreeMap<Arc<str>, Arc<str>>,
        keep_going: bool,
    ) -> Result<Arc<ConfigurationCollection>, DriverError> {
        self.diff.inject(
            Key::BuildVariable(BuildVar::TestEnvironment),
            Value::BuildVariable(VarValue::Env(Arc::new(test_env))),
        );
        self.diff.inject(
            Key::BuildVariable(BuildVar::WorkspaceDirectory),
            Value::BuildVariable(VarValue::Text(self.workspace_dir.clone())),
        );
        let key = Key::ConfigurationCollection(config_id(&options, &multi_cpu));
        *self.config_key.lock().unwrap() = Some(key.clone());

        let result = self.evaluate(
            std::slice::from_ref(&key),
            EvalOptions {
                keep_going,
                num_threads: default_thread_count(),
            },
        )?;
        if result.interrupted {
            return Err(DriverError::Interrupted);
        }
        match result.get(&key) {
            Some(NodeResult::Value(Value::ConfigurationCollection(c))) => Ok(c.clone()),
            Some(NodeResult::Error(e)) if e.is_cycle() => {
                Err(DriverError::CyclesReported { key })
            }
            Some(NodeResult::Error(e)) => Err(DriverError::InvalidConfiguration(e.clone())),
            _ => Err(DriverError::AbruptExit {
                code: 37,
                msg: "configuration collection evaluation produced no value".to_string(),
            }),
        }
    }

    /// Resolves target patterns to labels; per-pattern results in the map.
    pub fn evaluate_target_patterns(
        &self,
        patterns: &[&str],
        keep_going: bool,
    ) -> Result<EvalResult, DriverError> {
        let keys: Vec<Key> = patterns
            .iter()
            .map(|p| Key::TargetPattern(Arc::from(*p)))
            .collect();
        self.evaluate(
            &keys,
            EvalOptions {
                keep_going,
                num_threads: default_thread_count(),
            },
        )
    }

    /// Builds configured-target values for the given labels.
    pub fn analyze(
        &self,
        targets: &[(Label, ConfigId)],
        keep_going: bool,
    ) -> Result<EvalResult, DriverError> {
        let keys: Vec<Key> = targets
            .iter()
            .map(|(label, config)| Key::ConfiguredTarget(label.clone(), *config))
            .collect();
        // Analysis is memory-bound; cap at the processor count rather than
        // the larger execution-phase pool.
        self.evaluate(
            &keys,
            EvalOptions {
                keep_going,
                num_threads: default_thread_count(),
            },
        )
    }

    /// Builds the given artifacts by executing their actions. The executor
    /// and the optional execution progress receiver are installed only for
    /// the duration of the call.
    pub fn execute(
        &self,
        artifacts: &[Artifact],
        keep_going: bool,
        num_jobs: usize,
        executor: Arc<dyn ActionExecutor>,
        exec_progress: Option<Arc<dyn Progress>>,
    ) -> Result<EvalResult, DriverError> {
        self.check_active()?;
        self.maybe_inject_embedded_artifacts();
        let keys: Vec<Key> = artifacts
            .iter()
            .map(|a| Key::ActionExecution(a.clone()))
            .collect();

        self.executor_slot.install(executor.clone());
        self.progress.set_execution(exec_progress);
        executor.reset_resource_usage();
        let started = self.clock.now_millis();

        let result = self.evaluate(
            &keys,
            EvalOptions {
                keep_going,
                num_threads: num_jobs,
            },
        );

        self.progress.set_execution(None);
        self.executor_slot.clear();
        executor.reset_resource_usage();
        info!(
            elapsed_ms = self.clock.now_millis().saturating_sub(started),
            artifacts = keys.len(),
            "execution phase finished"
        );
        result
    }

    /// Looks up a particular package (used after the loading phase).
    pub fn get_package(&self, id: &PackageId) -> Result<Arc<Package>, DriverError> {
        self.call_uninterruptibly(|| {
            let _lock = self.value_lookup_lock.lock().unwrap();
            let key = Key::Package(id.clone());
            let result = self.evaluate(
                std::slice::from_ref(&key),
                EvalOptions {
                    keep_going: false,
                    num_threads: default_thread_count(),
                },
            )?;
            if result.interrupted {
                return Err(DriverError::Interrupted);
            }
            match result.get(&key) {
                Some(NodeResult::Value(Value::Package(p))) => Ok(p.clone()),
                Some(NodeResult::Error(e)) if e.is_cycle() => {
                    Err(DriverError::BuildFileContainsErrors {
                        name: id.to_string(),
                        msg: format!("cycle encountered while loading package {}", id),
                    })
                }
                Some(NodeResult::Error(e)) if e.kind == NodeErrorKind::BuildFileError => {
                    Err(DriverError::BuildFileContainsErrors {
                        name: id.to_string(),
                        msg: e.message().to_string(),
                    })
                }
                Some(NodeResult::Error(e)) => Err(DriverError::NoSuchPackage {
                    name: id.to_string(),
                    msg: e.message().to_string(),
                }),
                _ => Err(DriverError::AbruptExit {
                    code: 37,
                    msg: format!("package evaluation for {} produced no result", id),
                }),
            }
        })
    }

    /// Returns a particular configured target, or None if it cannot be
    /// analyzed. Legacy support; serialized with the other getters.
    pub fn get_configured_target(
        &self,
        label: &Label,
        config: ConfigId,
    ) -> Option<Arc<ConfiguredTarget>> {
        let result = self.call_uninterruptibly(|| {
            let _lock = self.value_lookup_lock.lock().unwrap();
            let key = Key::ConfiguredTarget(label.clone(), config);
            let result = self.evaluate(
                std::slice::from_ref(&key),
                EvalOptions {
                    keep_going: false,
                    num_threads: default_thread_count(),
                },
            )?;
            if result.interrupted {
                return Err(DriverError::Interrupted);
            }
            match result.get(&key) {
                Some(NodeResult::Value(Value::ConfiguredTarget(ct))) => Ok(Some(ct.clone())),
                _ => Ok(None),
            }
        });
        result.ok().flatten()
    }

    /// Returns the generating action of a derived artifact; None for source
    /// artifacts or when analysis of the owner failed.
    pub fn get_generating_action(&self, artifact: &Artifact) -> Option<Action> {
        let owner = artifact.owner.as_ref()?;
        let ct = self.get_configured_target(&owner.label, owner.config)?;
        ct.actions
            .iter()
            .find(|a| a.outputs.iter().any(|out| out.path == artifact.path))
            .cloned()
    }

    /// Returns the workspace status artifacts (build info outputs). Should
    /// already be present unless no targets were requested for analysis.
    pub fn get_workspace_status_artifacts(&self) -> Result<Vec<Artifact>, DriverError> {
        let key = Key::WorkspaceStatus;
        let result = self.evaluate(
            std::slice::from_ref(&key),
            EvalOptions {
                keep_going: false,
                num_threads: 1,
            },
        )?;
        if result.interrupted {
            return Err(DriverError::Interrupted);
        }
        match result.get(&key) {
            Some(NodeResult::Value(Value::WorkspaceStatus(ws))) => Ok(ws.artifacts.clone()),
            Some(NodeResult::Error(e)) => Err(DriverError::AbruptExit {
                code: 37,
                msg: format!("workspace status failed: {}", e),
            }),
            _ => Err(DriverError::AbruptExit {
                code: 37,
                msg: "workspace status evaluation produced no value".to_string(),
            }),
        }
    }

    pub fn inject_workspace_status(&self, action: Arc<Action>) {
        self.diff.inject(
            Key::BuildVariable(BuildVar::WorkspaceStatusAction),
            Value::BuildVariable(VarValue::Action(action.clone())),
        );
        *self.last_workspace_status.lock().unwrap() = Some(action);
    }

    /// Injects the post-analysis action-conflict map consulted before
    /// execution.
    pub fn set_bad_actions(&self, bad: BTreeMap<Arc<str>, Arc<str>>) {
        self.diff.inject(
            Key::BuildVariable(BuildVar::BadActions),
            Value::BuildVariable(VarValue::BadActions(Arc::new(bad))),
        );
    }

    pub fn inject_top_level_context(&self, artifacts: Vec<Artifact>) {
        self.diff.inject(
            Key::BuildVariable(BuildVar::TopLevelArtifactContext),
            Value::BuildVariable(VarValue::Artifacts(Arc::new(artifacts))),
        );
    }

    /// Reinitializes the evaluator, dropping all previously computed values.
    /// Injected values are dropped too; constants are re-injected here, and
    /// anything else must be re-injected before the next build.
    pub fn reset(&mut self) {
        self.graph = Graph::new(self.keep_edges);
        self.diff = Differencer::new();
        *self.cycles.lock().unwrap() = CycleReporter::new();
        // Forget the remembered locator so the next preparation re-injects
        // it into the fresh graph.
        *self.pkg_locator.lock().unwrap() = None;
        *self.config_key.lock().unwrap() = None;
        self.syscall_cache.clear();
        self.package_scratch.clear();
        self.need_embedded.store(true, Ordering::SeqCst);
        self.reinject_constants();
        info!("evaluator reset");
    }

    fn reinject_constants(&self) {
        self.diff.inject(
            Key::BuildVariable(BuildVar::BuildInfoFactories),
            Value::BuildVariable(VarValue::Paths(self.build_info_factories.clone())),
        );
    }

    /// The embedded binaries never change within one process lifetime, so
    /// their values are posted directly, once per evaluator reset.
    fn maybe_inject_embedded_artifacts(&self) {
        if !self.need_embedded.swap(false, Ordering::SeqCst) {
            return;
        }
        for (artifact, digest) in &self.embedded_artifacts {
            self.diff.inject(
                Key::ActionExecution(artifact.clone()),
                Value::ActionExecution(Arc::new(ActionResult {
                    outputs: vec![(artifact.path.clone(), *digest)],
                })),
            );
        }
    }

    /// Deletes all configured-target values, e.g. after a configuration
    /// change when they would otherwise sit unused in memory. Invalidation
    /// callbacks are suppressed: the cache is being discarded deliberately.
    pub fn drop_configured_targets(&self) {
        self.progress
            .ignore_invalidations
            .store(true, Ordering::SeqCst);
        let result = self
            .graph
            .delete(|k| k.family() == KeyFamily::ConfiguredTarget);
        self.progress
            .ignore_invalidations
            .store(false, Ordering::SeqCst);
        info!(deleted = result.deleted.len(), "dropped configured targets");
    }

    pub fn invalidate_configuration_collection(&self) {
        let keys = self
            .graph
            .keys_matching(|k| k.family() == KeyFamily::ConfigurationCollection);
        self.diff.invalidate(keys);
    }

    /// Deletes nodes that have been continuously dirty for more than
    /// `window` versions.
    pub fn delete_old_nodes(&self, window: u64) {
        let result = self.graph.delete_dirty_older_than(window);
        for key in &result.deleted {
            self.progress.invalidated(key, InvalidationState::Deleted);
        }
        for key in &result.dirtied {
            self.progress.invalidated(key, InvalidationState::Dirty);
        }
        if !result.deleted.is_empty() {
            info!(deleted = result.deleted.len(), window, "dirty-age gc");
        }
    }

    /// Requests cooperative cancellation of the current evaluation and
    /// clears the per-build scratch caches, which an interrupted function
    /// may have left half-populated.
    pub fn interrupt(&self) {
        warn!("interrupt requested");
        self.cancel.store(true, Ordering::SeqCst);
        self.syscall_cache.clear();
        self.package_scratch.clear();
    }

    /// Runs an operation to completion even if cancellation is requested:
    /// a pending or newly-arriving interrupt is remembered, cleared for the
    /// duration, and re-armed before returning.
    pub fn call_uninterruptibly<T>(
        &self,
        mut f: impl FnMut() -> Result<T, DriverError>,
    ) -> Result<T, DriverError> {
        let mut interrupted = false;
        loop {
            if self.cancel.swap(false, Ordering::SeqCst) {
                interrupted = true;
            }
            match f() {
                Err(DriverError::Interrupted) => {
                    interrupted = true;
                }
                result => {
                    if interrupted {
                        self.cancel.store(true, Ordering::SeqCst);
                    }
                    return result;
                }
            }
        }
    }
}

/// Parent directory of a workspace-relative path; "." for top-level names.
fn parent_dir(path: &str) -> &str {
    match path.rsplit_once('/') {
        Some((dir, _)) if !dir.is_empty() => dir,
        _ => ".",
    }
}
