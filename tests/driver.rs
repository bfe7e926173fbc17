//! End-to-end tests for the driver façade, running a miniature build
//! against an in-memory filesystem: lookup and parse packages, resolve
//! patterns, analyze configured targets, and execute actions through a stub
//! executor.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use strata::driver::{
    ActionExecutor, DeletedPackages, Driver, DriverConfig, ExecutorSlot, PackageScratch,
};
use strata::error::{DriverError, NodeError, NodeErrorKind};
use strata::eval::EvalOptions;
use strata::graph::NodeState;
use strata::key::{
    Action, ActionResult, Artifact, BuildConfiguration, BuildVar, ConfigurationCollection,
    ConfiguredTarget, FileState, Key, KeyFamily, Label, MTime, Package, PackageId, PackageLookup,
    ResolvedTargets, VarValue, Value, Visibility, WorkspaceStatus,
};
use strata::registry::{Evaluation, Registry};

fn digest(content: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut h = std::collections::hash_map::DefaultHasher::new();
    content.hash(&mut h);
    h.finish()
}

#[derive(Clone, Default)]
struct Calls(Arc<Mutex<BTreeMap<String, usize>>>);

impl Calls {
    fn bump(&self, name: &str) {
        *self.0.lock().unwrap().entry(name.to_string()).or_insert(0) += 1;
    }

    fn get(&self, name: &str) -> usize {
        self.0.lock().unwrap().get(name).copied().unwrap_or(0)
    }
}

/// Shared state the stub node functions capture before the driver exists.
#[derive(Clone)]
struct World {
    calls: Calls,
    fs: Arc<Mutex<BTreeMap<String, String>>>,
    executor_slot: ExecutorSlot,
    deleted: DeletedPackages,
    scratch: PackageScratch,
    cancel: Arc<AtomicBool>,
    /// When armed, the next fully-satisfied package parse simulates an
    /// outer interrupt arriving mid-build.
    interrupt_once: Arc<AtomicBool>,
}

fn make_world() -> World {
    let mut fs = BTreeMap::new();
    fs.insert("root1/foo/BUILD".to_string(), "lib bin".to_string());
    fs.insert("root2/foo/BUILD".to_string(), "lib bin".to_string());
    fs.insert("root1/bar/BUILD".to_string(), "tool".to_string());
    World {
        calls: Calls::default(),
        fs: Arc::new(Mutex::new(fs)),
        executor_slot: ExecutorSlot::new(),
        deleted: DeletedPackages::new(),
        scratch: PackageScratch::default(),
        cancel: Arc::new(AtomicBool::new(false)),
        interrupt_once: Arc::new(AtomicBool::new(false)),
    }
}

fn make_registry(w: &World) -> Registry {
    Registry::builder()
        .register(KeyFamily::FileState, {
            let w = w.clone();
            move |key, _env| {
                let path = match key {
                    Key::FileState(p) => p.to_string(),
                    _ => unreachable!(),
                };
                w.calls.bump("filestate");
                let state = match w.fs.lock().unwrap().get(&path) {
                    Some(content) => FileState {
                        mtime: MTime::Stamp(1),
                        digest: digest(content),
                    },
                    None => FileState {
                        mtime: MTime::Missing,
                        digest: 0,
                    },
                };
                Evaluation::Value(Value::FileState(state))
            }
        })
        .register(KeyFamily::PackageLookup, {
            let w = w.clone();
            move |key, env| {
                let id = match key {
                    Key::PackageLookup(id) => id.clone(),
                    _ => unreachable!(),
                };
                let Some(locator) = env.request(&Key::BuildVariable(BuildVar::PackageLocator))
                else {
                    return Evaluation::Missing(vec![]);
                };
                w.calls.bump("lookup");
                if w.deleted.contains(&id) {
                    return Evaluation::Value(Value::PackageLookup(PackageLookup::Deleted));
                }
                let roots = match locator {
                    Value::BuildVariable(VarValue::Paths(p)) => p,
                    _ => unreachable!(),
                };
                for root in roots.iter() {
                    let build_path = format!("{}/{}/BUILD", root, id);
                    if w.fs.lock().unwrap().contains_key(&build_path) {
                        return Evaluation::Value(Value::PackageLookup(PackageLookup::Found {
                            root: root.clone(),
                        }));
                    }
                }
                Evaluation::Value(Value::PackageLookup(PackageLookup::NotFound))
            }
        })
        .register(KeyFamily::Package, {
            let w = w.clone();
            move |key, env| {
                let id = match key {
                    Key::Package(id) => id.clone(),
                    _ => unreachable!(),
                };
                let lookup = env.request(&Key::PackageLookup(id.clone()));
                let vis = env.request(&Key::BuildVariable(BuildVar::DefaultVisibility));
                let (Some(lookup), Some(vis)) = (lookup, vis) else {
                    return Evaluation::Missing(vec![]);
                };
                let root = match lookup {
                    Value::PackageLookup(PackageLookup::Found { root }) => root,
                    Value::PackageLookup(PackageLookup::Deleted) => {
                        return Evaluation::Fail(
                            NodeError::new(format!("package '{}' is deleted", id))
                                .with_kind(NodeErrorKind::NoSuchPackage),
                        );
                    }
                    Value::PackageLookup(PackageLookup::NotFound) => {
                        return Evaluation::Fail(
                            NodeError::new(format!("no such package '{}'", id))
                                .with_kind(NodeErrorKind::NoSuchPackage),
                        );
                    }
                    _ => unreachable!(),
                };
                let build_path = format!("{}/{}/BUILD", root, id);
                let state = env.request(&Key::FileState(Arc::from(build_path.as_str())));
                if state.is_none() {
                    return Evaluation::Missing(vec![]);
                }
                if w.interrupt_once.swap(false, Ordering::SeqCst) {
                    w.cancel.store(true, Ordering::SeqCst);
                    return Evaluation::Missing(vec![]);
                }
                if let Some(pkg) = w.scratch.get(&id) {
                    return Evaluation::Value(Value::Package(pkg));
                }
                w.calls.bump("parse");
                let content = w
                    .fs
                    .lock()
                    .unwrap()
                    .get(&build_path)
                    .cloned()
                    .unwrap_or_default();
                let default_visibility = match vis {
                    Value::BuildVariable(VarValue::Visibility(v)) => v,
                    _ => unreachable!(),
                };
                let pkg = Arc::new(Package {
                    id: id.clone(),
                    targets: content.split_whitespace().map(Arc::from).collect(),
                    default_visibility,
                });
                w.scratch.put(pkg.clone());
                Evaluation::Value(Value::Package(pkg))
            }
        })
        .register(KeyFamily::TargetPattern, {
            let w = w.clone();
            move |key, env| {
                let pattern = match key {
                    Key::TargetPattern(p) => p.clone(),
                    _ => unreachable!(),
                };
                let package = PackageId::new(&pattern);
                let Some(pkg) = env.request(&Key::Package(package.clone())) else {
                    return Evaluation::Missing(vec![]);
                };
                w.calls.bump("pattern");
                let pkg = match pkg {
                    Value::Package(p) => p,
                    _ => unreachable!(),
                };
                let labels = pkg
                    .targets
                    .iter()
                    .map(|t| Label {
                        package: package.clone(),
                        target: t.clone(),
                    })
                    .collect();
                Evaluation::Value(Value::TargetPattern(Arc::new(ResolvedTargets { labels })))
            }
        })
        .register(KeyFamily::ConfigurationCollection, {
            let w = w.clone();
            move |key, env| {
                let id = match key {
                    Key::ConfigurationCollection(id) => *id,
                    _ => unreachable!(),
                };
                let test_env = env.request(&Key::BuildVariable(BuildVar::TestEnvironment));
                let dir = env.request(&Key::BuildVariable(BuildVar::WorkspaceDirectory));
                let (Some(test_env), Some(_dir)) = (test_env, dir) else {
                    return Evaluation::Missing(vec![]);
                };
                w.calls.bump("config");
                let options = match test_env {
                    Value::BuildVariable(VarValue::Env(m)) => (*m).clone(),
                    _ => unreachable!(),
                };
                Evaluation::Value(Value::ConfigurationCollection(Arc::new(
                    ConfigurationCollection {
                        configs: vec![BuildConfiguration {
                            id,
                            cpu: Arc::from("k8"),
                            options,
                        }],
                    },
                )))
            }
        })
        .register(KeyFamily::ConfiguredTarget, {
            let w = w.clone();
            move |key, env| {
                let (label, config) = match key {
                    Key::ConfiguredTarget(l, c) => (l.clone(), *c),
                    _ => unreachable!(),
                };
                let Some(pkg) = env.request(&Key::Package(label.package.clone())) else {
                    return Evaluation::Missing(vec![]);
                };
                let pkg = match pkg {
                    Value::Package(p) => p,
                    _ => unreachable!(),
                };
                if !pkg.targets.contains(&label.target) {
                    return Evaluation::Fail(NodeError::new(format!(
                        "no such target '{}'",
                        label
                    )));
                }
                w.calls.bump("ct");
                let src = Artifact::source(&format!("{}/{}.src", label.package, label.target));
                let out = Artifact::derived(
                    &format!("{}/{}.out", label.package, label.target),
                    label.clone(),
                    config,
                );
                Evaluation::Value(Value::ConfiguredTarget(Arc::new(ConfiguredTarget {
                    label,
                    config,
                    actions: vec![Action {
                        mnemonic: Arc::from("Compile"),
                        inputs: vec![src],
                        outputs: vec![out],
                    }],
                })))
            }
        })
        .register(KeyFamily::ActionExecution, {
            let w = w.clone();
            move |key, env| {
                let artifact = match key {
                    Key::ActionExecution(a) => a.clone(),
                    _ => unreachable!(),
                };
                match &artifact.owner {
                    None => {
                        let Some(state) = env.request(&Key::FileState(artifact.path.clone()))
                        else {
                            return Evaluation::Missing(vec![]);
                        };
                        let digest = match state {
                            Value::FileState(fs) => fs.digest,
                            _ => unreachable!(),
                        };
                        Evaluation::Value(Value::ActionExecution(Arc::new(ActionResult {
                            outputs: vec![(artifact.path.clone(), digest)],
                        })))
                    }
                    Some(owner) => {
                        let ct = env
                            .request(&Key::ConfiguredTarget(owner.label.clone(), owner.config));
                        let Some(ct) = ct else {
                            return Evaluation::Missing(vec![]);
                        };
                        let ct = match ct {
                            Value::ConfiguredTarget(c) => c,
                            _ => unreachable!(),
                        };
                        let action = ct
                            .actions
                            .iter()
                            .find(|a| a.outputs.iter().any(|o| o.path == artifact.path));
                        let Some(action) = action else {
                            return Evaluation::Fail(NodeError::new(format!(
                                "no generating action for {}",
                                artifact.path
                            )));
                        };
                        let Some(executor) = w.executor_slot.get() else {
                            return Evaluation::Fail(
                                NodeError::new("no executor installed")
                                    .with_kind(NodeErrorKind::ActionFailure),
                            );
                        };
                        match executor.execute(action) {
                            Ok(result) => {
                                Evaluation::Value(Value::ActionExecution(Arc::new(result)))
                            }
                            Err(err) => Evaluation::Fail(
                                NodeError::from_source(err)
                                    .with_kind(NodeErrorKind::ActionFailure),
                            ),
                        }
                    }
                }
            }
        })
        .register(KeyFamily::WorkspaceStatus, |_key, env| {
            let Some(action) = env.request(&Key::BuildVariable(BuildVar::WorkspaceStatusAction))
            else {
                return Evaluation::Missing(vec![]);
            };
            let action = match action {
                Value::BuildVariable(VarValue::Action(a)) => a,
                _ => unreachable!(),
            };
            Evaluation::Value(Value::WorkspaceStatus(Arc::new(WorkspaceStatus {
                artifacts: action.outputs.clone(),
            })))
        })
        .build()
}

#[derive(Default)]
struct StubExecutor {
    executed: Mutex<Vec<String>>,
    resets: AtomicUsize,
}

impl ActionExecutor for StubExecutor {
    fn execute(&self, action: &Action) -> anyhow::Result<ActionResult> {
        let out = action.outputs[0].path.to_string();
        self.executed.lock().unwrap().push(out.clone());
        Ok(ActionResult {
            outputs: vec![(Arc::from(out.as_str()), 7)],
        })
    }

    fn reset_resource_usage(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}

fn make_driver(w: &World, embedded: Vec<(Artifact, u64)>) -> Driver {
    let mut config = DriverConfig::new(make_registry(w));
    config.executor_slot = w.executor_slot.clone();
    config.deleted_packages = w.deleted.clone();
    config.package_scratch = w.scratch.clone();
    config.cancel = w.cancel.clone();
    config.embedded_artifacts = embedded;
    Driver::new(config)
}

fn prepare(driver: &Driver, roots: &[&str], command_id: u64) {
    driver.prepare_loading(
        roots.iter().map(|r| Arc::from(*r)).collect(),
        Visibility::Public,
        "",
        command_id,
    );
}

fn foo() -> PackageId {
    PackageId::new("foo")
}

#[test]
fn configure_analyze_execute_flow() -> anyhow::Result<()> {
    let w = make_world();
    let driver = make_driver(&w, vec![]);
    prepare(&driver, &["root1"], 1);

    let collection =
        driver.evaluate_configurations(BTreeMap::new(), vec![], BTreeMap::new(), false)?;
    assert_eq!(collection.configs.len(), 1);
    let config = collection.configs[0].id;

    let patterns = driver.evaluate_target_patterns(&["foo"], false)?;
    let labels = match patterns.value(&Key::TargetPattern(Arc::from("foo"))).unwrap() {
        Value::TargetPattern(r) => r.labels.clone(),
        _ => panic!("wrong value family"),
    };
    assert_eq!(labels.len(), 2);
    assert_eq!(driver.packages_loaded(), 1);

    let targets: Vec<(Label, _)> = labels.iter().map(|l| (l.clone(), config)).collect();
    let analysis = driver.analyze(&targets, false)?;
    assert!(!analysis.has_error());

    let executor = Arc::new(StubExecutor::default());
    let out = Artifact::derived("foo/lib.out", Label::new("foo", "lib"), config);
    let result = driver.execute(&[out.clone()], false, 8, executor.clone(), None)?;
    assert!(!result.has_error());
    assert_eq!(*executor.executed.lock().unwrap(), vec!["foo/lib.out"]);
    assert_eq!(executor.resets.load(Ordering::SeqCst), 2);

    // A second execution of the same artifact is fully memoized.
    let result = driver.execute(&[out], false, 8, executor.clone(), None)?;
    assert!(!result.has_error());
    assert_eq!(executor.executed.lock().unwrap().len(), 1);
    Ok(())
}

#[test]
fn embedded_artifacts_bypass_execution() -> anyhow::Result<()> {
    let w = make_world();
    let tool = Artifact::source("embedded/tool");
    let driver = make_driver(&w, vec![(tool.clone(), 99)]);
    prepare(&driver, &["root1"], 1);

    let executor = Arc::new(StubExecutor::default());
    let result = driver.execute(&[tool.clone()], false, 2, executor.clone(), None)?;
    match result.value(&Key::ActionExecution(tool)).unwrap() {
        Value::ActionExecution(r) => assert_eq!(r.outputs[0].1, 99),
        _ => panic!("wrong value family"),
    }
    assert!(executor.executed.lock().unwrap().is_empty());
    Ok(())
}

#[test]
fn incremental_rebuild_prunes_unchanged_files() -> anyhow::Result<()> {
    let w = make_world();
    let driver = make_driver(&w, vec![]);
    prepare(&driver, &["root1"], 1);
    driver.evaluate_target_patterns(&["foo"], false)?;
    assert_eq!(w.calls.get("parse"), 1);

    // Touched but unchanged: the file state is re-read, everything above is
    // revalidated clean.
    prepare(&driver, &["root1"], 2);
    driver.notify_modified_paths(&["root1/foo/BUILD"]);
    driver.evaluate_target_patterns(&["foo"], false)?;
    assert_eq!(w.calls.get("filestate"), 2);
    assert_eq!(w.calls.get("parse"), 1);
    assert_eq!(driver.modified_file_count(), 1);

    // Actually changed: the package re-parses.
    w.fs
        .lock()
        .unwrap()
        .insert("root1/foo/BUILD".to_string(), "lib bin extra".to_string());
    prepare(&driver, &["root1"], 3);
    driver.notify_modified_paths(&["root1/foo/BUILD"]);
    let patterns = driver.evaluate_target_patterns(&["foo"], false)?;
    assert_eq!(w.calls.get("parse"), 2);
    let labels = match patterns.value(&Key::TargetPattern(Arc::from("foo"))).unwrap() {
        Value::TargetPattern(r) => r.labels.len(),
        _ => panic!("wrong value family"),
    };
    assert_eq!(labels, 3);
    Ok(())
}

#[test]
fn deleted_packages_error_and_revert_without_reparse() {
    // Declaring a package deleted turns lookups into no-such-package
    // errors; reverting restores the prior value, with the parse served
    // from scratch because the underlying files never changed.
    let w = make_world();
    let driver = make_driver(&w, vec![]);
    prepare(&driver, &["root1"], 1);

    let pkg = driver.get_package(&foo()).expect("foo should load");
    assert_eq!(pkg.targets.len(), 2);
    assert_eq!(w.calls.get("parse"), 1);

    driver.set_deleted_packages(vec![foo()]);
    match driver.get_package(&foo()) {
        Err(DriverError::NoSuchPackage { name, .. }) => assert_eq!(name, "foo"),
        other => panic!("expected NoSuchPackage, got {:?}", other.map(|p| p.id.clone())),
    }

    driver.set_deleted_packages(vec![]);
    let pkg = driver.get_package(&foo()).expect("foo should load again");
    assert_eq!(pkg.targets.len(), 2);
    assert_eq!(w.calls.get("parse"), 1, "unchanged files must not re-parse");
}

#[test]
fn package_locator_change_invalidates_allowlisted_families() -> anyhow::Result<()> {
    let w = make_world();
    let driver = make_driver(&w, vec![]);
    prepare(&driver, &["root1"], 1);

    let collection =
        driver.evaluate_configurations(BTreeMap::new(), vec![], BTreeMap::new(), false)?;
    let config = collection.configs[0].id;
    driver.analyze(&[(Label::new("foo", "lib"), config)], false)?;
    assert_eq!((w.calls.get("lookup"), w.calls.get("ct")), (1, 1));

    // Same package content under the new root: lookup and file state re-run,
    // but the package value is unchanged so analysis is revalidated clean.
    prepare(&driver, &["root2"], 2);
    driver.analyze(&[(Label::new("foo", "lib"), config)], false)?;
    assert_eq!(w.calls.get("lookup"), 2);
    assert_eq!(w.calls.get("ct"), 1, "configured target must prune");
    Ok(())
}

#[test]
fn dirty_age_gc_deletes_old_nodes() -> anyhow::Result<()> {
    let w = make_world();
    let driver = make_driver(&w, vec![]);
    prepare(&driver, &["root1"], 1);
    driver.evaluate_target_patterns(&["foo"], false)?;

    driver.notify_modified_paths(&["root1/foo/BUILD"]);
    // The invalidation lands at the next flush; then let the node sit dirty
    // while other evaluations move the version forward.
    for _ in 0..3 {
        driver.evaluate(&[], EvalOptions::keep_going(false))?;
    }

    let file_key = Key::FileState(Arc::from("root1/foo/BUILD"));
    assert!(matches!(
        driver.graph().lookup(&file_key).unwrap().state,
        NodeState::Dirty(_)
    ));
    driver.delete_old_nodes(2);
    assert_eq!(driver.graph().lookup(&file_key).unwrap().state, NodeState::Absent);
    Ok(())
}

#[test]
fn interruption_is_remembered_across_uninterruptible_calls() {
    // The getter retries past the interrupt, completes, and re-arms the
    // cancellation flag for the caller to observe.
    let w = make_world();
    let driver = make_driver(&w, vec![]);
    prepare(&driver, &["root1"], 1);

    w.interrupt_once.store(true, Ordering::SeqCst);
    let pkg = driver.get_package(&foo()).expect("retry should succeed");
    assert_eq!(pkg.targets.len(), 2);
    assert!(
        w.cancel.load(Ordering::SeqCst),
        "interrupt bit must be re-armed after the uninterruptible call"
    );
}

#[test]
fn workspace_status_artifacts_come_from_injected_action() -> anyhow::Result<()> {
    let w = make_world();
    let driver = make_driver(&w, vec![]);
    prepare(&driver, &["root1"], 1);

    let action = Arc::new(Action {
        mnemonic: Arc::from("WorkspaceStatus"),
        inputs: vec![],
        outputs: vec![
            Artifact::source("build-info.txt"),
            Artifact::source("build-changelist.txt"),
        ],
    });
    driver.inject_workspace_status(action.clone());
    let artifacts = driver.get_workspace_status_artifacts()?;
    assert_eq!(artifacts.len(), 2);
    assert_eq!(driver.last_workspace_status_action(), Some(action));
    Ok(())
}

#[test]
fn generating_action_lookup() -> anyhow::Result<()> {
    let w = make_world();
    let driver = make_driver(&w, vec![]);
    prepare(&driver, &["root1"], 1);
    let collection =
        driver.evaluate_configurations(BTreeMap::new(), vec![], BTreeMap::new(), false)?;
    let config = collection.configs[0].id;

    let derived = Artifact::derived("foo/lib.out", Label::new("foo", "lib"), config);
    let action = driver.get_generating_action(&derived).expect("should resolve");
    assert_eq!(&*action.mnemonic, "Compile");

    assert!(driver.get_generating_action(&Artifact::source("foo/lib.src")).is_none());
    Ok(())
}

#[test]
fn configuration_reacts_to_test_environment() -> anyhow::Result<()> {
    let w = make_world();
    let driver = make_driver(&w, vec![]);
    prepare(&driver, &["root1"], 1);

    let options = BTreeMap::new();
    driver.evaluate_configurations(options.clone(), vec![], BTreeMap::new(), false)?;
    driver.evaluate_configurations(options.clone(), vec![], BTreeMap::new(), false)?;
    assert_eq!(w.calls.get("config"), 1, "same inputs must be memoized");

    let mut test_env = BTreeMap::new();
    test_env.insert(Arc::from("PATH"), Arc::from("/bin"));
    let collection = driver.evaluate_configurations(options, vec![], test_env, false)?;
    assert_eq!(w.calls.get("config"), 2);
    assert_eq!(collection.configs[0].options.len(), 1);
    Ok(())
}

#[test]
fn dropping_configured_targets_forces_reanalysis() -> anyhow::Result<()> {
    let w = make_world();
    let driver = make_driver(&w, vec![]);
    prepare(&driver, &["root1"], 1);
    let collection =
        driver.evaluate_configurations(BTreeMap::new(), vec![], BTreeMap::new(), false)?;
    let config = collection.configs[0].id;
    let target = (Label::new("foo", "lib"), config);

    driver.analyze(&[target.clone()], false)?;
    driver.analyze(&[target.clone()], false)?;
    assert_eq!(w.calls.get("ct"), 1);

    driver.drop_configured_targets();
    driver.analyze(&[target], false)?;
    assert_eq!(w.calls.get("ct"), 2);
    Ok(())
}

#[test]
fn reset_drops_all_state_and_rebuilds() -> anyhow::Result<()> {
    let w = make_world();
    let mut driver = make_driver(&w, vec![]);
    prepare(&driver, &["root1"], 1);
    driver.get_package(&foo())?;
    assert_eq!(w.calls.get("parse"), 1);

    driver.reset();
    // Everything injected is gone; the next build must prepare again.
    prepare(&driver, &["root1"], 2);
    driver.get_package(&foo())?;
    assert_eq!(w.calls.get("parse"), 2);
    Ok(())
}

#[test]
fn phases_require_preparation() {
    let w = make_world();
    let driver = make_driver(&w, vec![]);
    match driver.evaluate_target_patterns(&["foo"], false) {
        Err(DriverError::AbruptExit { .. }) => {}
        other => panic!("expected abrupt exit, got {:?}", other.map(|r| r.len())),
    }
}

#[test]
fn missing_target_surfaces_as_analysis_error() -> anyhow::Result<()> {
    let w = make_world();
    let driver = make_driver(&w, vec![]);
    prepare(&driver, &["root1"], 1);
    let collection =
        driver.evaluate_configurations(BTreeMap::new(), vec![], BTreeMap::new(), false)?;
    let config = collection.configs[0].id;

    let bogus = (Label::new("foo", "nonexistent"), config);
    let result = driver.analyze(&[bogus.clone()], true)?;
    let key = Key::ConfiguredTarget(bogus.0, config);
    let err = result.error(&key).expect("analysis should fail");
    assert!(err.message().contains("no such target"));
    Ok(())
}
