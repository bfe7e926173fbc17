//! Keys identify memoized computations; values are their results.
//!
//! Both are closed tagged unions with one variant per key family. A key is
//! immutable, cheap to clone, and totally ordered so error paths can iterate
//! deterministically. Values may be large; big payloads sit behind `Arc` so a
//! value clone is a pointer bump.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A package name relative to the workspace root, e.g. "base/util".
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PackageId(pub Arc<str>);

impl PackageId {
    pub fn new(name: &str) -> Self {
        PackageId(Arc::from(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A target inside a package: "//base/util:log".
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Label {
    pub package: PackageId,
    pub target: Arc<str>,
}

impl Label {
    pub fn new(package: &str, target: &str) -> Self {
        Label {
            package: PackageId::new(package),
            target: Arc::from(target),
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "//{}:{}", self.package, self.target)
    }
}

/// Identity of a built configuration: a fingerprint over the build options
/// and cpu list that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConfigId(pub u64);

impl fmt::Display for ConfigId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// The target a derived artifact belongs to. Source artifacts have no owner.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArtifactOwner {
    pub label: Label,
    pub config: ConfigId,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Artifact {
    pub path: Arc<str>,
    pub owner: Option<ArtifactOwner>,
}

impl Artifact {
    pub fn source(path: &str) -> Self {
        Artifact {
            path: Arc::from(path),
            owner: None,
        }
    }

    pub fn derived(path: &str, label: Label, config: ConfigId) -> Self {
        Artifact {
            path: Arc::from(path),
            owner: Some(ArtifactOwner { label, config }),
        }
    }

    pub fn is_source(&self) -> bool {
        self.owner.is_none()
    }
}

/// The closed set of singleton keys used to plumb external mutable inputs
/// into the graph. Their values exist only by injection; no evaluator
/// function is ever dispatched for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BuildVar {
    DefaultVisibility,
    DefaultsPackageContents,
    PackageLocator,
    TestEnvironment,
    BuildId,
    WorkspaceStatusAction,
    BuildInfoFactories,
    TopLevelArtifactContext,
    BadActions,
    WorkspaceDirectory,
}

/// The identity of a memoized computation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Key {
    FileState(Arc<str>),
    File(Arc<str>),
    DirectoryListing(Arc<str>),
    PackageLookup(PackageId),
    Package(PackageId),
    TargetPattern(Arc<str>),
    WorkspaceFile(Arc<str>),
    ConfigurationCollection(ConfigId),
    ConfiguredTarget(Label, ConfigId),
    ActionExecution(Artifact),
    WorkspaceStatus,
    BuildVariable(BuildVar),
}

/// Family tag of a key, used for registry dispatch and bulk invalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyFamily {
    FileState,
    File,
    DirectoryListing,
    PackageLookup,
    Package,
    TargetPattern,
    WorkspaceFile,
    ConfigurationCollection,
    ConfiguredTarget,
    ActionExecution,
    WorkspaceStatus,
    BuildVariable,
}

impl Key {
    pub fn family(&self) -> KeyFamily {
        match self {
            Key::FileState(_) => KeyFamily::FileState,
            Key::File(_) => KeyFamily::File,
            Key::DirectoryListing(_) => KeyFamily::DirectoryListing,
            Key::PackageLookup(_) => KeyFamily::PackageLookup,
            Key::Package(_) => KeyFamily::Package,
            Key::TargetPattern(_) => KeyFamily::TargetPattern,
            Key::WorkspaceFile(_) => KeyFamily::WorkspaceFile,
            Key::ConfigurationCollection(_) => KeyFamily::ConfigurationCollection,
            Key::ConfiguredTarget(..) => KeyFamily::ConfiguredTarget,
            Key::ActionExecution(_) => KeyFamily::ActionExecution,
            Key::WorkspaceStatus => KeyFamily::WorkspaceStatus,
            Key::BuildVariable(_) => KeyFamily::BuildVariable,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::FileState(p) => write!(f, "file state {}", p),
            Key::File(p) => write!(f, "file {}", p),
            Key::DirectoryListing(p) => write!(f, "directory listing {}", p),
            Key::PackageLookup(id) => write!(f, "package lookup {}", id),
            Key::Package(id) => write!(f, "package {}", id),
            Key::TargetPattern(pat) => write!(f, "target pattern '{}'", pat),
            Key::WorkspaceFile(p) => write!(f, "workspace file {}", p),
            Key::ConfigurationCollection(id) => write!(f, "configuration collection {}", id),
            Key::ConfiguredTarget(label, config) => {
                write!(f, "configured target {} ({})", label, config)
            }
            Key::ActionExecution(artifact) => write!(f, "action execution {}", artifact.path),
            Key::WorkspaceStatus => write!(f, "workspace status"),
            Key::BuildVariable(var) => write!(f, "build variable {:?}", var),
        }
    }
}

/// File modification time, as far as the build cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MTime {
    Missing,
    Stamp(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileState {
    pub mtime: MTime,
    pub digest: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileContents(pub Arc<str>);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DirectoryListing {
    pub entries: Vec<Arc<str>>,
}

/// Where a package lives, if it exists at all.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PackageLookup {
    Found { root: Arc<str> },
    NotFound,
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Visibility {
    Public,
    Private,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Package {
    pub id: PackageId,
    pub targets: Vec<Arc<str>>,
    pub default_visibility: Visibility,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolvedTargets {
    pub labels: Vec<Label>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BuildConfiguration {
    pub id: ConfigId,
    pub cpu: Arc<str>,
    pub options: BTreeMap<Arc<str>, Arc<str>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConfigurationCollection {
    pub configs: Vec<BuildConfiguration>,
}

/// One registered action of a configured target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Action {
    pub mnemonic: Arc<str>,
    pub inputs: Vec<Artifact>,
    pub outputs: Vec<Artifact>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConfiguredTarget {
    pub label: Label,
    pub config: ConfigId,
    pub actions: Vec<Action>,
}

/// Output digests of a completed (or injected) action, keyed by path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActionResult {
    pub outputs: Vec<(Arc<str>, u64)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkspaceStatus {
    pub artifacts: Vec<Artifact>,
}

/// Payload of an injected build variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VarValue {
    Visibility(Visibility),
    Text(Arc<str>),
    Paths(Arc<Vec<Arc<str>>>),
    Env(Arc<BTreeMap<Arc<str>, Arc<str>>>),
    Id(u64),
    Action(Arc<Action>),
    Artifacts(Arc<Vec<Artifact>>),
    BadActions(Arc<BTreeMap<Arc<str>, Arc<str>>>),
}

/// The result of a successful evaluation of a key. Variants parallel the key
/// families.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    FileState(FileState),
    File(FileContents),
    DirectoryListing(Arc<DirectoryListing>),
    PackageLookup(PackageLookup),
    Package(Arc<Package>),
    TargetPattern(Arc<ResolvedTargets>),
    WorkspaceFile(FileContents),
    ConfigurationCollection(Arc<ConfigurationCollection>),
    ConfiguredTarget(Arc<ConfiguredTarget>),
    ActionExecution(Arc<ActionResult>),
    WorkspaceStatus(Arc<WorkspaceStatus>),
    BuildVariable(VarValue),
}

/// A 64-bit content hash of a value, used to decide whether a dirty
/// dependent may skip re-evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(pub u64);

pub const UNIT_SEPARATOR: u8 = 0x1F;

impl Value {
    pub fn fingerprint(&self) -> Fingerprint {
        let mut h = ahash::AHasher::default();
        self.hash(&mut h);
        Fingerprint(h.finish())
    }
}

/// Fingerprints an option map plus a cpu list into a configuration id.
pub fn config_id(options: &BTreeMap<Arc<str>, Arc<str>>, multi_cpu: &[Arc<str>]) -> ConfigId {
    let mut h = ahash::AHasher::default();
    for (k, v) in options {
        h.write(k.as_bytes());
        h.write_u8(UNIT_SEPARATOR);
        h.write(v.as_bytes());
        h.write_u8(UNIT_SEPARATOR);
    }
    h.write_u8(UNIT_SEPARATOR);
    for cpu in multi_cpu {
        h.write(cpu.as_bytes());
        h.write_u8(UNIT_SEPARATOR);
    }
    ConfigId(h.finish())
}
