//! Dependency cycle representation and reporting.

use crate::key::{Key, KeyFamily};
use crate::progress::EventSink;
use rustc_hash::FxHashSet;
use std::fmt;

/// The ordered list of keys participating in a dependency cycle.
///
/// Canonicalized by rotating the path so the lexicographically smallest key
/// comes first; two discoveries of the same cycle starting from different
/// participants compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CycleInfo {
    path: Vec<Key>,
}

impl CycleInfo {
    pub fn new(mut path: Vec<Key>) -> Self {
        assert!(!path.is_empty());
        let min = path
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.cmp(b))
            .map(|(i, _)| i)
            .unwrap();
        path.rotate_left(min);
        CycleInfo { path }
    }

    pub fn keys(&self) -> &[Key] {
        &self.path
    }
}

impl fmt::Display for CycleInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, key) in self.path.iter().enumerate() {
            if i > 0 {
                write!(f, " -> ")?;
            }
            write!(f, "{}", key)?;
        }
        write!(f, " -> {}", self.path[0])
    }
}

/// Formats detected cycles for the user, one message per distinct cycle.
///
/// Stateful only to the extent of remembering cycles already reported in
/// this build; the façade recreates it at build preparation.
pub struct CycleReporter {
    seen: FxHashSet<CycleInfo>,
}

impl CycleReporter {
    pub fn new() -> Self {
        CycleReporter {
            seen: FxHashSet::default(),
        }
    }

    /// Reports each not-yet-seen cycle through the sink, phrased for the
    /// key family the cycle lives in.
    pub fn report(&mut self, cycles: &[CycleInfo], requested: &Key, sink: &dyn EventSink) {
        for cycle in cycles {
            if !self.seen.insert(cycle.clone()) {
                continue;
            }
            sink.error(format!(
                "in {}: {}: {}",
                requested,
                describe_family(cycle),
                cycle
            ));
        }
    }
}

impl Default for CycleReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Picks the phrasing for the family the cycle is most specific to.
fn describe_family(cycle: &CycleInfo) -> &'static str {
    let families: Vec<KeyFamily> = cycle.keys().iter().map(Key::family).collect();
    if families.contains(&KeyFamily::ActionExecution) {
        "cycle between action outputs"
    } else if families.contains(&KeyFamily::ConfiguredTarget) {
        "cycle in configured target dependencies"
    } else if families.contains(&KeyFamily::TargetPattern)
        || families.contains(&KeyFamily::Package)
    {
        "cycle in target graph"
    } else if families.contains(&KeyFamily::WorkspaceFile) {
        "cycle in workspace file imports"
    } else {
        "cycle in dependency graph"
    }
}
