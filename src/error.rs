//! Error taxonomy: node failures stored in the graph, and the typed errors
//! the driver façade surfaces to callers.

use crate::cycle::CycleInfo;
use crate::key::Key;
use std::sync::Arc;
use thiserror::Error;

/// Classifies a node failure so the façade can map it to a caller-facing
/// error without string matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeErrorKind {
    Generic,
    NoSuchPackage,
    BuildFileError,
    InvalidConfiguration,
    ActionFailure,
}

/// A user-visible failure attributable to a specific key.
///
/// Stored on the failing node and shared (cheaply, via `Arc` internals) with
/// every dependent that errors because of it.
#[derive(Debug, Clone, Error)]
#[error("{msg}")]
pub struct NodeError {
    msg: Arc<str>,
    pub kind: NodeErrorKind,
    /// Keys of the originating failures, sorted. For a directly failing node
    /// this is the node's own key.
    pub root_causes: Vec<Key>,
    pub cycles: Vec<CycleInfo>,
    /// Transient failures are re-armed for retry by `invalidate_errors`.
    pub transient: bool,
}

impl NodeError {
    pub fn new(msg: impl Into<String>) -> Self {
        NodeError {
            msg: Arc::from(msg.into()),
            kind: NodeErrorKind::Generic,
            root_causes: Vec::new(),
            cycles: Vec::new(),
            transient: false,
        }
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        NodeError {
            transient: true,
            ..NodeError::new(msg)
        }
    }

    pub fn with_kind(mut self, kind: NodeErrorKind) -> Self {
        self.kind = kind;
        self
    }

    /// Wraps an embedder-supplied failure, keeping its chain in the message.
    pub fn from_source(err: anyhow::Error) -> Self {
        NodeError::new(format!("{:#}", err))
    }

    /// The error a dependent takes on when it observes `dep` in Error.
    pub fn bubbled(dep: &Key, dep_err: &NodeError) -> Self {
        let mut root_causes = if dep_err.root_causes.is_empty() {
            vec![dep.clone()]
        } else {
            dep_err.root_causes.clone()
        };
        root_causes.sort();
        root_causes.dedup();
        NodeError {
            msg: dep_err.msg.clone(),
            kind: dep_err.kind,
            root_causes,
            cycles: dep_err.cycles.clone(),
            transient: dep_err.transient,
        }
    }

    pub fn cycle(info: CycleInfo) -> Self {
        NodeError {
            msg: Arc::from(format!("cycle in dependency graph: {}", info)),
            kind: NodeErrorKind::Generic,
            root_causes: Vec::new(),
            cycles: vec![info],
            transient: false,
        }
    }

    pub fn message(&self) -> &str {
        &self.msg
    }

    pub fn is_cycle(&self) -> bool {
        !self.cycles.is_empty()
    }
}

/// Internal invariant violated; surfaced as an abrupt exit, never recovered.
#[derive(Debug, Error)]
#[error("engine invariant violated: {0}")]
pub struct EngineError(pub String);

/// Errors the driver façade returns to callers. Node failures inside an
/// evaluation are surfaced per key in the result map, not through this type.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(NodeError),

    #[error("no such package '{name}': {msg}")]
    NoSuchPackage { name: String, msg: String },

    #[error("package '{name}' contains errors: {msg}")]
    BuildFileContainsErrors { name: String, msg: String },

    #[error("abrupt exit (code {code}): {msg}")]
    AbruptExit { code: i32, msg: String },

    #[error("interrupted")]
    Interrupted,

    #[error("cycles detected while evaluating {key}")]
    CyclesReported { key: Key },
}

impl From<EngineError> for DriverError {
    fn from(err: EngineError) -> Self {
        DriverError::AbruptExit {
            code: 37,
            msg: err.to_string(),
        }
    }
}
