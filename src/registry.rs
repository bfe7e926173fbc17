//! The key/value registry: one evaluator function per key family.
//!
//! A function must be deterministic modulo the values it requests through
//! its environment; observing state outside the recorded dependencies
//! breaks incremental correctness. That is a contract, not enforced.

use crate::error::NodeError;
use crate::eval::Env;
use crate::key::{Key, KeyFamily, Value};
use rustc_hash::FxHashMap;

/// What a node function hands back to the evaluator.
pub enum Evaluation {
    /// A finished value; every key requested through the environment was
    /// available.
    Value(Value),
    /// The listed keys (plus anything requested through the environment)
    /// must be computed first; the function will be re-invoked afterwards.
    Missing(Vec<Key>),
    Fail(NodeError),
}

pub type NodeFn = Box<dyn Fn(&Key, &mut Env) -> Evaluation + Send + Sync>;

/// Configuration-time mapping from family tag to evaluator function.
pub struct Registry {
    funcs: FxHashMap<KeyFamily, NodeFn>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder {
            funcs: FxHashMap::default(),
        }
    }

    pub(crate) fn get(&self, family: KeyFamily) -> Option<&NodeFn> {
        self.funcs.get(&family)
    }
}

pub struct RegistryBuilder {
    funcs: FxHashMap<KeyFamily, NodeFn>,
}

impl RegistryBuilder {
    pub fn register(
        mut self,
        family: KeyFamily,
        f: impl Fn(&Key, &mut Env) -> Evaluation + Send + Sync + 'static,
    ) -> Self {
        self.funcs.insert(family, Box::new(f));
        self
    }

    pub fn build(self) -> Registry {
        Registry { funcs: self.funcs }
    }
}
