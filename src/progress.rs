//! Build progress observation, for the purpose of metrics and display.
//!
//! The evaluator calls these hooks without holding node locks; callbacks for
//! a single key are serialized, but across keys they may arrive from any
//! worker thread concurrently.

use crate::key::{Key, KeyFamily, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Why a node left the Done state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationState {
    Dirty,
    Deleted,
}

/// How a node reached its result in this evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    BuiltFresh,
    ReusedClean,
    Failed,
}

/// Trait for evaluation progress notifications.
pub trait Progress: Send + Sync {
    /// Called when a node is marked dirty or deleted.
    fn invalidated(&self, _key: &Key, _state: InvalidationState) {}

    /// Called when a key is put on the ready queue.
    fn enqueueing(&self, _key: &Key) {}

    /// Called when a node reaches Done or Error in this evaluation.
    fn evaluated(&self, _key: &Key, _value: Option<&Value>, _outcome: Outcome) {}
}

/// Multiplexes progress notifications to a list of receivers.
#[derive(Default)]
pub struct FanOutProgress {
    receivers: Vec<Arc<dyn Progress>>,
}

impl FanOutProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, receiver: Arc<dyn Progress>) {
        self.receivers.push(receiver);
    }
}

impl Progress for FanOutProgress {
    fn invalidated(&self, key: &Key, state: InvalidationState) {
        for r in &self.receivers {
            r.invalidated(key, state);
        }
    }

    fn enqueueing(&self, key: &Key) {
        for r in &self.receivers {
            r.enqueueing(key);
        }
    }

    fn evaluated(&self, key: &Key, value: Option<&Value>, outcome: Outcome) {
        for r in &self.receivers {
            r.evaluated(key, value, outcome);
        }
    }
}

/// Counts evaluation outcomes; the façade reports these totals.
#[derive(Default)]
pub struct CountingProgress {
    packages_loaded: AtomicUsize,
    built: AtomicUsize,
    reused: AtomicUsize,
    failed: AtomicUsize,
    invalidated: AtomicUsize,
}

impl CountingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn packages_loaded(&self) -> usize {
        self.packages_loaded.load(Ordering::Relaxed)
    }

    pub fn built(&self) -> usize {
        self.built.load(Ordering::Relaxed)
    }

    pub fn reused(&self) -> usize {
        self.reused.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn invalidated(&self) -> usize {
        self.invalidated.load(Ordering::Relaxed)
    }

    pub fn reset_packages_loaded(&self) {
        self.packages_loaded.store(0, Ordering::Relaxed);
    }
}

impl Progress for CountingProgress {
    fn invalidated(&self, _key: &Key, _state: InvalidationState) {
        self.invalidated.fetch_add(1, Ordering::Relaxed);
    }

    fn evaluated(&self, key: &Key, _value: Option<&Value>, outcome: Outcome) {
        match outcome {
            Outcome::BuiltFresh => {
                self.built.fetch_add(1, Ordering::Relaxed);
                if key.family() == KeyFamily::Package {
                    self.packages_loaded.fetch_add(1, Ordering::Relaxed);
                }
            }
            Outcome::ReusedClean => {
                self.reused.fetch_add(1, Ordering::Relaxed);
            }
            Outcome::Failed => {
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Sink for user-visible diagnostics (cycle reports, phase errors).
pub trait EventSink: Send + Sync {
    fn error(&self, msg: String);
    fn warning(&self, msg: String);
    fn info(&self, msg: String);
}

/// Routes diagnostics to the tracing subscriber.
pub struct LogSink;

impl EventSink for LogSink {
    fn error(&self, msg: String) {
        tracing::error!("{}", msg);
    }

    fn warning(&self, msg: String) {
        tracing::warn!("{}", msg);
    }

    fn info(&self, msg: String) {
        tracing::info!("{}", msg);
    }
}
