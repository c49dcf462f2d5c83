//! Per-run phase tracking.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tcadana_core::RunId;

/// Where a run is in its processing sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Discovered,
    Fingerprinted,
    /// Every requested metric was served from the cache.
    CacheHit,
    Parsing,
    Computing,
    Cached,
    Done,
    Failed,
    Cancelled,
}

impl RunPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunPhase::Done | RunPhase::Failed | RunPhase::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunPhase::Discovered => "discovered",
            RunPhase::Fingerprinted => "fingerprinted",
            RunPhase::CacheHit => "cache-hit",
            RunPhase::Parsing => "parsing",
            RunPhase::Computing => "computing",
            RunPhase::Cached => "cached",
            RunPhase::Done => "done",
            RunPhase::Failed => "failed",
            RunPhase::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives phase changes as they happen. Called from worker threads, so
/// implementations must not block for long.
pub trait ProgressObserver: Send + Sync {
    fn on_phase(&self, run: &RunId, phase: RunPhase);

    fn on_run_finished(&self, _run: &RunId, _completed: usize, _total: usize) {}
}

/// Point-in-time view of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub total: usize,
    pub completed: usize,
    pub phases: BTreeMap<RunId, RunPhase>,
}

/// Lock-free progress state shared by the workers of one batch.
#[derive(Default)]
pub struct ProgressTracker {
    total: AtomicUsize,
    completed: AtomicUsize,
    phases: DashMap<RunId, RunPhase>,
    observer: Option<Arc<dyn ProgressObserver>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Reset for a batch of `runs`, all in `Discovered`.
    pub(crate) fn start<'a>(&self, runs: impl IntoIterator<Item = &'a RunId>) {
        self.phases.clear();
        self.completed.store(0, Ordering::SeqCst);
        let mut total = 0;
        for run in runs {
            self.phases.insert(run.clone(), RunPhase::Discovered);
            total += 1;
        }
        self.total.store(total, Ordering::SeqCst);
    }

    pub(crate) fn set(&self, run: &RunId, phase: RunPhase) {
        log::debug!("{}: {}", run, phase);
        self.phases.insert(run.clone(), phase);
        if let Some(observer) = &self.observer {
            observer.on_phase(run, phase);
        }
        if phase.is_terminal() {
            let completed = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
            let total = self.total.load(Ordering::SeqCst);
            if let Some(observer) = &self.observer {
                observer.on_run_finished(run, completed, total);
            }
        }
    }

    pub fn phase(&self, run: &RunId) -> Option<RunPhase> {
        self.phases.get(run).map(|p| *p)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            total: self.total(),
            completed: self.completed(),
            phases: self
                .phases
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
        }
    }
}
