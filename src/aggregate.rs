//! Streaming result aggregation: the turns histogram and scalar run
//! statistics, folded once per completed chunk.
//!
//! Concurrency discipline: the orchestrator task is the only writer. A chunk
//! is folded into a local accumulator off-lock; the shared state lock is
//! taken only for the merge and for snapshot copies, so readers never
//! observe a histogram mid-fold and a slow fold never blocks the display.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::Serialize;

/// Durable aggregate state for one run. Histogram keys are present only
/// while their count is positive; both keys and counts grow monotonically.
#[derive(Debug, Clone, Default)]
pub struct RunAggregate {
    histogram: BTreeMap<u32, u64>,
    pub trials_completed: u64,
    pub survivor_count: u64,
    pub min_outcome: Option<u32>,
    pub max_outcome: Option<u32>,
}

impl RunAggregate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one chunk's outcome array in. Commutative: absorbing the same
    /// arrays in any order produces identical state. After return,
    /// `sum(histogram values) == trials_completed` and `survivor_count`
    /// equals the number of absorbed outcomes `>= survival_threshold`.
    pub fn absorb(&mut self, outcomes: &[u32], survival_threshold: u32) {
        for &turns in outcomes {
            *self.histogram.entry(turns).or_insert(0) += 1;
            if turns >= survival_threshold {
                self.survivor_count += 1;
            }
            // Tracked incrementally so snapshots never scan the key range.
            self.min_outcome = Some(self.min_outcome.map_or(turns, |m| m.min(turns)));
            self.max_outcome = Some(self.max_outcome.map_or(turns, |m| m.max(turns)));
        }
        self.trials_completed += outcomes.len() as u64;
    }

    /// Merge another aggregate in (used to publish a per-chunk fold).
    pub fn merge(&mut self, other: &RunAggregate) {
        for (&turns, &count) in &other.histogram {
            *self.histogram.entry(turns).or_insert(0) += count;
        }
        self.trials_completed += other.trials_completed;
        self.survivor_count += other.survivor_count;
        self.min_outcome = match (self.min_outcome, other.min_outcome) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.max_outcome = match (self.max_outcome, other.max_outcome) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }

    pub fn histogram(&self) -> &BTreeMap<u32, u64> {
        &self.histogram
    }
}

/// Scalar statistics as read at one point in time.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StatsSnapshot {
    pub trials_completed: u64,
    pub survivor_count: u64,
    pub min_outcome: Option<u32>,
    pub max_outcome: Option<u32>,
}

/// Handle shared between the orchestrator (writer) and display readers.
#[derive(Clone)]
pub struct SharedAggregate {
    inner: Arc<Mutex<RunAggregate>>,
    started: Instant,
    started_at: chrono::DateTime<chrono::Utc>,
}

impl SharedAggregate {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RunAggregate::new())),
            started: Instant::now(),
            started_at: chrono::Utc::now(),
        }
    }

    /// Fold a chunk off-lock, then publish under a short-lived lock.
    pub fn absorb(&self, outcomes: &[u32], survival_threshold: u32) {
        let mut local = RunAggregate::new();
        local.absorb(outcomes, survival_threshold);
        self.inner
            .lock()
            .expect("aggregate lock poisoned")
            .merge(&local);
    }

    /// Point-in-time copy of the histogram for the display collaborator.
    pub fn histogram_snapshot(&self) -> BTreeMap<u32, u64> {
        self.inner
            .lock()
            .expect("aggregate lock poisoned")
            .histogram()
            .clone()
    }

    pub fn stats(&self) -> StatsSnapshot {
        let agg = self.inner.lock().expect("aggregate lock poisoned");
        StatsSnapshot {
            trials_completed: agg.trials_completed,
            survivor_count: agg.survivor_count,
            min_outcome: agg.min_outcome,
            max_outcome: agg.max_outcome,
        }
    }

    /// Monotonic elapsed time since run start, in seconds.
    pub fn elapsed_seconds(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    pub fn started_at(&self) -> chrono::DateTime<chrono::Utc> {
        self.started_at
    }
}

impl Default for SharedAggregate {
    fn default() -> Self {
        Self::new()
    }
}
