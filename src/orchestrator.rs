//! Batch orchestrator: drives planned chunks through the compute backend
//! with a non-blocking dispatch/readback cycle and folds each completed
//! chunk into the shared aggregate exactly once.
//!
//! At most one chunk is in flight at a time. The backend parallelizes within
//! a chunk; chunk-level concurrency would buy little and would complicate
//! the aggregation ordering guarantee.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::aggregate::SharedAggregate;
use crate::backend::{BackendError, ComputeBackend, Readback, TrialParams};
use crate::config::RunConfig;
use crate::planner::{self, DispatchDescriptor, PlanError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    FixedCount(u64),
    Continuous,
}

/// Orchestrator lifecycle. `Done` is reached only by a fixed-count run;
/// cancellation returns the machine to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Planning,
    Dispatching,
    AwaitingReadback,
    Aggregating,
    Done,
}

/// Cooperative cancellation, checked at every suspension point. Setting it
/// unwinds the in-flight chunk without touching the aggregate; a cancel can
/// never land mid-fold.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Outcome of one `run` call. Chunk failures are counted, not propagated.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RunReport {
    pub chunks_completed: u64,
    pub chunks_failed: u64,
    pub trials_completed: u64,
    pub cancelled: bool,
}

/// Errors that terminate a run before any dispatch. Per-chunk backend
/// failures are recovered locally and never surface here.
#[derive(Debug)]
pub enum RunError {
    Plan(PlanError),
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plan(err) => write!(f, "planning failed: {err}"),
        }
    }
}

impl std::error::Error for RunError {}

impl From<PlanError> for RunError {
    fn from(err: PlanError) -> Self {
        Self::Plan(err)
    }
}

pub struct Orchestrator<B: ComputeBackend> {
    backend: B,
    config: RunConfig,
    shared: SharedAggregate,
    cancel: CancelFlag,
    state: RunState,
}

impl<B: ComputeBackend> Orchestrator<B> {
    pub fn new(backend: B, config: RunConfig, shared: SharedAggregate, cancel: CancelFlag) -> Self {
        Self {
            backend,
            config,
            shared,
            cancel,
            state: RunState::Idle,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Drive the run to completion (fixed count), cancellation, or a plan
    /// error. Chunks are dispatched and aggregated strictly in plan order.
    pub async fn run(&mut self, mode: RunMode) -> Result<RunReport, RunError> {
        let mut report = RunReport::default();
        self.state = RunState::Planning;

        match mode {
            RunMode::FixedCount(total) => {
                let descriptors = planner::plan(
                    total,
                    self.config.effective_chunk_ceiling(),
                    self.config.execution_unit_ceiling,
                    self.config.unit_group_size,
                )?;
                for descriptor in &descriptors {
                    if self.cancel.is_cancelled() {
                        report.cancelled = true;
                        break;
                    }
                    self.run_chunk(descriptor, &mut report).await;
                }
                self.state = if report.cancelled {
                    RunState::Idle
                } else {
                    RunState::Done
                };
            }
            RunMode::Continuous => {
                // Unbounded soak mode: a fixed-size chunk per cycle, forever,
                // ended only by external cancellation.
                let descriptor = planner::plan_chunk(
                    self.config.chunk_size,
                    self.config.per_invocation_ceiling,
                    self.config.execution_unit_ceiling,
                    self.config.unit_group_size,
                )?;
                loop {
                    if self.cancel.is_cancelled() {
                        report.cancelled = true;
                        break;
                    }
                    self.run_chunk(&descriptor, &mut report).await;
                }
                self.state = RunState::Idle;
            }
        }

        Ok(report)
    }

    async fn run_chunk(&mut self, descriptor: &DispatchDescriptor, report: &mut RunReport) {
        match self.process_chunk(descriptor).await {
            Ok(Some(outcomes)) => {
                self.state = RunState::Aggregating;
                self.shared.absorb(&outcomes, self.config.turns_required);
                report.chunks_completed += 1;
                report.trials_completed += outcomes.len() as u64;
            }
            // Cancelled mid-chunk: nothing was absorbed, nothing to undo.
            // Recorded here because a cancel landing on the final planned
            // chunk has no next iteration to notice the flag.
            Ok(None) => report.cancelled = true,
            Err(err) => {
                // No partial credit for a chunk with unknown outcomes. Skip
                // it and keep the run alive; a transient device hiccup must
                // not kill a multi-hour run.
                eprintln!("chunk {} failed: {err}", report.chunks_completed + report.chunks_failed);
                report.chunks_failed += 1;
            }
        }
    }

    /// One dispatch/readback cycle. `Ok(None)` means cancellation unwound
    /// the chunk before readback completed.
    async fn process_chunk(
        &mut self,
        descriptor: &DispatchDescriptor,
    ) -> Result<Option<Vec<u32>>, BackendError> {
        let params = TrialParams {
            pp_initial: self.config.pp_initial,
            turns_required: self.config.turns_required,
            seed: draw_chunk_seed()?,
        };

        self.state = RunState::Dispatching;
        self.backend.configure(descriptor.chunk_trials, params)?;
        for range in &descriptor.sub_dispatches {
            if self.cancel.is_cancelled() {
                return Ok(None);
            }
            self.backend.dispatch(*range)?;
            // Back-to-back sub-dispatches can saturate the backend's command
            // queue; give the scheduler a chance between them.
            tokio::task::yield_now().await;
        }

        let handle = self.backend.request_readback()?;
        self.state = RunState::AwaitingReadback;
        let poll_interval = Duration::from_millis(self.config.readback_poll_ms.max(1));
        let deadline = (self.config.readback_timeout_secs > 0)
            .then(|| Instant::now() + Duration::from_secs(self.config.readback_timeout_secs));

        loop {
            if self.cancel.is_cancelled() {
                return Ok(None);
            }
            match self.backend.poll_readback(handle) {
                Readback::Ready(outcomes) => return Ok(Some(outcomes)),
                Readback::Error(err) => return Err(err),
                Readback::Pending => {
                    if deadline.is_some_and(|d| Instant::now() >= d) {
                        return Err(BackendError::Device(
                            "readback watchdog expired".to_string(),
                        ));
                    }
                    tokio::time::sleep(poll_interval).await;
                }
            }
        }
    }
}

/// Fresh seed for each chunk from the OS entropy source.
fn draw_chunk_seed() -> Result<u64, BackendError> {
    let mut buf = [0u8; 8];
    getrandom::getrandom(&mut buf)
        .map_err(|err| BackendError::Device(format!("seed source unavailable: {err}")))?;
    Ok(u64::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ReadbackHandle, UnitRange};

    /// Scripted backend: one fixed outcome value per trial, optional failure
    /// injection by chunk index, optional delayed or stuck readback.
    struct ScriptedBackend {
        chunk_trials: usize,
        chunk_index: usize,
        fail_chunks: Vec<usize>,
        pending_polls_per_chunk: u32,
        polls_left: u32,
        never_ready: bool,
        dispatched: Vec<UnitRange>,
    }

    impl ScriptedBackend {
        fn new() -> Self {
            Self {
                chunk_trials: 0,
                chunk_index: 0,
                fail_chunks: Vec::new(),
                pending_polls_per_chunk: 0,
                polls_left: 0,
                never_ready: false,
                dispatched: Vec::new(),
            }
        }

        fn failing_on(chunks: &[usize]) -> Self {
            Self {
                fail_chunks: chunks.to_vec(),
                ..Self::new()
            }
        }
    }

    impl ComputeBackend for ScriptedBackend {
        fn configure(
            &mut self,
            chunk_trials: usize,
            _params: TrialParams,
        ) -> Result<(), BackendError> {
            self.chunk_trials = chunk_trials;
            self.polls_left = self.pending_polls_per_chunk;
            Ok(())
        }

        fn dispatch(&mut self, units: UnitRange) -> Result<(), BackendError> {
            self.dispatched.push(units);
            Ok(())
        }

        fn request_readback(&mut self) -> Result<ReadbackHandle, BackendError> {
            Ok(ReadbackHandle(self.chunk_index as u64))
        }

        fn poll_readback(&mut self, _handle: ReadbackHandle) -> Readback {
            if self.never_ready {
                return Readback::Pending;
            }
            if self.polls_left > 0 {
                self.polls_left -= 1;
                return Readback::Pending;
            }
            let index = self.chunk_index;
            self.chunk_index += 1;
            if self.fail_chunks.contains(&index) {
                return Readback::Error(BackendError::Device("injected".to_string()));
            }
            Readback::Ready(vec![index as u32; self.chunk_trials])
        }
    }

    fn small_config() -> RunConfig {
        RunConfig {
            chunk_size: 100,
            per_invocation_ceiling: 100,
            execution_unit_ceiling: 8,
            unit_group_size: 4,
            readback_poll_ms: 1,
            readback_timeout_secs: 0,
            ..RunConfig::default()
        }
    }

    fn orchestrator(backend: ScriptedBackend, config: RunConfig) -> Orchestrator<ScriptedBackend> {
        Orchestrator::new(backend, config, SharedAggregate::new(), CancelFlag::new())
    }

    #[tokio::test]
    async fn fixed_run_completes_exact_trial_count() {
        let mut orch = orchestrator(ScriptedBackend::new(), small_config());
        let report = orch.run(RunMode::FixedCount(250)).await.expect("run");
        assert_eq!(report.trials_completed, 250);
        assert_eq!(report.chunks_completed, 3); // 100 + 100 + 50
        assert_eq!(report.chunks_failed, 0);
        assert!(!report.cancelled);
        assert_eq!(orch.state(), RunState::Done);
        assert_eq!(orch.shared.stats().trials_completed, 250);
    }

    #[tokio::test]
    async fn every_sub_dispatch_respects_unit_ceiling() {
        let mut orch = orchestrator(ScriptedBackend::new(), small_config());
        orch.run(RunMode::FixedCount(100)).await.expect("run");
        // 100 trials / 4 per unit = 25 units, ceiling 8 -> widths 8,8,8,1.
        let widths: Vec<u32> = orch.backend.dispatched.iter().map(|r| r.width()).collect();
        assert_eq!(widths, vec![8, 8, 8, 1]);
        assert!(orch.backend.dispatched.iter().all(|r| r.width() <= 8));
    }

    #[tokio::test]
    async fn failed_chunk_is_skipped_and_run_continues() {
        let mut orch = orchestrator(ScriptedBackend::failing_on(&[1]), small_config());
        let report = orch.run(RunMode::FixedCount(300)).await.expect("run");
        assert_eq!(report.chunks_completed, 2);
        assert_eq!(report.chunks_failed, 1);
        assert_eq!(report.trials_completed, 200);
        // The failed chunk left no trace in the aggregate.
        let stats = orch.shared.stats();
        assert_eq!(stats.trials_completed, 200);
        let total: u64 = orch.shared.histogram_snapshot().values().sum();
        assert_eq!(total, 200);
    }

    #[tokio::test]
    async fn plan_error_surfaces_before_any_dispatch() {
        let config = RunConfig {
            unit_group_size: 0,
            ..small_config()
        };
        let mut orch = orchestrator(ScriptedBackend::new(), config);
        let err = orch.run(RunMode::FixedCount(10)).await.expect_err("must fail");
        assert!(matches!(err, RunError::Plan(PlanError::ZeroUnitGroupSize)));
        assert!(orch.backend.dispatched.is_empty());
    }

    #[tokio::test]
    async fn pre_cancelled_run_does_no_work() {
        let cancel = CancelFlag::new();
        cancel.cancel();
        let mut orch = Orchestrator::new(
            ScriptedBackend::new(),
            small_config(),
            SharedAggregate::new(),
            cancel,
        );
        let report = orch.run(RunMode::FixedCount(300)).await.expect("run");
        assert!(report.cancelled);
        assert_eq!(report.trials_completed, 0);
        assert_eq!(orch.state(), RunState::Idle);
    }

    #[tokio::test]
    async fn cancellation_during_readback_unwinds_cleanly() {
        let mut backend = ScriptedBackend::new();
        backend.never_ready = true;
        let cancel = CancelFlag::new();
        let shared = SharedAggregate::new();
        let mut orch = Orchestrator::new(backend, small_config(), shared.clone(), cancel.clone());

        let run = tokio::spawn(async move { orch.run(RunMode::Continuous).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        let report = run.await.expect("join").expect("run");

        assert!(report.cancelled);
        assert_eq!(report.chunks_completed, 0);
        // Nothing half-absorbed.
        assert_eq!(shared.stats().trials_completed, 0);
        assert!(shared.histogram_snapshot().is_empty());
    }

    #[tokio::test]
    async fn cancellation_during_final_chunk_is_reported() {
        let mut backend = ScriptedBackend::new();
        backend.never_ready = true;
        let cancel = CancelFlag::new();
        let shared = SharedAggregate::new();
        let mut orch = Orchestrator::new(backend, small_config(), shared.clone(), cancel.clone());

        // A single planned chunk: the cancel lands mid-readback and there is
        // no following iteration to observe the flag.
        let run = tokio::spawn(async move {
            let report = orch.run(RunMode::FixedCount(50)).await.expect("run");
            (report, orch.state())
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        let (report, state) = run.await.expect("join");

        assert!(report.cancelled);
        assert_eq!(report.chunks_completed, 0);
        assert_eq!(state, RunState::Idle);
        assert_eq!(shared.stats().trials_completed, 0);
    }

    #[tokio::test]
    async fn watchdog_times_out_a_hung_readback() {
        let mut backend = ScriptedBackend::new();
        backend.never_ready = true;
        let config = RunConfig {
            readback_timeout_secs: 1,
            ..small_config()
        };
        let cancel = CancelFlag::new();
        let mut orch = Orchestrator::new(backend, config, SharedAggregate::new(), cancel.clone());

        // Cancel after the first chunk has had time to trip the watchdog, so
        // the continuous loop does not spin forever on timed-out chunks.
        let canceller = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(1200)).await;
                cancel.cancel();
            }
        });
        let report = orch.run(RunMode::Continuous).await.expect("run");
        canceller.await.expect("join");

        assert!(report.chunks_failed >= 1);
        assert_eq!(report.chunks_completed, 0);
    }

    #[tokio::test]
    async fn delayed_readback_still_completes() {
        let mut backend = ScriptedBackend::new();
        backend.pending_polls_per_chunk = 3;
        backend.polls_left = 3;
        let mut orch = orchestrator(backend, small_config());
        let report = orch.run(RunMode::FixedCount(100)).await.expect("run");
        assert_eq!(report.chunks_completed, 1);
        assert_eq!(report.trials_completed, 100);
    }
}
