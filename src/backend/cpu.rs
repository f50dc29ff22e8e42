//! In-process reference backend. Executes the survival kernel data-parallel
//! under Rayon and serves readback asynchronously from a worker thread, so
//! the orchestrator sees the same configure/dispatch/poll rhythm a device
//! adapter would give it.
//!
//! The kernel: a trial starts with `pp_initial` PP and must reach
//! `turns_required` turns. Each turn costs one PP unless a 1-in-4 paralysis
//! roll preserves it; the trial ends when PP runs out. The outcome is the
//! number of turns survived.

use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::Arc;
use std::thread;

use rayon::prelude::*;

use super::pool::WorkerPool;
use super::rng::Rng;
use super::{BackendError, ComputeBackend, Readback, ReadbackHandle, TrialParams, UnitRange};

/// One simulated trial; deterministic for a given chunk seed and index.
pub fn survive_turns(params: TrialParams, trial_index: u64) -> u32 {
    let mut rng = Rng::for_trial(params.seed, trial_index);
    let mut pp = params.pp_initial;
    let mut turns = 0;
    while turns < params.turns_required && pp > 0 {
        turns += 1;
        if rng.next_bounded(4) != 0 {
            pp -= 1;
        }
    }
    turns
}

struct ChunkState {
    trials: usize,
    params: TrialParams,
    /// High-water mark of contiguously dispatched execution units.
    units_covered: u32,
}

pub struct CpuBackend {
    pool: Arc<WorkerPool>,
    unit_group_size: u32,
    chunk: Option<ChunkState>,
    next_handle: u64,
    inflight: Option<(ReadbackHandle, Receiver<Vec<u32>>)>,
}

impl CpuBackend {
    pub fn new(unit_group_size: u32, pool: WorkerPool) -> Self {
        Self {
            pool: Arc::new(pool),
            unit_group_size: unit_group_size.max(1),
            chunk: None,
            next_handle: 0,
            inflight: None,
        }
    }
}

impl ComputeBackend for CpuBackend {
    fn configure(&mut self, chunk_trials: usize, params: TrialParams) -> Result<(), BackendError> {
        // A readback the caller abandoned (watchdog expiry) leaves a stale
        // receiver here. Drop it so the next chunk can proceed; the worker's
        // send into the closed channel is already tolerated.
        self.inflight = None;
        self.chunk = Some(ChunkState {
            trials: chunk_trials,
            params,
            units_covered: 0,
        });
        Ok(())
    }

    fn dispatch(&mut self, units: UnitRange) -> Result<(), BackendError> {
        let chunk = self.chunk.as_mut().ok_or(BackendError::NotConfigured)?;
        let required_units =
            (chunk.trials as u64).div_ceil(self.unit_group_size as u64) as u32;
        // Sub-dispatches must tile the chunk contiguously, in order.
        if units.start != chunk.units_covered || units.end > required_units || units.width() == 0 {
            return Err(BackendError::InvalidDispatch {
                start: units.start,
                end: units.end,
            });
        }
        chunk.units_covered = units.end;
        Ok(())
    }

    fn request_readback(&mut self) -> Result<ReadbackHandle, BackendError> {
        let chunk = self.chunk.take().ok_or(BackendError::NotConfigured)?;
        let handle = ReadbackHandle(self.next_handle);
        self.next_handle += 1;

        let covered_trials = chunk
            .trials
            .min(chunk.units_covered as usize * self.unit_group_size as usize);
        let params = chunk.params;
        let trials = chunk.trials;
        let pool = Arc::clone(&self.pool);

        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let outcomes: Vec<u32> = pool.install(|| {
                (0..trials)
                    .into_par_iter()
                    .map(|i| {
                        if i < covered_trials {
                            survive_turns(params, i as u64)
                        } else {
                            0
                        }
                    })
                    .collect()
            });
            // Receiver may have been dropped on cancellation; nothing to do.
            let _ = tx.send(outcomes);
        });

        self.inflight = Some((handle, rx));
        Ok(handle)
    }

    fn poll_readback(&mut self, handle: ReadbackHandle) -> Readback {
        let Some((inflight_handle, rx)) = self.inflight.as_ref() else {
            return Readback::Error(BackendError::UnknownHandle);
        };
        if *inflight_handle != handle {
            return Readback::Error(BackendError::UnknownHandle);
        }
        match rx.try_recv() {
            Ok(outcomes) => {
                self.inflight = None;
                Readback::Ready(outcomes)
            }
            Err(TryRecvError::Empty) => Readback::Pending,
            Err(TryRecvError::Disconnected) => {
                self.inflight = None;
                Readback::Error(BackendError::Device(
                    "worker thread terminated before readback".to_string(),
                ))
            }
        }
    }
}
