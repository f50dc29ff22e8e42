//! Compute backend boundary: the trial kernel is opaque to the rest of the
//! crate and is reached only through the four-call contract below
//! (configure, dispatch, request_readback, poll_readback).

use std::fmt;

use serde::Serialize;

pub mod cpu;
pub mod pool;
pub mod rng;

pub use cpu::CpuBackend;
pub use pool::WorkerPool;

/// Immutable per-run trial parameters. The seed is the only field that
/// changes between chunks; it is drawn fresh for every configure call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrialParams {
    /// Starting resource (PP) per trial.
    pub pp_initial: u32,
    /// Turn count a trial must reach to count as a survivor.
    pub turns_required: u32,
    /// Chunk-level seed; per-trial streams are derived from it.
    pub seed: u64,
}

/// Half-open range of execution units `[start, end)` for one dispatch call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UnitRange {
    pub start: u32,
    pub end: u32,
}

impl UnitRange {
    pub fn width(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }
}

/// Opaque token returned by [ComputeBackend::request_readback].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadbackHandle(pub u64);

/// Result of polling an outstanding readback.
#[derive(Debug)]
pub enum Readback {
    Pending,
    Ready(Vec<u32>),
    Error(BackendError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Call made out of order (e.g. dispatch before configure).
    NotConfigured,
    /// Dispatch range falls outside the configured chunk.
    InvalidDispatch { start: u32, end: u32 },
    /// Poll with a handle that was never issued or already consumed.
    UnknownHandle,
    /// The device reported a failure executing or reading back the chunk.
    Device(String),
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConfigured => write!(f, "backend not configured for a chunk"),
            Self::InvalidDispatch { start, end } => {
                write!(f, "dispatch range [{start}, {end}) outside configured chunk")
            }
            Self::UnknownHandle => write!(f, "unknown or consumed readback handle"),
            Self::Device(msg) => write!(f, "device error: {msg}"),
        }
    }
}

impl std::error::Error for BackendError {}

/// Adapter over a massively parallel trial-execution kernel. One chunk is in
/// flight at a time: configure sizes the outcome buffer, every sub-dispatch
/// range is issued in order, then exactly one readback is requested and
/// polled until it resolves.
pub trait ComputeBackend {
    /// Acquire an outcome buffer for `chunk_trials` trials and set the trial
    /// parameters (including the fresh chunk seed) for subsequent dispatches.
    fn configure(&mut self, chunk_trials: usize, params: TrialParams) -> Result<(), BackendError>;

    /// Issue one sub-dispatch covering the given execution-unit range.
    fn dispatch(&mut self, units: UnitRange) -> Result<(), BackendError>;

    /// Begin asynchronous readback of the chunk's outcome buffer.
    fn request_readback(&mut self) -> Result<ReadbackHandle, BackendError>;

    /// Non-blocking poll. `Ready` hands over the outcome array exactly once
    /// and releases the buffer; later polls with the same handle fail.
    fn poll_readback(&mut self, handle: ReadbackHandle) -> Readback;
}
