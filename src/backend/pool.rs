//! Rayon thread pool configuration for the CPU backend.
//!
//! A run executes many chunks through the same backend, so the pool is built
//! once up front rather than per [install](WorkerPool::install) call.

use rayon::{ThreadPool, ThreadPoolBuilder};

/// Executes chunk trial batches on a fixed set of worker threads.
#[derive(Debug)]
pub struct WorkerPool {
    /// None means the global Rayon pool (all CPU cores).
    pool: Option<ThreadPool>,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self { pool: None }
    }
}

impl WorkerPool {
    /// Use all available CPU cores (Rayon default).
    pub fn default_workers() -> Self {
        Self::default()
    }

    /// Use exactly `n` worker threads. `n == 0` falls back to the global pool.
    pub fn with_workers(n: usize) -> Result<Self, rayon::ThreadPoolBuildError> {
        if n == 0 {
            return Ok(Self::default());
        }
        let pool = ThreadPoolBuilder::new().num_threads(n).build()?;
        Ok(Self { pool: Some(pool) })
    }

    /// Run a closure inside this pool's scope. Rayon parallel iterators
    /// invoked within `f` use the pool's threads.
    pub fn install<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        match &self.pool {
            Some(pool) => pool.install(f),
            None => f(),
        }
    }
}
