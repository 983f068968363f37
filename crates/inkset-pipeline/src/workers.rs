//! Per-run worker pool for the per-color fan-out.
//!
//! Each color's sub-pipeline only reads the shared canvas, so layers can
//! run on separate threads. Results come back in input order, which is
//! palette order, and are merged at a single point by the assembler.

use rayon::prelude::*;

/// A rayon thread pool owned by one pipeline run, or inline execution.
#[derive(Debug)]
pub struct WorkerPool {
    pool: Option<rayon::ThreadPool>,
}

impl WorkerPool {
    /// Build a pool with `threads` workers.
    ///
    /// `0` sizes the pool to the available parallelism. `1` gives a single
    /// worker, so the layers and the row-parallel work nested inside them
    /// (morphology) all run sequentially.
    ///
    /// # Errors
    ///
    /// Returns the builder's error message if the OS refuses to spawn
    /// the threads. Callers degrade to [`WorkerPool::inline`].
    pub fn new(threads: usize) -> Result<Self, String> {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("inkset-worker-{i}"))
            .build()
            .map(|pool| Self { pool: Some(pool) })
            .map_err(|e| e.to_string())
    }

    /// Run the layers one after another on the calling thread.
    ///
    /// Only the fan-out is sequential here; nested rayon work still goes
    /// to the global pool.
    #[must_use]
    pub const fn inline() -> Self {
        Self { pool: None }
    }

    /// Number of threads jobs run on.
    #[must_use]
    pub fn threads(&self) -> usize {
        self.pool
            .as_ref()
            .map_or(1, rayon::ThreadPool::current_num_threads)
    }

    /// Apply `f` to every item, returning results in input order.
    pub fn map<T, R, F>(&self, items: &[T], f: F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Sync + Send,
    {
        match &self.pool {
            Some(pool) => pool.install(|| items.par_iter().map(&f).collect()),
            None => items.iter().map(f).collect(),
        }
    }
}
