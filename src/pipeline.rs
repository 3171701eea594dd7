//! Parallel work partitioning for hashing and blob encryption/decryption.
//!
//! The original archiver fans work across a process pool and, within each
//! process, a thread pool (`P` processes × `T` threads). In Rust the two
//! levels collapse into a single Rayon pool sized `P × T` — see the
//! REDESIGN FLAGS discussion in DESIGN.md — but the externally observable
//! contract is unchanged: work is split into `P` contiguous slices (the
//! last absorbing any remainder), every item runs, and a single failing
//! item aborts the whole batch.

use rayon::{ThreadPool, ThreadPoolBuilder};

/// Default process-level parallelism: half the available CPUs, at least 1.
pub fn default_processes() -> usize {
    std::cmp::max(1, num_cpus() / 2)
}

/// Default thread-level parallelism per process.
pub const DEFAULT_THREADS_PER_PROCESS: usize = 4;

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// A bounded worker pool used for batch hashing and batch encrypt/decrypt.
pub struct Pipeline {
    pool: ThreadPool,
}

impl Pipeline {
    /// Build a pool sized `processes * threads_per_process`.
    pub fn new(processes: usize, threads_per_process: usize) -> Self {
        let width = std::cmp::max(1, processes * threads_per_process);
        let pool = ThreadPoolBuilder::new()
            .num_threads(width)
            .build()
            .expect("failed to build worker pool");
        Self { pool }
    }

    /// Pipeline sized with the module defaults.
    pub fn with_defaults() -> Self {
        Self::new(default_processes(), DEFAULT_THREADS_PER_PROCESS)
    }

    /// Run `f` over every item in `items`, preserving input order in the
    /// returned `Vec`. The first error encountered aborts the whole batch;
    /// no partial results are returned.
    pub fn run<T, R, E, F>(&self, items: Vec<T>, f: F) -> Result<Vec<R>, E>
    where
        T: Send,
        R: Send,
        E: Send,
        F: Fn(T) -> Result<R, E> + Sync,
    {
        use rayon::prelude::*;
        self.pool.install(|| {
            items
                .into_par_iter()
                .map(|item| f(item))
                .collect::<Result<Vec<R>, E>>()
        })
    }
}
