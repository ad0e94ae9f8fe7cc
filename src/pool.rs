//! Bounded worker pool
//!
//! Both fan-out layers (simulation ingestion, configuration sweeps) run on
//! a [`WorkerPool`]. In synchronous mode the same jobs run one after the
//! other on the calling thread, which must produce the same results.

use crate::Result;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

/// Runs independent jobs either on a private rayon pool or inline.
#[derive(Debug)]
pub enum WorkerPool {
    /// Jobs run sequentially on the caller's thread.
    Sync,
    /// Jobs run on a pool with a fixed number of threads.
    Parallel(ThreadPool),
}

impl WorkerPool {
    /// Create a pool.
    ///
    /// `threads == 0` uses the number of available cores.
    ///
    /// # Errors
    ///
    /// Returns error if the thread pool cannot be built.
    pub fn new(sync: bool, threads: usize) -> Result<Self> {
        if sync {
            return Ok(Self::Sync);
        }
        let threads = if threads == 0 {
            std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
        } else {
            threads
        };
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|idx| format!("fairshare-worker-{idx}"))
            .build()?;
        Ok(Self::Parallel(pool))
    }

    /// True if jobs run inline.
    #[must_use]
    pub const fn is_sync(&self) -> bool {
        matches!(self, Self::Sync)
    }

    /// Apply `job` to every item; results keep the input order.
    pub fn map<T, R, F>(&self, items: Vec<T>, job: F) -> Vec<R>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> R + Send + Sync,
    {
        match self {
            Self::Sync => items.into_iter().map(job).collect(),
            Self::Parallel(pool) => pool.install(|| items.into_par_iter().map(job).collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_and_parallel_agree() {
        let items: Vec<u64> = (0..64).collect();
        let sync = WorkerPool::new(true, 3).unwrap();
        let parallel = WorkerPool::new(false, 3).unwrap();
        assert!(sync.is_sync());
        assert!(!parallel.is_sync());

        let a = sync.map(items.clone(), |x| x * x);
        let b = parallel.map(items, |x| x * x);
        assert_eq!(a, b);
    }

    #[test]
    fn test_parallel_pool_is_bounded() {
        let pool = WorkerPool::new(false, 2).unwrap();
        let WorkerPool::Parallel(inner) = &pool else {
            panic!("expected a parallel pool");
        };
        assert_eq!(inner.current_num_threads(), 2);
    }
}
