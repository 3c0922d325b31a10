use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::error::{Result, TopoError};

/// Bounded worker pool sized from `project.cpu_cores`.
///
/// The orchestration layer stays single threaded; it hands batches to the
/// pool through [`WorkerPool::install`] and blocks until they finish.
pub struct WorkerPool {
    pool: ThreadPool,
}

impl WorkerPool {
    /// `workers == 0` uses every available core.
    pub fn new(workers: usize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("topo-worker-{i}"))
            .build()
            .map_err(|e| TopoError::Config(format!("cannot start worker pool: {e}")))?;
        Ok(Self { pool })
    }

    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run `f` inside the pool so its rayon iterators use these workers.
    pub fn install<R, F>(&self, f: F) -> R
    where
        R: Send,
        F: FnOnce() -> R + Send,
    {
        self.pool.install(f)
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool").field("workers", &self.workers()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_shows_worker_count() {
        let pool = WorkerPool::new(2).unwrap();
        assert_eq!(pool.workers(), 2);
        assert_eq!(format!("{pool:?}"), "WorkerPool { workers: 2 }");
        assert_eq!(pool.install(|| rayon::current_num_threads()), 2);
    }
}
