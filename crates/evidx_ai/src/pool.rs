use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use evidx_core::error::{codes, AppError};
use rayon::prelude::*;

/// Bounded worker pool for batch ingestion and multi-modality gathers.
pub struct WorkerPool {
    pool: rayon::ThreadPool,
    workers: usize,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Result<Self, AppError> {
        let workers = workers.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("evidx-worker-{i}"))
            .build()
            .map_err(|e| {
                AppError::new(codes::CONFIG_INVALID, "Failed to create worker pool")
                    .with_details(format!("workers={workers}; err={e}"))
            })?;
        Ok(Self { pool, workers })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Apply `f` to every item on the pool; output order matches input order.
    pub fn map<T, R, F>(&self, items: Vec<T>, f: F) -> Vec<R>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> R + Send + Sync,
    {
        self.pool.install(|| items.into_par_iter().map(f).collect())
    }
}

/// Cooperative cancellation flag shared between a caller and running work.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<(), AppError> {
        if self.is_cancelled() {
            return Err(AppError::new(codes::CANCELLED, "Operation cancelled"));
        }
        Ok(())
    }
}
