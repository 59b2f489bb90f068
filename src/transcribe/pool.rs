use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::debug;

use crate::error::{Result, TranscribeError};

/// `max(2, cores - 1)`
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|cores| cores.get())
        .unwrap_or(1)
        .saturating_sub(1)
        .max(2)
}

/// Bounded pool for CPU-bound work (audio decoding, segment decoding).
///
/// Jobs run on tokio's blocking threads; the semaphore caps how many run at
/// once so a burst of requests cannot occupy every blocking thread.
#[derive(Clone)]
pub struct DecodePool {
    permits: Arc<Semaphore>,
    workers: usize,
}

impl DecodePool {
    /// `workers = None` sizes the pool with [`default_worker_count`]
    pub fn new(workers: Option<usize>) -> Self {
        let workers = workers.filter(|&n| n > 0).unwrap_or_else(default_worker_count);
        debug!("Decode pool sized to {} worker(s)", workers);

        Self {
            permits: Arc::new(Semaphore::new(workers)),
            workers,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run `job` off the async scheduler and wait for its result
    pub async fn run<F, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|e| TranscribeError::WorkerPool(e.to_string()))?;

        tokio::task::spawn_blocking(move || {
            // Held until the job returns, even if the caller stops waiting.
            let _permit = permit;
            job()
        })
        .await
        .map_err(|e| TranscribeError::WorkerPool(format!("decode job failed: {}", e)))?
    }
}

impl Default for DecodePool {
    fn default() -> Self {
        Self::new(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn default_size_is_at_least_two() {
        assert!(default_worker_count() >= 2);
        assert_eq!(DecodePool::new(Some(0)).workers(), default_worker_count());
        assert_eq!(DecodePool::new(Some(3)).workers(), 3);
    }

    #[tokio::test]
    async fn jobs_never_exceed_worker_count() -> Result<()> {
        let pool = DecodePool::new(Some(2));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let jobs = (0..8).map(|_| {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            pool.run(move || {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(std::time::Duration::from_millis(10));
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            })
        });

        futures::future::try_join_all(jobs).await?;
        assert!(peak.load(Ordering::SeqCst) <= 2);
        Ok(())
    }

    #[tokio::test]
    async fn job_errors_propagate() {
        let pool = DecodePool::new(Some(2));
        let result: Result<()> = pool
            .run(|| Err(TranscribeError::AudioDecode("bad header".into())))
            .await;

        assert!(matches!(result, Err(TranscribeError::AudioDecode(_))));
    }
}
