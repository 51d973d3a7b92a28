use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};

/// Caps concurrent extraction requests. Extraction is memory-heavy
/// (whole uploads plus page rasters), so excess requests are rejected
/// rather than queued.
pub struct RequestLimiter {
    permits: Arc<Semaphore>,
    total: AtomicU64,
    rejected: AtomicU64,
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct LimiterMetrics {
    pub total_requests: u64,
    pub rejected_requests: u64,
    pub available_permits: usize,
}

impl RequestLimiter {
    pub fn new(max_concurrent: usize) -> Self {
        info!(max_concurrent_requests = max_concurrent, "Initializing request limiter");
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent)),
            total: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// Takes a permit for the life of the returned guard.
    pub fn try_acquire(&self, request_id: &str) -> AppResult<OwnedSemaphorePermit> {
        let total = self.total.fetch_add(1, Ordering::Relaxed) + 1;
        match Arc::clone(&self.permits).try_acquire_owned() {
            Ok(permit) => {
                debug!(
                    request_id,
                    available_permits = self.permits.available_permits(),
                    "Request permit acquired"
                );
                Ok(permit)
            }
            Err(_) => {
                let rejected = self.rejected.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    request_id,
                    total_requests = total,
                    rejected_requests = rejected,
                    "Rate limit exceeded - too many concurrent extractions"
                );
                Err(AppError::RateLimitExceeded)
            }
        }
    }

    pub fn metrics(&self) -> LimiterMetrics {
        LimiterMetrics {
            total_requests: self.total.load(Ordering::Relaxed),
            rejected_requests: self.rejected.load(Ordering::Relaxed),
            available_permits: self.permits.available_permits(),
        }
    }
}
