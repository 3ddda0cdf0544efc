//! Bounded-concurrency bulkhead (spec §4.F "bounded concurrency with
//! queue limit; on overflow -> Overloaded"), grounded on
//! `fc-router::pool::ProcessPool`'s `Semaphore`-bounded worker pool.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use catga_core::ErrorCode;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Clone, Copy)]
pub struct BulkheadConfig {
    pub max_concurrency: usize,
    pub queue_limit: usize,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self { max_concurrency: 32, queue_limit: 64 }
    }
}

/// `available_permits() == 0` means the caller would have to wait;
/// `queued` tracks how many are already waiting so a request arriving
/// once `queued == queue_limit` is rejected outright rather than
/// queued indefinitely (spec §8 boundary: "at concurrency == limit +
/// queueLimit, the next request returns Overloaded").
pub struct Bulkhead {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    queue_limit: usize,
    queued: AtomicUsize,
}

impl Bulkhead {
    pub fn new(config: BulkheadConfig) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(config.max_concurrency)),
            capacity: config.max_concurrency,
            queue_limit: config.queue_limit,
            queued: AtomicUsize::new(0),
        }
    }

    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, ErrorCode> {
        if self.semaphore.available_permits() == 0 {
            let prior = self.queued.fetch_add(1, Ordering::AcqRel);
            if prior >= self.queue_limit {
                self.queued.fetch_sub(1, Ordering::AcqRel);
                metrics::counter!("catga_bulkhead_overloaded_total").increment(1);
                return Err(ErrorCode::Overloaded);
            }
            let permit = self
                .semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("bulkhead semaphore is never closed");
            self.queued.fetch_sub(1, Ordering::AcqRel);
            metrics::gauge!("catga_bulkhead_in_flight").set(self.in_flight() as f64);
            Ok(permit)
        } else {
            let permit = self.semaphore.clone().acquire_owned().await.expect("bulkhead semaphore is never closed");
            metrics::gauge!("catga_bulkhead_in_flight").set(self.in_flight() as f64);
            Ok(permit)
        }
    }

    /// Permits currently checked out of the configured `max_concurrency`.
    pub fn in_flight(&self) -> usize {
        self.capacity.saturating_sub(self.semaphore.available_permits())
    }
}
