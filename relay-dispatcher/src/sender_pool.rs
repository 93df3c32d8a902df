use std::{collections::VecDeque, fmt::Debug, sync::Arc};

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::DispatcherMetrics;

/// Fixed set of sender accounts, each held by at most one worker at a time.
///
/// The semaphore counts free senders and the queue holds them. A permit is
/// only handed out together with a sender, so the queue is never empty while
/// a permit is outstanding.
#[derive(Debug, Clone)]
pub struct SenderPool {
    inner: Arc<PoolInner>,
}

#[derive(Debug)]
struct PoolInner {
    semaphore: Arc<Semaphore>,
    free: Mutex<VecDeque<String>>,
    capacity: usize,
    metrics: Option<DispatcherMetrics>,
}

impl SenderPool {
    pub fn new(senders: Vec<String>) -> Self {
        Self::build(senders, None)
    }

    pub fn with_metrics(senders: Vec<String>, metrics: DispatcherMetrics) -> Self {
        Self::build(senders, Some(metrics))
    }

    fn build(senders: Vec<String>, metrics: Option<DispatcherMetrics>) -> Self {
        let capacity = senders.len();
        if let Some(metrics) = &metrics {
            metrics.update_free_senders_metric(capacity);
        }
        Self {
            inner: Arc::new(PoolInner {
                semaphore: Arc::new(Semaphore::new(capacity)),
                free: Mutex::new(senders.into()),
                capacity,
                metrics,
            }),
        }
    }

    /// Wait until a sender is free and check it out.
    pub async fn acquire(&self) -> SenderLease {
        let permit = match self.inner.semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            // the semaphore is owned by the pool and never closed
            Err(_) => unreachable!("sender pool semaphore closed"),
        };
        let sender = self.inner.free.lock().pop_front();
        let Some(sender) = sender else {
            unreachable!("sender pool permit granted without a free sender")
        };
        self.inner.report_free();
        debug!(%sender, "Checked out sender");
        SenderLease {
            sender,
            pool: self.inner.clone(),
            _permit: permit,
        }
    }

    /// Number of senders not currently leased
    pub fn available(&self) -> usize {
        self.inner.free.lock().len()
    }

    /// Number of senders the pool was created with
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }
}

impl PoolInner {
    fn report_free(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.update_free_senders_metric(self.free.lock().len());
        }
    }
}

/// Exclusive use of one sender. Dropping the lease returns the sender.
pub struct SenderLease {
    sender: String,
    pool: Arc<PoolInner>,
    // released after the sender is back in the queue
    _permit: OwnedSemaphorePermit,
}

impl SenderLease {
    pub fn sender(&self) -> &str {
        &self.sender
    }
}

impl Debug for SenderLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SenderLease").field(&self.sender).finish()
    }
}

impl Drop for SenderLease {
    fn drop(&mut self) {
        self.pool
            .free
            .lock()
            .push_back(std::mem::take(&mut self.sender));
        self.pool.report_free();
    }
}
