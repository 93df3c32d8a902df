use std::sync::Arc;

use derive_new::new;
use relay_core::{
    Broadcaster, ExtrinsicSigner, NonceSource, RelayError, SignRequest, Task, H256,
};
use tracing::{debug, error, info};

use crate::{DispatcherMetrics, RetryPolicy, SenderLease};

/// How a single attempt of a task ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Included in the given block and acknowledged
    Included(H256),
    /// Pushed back to the pending queue
    Requeued,
    /// Dropped for good
    Abandoned,
}

/// Carries one task attempt through nonce resolution, signing and broadcast.
#[derive(Debug, new)]
pub struct RelayWorker {
    nonce_source: Arc<dyn NonceSource>,
    signer: Arc<dyn ExtrinsicSigner>,
    broadcaster: Arc<dyn Broadcaster>,
    retry: RetryPolicy,
    tip: u64,
    metrics: DispatcherMetrics,
}

impl RelayWorker {
    /// Relay `task` with the leased sender. The lease is released on every
    /// path; on failure it is released before the task is requeued so a full
    /// queue cannot hold a sender hostage.
    pub async fn relay(&self, task: Task, lease: SenderLease) -> TaskOutcome {
        let result = self.attempt(&task, lease.sender()).await;
        match result {
            Ok(block) => {
                info!(?task, ?block, "Prices relayed");
                self.metrics.tasks_relayed.inc();
                task.acknowledge().await;
                drop(lease);
                TaskOutcome::Included(block)
            }
            Err(err) => {
                drop(lease);
                match self.retry.retry(task, &err).await {
                    Ok(()) => TaskOutcome::Requeued,
                    Err(RelayError::MaxRetriesReached { .. }) => TaskOutcome::Abandoned,
                    Err(requeue_err) => {
                        error!(error = %requeue_err, "Failed to requeue task, dropping it");
                        TaskOutcome::Abandoned
                    }
                }
            }
        }
    }

    async fn attempt(&self, task: &Task, sender: &str) -> Result<H256, RelayError> {
        let nonce = self.nonce_source.resolve_nonce(sender).await?;
        debug!(nonce, "Resolved nonce");

        let request = SignRequest::new(task.price_data.clone(), sender.to_string(), nonce, self.tip);
        let extrinsic = self.signer.sign(&request).await?;
        debug!(?extrinsic, "Extrinsic signed");

        self.broadcaster.broadcast(&extrinsic).await
    }
}
