use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use derive_new::new;
use futures_util::future::join_all;
use relay_core::{
    Broadcaster, ChainEndpoint, RelayError, SignedExtrinsic, StatusUpdate, Subscription, H256,
};
use tokio::{sync::mpsc, time::Instant};
use tracing::{debug, info, instrument, warn};

use crate::DispatcherMetrics;

const STATUS_CHANNEL_CAPACITY: usize = 64;

/// Submits an extrinsic to every endpoint and waits for the first inclusion
/// signal reported by any of them.
#[derive(Debug, Clone, new)]
pub struct BroadcastClient {
    endpoints: Vec<Arc<dyn ChainEndpoint>>,
    /// How long to wait for inclusion once at least one endpoint accepted
    waiting_period: Duration,
    metrics: DispatcherMetrics,
}

impl BroadcastClient {
    /// First `(endpoint, block)` inclusion signal, or `None` once every
    /// status stream has ended.
    async fn wait_for_inclusion(
        updates: &mut mpsc::Receiver<StatusUpdate>,
    ) -> Option<(String, H256)> {
        while let Some(update) = updates.recv().await {
            if let Some(block) = update.status.inclusion_block() {
                return Some((update.endpoint, block));
            }
            if update.status.is_terminal_failure() {
                warn!(endpoint = %update.endpoint, status = ?update.status, "Endpoint gave up on extrinsic");
            } else {
                debug!(endpoint = %update.endpoint, status = ?update.status, "Extrinsic status update");
            }
        }
        None
    }

    async fn unsubscribe_all(subscriptions: Vec<Box<dyn Subscription>>) {
        join_all(subscriptions.into_iter().map(|sub| sub.unsubscribe())).await;
    }
}

#[async_trait]
impl Broadcaster for BroadcastClient {
    #[instrument(skip_all, fields(extrinsic = ?extrinsic))]
    async fn broadcast(&self, extrinsic: &SignedExtrinsic) -> Result<H256, RelayError> {
        let (updates_tx, mut updates_rx) = mpsc::channel(STATUS_CHANNEL_CAPACITY);
        let started = Instant::now();
        let submissions = join_all(
            self.endpoints
                .iter()
                .map(|endpoint| endpoint.submit_and_watch(extrinsic, updates_tx.clone())),
        )
        .await;
        // the receiver must observe closure once every stream has ended
        drop(updates_tx);

        let mut subscriptions = Vec::with_capacity(submissions.len());
        let mut errors = vec![];
        for (endpoint, submission) in self.endpoints.iter().zip(submissions) {
            match submission {
                Ok(subscription) => {
                    self.metrics.update_broadcast_metric(endpoint.url(), true);
                    subscriptions.push(subscription);
                }
                Err(error) => {
                    self.metrics.update_broadcast_metric(endpoint.url(), false);
                    warn!(endpoint = endpoint.url(), error = %error, "Endpoint rejected extrinsic");
                    errors.push(error);
                }
            }
        }
        if subscriptions.is_empty() {
            return Err(RelayError::BroadcastRejected(errors));
        }
        debug!(
            accepted = subscriptions.len(),
            rejected = errors.len(),
            "Waiting for extrinsic inclusion"
        );

        let outcome = tokio::time::timeout(
            self.waiting_period,
            Self::wait_for_inclusion(&mut updates_rx),
        )
        .await;
        Self::unsubscribe_all(subscriptions).await;

        match outcome {
            Ok(Some((endpoint, block))) => {
                self.metrics
                    .observe_inclusion_latency(&endpoint, started.elapsed());
                info!(endpoint = %endpoint, ?block, "Extrinsic included in block");
                Ok(block)
            }
            Ok(None) => Err(RelayError::SubscriptionsClosed),
            Err(_) => Err(RelayError::InclusionTimeout(self.waiting_period)),
        }
    }
}
