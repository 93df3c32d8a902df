use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use relay_core::{
    ChainEndpoint, ChainResult, ExtrinsicStatus, SignedExtrinsic, StatusUpdate, Subscription,
};
use serde_json::json;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, instrument, warn};

use crate::WsRpcClient;

const NEXT_INDEX_METHOD: &str = "system_accountNextIndex";
const SUBMIT_AND_WATCH_METHOD: &str = "author_submitAndWatchExtrinsic";
const UNWATCH_METHOD: &str = "author_unwatchExtrinsic";

/// A Substrate node reached over WebSocket JSON-RPC.
#[derive(Debug, Clone)]
pub struct SubstrateEndpoint {
    client: Arc<WsRpcClient>,
}

impl SubstrateEndpoint {
    pub fn new(client: WsRpcClient) -> Self {
        Self {
            client: Arc::new(client),
        }
    }

    /// Connect to the node at `url`
    pub async fn connect(url: &str, request_timeout: Duration) -> ChainResult<Self> {
        Ok(Self::new(WsRpcClient::connect(url, request_timeout).await?))
    }
}

/// The node stops reporting after these statuses.
fn ends_stream(status: &ExtrinsicStatus) -> bool {
    matches!(
        status,
        ExtrinsicStatus::Finalized(_)
            | ExtrinsicStatus::FinalityTimeout(_)
            | ExtrinsicStatus::Usurped(_)
            | ExtrinsicStatus::Dropped
            | ExtrinsicStatus::Invalid
    )
}

#[async_trait]
impl ChainEndpoint for SubstrateEndpoint {
    fn url(&self) -> &str {
        self.client.url()
    }

    async fn account_nonce(&self, account: &str) -> ChainResult<u64> {
        self.client.request(NEXT_INDEX_METHOD, json!([account])).await
    }

    #[instrument(skip_all, fields(url = %self.client.url()))]
    async fn submit_and_watch(
        &self,
        extrinsic: &SignedExtrinsic,
        updates: mpsc::Sender<StatusUpdate>,
    ) -> ChainResult<Box<dyn Subscription>> {
        let mut subscription = self
            .client
            .subscribe(SUBMIT_AND_WATCH_METHOD, json!([extrinsic.as_hex()]))
            .await?;
        let url = self.client.url().to_string();
        let forwarder = tokio::spawn(async move {
            while let Some(value) = subscription.notifications.recv().await {
                let status = match serde_json::from_value::<ExtrinsicStatus>(value) {
                    Ok(status) => status,
                    Err(error) => {
                        warn!(url = %url, %error, "Unknown extrinsic status");
                        continue;
                    }
                };
                let last = ends_stream(&status);
                if updates.send(StatusUpdate::new(url.clone(), status)).await.is_err() || last {
                    break;
                }
            }
        });
        Ok(Box::new(SubstrateSubscription {
            client: self.client.clone(),
            id: subscription.id,
            forwarder,
        }))
    }
}

/// Extrinsic watch on one node. Tearing it down stops forwarding and
/// unwatches on the node.
#[derive(Debug)]
pub struct SubstrateSubscription {
    client: Arc<WsRpcClient>,
    id: String,
    forwarder: JoinHandle<()>,
}

#[async_trait]
impl Subscription for SubstrateSubscription {
    async fn unsubscribe(self: Box<Self>) {
        self.forwarder.abort();
        if let Err(error) = self.client.unsubscribe(UNWATCH_METHOD, &self.id).await {
            // the node drops finished watches on its own
            debug!(url = %self.client.url(), id = %self.id, %error, "Failed to unwatch extrinsic");
        }
    }
}
