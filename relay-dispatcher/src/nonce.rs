use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use derive_new::new;
use futures_util::future::join_all;
use relay_core::{ChainCommunicationError, ChainEndpoint, NonceSource, RelayError};
use tracing::{debug, instrument, warn};

use crate::DispatcherMetrics;

/// Resolves an account nonce as the highest value reported by any endpoint.
/// Endpoints that fail or miss the query deadline are skipped.
#[derive(Debug, Clone, new)]
pub struct NonceResolver {
    endpoints: Vec<Arc<dyn ChainEndpoint>>,
    /// Deadline of a single endpoint query
    query_timeout: Duration,
    metrics: DispatcherMetrics,
}

impl NonceResolver {
    async fn query(
        endpoint: &dyn ChainEndpoint,
        account: &str,
        query_timeout: Duration,
    ) -> Result<u64, ChainCommunicationError> {
        tokio::time::timeout(query_timeout, endpoint.account_nonce(account))
            .await
            .map_err(|_| ChainCommunicationError::Timeout(query_timeout))?
    }
}

#[async_trait]
impl NonceSource for NonceResolver {
    #[instrument(skip(self), fields(endpoints = self.endpoints.len()))]
    async fn resolve_nonce(&self, account: &str) -> Result<u64, RelayError> {
        let results = join_all(
            self.endpoints
                .iter()
                .map(|endpoint| Self::query(endpoint.as_ref(), account, self.query_timeout)),
        )
        .await;

        let mut nonce: Option<u64> = None;
        let mut errors = vec![];
        for (endpoint, result) in self.endpoints.iter().zip(results) {
            match result {
                Ok(value) => {
                    debug!(endpoint = endpoint.url(), value, "Got account nonce");
                    nonce = Some(nonce.map_or(value, |current| current.max(value)));
                }
                Err(error) => {
                    warn!(endpoint = endpoint.url(), error = %error, "Failed to get account nonce");
                    errors.push(error);
                }
            }
        }

        match nonce {
            Some(nonce) => {
                self.metrics.update_resolved_nonce_metric(account, nonce);
                Ok(nonce)
            }
            None => Err(RelayError::NoQuorum {
                account: account.to_string(),
                errors,
            }),
        }
    }
}
