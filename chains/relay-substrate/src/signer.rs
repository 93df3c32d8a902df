use std::time::Duration;

use async_trait::async_trait;
use relay_core::{ExtrinsicSigner, RelayError, SignRequest, SignedExtrinsic};
use serde::Deserialize;
use tracing::instrument;
use url::Url;

/// Client of the remote signing service that turns price data into a signed
/// extrinsic.
#[derive(Debug, Clone)]
pub struct RemoteSigner {
    http: reqwest::Client,
    url: Url,
}

#[derive(Debug, Deserialize)]
struct SignResponse {
    tx: String,
}

impl RemoteSigner {
    /// Every call to `url` is bounded by `request_timeout`
    pub fn new(url: Url, request_timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self { http, url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl ExtrinsicSigner for RemoteSigner {
    #[instrument(skip_all, fields(from = %request.from, nonce = request.nonce))]
    async fn sign(&self, request: &SignRequest) -> Result<SignedExtrinsic, RelayError> {
        let res = self
            .http
            .post(self.url.clone())
            .json(request)
            .send()
            .await
            .and_then(|res| res.error_for_status())
            .map_err(|e| RelayError::SignerFailure(e.to_string()))?;
        let SignResponse { tx } = res
            .json()
            .await
            .map_err(|e| RelayError::SignerFailure(e.to_string()))?;
        Ok(SignedExtrinsic::new(tx))
    }
}
