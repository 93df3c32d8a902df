use std::time::Duration;

/// Errors talking to a single node endpoint.
#[derive(Debug, thiserror::Error)]
pub enum ChainCommunicationError {
    /// The connection could not be established or broke mid request
    #[error("Transport error: {0}")]
    Transport(String),
    /// The node answered with a JSON-RPC error object
    #[error("RPC error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code
        code: i64,
        /// Error message reported by the node
        message: String,
    },
    /// No answer within the deadline
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    /// The answer did not have the expected shape
    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
    /// The connection was closed before the answer arrived
    #[error("Connection closed")]
    ConnectionClosed,
}

/// Result of a call to a single endpoint
pub type ChainResult<T> = Result<T, ChainCommunicationError>;

/// Errors of one relay attempt, plus the terminal per-task error.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// No endpoint answered the nonce query
    #[error("Failed to get nonce of {account} from all endpoints (errors: {errors:?})")]
    NoQuorum {
        /// Account whose nonce was requested
        account: String,
        /// One error per endpoint
        errors: Vec<ChainCommunicationError>,
    },
    /// The signing service failed or rejected the request
    #[error("Signer failure: {0}")]
    SignerFailure(String),
    /// Every endpoint refused the submission
    #[error("Can't broadcast extrinsic from all endpoints (errors: {0:?})")]
    BroadcastRejected(Vec<ChainCommunicationError>),
    /// No endpoint reported inclusion within the waiting period
    #[error("The extrinsic has not been included in a block within {0:?}")]
    InclusionTimeout(Duration),
    /// Every status stream ended before an inclusion signal
    #[error("All extrinsic subscriptions closed before inclusion")]
    SubscriptionsClosed,
    /// The task was abandoned after its last allowed attempt
    #[error("Task with request id {request_id} reached max retry: {reason}")]
    MaxRetriesReached {
        /// Oracle request id of the abandoned task
        request_id: u64,
        /// Failure reason of the last attempt
        reason: String,
    },
    /// The pending task queue has no receiver anymore
    #[error("Task queue closed")]
    ChannelClosed,
}

impl RelayError {
    /// Stable label for the `error_type` metric dimension
    pub fn to_metrics_label(&self) -> String {
        match self {
            RelayError::NoQuorum { .. } => "NoQuorum",
            RelayError::SignerFailure(_) => "SignerFailure",
            RelayError::BroadcastRejected(_) => "BroadcastRejected",
            RelayError::InclusionTimeout(_) => "InclusionTimeout",
            RelayError::SubscriptionsClosed => "SubscriptionsClosed",
            RelayError::MaxRetriesReached { .. } => "MaxRetriesReached",
            RelayError::ChannelClosed => "ChannelClosed",
        }
        .to_string()
    }
}
