use std::fmt::Debug;

use async_trait::async_trait;
use auto_impl::auto_impl;
use tokio::sync::mpsc;

use crate::{ChainResult, RelayError, SignRequest, SignedExtrinsic, StatusUpdate, H256};

/// Acknowledgment handle back to the Task Source. Consuming `self` makes a
/// second acknowledgment of the same message impossible.
#[async_trait]
pub trait Acknowledge: Send + Sync + Debug {
    /// Tell the source the message is fully handled
    async fn ack(self: Box<Self>);
}

/// A live extrinsic status subscription on one endpoint.
#[async_trait]
pub trait Subscription: Send + Sync + Debug {
    /// Stop receiving updates and release the node-side resources
    async fn unsubscribe(self: Box<Self>);
}

/// One node endpoint of the target chain.
#[async_trait]
#[auto_impl(&, Box, Arc)]
pub trait ChainEndpoint: Send + Sync + Debug {
    /// Url of the node, used to label logs and metrics
    fn url(&self) -> &str;

    /// Next transaction index of `account` as seen by this node
    async fn account_nonce(&self, account: &str) -> ChainResult<u64>;

    /// Submit `extrinsic` and stream its status updates into `updates` until
    /// the returned subscription is torn down. An `Err` means the node did
    /// not accept the submission.
    async fn submit_and_watch(
        &self,
        extrinsic: &SignedExtrinsic,
        updates: mpsc::Sender<StatusUpdate>,
    ) -> ChainResult<Box<dyn Subscription>>;
}

/// Resolves the nonce to sign the next extrinsic of an account with.
#[async_trait]
#[auto_impl(&, Box, Arc)]
pub trait NonceSource: Send + Sync + Debug {
    /// Authoritative nonce for `account`
    async fn resolve_nonce(&self, account: &str) -> Result<u64, RelayError>;
}

/// Turns a price payload into a signed extrinsic.
#[async_trait]
#[auto_impl(&, Box, Arc)]
pub trait ExtrinsicSigner: Send + Sync + Debug {
    /// Sign `request` and return the network-ready extrinsic
    async fn sign(&self, request: &SignRequest) -> Result<SignedExtrinsic, RelayError>;
}

/// Puts a signed extrinsic on chain.
#[async_trait]
#[auto_impl(&, Box, Arc)]
pub trait Broadcaster: Send + Sync + Debug {
    /// Submit `extrinsic` and wait for inclusion, returning the block hash
    async fn broadcast(&self, extrinsic: &SignedExtrinsic) -> Result<H256, RelayError>;
}
