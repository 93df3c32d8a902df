use std::fmt::{Debug, Display, Formatter};

use derive_new::new;
pub use primitive_types::H256;
use serde::{Deserialize, Serialize};

use crate::Acknowledge;

/// A single symbol rate produced by the oracle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, new)]
pub struct Price {
    /// Ticker symbol, e.g. `BTC`
    pub symbol: String,
    /// Rate multiplied by the oracle script multiplier. Serialized as a
    /// decimal string since JSON consumers cannot hold a full `u64`.
    #[serde(with = "u64_str")]
    pub rate: u64,
}

/// The price payload of one oracle request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, new)]
#[serde(rename_all = "camelCase")]
pub struct PriceData {
    /// Ordered symbol rates, never empty once a `Task` has been built
    pub prices: Vec<Price>,
    /// Time at which the oracle request was resolved
    pub resolve_time: u64,
    /// Oracle request id
    pub request_id: u64,
}

/// A unit of relaying work.
///
/// Only `retry_counter` changes over the lifetime of a task. The ack handle
/// travels with the task through requeues and is consumed by
/// [`Task::acknowledge`].
pub struct Task {
    /// Prices and provenance to relay
    pub price_data: PriceData,
    /// Number of failed attempts so far
    pub retry_counter: u32,
    ack_handle: Option<Box<dyn Acknowledge>>,
}

impl Task {
    /// Create a task without an ack handle
    pub fn new(price_data: PriceData) -> Self {
        Self {
            price_data,
            retry_counter: 0,
            ack_handle: None,
        }
    }

    /// Attach the Task Source acknowledgment handle
    pub fn with_ack_handle(mut self, ack_handle: Box<dyn Acknowledge>) -> Self {
        self.ack_handle = Some(ack_handle);
        self
    }

    /// Oracle request id, used for correlation in logs
    pub fn request_id(&self) -> u64 {
        self.price_data.request_id
    }

    /// Whether the task still carries an ack handle
    pub fn has_ack_handle(&self) -> bool {
        self.ack_handle.is_some()
    }

    /// Acknowledge the task to its source and drop it.
    /// Returns whether a handle was present.
    pub async fn acknowledge(mut self) -> bool {
        match self.ack_handle.take() {
            Some(handle) => {
                handle.ack().await;
                true
            }
            None => false,
        }
    }
}

impl Debug for Task {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("request_id", &self.price_data.request_id)
            .field("resolve_time", &self.price_data.resolve_time)
            .field("prices", &self.price_data.prices)
            .field("retry_counter", &self.retry_counter)
            .field("has_ack_handle", &self.has_ack_handle())
            .finish()
    }
}

/// A signed, network-ready extrinsic encoded as `0x`-prefixed hex.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, new)]
#[serde(transparent)]
pub struct SignedExtrinsic(String);

impl SignedExtrinsic {
    /// The hex encoding as handed to the node
    pub fn as_hex(&self) -> &str {
        &self.0
    }
}

impl Debug for SignedExtrinsic {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // extrinsics are long, the prefix is enough to correlate logs
        const PREFIX_LEN: usize = 18;
        match self.0.get(..PREFIX_LEN) {
            Some(prefix) if self.0.len() > PREFIX_LEN => {
                write!(f, "SignedExtrinsic({prefix}.., len={})", self.0.len())
            }
            _ => write!(f, "SignedExtrinsic({})", self.0),
        }
    }
}

impl Display for SignedExtrinsic {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Request body understood by the remote signing service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, new)]
#[serde(rename_all = "camelCase")]
pub struct SignRequest {
    /// Prices to put on chain
    pub price_data: PriceData,
    /// Sender account the extrinsic is signed for
    pub from: String,
    /// Account nonce to sign with
    pub nonce: u64,
    /// Tip added to the extrinsic
    pub tip: u64,
}

/// Lifecycle status of a submitted extrinsic, as streamed by a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExtrinsicStatus {
    /// Waiting for a nonce gap to be filled
    Future,
    /// Ready to be included
    Ready,
    /// Gossiped to the listed peers
    Broadcast(Vec<String>),
    /// Included in the given block
    InBlock(H256),
    /// The including block was retracted
    Retracted(H256),
    /// Finality was not reached in time
    FinalityTimeout(H256),
    /// Included in the given finalized block
    Finalized(H256),
    /// Replaced by another extrinsic with the same nonce
    Usurped(H256),
    /// Dropped from the pool
    Dropped,
    /// Rejected as invalid
    Invalid,
}

impl ExtrinsicStatus {
    /// Hash of the block the extrinsic was included in, if this status
    /// proves inclusion.
    pub fn inclusion_block(&self) -> Option<H256> {
        match self {
            ExtrinsicStatus::InBlock(hash) | ExtrinsicStatus::Finalized(hash) => Some(*hash),
            _ => None,
        }
    }

    /// Whether the node gave up on the extrinsic
    pub fn is_terminal_failure(&self) -> bool {
        matches!(
            self,
            ExtrinsicStatus::Usurped(_) | ExtrinsicStatus::Dropped | ExtrinsicStatus::Invalid
        )
    }
}

/// A status update tagged with the endpoint that reported it.
#[derive(Debug, Clone, PartialEq, Eq, new)]
pub struct StatusUpdate {
    /// Url of the reporting endpoint
    pub endpoint: String,
    /// Reported status
    pub status: ExtrinsicStatus,
}

/// Serialize a `u64` as a decimal string; accept both strings and numbers.
pub mod u64_str {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StrOrNum {
        Str(String),
        Num(u64),
    }

    /// Serialize as a decimal string
    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    /// Deserialize from a decimal string or a JSON number
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        match StrOrNum::deserialize(deserializer)? {
            StrOrNum::Str(s) => s.parse().map_err(D::Error::custom),
            StrOrNum::Num(n) => Ok(n),
        }
    }
}
