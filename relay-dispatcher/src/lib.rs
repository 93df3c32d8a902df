//! Dispatch and broadcast engine of the price relayer.
//!
//! Tasks flow from a bounded queue into workers, one per free sender
//! account. Each worker resolves the sender nonce across all endpoints, asks
//! the signer for an extrinsic, broadcasts it to every endpoint and waits for
//! inclusion. Failed attempts go back to the queue until `max_try` is
//! reached.

#![deny(clippy::unwrap_used, clippy::panic)]

pub use broadcast::BroadcastClient;
pub use dispatcher::*;
pub use metrics::DispatcherMetrics;
pub use nonce::NonceResolver;
pub use retry::RetryPolicy;
pub use sender_pool::{SenderLease, SenderPool};

mod broadcast;
mod dispatcher;
mod metrics;
mod nonce;
mod retry;
mod sender_pool;

#[cfg(test)]
mod test_utils;
