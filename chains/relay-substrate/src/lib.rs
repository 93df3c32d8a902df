//! Substrate node endpoint and remote signer clients for the price relayer.

#![deny(clippy::unwrap_used, clippy::panic)]

pub use endpoint::*;
pub use rpc::*;
pub use signer::*;

mod endpoint;
mod rpc;
mod signer;

#[cfg(test)]
mod test_utils;
