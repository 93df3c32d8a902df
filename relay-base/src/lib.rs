//! Settings, task intake and process plumbing shared by the relayer agent.

#![deny(clippy::unwrap_used, clippy::panic)]

pub use intake::*;
pub use obi::{
    decode_prices, task_from_message, Calldata, DecodeError, OracleResponse, OracleResult,
};
pub use pubsub::*;
pub use server::*;
pub use settings::*;

mod intake;
mod obi;
mod pubsub;
mod server;

pub mod settings;
