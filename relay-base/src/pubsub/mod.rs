//! Google Cloud Pub/Sub task source, consumed through a streaming pull.

pub use client::*;
pub use listener::*;

mod client;
mod listener;
