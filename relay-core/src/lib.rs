//! Core types and traits shared by the price relayer crates.
//!
//! This crate holds the task model, the capability interfaces the dispatcher
//! is written against, and the error taxonomy. It knows nothing about a
//! particular chain family or transport.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::unwrap_used, clippy::panic)]

pub use error::*;
pub use traits::*;
pub use types::*;

mod error;
mod traits;
mod types;
