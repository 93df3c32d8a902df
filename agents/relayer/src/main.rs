//! The relayer pulls resolved oracle price requests from Pub/Sub, has them
//! signed as extrinsics by a remote signer and broadcasts them to every
//! configured Substrate node until one reports inclusion.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use eyre::Result;
use relay_base::{load_settings, RelayerSettings};
use relayer::Relayer;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    // Logging is not initialised at this point, so, using `println!`
    println!("Relayer starting up...");

    let settings: RelayerSettings = load_settings()?;
    settings.tracing.start_tracing()?;

    let relayer = Relayer::from_settings(settings).await?;
    relayer.run().await
}
