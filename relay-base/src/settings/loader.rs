use std::{env, fmt::Debug, path::Path};

use config::{Config, Environment, File, FileFormat};
use eyre::{Context, Result};
use serde::de::DeserializeOwned;

/// Settings file used when `CONFIG_PATH` is not set
pub const DEFAULT_CONFIG_PATH: &str = "./config/relayer.json";
/// Prefix of environment overrides
pub const ENV_PREFIX: &str = "RELAYER";

/// Load settings from `$CONFIG_PATH` and `RELAYER__*` environment variables.
pub fn load_settings<T: DeserializeOwned + Debug>() -> Result<T> {
    let path = env::var("CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_owned());
    load_settings_from(Path::new(&path), ENV_PREFIX)
}

/// Load settings from a JSON file, then apply overrides from environment
/// variables named `{env_prefix}__{KEY}`. List values are comma separated.
pub fn load_settings_from<T: DeserializeOwned + Debug>(path: &Path, env_prefix: &str) -> Result<T> {
    let config = Config::builder()
        .add_source(File::from(path).format(FileFormat::Json))
        .add_source(
            Environment::with_prefix(env_prefix)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("rpc_endpoints")
                .with_list_parse_key("senders"),
        )
        .build()
        .with_context(|| format!("Failed to load config sources from {path:?}"))?;

    let settings = config
        .try_deserialize::<T>()
        .context("Config did not conform to the expected schema")?;
    tracing::debug!(?settings, "Loaded settings");
    Ok(settings)
}
