//! Relayer settings.
//!
//! Settings are read from a JSON file (`$CONFIG_PATH`, `./config/relayer.json`
//! by default) and can be overridden with `RELAYER__`-prefixed environment
//! variables, e.g. `RELAYER__MAX_TRY=5` or
//! `RELAYER__RPC_ENDPOINTS=wss://a,wss://b`. Durations are human readable
//! strings such as `"30s"` or `"2m"`.

use std::{collections::HashSet, ops::RangeInclusive, time::Duration};

use eyre::{bail, Context, Result};
use relay_dispatcher::{DispatcherSettings, DEFAULT_QUEUE_CAPACITY};
use serde::Deserialize;
use url::Url;
use ya_gcp::{AuthFlow, ServiceAccountAuth};

pub use loader::*;
pub use trace::*;

mod loader;
mod trace;

/// Ack deadlines Pub/Sub accepts
pub const ACK_DEADLINE_RANGE: RangeInclusive<Duration> =
    Duration::from_secs(10)..=Duration::from_secs(600);

/// A Pub/Sub subscription feeding oracle results
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PubSubConfig {
    /// Subscription id, created on startup when missing
    pub sub_id: String,
    /// Topic the subscription is attached to
    pub topic_id: String,
    /// Only messages whose `ClientID` attribute starts with this are delivered
    #[serde(default)]
    pub pubsub_client_id_filter: String,
    /// Ack deadline of a newly created subscription
    #[serde(default = "default_ack_deadline", with = "duration_str")]
    pub pubsub_ack_deadline_time: Duration,
    /// Message retention of a newly created subscription
    #[serde(default = "default_retention", with = "duration_str")]
    pub pubsub_retention_duration: Duration,
}

/// Top level settings of the relayer agent
#[derive(Debug, Clone, Deserialize)]
pub struct RelayerSettings {
    /// Name used in logs
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// Attempts per task before it is abandoned
    pub max_try: u32,
    /// How long to wait for inclusion after a successful submission
    #[serde(with = "duration_str")]
    pub tx_waiting_period: Duration,
    /// Deadline of one nonce query round across all endpoints
    #[serde(with = "duration_str")]
    pub nonce_interval: Duration,
    /// Deadline of a single request to a node or to the signer
    #[serde(default = "default_request_timeout", with = "duration_str")]
    pub request_timeout: Duration,
    /// WebSocket urls of the chain nodes
    pub rpc_endpoints: Vec<String>,
    /// Sender accounts, one in-flight extrinsic each
    pub senders: Vec<String>,
    /// Url of the remote signing service
    pub signer_url: String,
    /// Tip added to every extrinsic
    #[serde(default)]
    pub tip: u64,
    /// Capacity of the pending task queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Google Cloud project hosting the subscriptions
    #[serde(default)]
    pub project_id: String,
    /// Subscriptions to relay from
    #[serde(default)]
    pub subs: Vec<PubSubConfig>,
    /// `host:port` of a Pub/Sub emulator to use instead of Google Cloud
    #[serde(default)]
    pub pubsub_emulator_host: Option<String>,
    /// Path to a Google Cloud service account key
    #[serde(default)]
    pub gcp_service_account_key: Option<String>,
    /// Path to a Google Cloud user secret, used when no service account key
    /// is set
    #[serde(default)]
    pub gcp_user_secret: Option<String>,
    /// Port of the `/metrics` server. No server is started when unset.
    #[serde(default)]
    pub metrics_port: Option<u16>,
    /// Logging setup
    #[serde(default)]
    pub tracing: TracingConfig,
}

fn default_service_name() -> String {
    "price-relayer".into()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_ack_deadline() -> Duration {
    Duration::from_secs(60)
}

fn default_retention() -> Duration {
    Duration::from_secs(7 * 24 * 60 * 60)
}

impl RelayerSettings {
    /// Reject settings the relayer cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.rpc_endpoints.is_empty() {
            bail!("At least one rpc endpoint is required");
        }
        if self.senders.is_empty() {
            bail!("At least one sender is required");
        }
        let mut seen = HashSet::new();
        if let Some(duplicate) = self.senders.iter().find(|s| !seen.insert(s.as_str())) {
            bail!("Sender {duplicate} is configured more than once");
        }
        if self.max_try == 0 {
            bail!("max_try must be at least 1");
        }
        if self.queue_capacity == 0 {
            bail!("queue_capacity must be at least 1");
        }
        if self.tx_waiting_period.is_zero() || self.nonce_interval.is_zero() {
            bail!("tx_waiting_period and nonce_interval must be positive");
        }
        if !self.subs.is_empty() {
            self.validate_pubsub()?;
        }
        self.signer_url()?;
        Ok(())
    }

    fn validate_pubsub(&self) -> Result<()> {
        if self.project_id.is_empty() {
            bail!("project_id is required when subscriptions are configured");
        }
        if self.pubsub_emulator_host.is_none()
            && self.gcp_service_account_key.is_none()
            && self.gcp_user_secret.is_none()
        {
            bail!("Google Cloud credentials are required unless a pubsub emulator is used");
        }
        for sub in &self.subs {
            if !ACK_DEADLINE_RANGE.contains(&sub.pubsub_ack_deadline_time) {
                bail!(
                    "pubsub_ack_deadline_time of {} must be between 10s and 600s, got {}",
                    sub.sub_id,
                    humantime::format_duration(sub.pubsub_ack_deadline_time)
                );
            }
        }
        Ok(())
    }

    /// Parsed signer url
    pub fn signer_url(&self) -> Result<Url> {
        Url::parse(&self.signer_url)
            .with_context(|| format!("Invalid signer url {:?}", self.signer_url))
    }

    /// How to authenticate against Google Cloud
    pub fn gcp_auth_flow(&self) -> AuthFlow {
        if let Some(path) = &self.gcp_service_account_key {
            AuthFlow::ServiceAccount(ServiceAccountAuth::Path(path.into()))
        } else if let Some(path) = &self.gcp_user_secret {
            AuthFlow::UserAccount(path.into())
        } else {
            // emulator only
            AuthFlow::NoAuth
        }
    }

    pub fn dispatcher_settings(&self) -> DispatcherSettings {
        DispatcherSettings::new(
            self.max_try,
            self.tip,
            self.tx_waiting_period,
            self.nonce_interval,
        )
    }
}

/// (De)serialize a `Duration` as a humantime string
pub mod duration_str {
    use std::time::Duration;

    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn settings(overrides: serde_json::Value) -> RelayerSettings {
        let mut base = json!({
            "max_try": 3,
            "tx_waiting_period": "30s",
            "nonce_interval": "5s",
            "rpc_endpoints": ["wss://node-1", "wss://node-2"],
            "senders": ["alice", "bob"],
            "signer_url": "http://localhost:3000/substrate/sign",
        });
        if let (Some(base), Some(overrides)) = (base.as_object_mut(), overrides.as_object()) {
            base.extend(overrides.clone());
        }
        serde_json::from_value(base).unwrap()
    }

    #[test]
    fn test_defaults_and_durations() {
        let settings = settings(json!({}));
        assert_eq!(settings.tx_waiting_period, Duration::from_secs(30));
        assert_eq!(settings.queue_capacity, 100);
        assert_eq!(settings.request_timeout, Duration::from_secs(30));
        assert_eq!(settings.tip, 0);
        assert!(settings.metrics_port.is_none());
        settings.validate().unwrap();

        let dispatcher = settings.dispatcher_settings();
        assert_eq!(dispatcher.max_try, 3);
        assert_eq!(dispatcher.nonce_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_pubsub_config_durations() {
        let config: PubSubConfig = serde_json::from_value(json!({
            "sub_id": "relayer-sub",
            "topic_id": "oracle-results",
            "pubsub_client_id_filter": "substrate",
            "pubsub_ack_deadline_time": "2m",
        }))
        .unwrap();
        assert_eq!(config.pubsub_ack_deadline_time, Duration::from_secs(120));
        assert_eq!(config.pubsub_retention_duration, default_retention());
    }

    #[test]
    fn test_invalid_settings_are_rejected() {
        assert!(settings(json!({"rpc_endpoints": []})).validate().is_err());
        assert!(settings(json!({"senders": []})).validate().is_err());
        assert!(settings(json!({"senders": ["alice", "alice"]})).validate().is_err());
        assert!(settings(json!({"max_try": 0})).validate().is_err());
        assert!(settings(json!({"queue_capacity": 0})).validate().is_err());
        assert!(settings(json!({"signer_url": "not a url"})).validate().is_err());
        assert!(settings(json!({"subs": [{"sub_id": "s", "topic_id": "t"}]}))
            .validate()
            .is_err());
    }

    #[test]
    fn test_pubsub_settings_validation() {
        let sub = |deadline: &str| {
            json!([{"sub_id": "s", "topic_id": "t", "pubsub_ack_deadline_time": deadline}])
        };
        let with_key = |subs| {
            settings(json!({
                "project_id": "band-project",
                "gcp_service_account_key": "/secrets/sa.json",
                "subs": subs,
            }))
        };

        with_key(sub("60s")).validate().unwrap();
        with_key(sub("10s")).validate().unwrap();
        with_key(sub("10m")).validate().unwrap();
        assert!(with_key(sub("5s")).validate().is_err());
        let err = with_key(sub("11m")).validate().unwrap_err();
        assert!(err.to_string().contains("between 10s and 600s"));

        // no credentials
        let bare = settings(json!({"project_id": "band-project", "subs": sub("60s")}));
        assert!(bare.validate().is_err());
        let emulated = settings(json!({
            "project_id": "band-project",
            "pubsub_emulator_host": "localhost:8085",
            "subs": sub("60s"),
        }));
        emulated.validate().unwrap();
        assert!(matches!(emulated.gcp_auth_flow(), AuthFlow::NoAuth));
    }

    #[test]
    fn test_gcp_auth_flow_prefers_service_account() {
        let both = settings(json!({
            "gcp_service_account_key": "/secrets/sa.json",
            "gcp_user_secret": "/secrets/user.json",
        }));
        assert!(matches!(
            both.gcp_auth_flow(),
            AuthFlow::ServiceAccount(ServiceAccountAuth::Path(_))
        ));
        let user = settings(json!({"gcp_user_secret": "/secrets/user.json"}));
        assert!(matches!(user.gcp_auth_flow(), AuthFlow::UserAccount(_)));
    }

    #[test]
    fn test_malformed_duration_fails_to_parse() {
        let result = serde_json::from_value::<RelayerSettings>(json!({
            "max_try": 3,
            "tx_waiting_period": "thirty seconds",
            "nonce_interval": "5s",
            "rpc_endpoints": ["wss://node-1"],
            "senders": ["alice"],
            "signer_url": "http://localhost:3000",
        }));
        assert!(result.is_err());
    }
}
