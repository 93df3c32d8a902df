use std::{fmt, time::Duration};

use async_trait::async_trait;
use eyre::{Context, Result};
use futures_util::StreamExt;
use tonic::Code;
use tracing::{info, instrument};
use ya_gcp::{
    pubsub::{
        self, api, AcknowledgeToken, ProjectSubscriptionName, ProjectTopicName,
        StreamSubscriptionConfig, SubscriberClient,
    },
    AuthFlow, ClientBuilder, ClientBuilderConfig,
};

use crate::{
    pubsub::{Delivery, DeliveryStream, MessageSource},
    settings::PubSubConfig,
};

/// Idle subscriptions are deleted after this long
const SUBSCRIPTION_EXPIRATION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Pub/Sub subscriber of one Google Cloud project.
///
/// Credentials come from the `AuthFlow` and access tokens are refreshed by
/// the underlying client.
#[derive(Clone)]
pub struct PubSubClient {
    subscriber: SubscriberClient,
    project_id: String,
    emulator_host: Option<String>,
}

impl PubSubClient {
    /// Connect to Pub/Sub, or to the emulator at `emulator_host` (`host:port`)
    #[instrument(skip(auth))]
    pub async fn connect(
        project_id: String,
        auth: AuthFlow,
        emulator_host: Option<String>,
    ) -> Result<Self> {
        let mut config = pubsub::PubSubConfig::default();
        if let Some(host) = &emulator_host {
            config.endpoint = format!("http://{host}");
        }
        let subscriber = ClientBuilder::new(ClientBuilderConfig::new().auth_flow(auth))
            .await
            .wrap_err("Failed to build Google Cloud client")?
            .build_pubsub_subscriber(config)
            .await
            .wrap_err("Failed to build Pub/Sub subscriber")?;
        Ok(Self {
            subscriber,
            project_id,
            emulator_host,
        })
    }

    fn subscription_name(&self, sub_id: &str) -> ProjectSubscriptionName {
        ProjectSubscriptionName::new(self.project_id.as_str(), sub_id)
    }

    /// Create the subscription described by `config` unless it already exists
    #[instrument(skip_all, fields(sub_id = %config.sub_id))]
    pub async fn ensure_subscription(&self, config: &PubSubConfig) -> Result<()> {
        let mut subscriber = self.subscriber.clone();
        match subscriber
            .raw_api_mut()
            .create_subscription(subscription_resource(&self.project_id, config))
            .await
        {
            Ok(_) => {
                info!(topic_id = %config.topic_id, "Created subscription");
                Ok(())
            }
            Err(status) if status.code() == Code::AlreadyExists => Ok(()),
            Err(status) => Err(status).wrap_err("Failed to create subscription"),
        }
    }
}

impl fmt::Debug for PubSubClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PubSubClient")
            .field("project_id", &self.project_id)
            .field("emulator_host", &self.emulator_host)
            .finish()
    }
}

impl MessageSource for PubSubClient {
    type Delivery = AcknowledgeToken;

    fn subscribe(&self, sub_id: &str) -> DeliveryStream<AcknowledgeToken> {
        let mut subscriber = self.subscriber.clone();
        subscriber
            .stream_subscription(
                self.subscription_name(sub_id),
                StreamSubscriptionConfig::default(),
            )
            .map(|item| {
                item.map(|(token, message)| (token, message.data.to_vec()))
                    .wrap_err("Subscription stream failed")
            })
            .boxed()
    }
}

#[async_trait]
impl Delivery for AcknowledgeToken {
    async fn extend(&mut self, deadline: Duration) -> Result<()> {
        let seconds = u32::try_from(deadline.as_secs()).unwrap_or(u32::MAX);
        self.modify_deadline(seconds).await?;
        Ok(())
    }

    async fn ack(self) -> Result<()> {
        AcknowledgeToken::ack(self).await?;
        Ok(())
    }

    async fn nack(self) -> Result<()> {
        AcknowledgeToken::nack(self).await?;
        Ok(())
    }
}

/// The subscription to create for `config`: only messages whose `ClientID`
/// attribute starts with the configured filter are delivered.
fn subscription_resource(project_id: &str, config: &PubSubConfig) -> api::Subscription {
    let mut expiration_policy = api::ExpirationPolicy::default();
    expiration_policy.ttl = SUBSCRIPTION_EXPIRATION.try_into().ok();

    let mut subscription = api::Subscription::default();
    subscription.name = ProjectSubscriptionName::new(project_id, config.sub_id.as_str()).into();
    subscription.topic = ProjectTopicName::new(project_id, config.topic_id.as_str()).into();
    subscription.filter = format!(
        "hasPrefix(attributes.ClientID, \"{}\")",
        config.pubsub_client_id_filter
    );
    subscription.ack_deadline_seconds =
        i32::try_from(config.pubsub_ack_deadline_time.as_secs()).unwrap_or(i32::MAX);
    subscription.message_retention_duration = config.pubsub_retention_duration.try_into().ok();
    subscription.expiration_policy = Some(expiration_policy);
    subscription
}
