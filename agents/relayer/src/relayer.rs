use std::sync::Arc;

use eyre::{bail, Context, Result};
use futures_util::{
    future::{join_all, try_join_all, BoxFuture},
    FutureExt,
};
use prometheus::Registry;
use relay_base::{MetricsServer, PubSubClient, RelayerSettings, SubscriptionListener};
use relay_core::{ChainEndpoint, ExtrinsicSigner};
use relay_dispatcher::{task_queue, Dispatcher, DispatcherDeps, DispatcherMetrics, TaskSender};
use relay_substrate::{RemoteSigner, SubstrateEndpoint};
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

/// The relayer agent: Pub/Sub listeners feeding one dispatcher
#[derive(Debug)]
pub struct Relayer {
    service_name: String,
    metrics_port: Option<u16>,
    metrics: DispatcherMetrics,
    dispatcher: Dispatcher,
    listeners: Vec<SubscriptionListener<PubSubClient>>,
}

impl Relayer {
    /// Validate the settings and wire every component. Fails when no rpc
    /// endpoint can be reached.
    #[instrument(skip_all, fields(service_name = %settings.service_name))]
    pub async fn from_settings(settings: RelayerSettings) -> Result<Self> {
        settings.validate().wrap_err("Invalid relayer settings")?;

        let endpoints = connect_endpoints(&settings).await?;
        let metrics = DispatcherMetrics::new(Registry::new())?;
        let signer: Arc<dyn ExtrinsicSigner> = Arc::new(
            RemoteSigner::new(settings.signer_url()?, settings.request_timeout)
                .wrap_err("Failed to build signer client")?,
        );

        let dispatcher_settings = settings.dispatcher_settings();
        let deps = DispatcherDeps::from_endpoints(
            &dispatcher_settings,
            endpoints,
            signer,
            settings.senders.clone(),
            metrics.clone(),
        );
        let (pending, receiver) = task_queue(settings.queue_capacity);
        let listeners = build_listeners(&settings, &pending, &metrics).await?;
        let dispatcher = Dispatcher::new(dispatcher_settings, deps, (pending, receiver));

        Ok(Self {
            service_name: settings.service_name,
            metrics_port: settings.metrics_port,
            metrics,
            dispatcher,
            listeners,
        })
    }

    /// Run until one of the components stops
    pub async fn run(self) -> Result<()> {
        let mut tasks = vec![];
        if let Some(port) = self.metrics_port {
            tasks.push(supervise(
                "metrics server",
                MetricsServer::new(port, self.metrics.clone()).run(),
            ));
        }
        for listener in self.listeners {
            tasks.push(supervise("subscription listener", listener.spawn()));
        }
        tasks.push(supervise("dispatcher", self.dispatcher.spawn()));

        info!(service_name = %self.service_name, "Relayer running");
        try_join_all(tasks).await?;
        Ok(())
    }
}

fn supervise<E>(
    name: &'static str,
    handle: JoinHandle<Result<(), E>>,
) -> BoxFuture<'static, Result<()>>
where
    E: Into<eyre::Report> + Send + 'static,
{
    async move {
        handle
            .await
            .wrap_err_with(|| format!("{name} panicked"))?
            .map_err(Into::into)
            .wrap_err_with(|| format!("{name} stopped"))
    }
    .boxed()
}

/// Connect to every configured node. Unreachable nodes are left out.
async fn connect_endpoints(settings: &RelayerSettings) -> Result<Vec<Arc<dyn ChainEndpoint>>> {
    let attempts = settings.rpc_endpoints.iter().map(|url| async move {
        (url, SubstrateEndpoint::connect(url, settings.request_timeout).await)
    });

    let mut endpoints: Vec<Arc<dyn ChainEndpoint>> = vec![];
    for (url, result) in join_all(attempts).await {
        match result {
            Ok(endpoint) => {
                info!(%url, "Connected to rpc endpoint");
                endpoints.push(Arc::new(endpoint));
            }
            Err(error) => warn!(%url, %error, "Failed to connect to rpc endpoint"),
        }
    }
    if endpoints.is_empty() {
        bail!(
            "None of the {} rpc endpoints could be reached",
            settings.rpc_endpoints.len()
        );
    }
    Ok(endpoints)
}

async fn build_listeners(
    settings: &RelayerSettings,
    pending: &TaskSender,
    metrics: &DispatcherMetrics,
) -> Result<Vec<SubscriptionListener<PubSubClient>>> {
    if settings.subs.is_empty() {
        warn!("No subscriptions configured, no task will be received");
        return Ok(vec![]);
    }
    let client = Arc::new(
        PubSubClient::connect(
            settings.project_id.clone(),
            settings.gcp_auth_flow(),
            settings.pubsub_emulator_host.clone(),
        )
        .await?,
    );

    let mut listeners = Vec::with_capacity(settings.subs.len());
    for sub in &settings.subs {
        client
            .ensure_subscription(sub)
            .await
            .wrap_err_with(|| format!("Failed to set up subscription {}", sub.sub_id))?;
        listeners.push(SubscriptionListener::new(
            client.clone(),
            sub.clone(),
            pending.clone(),
            metrics.clone(),
        ));
    }
    Ok(listeners)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn settings(rpc_endpoints: &[&str]) -> RelayerSettings {
        serde_json::from_value(json!({
            "max_try": 3,
            "tx_waiting_period": "30s",
            "nonce_interval": "5s",
            "request_timeout": "2s",
            "rpc_endpoints": rpc_endpoints,
            "senders": ["alice"],
            "signer_url": "http://127.0.0.1:1/substrate/sign",
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_startup_fails_without_reachable_endpoint() {
        let err = Relayer::from_settings(settings(&["ws://127.0.0.1:1", "ws://127.0.0.1:2"]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("None of the 2 rpc endpoints"));
    }

    #[tokio::test]
    async fn test_startup_fails_on_invalid_settings() {
        let err = Relayer::from_settings(settings(&[])).await.unwrap_err();
        assert!(err.to_string().contains("Invalid relayer settings"));
    }
}
