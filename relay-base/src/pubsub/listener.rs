use std::{
    fmt::Debug,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use futures_util::{stream::BoxStream, StreamExt};
use relay_core::{Acknowledge, RelayError};
use relay_dispatcher::{DispatcherMetrics, TaskSender};
use tokio::{
    sync::oneshot,
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tracing::{debug, error, info_span, instrument, warn, Instrument};

use crate::{intake::enqueue_message, settings::PubSubConfig};

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// A delivered message whose ack deadline is managed by the listener
#[async_trait]
pub trait Delivery: Send + 'static {
    /// Push the redelivery deadline `deadline` into the future
    async fn extend(&mut self, deadline: Duration) -> eyre::Result<()>;
    /// The message is handled for good
    async fn ack(self) -> eyre::Result<()>;
    /// Ask for the message to be redelivered right away
    async fn nack(self) -> eyre::Result<()>;
}

/// Deliveries of a subscription with their message bodies
pub type DeliveryStream<D> = BoxStream<'static, eyre::Result<(D, Vec<u8>)>>;

/// Where subscriptions are streamed from
pub trait MessageSource: Send + Sync + Debug + 'static {
    type Delivery: Delivery;

    /// Open a stream over the subscription. The stream ends or yields an
    /// error when the connection is lost.
    fn subscribe(&self, sub_id: &str) -> DeliveryStream<Self::Delivery>;
}

/// Acknowledges one delivery. Dropping it without acking nacks the delivery.
#[derive(Debug)]
pub struct PubSubAck {
    release: oneshot::Sender<()>,
    lease: JoinHandle<()>,
}

#[async_trait]
impl Acknowledge for PubSubAck {
    async fn ack(self: Box<Self>) {
        let Self { release, lease } = *self;
        // a failed send means the lease already ended
        let _ = release.send(());
        if let Err(error) = lease.await {
            warn!(%error, "Message lease ended abnormally");
        }
    }
}

/// Hold `delivery` until its task settles, extending its ack deadline
/// meanwhile.
async fn hold<D: Delivery>(
    mut delivery: D,
    mut released: oneshot::Receiver<()>,
    deadline: Duration,
    outstanding: Arc<AtomicUsize>,
) {
    let mut ticker = interval((deadline / 2).max(Duration::from_secs(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let acked = loop {
        tokio::select! {
            biased;
            result = &mut released => break result.is_ok(),
            _ = ticker.tick() => {
                if let Err(error) = delivery.extend(deadline).await {
                    warn!(%error, "Failed to extend ack deadline");
                }
            }
        }
    };
    let result = if acked {
        delivery.ack().await
    } else {
        debug!("Task dropped without ack, releasing message for redelivery");
        delivery.nack().await
    };
    outstanding.fetch_sub(1, Ordering::SeqCst);
    if let Err(error) = result {
        // the message will be redelivered after its ack deadline
        warn!(acked, %error, "Failed to settle message");
    }
}

/// Streams oracle results from one subscription into the pending task queue.
///
/// Every delivery is leased until its task settles: the lease keeps extending
/// the ack deadline, acks when the task acks, and nacks when the task is
/// dropped without an ack.
#[derive(Debug)]
pub struct SubscriptionListener<S> {
    source: Arc<S>,
    config: PubSubConfig,
    pending: TaskSender,
    metrics: DispatcherMetrics,
    outstanding: Arc<AtomicUsize>,
}

impl<S: MessageSource> SubscriptionListener<S> {
    pub fn new(
        source: Arc<S>,
        config: PubSubConfig,
        pending: TaskSender,
        metrics: DispatcherMetrics,
    ) -> Self {
        Self {
            source,
            config,
            pending,
            metrics,
            outstanding: Default::default(),
        }
    }

    /// Number of deliveries waiting for their task to settle
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Run on a background task
    pub fn spawn(self) -> JoinHandle<Result<(), RelayError>> {
        let span = info_span!("SubscriptionListener", sub_id = %self.config.sub_id);
        tokio::spawn(self.run().instrument(span))
    }

    /// Consume the subscription until the pending queue is closed
    #[instrument(skip(self), name = "SubscriptionListener::run")]
    pub async fn run(self) -> Result<(), RelayError> {
        let liveness = format!("listener::{}", self.config.sub_id);
        loop {
            self.metrics.update_liveness_metric(&liveness);
            let mut deliveries = self.source.subscribe(&self.config.sub_id);
            while let Some(item) = deliveries.next().await {
                self.metrics.update_liveness_metric(&liveness);
                match item {
                    Ok((delivery, data)) => self.handle(delivery, &data).await?,
                    Err(error) => {
                        warn!(?error, "Subscription stream failed");
                        break;
                    }
                }
            }
            warn!(delay = ?RECONNECT_DELAY, "Subscription stream closed, reconnecting");
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    }

    pub(crate) async fn handle(
        &self,
        delivery: S::Delivery,
        data: &[u8],
    ) -> Result<(), RelayError> {
        let (release, released) = oneshot::channel();
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        let lease = tokio::spawn(
            hold(
                delivery,
                released,
                self.config.pubsub_ack_deadline_time,
                self.outstanding.clone(),
            )
            .in_current_span(),
        );
        let ack = PubSubAck { release, lease };
        enqueue_message(data, Box::new(ack), &self.pending, &self.metrics)
            .await
            .map(|_| ())
            .inspect_err(|error| error!(%error, "Failed to enqueue task"))
    }
}
