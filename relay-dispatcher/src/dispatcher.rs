use std::{sync::Arc, time::Duration};

use derive_new::new;
use relay_core::{Broadcaster, ChainEndpoint, ExtrinsicSigner, NonceSource, RelayError, Task};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{error, info, info_span, instrument, Instrument};

use crate::{BroadcastClient, DispatcherMetrics, NonceResolver, RetryPolicy, SenderPool};

pub use worker::{RelayWorker, TaskOutcome};

mod worker;


/// Producer side of the pending task queue
pub type TaskSender = mpsc::Sender<Task>;
/// Consumer side of the pending task queue
pub type TaskReceiver = mpsc::Receiver<Task>;

/// Default capacity of the pending task queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Create the bounded pending task queue. Producers wait while it is full.
pub fn task_queue(capacity: usize) -> (TaskSender, TaskReceiver) {
    mpsc::channel(capacity)
}

/// Tunables of the dispatch loop and its workers
#[derive(Debug, Clone, new)]
pub struct DispatcherSettings {
    /// Attempts per task before it is abandoned
    pub max_try: u32,
    /// Tip added to every extrinsic
    pub tip: u64,
    /// How long to wait for inclusion after a successful submission
    pub tx_waiting_period: Duration,
    /// Deadline of one nonce query round
    pub nonce_interval: Duration,
}

/// Capabilities a worker is built from
#[derive(Debug, Clone, new)]
pub struct DispatcherDeps {
    pub nonce_source: Arc<dyn NonceSource>,
    pub signer: Arc<dyn ExtrinsicSigner>,
    pub broadcaster: Arc<dyn Broadcaster>,
    pub sender_pool: SenderPool,
    pub metrics: DispatcherMetrics,
}

impl DispatcherDeps {
    /// Wire the nonce resolver and broadcast client over `endpoints`
    pub fn from_endpoints(
        settings: &DispatcherSettings,
        endpoints: Vec<Arc<dyn ChainEndpoint>>,
        signer: Arc<dyn ExtrinsicSigner>,
        senders: Vec<String>,
        metrics: DispatcherMetrics,
    ) -> Self {
        let nonce_source = NonceResolver::new(
            endpoints.clone(),
            settings.nonce_interval,
            metrics.clone(),
        );
        let broadcaster =
            BroadcastClient::new(endpoints, settings.tx_waiting_period, metrics.clone());
        Self {
            nonce_source: Arc::new(nonce_source),
            signer,
            broadcaster: Arc::new(broadcaster),
            sender_pool: SenderPool::with_metrics(senders, metrics.clone()),
            metrics,
        }
    }
}

/// Pairs pending tasks with free senders and runs one worker per pair.
#[derive(Debug)]
pub struct Dispatcher {
    receiver: TaskReceiver,
    worker: Arc<RelayWorker>,
    sender_pool: SenderPool,
    metrics: DispatcherMetrics,
}

impl Dispatcher {
    /// `pending` is the queue the Task Source feeds; failed tasks are pushed
    /// back to its tail.
    pub fn new(
        settings: DispatcherSettings,
        deps: DispatcherDeps,
        pending: (TaskSender, TaskReceiver),
    ) -> Self {
        let (requeue, receiver) = pending;
        let retry = RetryPolicy::new(requeue, settings.max_try, deps.metrics.clone());
        let worker = RelayWorker::new(
            deps.nonce_source,
            deps.signer,
            deps.broadcaster,
            retry,
            settings.tip,
            deps.metrics.clone(),
        );
        Self {
            receiver,
            worker: Arc::new(worker),
            sender_pool: deps.sender_pool,
            metrics: deps.metrics,
        }
    }

    /// Run until the pending queue is closed. Workers already spawned keep
    /// running to completion.
    #[instrument(skip(self), name = "Dispatcher::run")]
    pub async fn run(mut self) -> Result<(), RelayError> {
        info!(senders = self.sender_pool.capacity(), "Dispatcher started");
        loop {
            self.metrics.update_liveness_metric("dispatcher");
            let Some(task) = self.receiver.recv().await else {
                error!("Pending task queue closed");
                return Err(RelayError::ChannelClosed);
            };
            let lease = self.sender_pool.acquire().await;
            let span = info_span!(
                "relay_task",
                request_id = task.request_id(),
                sender = %lease.sender(),
                retry_counter = task.retry_counter,
            );
            let worker = self.worker.clone();
            tokio::spawn(
                async move {
                    worker.relay(task, lease).await;
                }
                .instrument(span),
            );
        }
    }

    /// Run the dispatch loop on its own task
    pub fn spawn(self) -> JoinHandle<Result<(), RelayError>> {
        tokio::spawn(self.run())
    }
}
