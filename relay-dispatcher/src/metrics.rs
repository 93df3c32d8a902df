use std::time::{Duration, UNIX_EPOCH};

use prometheus::{
    histogram_opts, opts, register_histogram_vec_with_registry,
    register_int_counter_vec_with_registry, register_int_counter_with_registry,
    register_int_gauge_vec_with_registry, register_int_gauge_with_registry, Encoder,
    HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Registry,
};

const METRICS_NAMESPACE: &str = "relayer";

/// Prefix a metric name with the namespace.
fn namespaced(name: &str) -> String {
    format!("{}_{}", METRICS_NAMESPACE, name)
}

/// Metrics of the dispatch and broadcast engine
#[derive(Clone, Debug)]
pub struct DispatcherMetrics {
    /// Metrics registry for adding new metrics and gathering reports
    registry: Registry,
    // with a label for the component, e.g. "dispatcher", "listener"
    pub task_liveness: IntGaugeVec,

    pub tasks_received: IntCounter,
    pub tasks_relayed: IntCounter,
    pub tasks_abandoned: IntCounter,
    pub tasks_discarded: IntCounterVec,

    // includes a label for the error causing the retry
    pub task_retries: IntCounterVec,

    pub free_senders: IntGauge,
    /// Last nonce resolved for each sender
    resolved_nonce: IntGaugeVec,

    pub broadcast_acceptances: IntCounterVec,
    pub broadcast_rejections: IntCounterVec,

    /// Seconds from submission to the first inclusion signal
    pub inclusion_latency: HistogramVec,
}

impl DispatcherMetrics {
    pub fn new(registry: Registry) -> eyre::Result<Self> {
        let task_liveness = register_int_gauge_vec_with_registry!(
            opts!(
                namespaced("task_liveness"),
                "The liveness of the relayer tasks, expressed as a timestamp since the epoch",
            ),
            &["component",],
            registry.clone()
        )?;
        let tasks_received = register_int_counter_with_registry!(
            opts!(
                namespaced("tasks_received"),
                "The number of tasks accepted into the pending queue",
            ),
            registry.clone()
        )?;
        let tasks_relayed = register_int_counter_with_registry!(
            opts!(
                namespaced("tasks_relayed"),
                "The number of tasks whose extrinsic was included in a block",
            ),
            registry.clone()
        )?;
        let tasks_abandoned = register_int_counter_with_registry!(
            opts!(
                namespaced("tasks_abandoned"),
                "The number of tasks dropped after reaching max retry",
            ),
            registry.clone()
        )?;
        let tasks_discarded = register_int_counter_vec_with_registry!(
            opts!(
                namespaced("tasks_discarded"),
                "The number of source messages acknowledged without relaying",
            ),
            &["reason",],
            registry.clone()
        )?;
        let task_retries = register_int_counter_vec_with_registry!(
            opts!(
                namespaced("task_retries"),
                "The number of times a task was requeued",
            ),
            &["error_type",],
            registry.clone()
        )?;
        let free_senders = register_int_gauge_with_registry!(
            opts!(
                namespaced("free_senders"),
                "The number of sender accounts not held by a worker",
            ),
            registry.clone()
        )?;
        let resolved_nonce = register_int_gauge_vec_with_registry!(
            opts!(
                namespaced("resolved_nonce"),
                "Last nonce resolved for each sender",
            ),
            &["sender",],
            registry.clone()
        )?;
        let broadcast_acceptances = register_int_counter_vec_with_registry!(
            opts!(
                namespaced("broadcast_acceptances"),
                "The number of extrinsic submissions accepted by an endpoint",
            ),
            &["endpoint",],
            registry.clone()
        )?;
        let broadcast_rejections = register_int_counter_vec_with_registry!(
            opts!(
                namespaced("broadcast_rejections"),
                "The number of extrinsic submissions refused by an endpoint",
            ),
            &["endpoint",],
            registry.clone()
        )?;
        let inclusion_latency = register_histogram_vec_with_registry!(
            histogram_opts!(
                namespaced("inclusion_latency_seconds"),
                "Time from submission to the first inclusion signal",
                vec![1.0, 3.0, 6.0, 12.0, 24.0, 48.0, 96.0]
            ),
            &["endpoint",],
            registry.clone()
        )?;
        Ok(Self {
            registry: registry.clone(),
            task_liveness,
            tasks_received,
            tasks_relayed,
            tasks_abandoned,
            tasks_discarded,
            task_retries,
            free_senders,
            resolved_nonce,
            broadcast_acceptances,
            broadcast_rejections,
            inclusion_latency,
        })
    }

    pub fn update_liveness_metric(&self, component: &str) {
        self.task_liveness.with_label_values(&[component]).set(
            UNIX_EPOCH
                .elapsed()
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0),
        );
    }

    pub fn update_task_retries_metric(&self, error_type: &str) {
        self.task_retries.with_label_values(&[error_type]).inc();
    }

    pub fn update_tasks_discarded_metric(&self, reason: &str) {
        self.tasks_discarded.with_label_values(&[reason]).inc();
    }

    pub fn update_free_senders_metric(&self, free: usize) {
        self.free_senders.set(free as i64);
    }

    pub fn update_resolved_nonce_metric(&self, sender: &str, nonce: u64) {
        self.resolved_nonce
            .with_label_values(&[sender])
            .set(nonce as i64);
    }

    pub fn get_resolved_nonce(&self, sender: &str) -> IntGauge {
        self.resolved_nonce.with_label_values(&[sender]).clone()
    }

    pub fn update_broadcast_metric(&self, endpoint: &str, accepted: bool) {
        let counter = if accepted {
            &self.broadcast_acceptances
        } else {
            &self.broadcast_rejections
        };
        counter.with_label_values(&[endpoint]).inc();
    }

    pub fn observe_inclusion_latency(&self, endpoint: &str, elapsed: Duration) {
        self.inclusion_latency
            .with_label_values(&[endpoint])
            .observe(elapsed.as_secs_f64());
    }

    pub fn gather(&self) -> prometheus::Result<Vec<u8>> {
        let collected_metrics = self.registry.gather();
        let mut out_buf = Vec::with_capacity(1024 * 64);
        let encoder = prometheus::TextEncoder::new();
        encoder.encode(&collected_metrics, &mut out_buf)?;
        Ok(out_buf)
    }

    #[cfg(test)]
    pub fn dummy_instance() -> Self {
        let registry = Registry::new();
        let instance = Self::new(registry.clone());
        instance.unwrap()
    }
}
