use derive_new::new;
use relay_core::{RelayError, Task};
use tracing::{error, warn};

use crate::{DispatcherMetrics, TaskSender};

/// Requeues failed tasks until they have used up `max_try` attempts.
#[derive(Debug, Clone, new)]
pub struct RetryPolicy {
    pending: TaskSender,
    max_try: u32,
    metrics: DispatcherMetrics,
}

impl RetryPolicy {
    pub fn max_try(&self) -> u32 {
        self.max_try
    }

    /// Count a failed attempt of `task`.
    ///
    /// Below `max_try` the task is pushed to the tail of the pending queue,
    /// waiting for room if the queue is full. Otherwise the task is
    /// acknowledged to its source and dropped, and the abandonment is returned
    /// as `MaxRetriesReached`.
    pub async fn retry(&self, mut task: Task, reason: &RelayError) -> Result<(), RelayError> {
        task.retry_counter += 1;
        if task.retry_counter >= self.max_try {
            let request_id = task.request_id();
            let retry_counter = task.retry_counter;
            task.acknowledge().await;
            self.metrics.tasks_abandoned.inc();
            let abandoned = RelayError::MaxRetriesReached {
                request_id,
                reason: reason.to_string(),
            };
            error!(request_id, retry_counter, error = %abandoned, "Abandoning task");
            return Err(abandoned);
        }

        self.metrics
            .update_task_retries_metric(&reason.to_metrics_label());
        warn!(
            request_id = task.request_id(),
            retry_counter = task.retry_counter,
            max_try = self.max_try,
            error = %reason,
            "Retrying task"
        );
        self.pending.send(task).await.map_err(|_| RelayError::ChannelClosed)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use relay_core::{Price, PriceData};

    use super::*;
    use crate::{task_queue, test_utils::CountingAck};

    fn task() -> Task {
        Task::new(PriceData::new(vec![Price::new("BTC".into(), 1)], 10, 77))
    }

    #[tokio::test]
    async fn test_requeues_below_max_try() {
        let (tx, mut rx) = task_queue(4);
        let policy = RetryPolicy::new(tx, 3, DispatcherMetrics::dummy_instance());
        let (ack, acks) = CountingAck::new_pair();
        let reason = RelayError::InclusionTimeout(Duration::from_secs(30));

        policy
            .retry(task().with_ack_handle(ack), &reason)
            .await
            .unwrap();
        let requeued = rx.try_recv().unwrap();
        assert_eq!(requeued.retry_counter, 1);
        assert!(requeued.has_ack_handle());
        assert_eq!(acks.count(), 0);
    }

    #[tokio::test]
    async fn test_never_requeued_past_max_try() {
        let (tx, mut rx) = task_queue(4);
        let metrics = DispatcherMetrics::dummy_instance();
        let policy = RetryPolicy::new(tx, 2, metrics.clone());
        let (ack, acks) = CountingAck::new_pair();
        let reason = RelayError::SignerFailure("status 500".into());

        policy
            .retry(task().with_ack_handle(ack), &reason)
            .await
            .unwrap();
        let again = rx.try_recv().unwrap();

        let err = policy.retry(again, &reason).await.unwrap_err();
        match err {
            RelayError::MaxRetriesReached { request_id, reason } => {
                assert_eq!(request_id, 77);
                assert!(reason.contains("status 500"));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(rx.try_recv().is_err());
        assert_eq!(acks.count(), 1);
        assert_eq!(metrics.tasks_abandoned.get(), 1);
    }

    #[tokio::test]
    async fn test_max_try_one_abandons_first_failure() {
        let (tx, mut rx) = task_queue(1);
        let policy = RetryPolicy::new(tx, 1, DispatcherMetrics::dummy_instance());
        let result = policy.retry(task(), &RelayError::SubscriptionsClosed).await;
        assert!(matches!(result, Err(RelayError::MaxRetriesReached { .. })));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_queue_is_reported() {
        let (tx, rx) = task_queue(1);
        drop(rx);
        let policy = RetryPolicy::new(tx, 5, DispatcherMetrics::dummy_instance());
        let result = policy.retry(task(), &RelayError::SubscriptionsClosed).await;
        assert!(matches!(result, Err(RelayError::ChannelClosed)));
    }
}
