use relay_core::{Acknowledge, RelayError};
use relay_dispatcher::{DispatcherMetrics, TaskSender};
use tracing::{info, warn};

use crate::obi::task_from_message;

/// What happened to a feed message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntakeOutcome {
    /// A task was queued and owns the ack handle
    Enqueued,
    /// Nothing to relay, the message was acknowledged
    Discarded,
}

/// Turn a feed message into a pending task.
///
/// Messages that cannot be decoded or carry no valid price are acknowledged
/// and dropped. Otherwise the task takes over `ack` and is queued, waiting for
/// room when the queue is full. Fails only when the queue is closed.
pub async fn enqueue_message(
    data: &[u8],
    ack: Box<dyn Acknowledge>,
    pending: &TaskSender,
    metrics: &DispatcherMetrics,
) -> Result<IntakeOutcome, RelayError> {
    let task = match task_from_message(data) {
        Ok(task) => task,
        Err(error) => {
            warn!(%error, "Discarding undecodable message");
            metrics.update_tasks_discarded_metric("decode_error");
            ack.ack().await;
            return Ok(IntakeOutcome::Discarded);
        }
    };
    if task.price_data.prices.is_empty() {
        info!(request_id = task.request_id(), "Discarding message without valid prices");
        metrics.update_tasks_discarded_metric("no_valid_prices");
        ack.ack().await;
        return Ok(IntakeOutcome::Discarded);
    }

    let task = task.with_ack_handle(ack);
    info!(?task, "Got new task");
    pending
        .send(task)
        .await
        .map_err(|_| RelayError::ChannelClosed)?;
    metrics.tasks_received.inc();
    Ok(IntakeOutcome::Enqueued)
}
