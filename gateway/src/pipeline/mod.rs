//! Async pipeline: bounded queue + worker pool + DLQ.

pub mod dlq;
pub mod sink;
pub mod worker;

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::model::CapturedEvent;

pub use dlq::{Dlq, DlqEntry, DlqReclaimerTask, FailureClass, RemoteDlq};
pub use sink::{EventSink, FilePermanentFailureSink, PermanentFailureSink, RemoteEventSink};
pub use worker::{SharedReceiver, WorkerTask};

/// Outcome of [`AsyncPipeline::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The event is in the bounded in-memory queue.
    Accepted,
    /// The queue was full; the event was handed to the DLQ. Still durable.
    ShedToDlq,
    /// Both the queue and the DLQ refused. The only condition that surfaces a 503.
    Rejected,
}

/// Non-blocking submission point for the hot path. Cloning shares the same underlying queue and counters.
#[derive(Clone)]
pub struct AsyncPipeline {
    sender: mpsc::Sender<CapturedEvent>,
    dlq: Arc<dyn Dlq>,
    queue_capacity: usize,
    warning_threshold_pct: u8,
    shed_threshold_pct: u8,
}

impl AsyncPipeline {
    pub fn new(
        sender: mpsc::Sender<CapturedEvent>,
        dlq: Arc<dyn Dlq>,
        queue_capacity: usize,
        warning_threshold_pct: u8,
        shed_threshold_pct: u8,
    ) -> Self {
        Self {
            sender,
            dlq,
            queue_capacity,
            warning_threshold_pct,
            shed_threshold_pct,
        }
    }

    /// Builds the bounded channel plus a pipeline handle around it; returns the handle and the
    /// shared receiver half so the worker pool can spawn more than one
    /// [`WorkerTask`](super::WorkerTask) draining the same queue.
    pub fn bounded(
        queue_capacity: usize,
        warning_threshold_pct: u8,
        shed_threshold_pct: u8,
        dlq: Arc<dyn Dlq>,
    ) -> (Self, SharedReceiver) {
        let (sender, receiver) = mpsc::channel(queue_capacity);
        (
            Self::new(sender, dlq, queue_capacity, warning_threshold_pct, shed_threshold_pct),
            Arc::new(Mutex::new(receiver)),
        )
    }

    /// Never blocks. Tries the in-memory queue first; on saturation falls through to the
    /// DLQ; if both refuse, returns [`SubmitOutcome::Rejected`] — the only path to a 503.
    pub async fn submit(&self, event: CapturedEvent) -> SubmitOutcome {
        let utilization_pct = self.utilization_pct();

        if utilization_pct >= self.shed_threshold_pct as usize {
            return self.shed(event).await;
        }

        if utilization_pct >= self.warning_threshold_pct as usize {
            warn!(utilization_pct, "pipeline queue above warning threshold");
        }

        match self.sender.try_send(event) {
            Ok(()) => SubmitOutcome::Accepted,
            Err(mpsc::error::TrySendError::Full(event)) => self.shed(event).await,
            Err(mpsc::error::TrySendError::Closed(event)) => self.shed(event).await,
        }
    }

    async fn shed(&self, event: CapturedEvent) -> SubmitOutcome {
        let entry = DlqEntry::new(event, FailureClass::QueueSaturated);
        match self.dlq.enqueue(entry).await {
            Ok(()) => {
                warn!("pipeline queue saturated, event shed to DLQ");
                SubmitOutcome::ShedToDlq
            }
            Err(error) => {
                error!(error = %error, "queue and DLQ both refused the event, total saturation");
                SubmitOutcome::Rejected
            }
        }
    }

    /// Exposes the DLQ handle for the `/ready` reachability probe.
    pub fn dlq(&self) -> &Arc<dyn Dlq> {
        &self.dlq
    }

    fn utilization_pct(&self) -> usize {
        let in_flight = self.sender.max_capacity() - self.sender.capacity();
        in_flight.saturating_mul(100) / self.queue_capacity.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CapturedRequest, EventKind};
    use std::collections::HashMap;
    use uuid::Uuid;

    fn event() -> CapturedEvent {
        CapturedEvent::new(
            Uuid::new_v4(),
            0,
            "org_a".into(),
            EventKind::Click,
            "c1".into(),
            "camp".into(),
            CapturedRequest {
                method: "GET".into(),
                path: "/in".into(),
                query: HashMap::new(),
                headers: HashMap::new(),
                body: Vec::new(),
                client_ip: None,
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn accepted_while_queue_has_room() {
        let dlq = Arc::new(dlq::InMemoryDlq::new());
        let (pipeline, _receiver) = AsyncPipeline::bounded(10, 70, 90, dlq.clone());

        assert_eq!(pipeline.submit(event()).await, SubmitOutcome::Accepted);
        assert!(dlq.is_empty());
    }

    #[tokio::test]
    async fn sheds_to_dlq_once_shed_threshold_crossed() {
        let dlq = Arc::new(dlq::InMemoryDlq::new());
        // Capacity 10, shed threshold 10% — the very first submit is already at/over threshold
        // once accounting starts, forcing the shed path deterministically.
        let (pipeline, _receiver) = AsyncPipeline::bounded(10, 0, 0, dlq.clone());

        let outcome = pipeline.submit(event()).await;

        assert_eq!(outcome, SubmitOutcome::ShedToDlq);
        assert_eq!(dlq.len(), 1);
    }

    #[tokio::test]
    async fn rejected_when_queue_full_and_dlq_also_fails() {
        struct AlwaysFailsDlq;

        #[async_trait::async_trait]
        impl Dlq for AlwaysFailsDlq {
            async fn enqueue(&self, _entry: DlqEntry) -> anyhow::Result<()> {
                anyhow::bail!("DLQ unavailable")
            }

            async fn dequeue_batch(&self, _max: usize) -> anyhow::Result<Vec<DlqEntry>> {
                Ok(Vec::new())
            }
        }

        let (pipeline, _receiver) = AsyncPipeline::bounded(10, 0, 0, Arc::new(AlwaysFailsDlq));

        assert_eq!(pipeline.submit(event()).await, SubmitOutcome::Rejected);
    }
}
