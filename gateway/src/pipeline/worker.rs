//! Worker pool that drains the bounded queue and flushes batches to the sink.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};

use crate::metrics::Metrics;
use crate::model::CapturedEvent;

use clickgate_task::{ShutdownSignal, Task};

use super::dlq::{Dlq, DlqEntry, FailureClass};
use super::sink::EventSink;

/// The `mpsc::Receiver` half of the pipeline queue. `tokio::sync::mpsc::Receiver` has exactly one
/// consumer, so the worker pool
/// shares a single receiver behind a mutex: each worker locks only for the duration of one
/// `recv()` call, so batching and sink I/O across workers still run concurrently.
pub type SharedReceiver = Arc<Mutex<mpsc::Receiver<CapturedEvent>>>;

/// One worker accumulates events into a batch bounded by (max size, max age); on flush it issues
/// a single append to the sink. On failure every event in the batch moves to the DLQ.
pub struct WorkerTask {
    pub worker_id: usize,
    pub receiver: SharedReceiver,
    pub sink: Arc<dyn EventSink>,
    pub dlq: Arc<dyn Dlq>,
    pub batch_max_size: usize,
    pub batch_max_age: Duration,
    pub append_deadline: Duration,
    pub metrics: Arc<Metrics>,
}

#[async_trait::async_trait]
impl Task for WorkerTask {
    type Output = anyhow::Result<()>;

    const NAME: &'static str = "pipeline worker";

    async fn run(self, mut shutdown_signal: ShutdownSignal) -> Self::Output {
        let Self {
            worker_id,
            receiver,
            sink,
            dlq,
            batch_max_size,
            batch_max_age,
            append_deadline,
            metrics,
        } = self;

        debug!(worker_id, "pipeline worker started");

        let mut batch: Vec<CapturedEvent> = Vec::with_capacity(batch_max_size);

        loop {
            let deadline = tokio::time::sleep(batch_max_age);
            tokio::pin!(deadline);

            let mut shutting_down = false;

            while batch.len() < batch_max_size {
                tokio::select! {
                    biased;

                    _ = shutdown_signal.wait(), if !shutting_down => {
                        shutting_down = true;
                    }
                    maybe_event = async { receiver.lock().await.recv().await } => {
                        match maybe_event {
                            Some(event) => batch.push(event),
                            None => {
                                shutting_down = true;
                                break;
                            }
                        }
                    }
                    _ = &mut deadline => break,
                }

                if shutting_down {
                    break;
                }
            }

            if !batch.is_empty() {
                flush(worker_id, &mut batch, sink.as_ref(), dlq.as_ref(), append_deadline, &metrics).await;
            }

            if shutting_down && receiver.lock().await.is_empty() {
                break;
            }
        }

        debug!(worker_id, "pipeline worker terminated");

        Ok(())
    }
}

async fn flush(
    worker_id: usize,
    batch: &mut Vec<CapturedEvent>,
    sink: &dyn EventSink,
    dlq: &dyn Dlq,
    append_deadline: Duration,
    metrics: &Metrics,
) {
    match sink.append_batch(batch, append_deadline).await {
        Ok(()) => {
            trace!(worker_id, batch_len = batch.len(), "batch flushed to sink");
            metrics.sink_batches_ok.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
        Err(error) => {
            error!(worker_id, batch_len = batch.len(), error = %error, "batch append failed, moving to DLQ");
            metrics.sink_batches_failed.fetch_add(1, std::sync::atomic::Ordering::Relaxed);

            for event in batch.drain(..) {
                let entry = DlqEntry::new(event, FailureClass::SinkFailure);
                if let Err(dlq_error) = dlq.enqueue(entry).await {
                    error!(worker_id, error = %dlq_error, "failed to enqueue batch entry to DLQ, event lost");
                }
            }
        }
    }

    batch.clear();
}
