//! Dead-letter queue and its background reclaimer.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng as _;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::model::CapturedEvent;

use clickgate_task::{ShutdownSignal, Task};

use super::sink::{EventSink, PermanentFailureSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// The in-memory queue was saturated at submit time.
    QueueSaturated,
    /// A worker's batch append to the sink failed.
    SinkFailure,
}

/// One event plus its retry bookkeeping, as held by the DLQ.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqEntry {
    pub event: CapturedEvent,
    pub retry_count: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub first_seen_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_attempt_at: OffsetDateTime,
    pub failure_class: FailureClass,
}

impl DlqEntry {
    pub fn new(event: CapturedEvent, failure_class: FailureClass) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            event,
            retry_count: 0,
            first_seen_at: now,
            last_attempt_at: now,
            failure_class,
        }
    }
}

/// Durable queue for events whose sink write failed or whose worker queue overflowed. Implementations must never drop an entry silently.
#[async_trait::async_trait]
pub trait Dlq: Send + Sync {
    async fn enqueue(&self, entry: DlqEntry) -> anyhow::Result<()>;

    /// Dequeues up to `max` entries for a retry attempt. Entries are removed from the queue as
    /// part of the dequeue and must be re-enqueued by the caller on failure.
    async fn dequeue_batch(&self, max: usize) -> anyhow::Result<Vec<DlqEntry>>;

    /// Best-effort reachability probe used by `/ready`. The default asks for a zero-sized batch and treats any error as unhealthy.
    async fn health_check(&self) -> bool {
        self.dequeue_batch(0).await.is_ok()
    }
}

pub struct RemoteDlq {
    client: reqwest::Client,
    base_url: String,
}

impl RemoteDlq {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait::async_trait]
impl Dlq for RemoteDlq {
    async fn enqueue(&self, entry: DlqEntry) -> anyhow::Result<()> {
        let url = format!("{}/enqueue", self.base_url);
        let response = self.client.post(&url).json(&entry).send().await?;
        anyhow::ensure!(response.status().is_success(), "DLQ enqueue failed with status {}", response.status());
        Ok(())
    }

    async fn dequeue_batch(&self, max: usize) -> anyhow::Result<Vec<DlqEntry>> {
        let url = format!("{}/dequeue?max={max}", self.base_url);
        let response = self.client.get(&url).send().await?;
        anyhow::ensure!(response.status().is_success(), "DLQ dequeue failed with status {}", response.status());
        Ok(response.json().await?)
    }
}

/// In-process implementation useful for tests and standalone demos.
#[derive(Default)]
pub struct InMemoryDlq {
    entries: parking_lot::Mutex<std::collections::VecDeque<DlqEntry>>,
}

impl InMemoryDlq {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait::async_trait]
impl Dlq for InMemoryDlq {
    async fn enqueue(&self, entry: DlqEntry) -> anyhow::Result<()> {
        self.entries.lock().push_back(entry);
        Ok(())
    }

    async fn dequeue_batch(&self, max: usize) -> anyhow::Result<Vec<DlqEntry>> {
        let mut guard = self.entries.lock();
        let n = max.min(guard.len());
        Ok(guard.drain(..n).collect())
    }
}

/// Exponential backoff with jitter, keyed by retry count.
fn backoff_for(retry_count: u32, base: Duration, max: Duration) -> Duration {
    let exp = base.as_millis().saturating_mul(1u128 << retry_count.min(20));
    let capped = exp.min(max.as_millis());
    let jitter_pct = rand::thread_rng().gen_range(0..=20);
    let jittered = capped + (capped * jitter_pct / 100);
    Duration::from_millis(jittered.min(max.as_millis()) as u64)
}

/// Retries DLQ entries against the sink on a fixed cadence, escalating entries past the retry
/// ceiling to the permanent-failure sink.
pub struct DlqReclaimerTask {
    pub dlq: Arc<dyn Dlq>,
    pub sink: Arc<dyn EventSink>,
    pub permanent_failure_sink: Arc<dyn PermanentFailureSink>,
    pub retry_ceiling: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub append_deadline: Duration,
    pub poll_interval: Duration,
    pub batch_size: usize,
    pub metrics: Arc<crate::metrics::Metrics>,
}

#[async_trait::async_trait]
impl Task for DlqReclaimerTask {
    type Output = anyhow::Result<()>;

    const NAME: &'static str = "DLQ reclaimer";

    async fn run(self, mut shutdown_signal: ShutdownSignal) -> Self::Output {
        let Self {
            dlq,
            sink,
            permanent_failure_sink,
            retry_ceiling,
            backoff_base,
            backoff_max,
            append_deadline,
            poll_interval,
            batch_size,
            metrics,
        } = self;

        debug!("DLQ reclaimer started");

        loop {
            match dlq.dequeue_batch(batch_size).await {
                Ok(entries) if !entries.is_empty() => {
                    for mut entry in entries {
                        let events = [entry.event.clone()];

                        match sink.append_batch(&events, append_deadline).await {
                            Ok(()) => {
                                trace!(event_id = %entry.event.event_id, "DLQ entry drained to sink");
                            }
                            Err(error) => {
                                entry.retry_count += 1;
                                entry.last_attempt_at = OffsetDateTime::now_utc();

                                if entry.retry_count > retry_ceiling {
                                    error!(
                                        event_id = %entry.event.event_id,
                                        retry_count = entry.retry_count,
                                        "DLQ entry exceeded retry ceiling, escalating to permanent failure sink"
                                    );

                                    if let Err(write_error) = permanent_failure_sink.write(&entry).await {
                                        error!(
                                            event_id = %entry.event.event_id,
                                            error = %write_error,
                                            "failed to write permanently-failed entry, requeuing to DLQ"
                                        );
                                        let _ = dlq.enqueue(entry).await;
                                    } else {
                                        metrics.dlq_permanent_failures.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                                    }
                                } else {
                                    warn!(
                                        event_id = %entry.event.event_id,
                                        retry_count = entry.retry_count,
                                        error = %error,
                                        "DLQ retry failed, requeuing with backoff"
                                    );

                                    let delay = backoff_for(entry.retry_count, backoff_base, backoff_max);
                                    let dlq = Arc::clone(&dlq);
                                    tokio::spawn(async move {
                                        tokio::time::sleep(delay).await;
                                        let _ = dlq.enqueue(entry).await;
                                    });
                                }
                            }
                        }
                    }
                }
                Ok(_) => {}
                Err(error) => {
                    error!(error = %error, "failed to dequeue from DLQ");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(poll_interval) => {}
                _ = shutdown_signal.wait() => break,
            }
        }

        debug!("DLQ reclaimer terminated");

        Ok(())
    }
}
