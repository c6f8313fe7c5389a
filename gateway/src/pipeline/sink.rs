//! Event sink contract.

use std::time::Duration;

use crate::model::CapturedEvent;

#[async_trait::async_trait]
pub trait EventSink: Send + Sync {
    /// `AppendBatch(events[]) -> ok|error`. The gateway writes only; never reads.
    async fn append_batch(&self, events: &[CapturedEvent], deadline: Duration) -> anyhow::Result<()>;
}

pub struct RemoteEventSink {
    client: reqwest::Client,
    base_url: String,
}

impl RemoteEventSink {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait::async_trait]
impl EventSink for RemoteEventSink {
    async fn append_batch(&self, events: &[CapturedEvent], deadline: Duration) -> anyhow::Result<()> {
        let url = format!("{}/append", self.base_url);

        let response = tokio::time::timeout(deadline, self.client.post(&url).json(&events).send())
            .await
            .map_err(|_| anyhow::anyhow!("sink append timed out after {deadline:?}"))??;

        anyhow::ensure!(
            response.status().is_success(),
            "sink append failed with status {}",
            response.status()
        );

        Ok(())
    }
}

/// Durable destination for DLQ entries that have exceeded the retry ceiling. Append-only newline-delimited JSON so an operator can replay it later;
/// never overwritten, never truncated.
#[async_trait::async_trait]
pub trait PermanentFailureSink: Send + Sync {
    async fn write(&self, entry: &super::dlq::DlqEntry) -> anyhow::Result<()>;
}

pub struct FilePermanentFailureSink {
    path: camino::Utf8PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl FilePermanentFailureSink {
    pub fn new(path: camino::Utf8PathBuf) -> Self {
        Self {
            path,
            lock: tokio::sync::Mutex::new(()),
        }
    }
}

#[async_trait::async_trait]
impl PermanentFailureSink for FilePermanentFailureSink {
    async fn write(&self, entry: &super::dlq::DlqEntry) -> anyhow::Result<()> {
        use tokio::io::AsyncWriteExt as _;

        let _guard = self.lock.lock().await;
        let line = serde_json::to_string(entry)?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;

        Ok(())
    }
}
