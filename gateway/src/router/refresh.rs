//! Background snapshot refresh loop.
//!
//! Implements `clickgate_task::Task`: every background loop in the process runs under a
//! `ShutdownSignal` so the service can stop cooperatively.

use std::sync::Arc;
use std::time::Duration;

use clickgate_task::{ShutdownSignal, Task};

use super::snapshot::CampaignSnapshot;
use super::store::CampaignStore;
use super::Router;

pub struct SnapshotRefreshTask {
    pub store: Arc<dyn CampaignStore>,
    pub router: Router,
    pub interval: Duration,
}

#[async_trait::async_trait]
impl Task for SnapshotRefreshTask {
    type Output = anyhow::Result<()>;

    const NAME: &'static str = "campaign snapshot refresh";

    async fn run(self, mut shutdown_signal: ShutdownSignal) -> Self::Output {
        let Self {
            store,
            router,
            interval,
        } = self;

        debug!("snapshot refresh task started");

        loop {
            match refresh_once(store.as_ref()).await {
                Ok(snapshot) => {
                    let count = snapshot.len();
                    router.swap(snapshot);
                    trace!(campaign_count = count, "snapshot refreshed");
                }
                Err(error) => {
                    // Transient load failures leave the existing snapshot in place.
                    warn!(error = %error, "snapshot refresh failed, keeping previous snapshot");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown_signal.wait() => break,
            }
        }

        debug!("snapshot refresh task terminated");

        Ok(())
    }
}

async fn refresh_once(store: &dyn CampaignStore) -> anyhow::Result<CampaignSnapshot> {
    let campaigns = store.list_active_campaigns().await?;
    let fallback_urls = store.list_fallback_urls().await?;
    Ok(CampaignSnapshot::new(campaigns, fallback_urls))
}
