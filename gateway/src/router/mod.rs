//! The campaign router.

pub mod campaign;
pub mod refresh;
pub mod snapshot;
pub mod store;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;

pub use campaign::{Campaign, CampaignStatus, Operator, Rule, DEFAULT_CAMPAIGN_ID};
pub use snapshot::{build_destination, CampaignSnapshot, RouteError};
pub use store::{CampaignStore, RemoteCampaignStore};

/// Process-local, read-mostly handle to the current [`CampaignSnapshot`]. Readers never take a
/// lock: the snapshot is swapped atomically by the refresher so a
/// reader always observes either the old snapshot or the new one.
#[derive(Clone)]
pub struct Router {
    snapshot: Arc<ArcSwap<CampaignSnapshot>>,
    loaded: Arc<AtomicBool>,
}

impl Router {
    pub fn new() -> Self {
        Self {
            snapshot: Arc::new(ArcSwap::from_pointee(CampaignSnapshot::default())),
            loaded: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Atomically replaces the snapshot. Called by the refresh loop, and optimistically by the
    /// admin mutation surface.
    pub fn swap(&self, new_snapshot: CampaignSnapshot) {
        self.snapshot.store(Arc::new(new_snapshot));
        self.loaded.store(true, Ordering::Release);
    }

    pub fn resolve<'a>(
        &self,
        tenant_id: &str,
        path_campaign_id: Option<&str>,
        fields: &HashMap<String, String>,
    ) -> Result<(Campaign, String), RouteError> {
        let snapshot = self.snapshot.load();
        let (campaign, destination) = snapshot.resolve(tenant_id, path_campaign_id, fields)?;
        Ok((campaign.clone(), destination.to_owned()))
    }

    pub fn fallback_url(&self, tenant_id: &str) -> Option<String> {
        self.snapshot.load().fallback_url(tenant_id).map(str::to_owned)
    }

    /// Optimistically applies an admin-surface create/update to the local snapshot under the
    /// write lock implicit in `ArcSwap::rcu`. The campaign store
    /// write happens first; this just keeps the local view from lagging until the next refresh.
    pub fn upsert_campaign_optimistic(&self, campaign: Campaign) {
        self.snapshot.rcu(|current| Arc::new(current.upserted(campaign.clone())));
    }

    /// Optimistically applies an admin-surface delete to the local snapshot.
    pub fn remove_campaign_optimistic(&self, tenant_id: &str, campaign_id: &str) {
        self.snapshot.rcu(|current| Arc::new(current.removed(tenant_id, campaign_id)));
    }

    /// Whether the refresh loop has ever successfully built a snapshot — used by `/ready`.
    /// An empty-but-loaded snapshot is still "ready"; only "never loaded" is not.
    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    pub fn campaign_count(&self) -> usize {
        self.snapshot.load().len()
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}
