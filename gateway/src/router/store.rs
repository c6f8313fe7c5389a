//! The campaign store contract.
//!
//! Source-of-truth for campaign definitions. Read by the refresh loop; never read on the
//! request path.

use std::collections::HashMap;

use super::campaign::Campaign;

#[async_trait::async_trait]
pub trait CampaignStore: Send + Sync {
    /// Returns every active campaign across all tenants, sufficient to rebuild the snapshot.
    async fn list_active_campaigns(&self) -> anyhow::Result<Vec<Campaign>>;

    /// Per-tenant fallback URL used when no campaign resolves.
    async fn list_fallback_urls(&self) -> anyhow::Result<HashMap<String, String>>;

    /// Optional admin operation. Implementations must enforce tenant-id equality between the
    /// authenticated tenant and the payload at the HTTP boundary; the store itself
    /// just persists.
    async fn create_campaign(&self, campaign: Campaign) -> anyhow::Result<()>;

    async fn update_campaign(&self, campaign: Campaign) -> anyhow::Result<()>;

    async fn delete_campaign(&self, tenant_id: &str, campaign_id: &str) -> anyhow::Result<()>;
}

/// HTTP-backed implementation calling an external campaign store. The gateway
/// only ever reads from it on the refresh loop's cadence; the hot path never touches it.
pub struct RemoteCampaignStore {
    http: reqwest::Client,
    base_url: String,
}

impl RemoteCampaignStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait::async_trait]
impl CampaignStore for RemoteCampaignStore {
    async fn list_active_campaigns(&self) -> anyhow::Result<Vec<Campaign>> {
        let url = format!("{}/campaigns", self.base_url);
        let response = self.http.get(&url).send().await?.error_for_status()?;
        Ok(response.json().await?)
    }

    async fn list_fallback_urls(&self) -> anyhow::Result<HashMap<String, String>> {
        let url = format!("{}/fallback-urls", self.base_url);
        let response = self.http.get(&url).send().await?.error_for_status()?;
        Ok(response.json().await?)
    }

    async fn create_campaign(&self, campaign: Campaign) -> anyhow::Result<()> {
        let url = format!("{}/campaigns", self.base_url);
        self.http.post(&url).json(&campaign).send().await?.error_for_status()?;
        Ok(())
    }

    async fn update_campaign(&self, campaign: Campaign) -> anyhow::Result<()> {
        let url = format!("{}/campaigns/{}/{}", self.base_url, campaign.tenant_id, campaign.campaign_id);
        self.http.put(&url).json(&campaign).send().await?.error_for_status()?;
        Ok(())
    }

    async fn delete_campaign(&self, tenant_id: &str, campaign_id: &str) -> anyhow::Result<()> {
        let url = format!("{}/campaigns/{tenant_id}/{campaign_id}", self.base_url);
        self.http.delete(&url).send().await?.error_for_status()?;
        Ok(())
    }
}

/// In-memory implementation useful for tests and standalone demos; a production deployment
/// would point at a real store.
#[derive(Default)]
pub struct InMemoryCampaignStore {
    campaigns: parking_lot::RwLock<HashMap<(String, String), Campaign>>,
    fallback_urls: parking_lot::RwLock<HashMap<String, String>>,
}

impl InMemoryCampaignStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, campaigns: Vec<Campaign>) {
        let mut guard = self.campaigns.write();
        for campaign in campaigns {
            guard.insert((campaign.tenant_id.clone(), campaign.campaign_id.clone()), campaign);
        }
    }

    pub fn set_fallback_url(&self, tenant_id: impl Into<String>, url: impl Into<String>) {
        self.fallback_urls.write().insert(tenant_id.into(), url.into());
    }
}

#[async_trait::async_trait]
impl CampaignStore for InMemoryCampaignStore {
    async fn list_active_campaigns(&self) -> anyhow::Result<Vec<Campaign>> {
        Ok(self
            .campaigns
            .read()
            .values()
            .filter(|c| c.is_active())
            .cloned()
            .collect())
    }

    async fn list_fallback_urls(&self) -> anyhow::Result<HashMap<String, String>> {
        Ok(self.fallback_urls.read().clone())
    }

    async fn create_campaign(&self, campaign: Campaign) -> anyhow::Result<()> {
        let key = (campaign.tenant_id.clone(), campaign.campaign_id.clone());
        self.campaigns.write().insert(key, campaign);
        Ok(())
    }

    async fn update_campaign(&self, campaign: Campaign) -> anyhow::Result<()> {
        self.create_campaign(campaign).await
    }

    async fn delete_campaign(&self, tenant_id: &str, campaign_id: &str) -> anyhow::Result<()> {
        self.campaigns
            .write()
            .remove(&(tenant_id.to_owned(), campaign_id.to_owned()));
        Ok(())
    }
}
