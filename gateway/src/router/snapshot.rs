//! The in-memory campaign snapshot and routing algorithm.

use std::collections::HashMap;

use url::Url;

use super::campaign::{Campaign, DEFAULT_CAMPAIGN_ID};

#[derive(Debug, Clone, Default)]
pub struct CampaignSnapshot {
    /// Keyed by `(tenant id, campaign id)` — rebuilt wholesale by the refresh loop so readers
    /// only ever observe a fully-built snapshot, never a half-built one.
    campaigns: HashMap<(String, String), Campaign>,
    /// Tenant-configured fallback URL used when no campaign resolves at all.
    fallback_urls: HashMap<String, String>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum RouteError {
    /// No destination could be resolved for this request.
    NoDestination,
}

impl CampaignSnapshot {
    pub fn new(campaigns: Vec<Campaign>, fallback_urls: HashMap<String, String>) -> Self {
        let campaigns = campaigns
            .into_iter()
            .filter(|c| c.is_active())
            .map(|c| ((c.tenant_id.clone(), c.campaign_id.clone()), c))
            .collect();

        Self {
            campaigns,
            fallback_urls,
        }
    }

    pub fn len(&self) -> usize {
        self.campaigns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.campaigns.is_empty()
    }

    /// Clones the snapshot with `campaign` upserted (or removed, if it is no longer active) —
    /// used by the optimistic admin-mutation path. The refresh loop
    /// will eventually overwrite this with the campaign store's own view; this just avoids a stale
    /// read between the admin write and the next refresh tick.
    pub fn upserted(&self, campaign: Campaign) -> Self {
        let mut campaigns = self.campaigns.clone();
        let key = (campaign.tenant_id.clone(), campaign.campaign_id.clone());

        if campaign.is_active() {
            campaigns.insert(key, campaign);
        } else {
            campaigns.remove(&key);
        }

        Self {
            campaigns,
            fallback_urls: self.fallback_urls.clone(),
        }
    }

    /// Clones the snapshot with `(tenant_id, campaign_id)` removed.
    pub fn removed(&self, tenant_id: &str, campaign_id: &str) -> Self {
        let mut campaigns = self.campaigns.clone();
        campaigns.remove(&(tenant_id.to_owned(), campaign_id.to_owned()));

        Self {
            campaigns,
            fallback_urls: self.fallback_urls.clone(),
        }
    }

    fn get(&self, tenant_id: &str, campaign_id: &str) -> Option<&Campaign> {
        self.campaigns.get(&(tenant_id.to_owned(), campaign_id.to_owned()))
    }

    fn active_campaigns_for_tenant(&self, tenant_id: &str) -> impl Iterator<Item = &Campaign> {
        self.campaigns.values().filter(move |c| c.tenant_id == tenant_id)
    }

    /// Resolves a destination URL for the request.
    ///
    /// 1. An explicit path campaign id wins outright if active.
    /// 2. Otherwise the highest-scoring active campaign wins; ties break by lexicographically
    ///    smaller campaign id.
    /// 3. Falls back to the tenant's `"default"` campaign.
    /// 4. Falls back to the tenant's configured fallback URL, else [`RouteError::NoDestination`].
    pub fn resolve<'a>(
        &'a self,
        tenant_id: &str,
        path_campaign_id: Option<&str>,
        fields: &HashMap<String, String>,
    ) -> Result<(&'a Campaign, &'a str), RouteError> {
        if let Some(campaign_id) = path_campaign_id {
            if let Some(campaign) = self.get(tenant_id, campaign_id) {
                return Ok((campaign, campaign.default_destination.as_str()));
            }
        }

        let mut best: Option<(&Campaign, u32)> = None;

        for campaign in self.active_campaigns_for_tenant(tenant_id) {
            let score = campaign.match_score(fields);
            if score == 0 {
                continue;
            }

            best = match best {
                None => Some((campaign, score)),
                Some((_, current_score)) if score > current_score => Some((campaign, score)),
                Some((current_best, current_score)) if score == current_score => {
                    if campaign.campaign_id < current_best.campaign_id {
                        Some((campaign, current_score))
                    } else {
                        Some((current_best, current_score))
                    }
                }
                some => some,
            };
        }

        if let Some((campaign, _)) = best {
            return Ok((campaign, campaign.default_destination.as_str()));
        }

        if let Some(default_campaign) = self.get(tenant_id, DEFAULT_CAMPAIGN_ID) {
            return Ok((default_campaign, default_campaign.default_destination.as_str()));
        }

        // No campaign-owned destination: fall through to the raw tenant fallback URL, which has
        // no owning campaign so `append_params`/destination-construction happens by the caller.
        Err(RouteError::NoDestination)
    }

    pub fn fallback_url(&self, tenant_id: &str) -> Option<&str> {
        self.fallback_urls.get(tenant_id).map(String::as_str)
    }
}

/// Merges inbound query parameters into the destination URL when `append_params` is set.
/// Inbound values win on key collision. Logs and returns the destination unchanged if it fails
/// to parse as a URL.
pub fn build_destination(destination: &str, append_params: bool, inbound: &[(String, String)]) -> String {
    if !append_params || inbound.is_empty() {
        return destination.to_owned();
    }

    match Url::parse(destination) {
        Ok(mut url) => {
            let mut pairs: Vec<(String, String)> = url
                .query_pairs()
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect();

            // Inbound values take precedence for duplicate keys: drop any existing pair sharing
            // a key that the inbound request also carries.
            let inbound_keys: std::collections::HashSet<&str> =
                inbound.iter().map(|(k, _)| k.as_str()).collect();
            pairs.retain(|(k, _)| !inbound_keys.contains(k.as_str()));
            pairs.extend(inbound.iter().cloned());

            url.query_pairs_mut().clear().extend_pairs(pairs.iter());
            url.to_string()
        }
        Err(error) => {
            error!(destination, error = %error, "failed to parse destination URL, returning unchanged");
            destination.to_owned()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::campaign::{CampaignStatus, Operator, Rule};
    use time::OffsetDateTime;

    fn campaign(tenant: &str, id: &str, dest: &str, append_params: bool, rules: Vec<Rule>) -> Campaign {
        Campaign {
            tenant_id: tenant.into(),
            campaign_id: id.into(),
            name: id.into(),
            status: CampaignStatus::Active,
            rules,
            default_destination: dest.into(),
            append_params,
            created_at: OffsetDateTime::UNIX_EPOCH,
            updated_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn path_campaign_wins_without_rule_evaluation() {
        let snapshot = CampaignSnapshot::new(
            vec![campaign("org_a", "summer", "https://shop.example.com/s", true, vec![])],
            HashMap::new(),
        );

        let (campaign, dest) = snapshot
            .resolve("org_a", Some("summer"), &HashMap::new())
            .expect("should resolve");

        assert_eq!(campaign.campaign_id, "summer");
        assert_eq!(dest, "https://shop.example.com/s");
    }

    #[test]
    fn highest_score_wins_ties_broken_lexicographically() {
        let rule = |priority| Rule {
            field: "country".into(),
            operator: Operator::Equals,
            values: vec!["US".into()],
            priority,
        };

        let snapshot = CampaignSnapshot::new(
            vec![
                campaign("org_a", "zeta", "https://z.example.com", false, vec![rule(50)]),
                campaign("org_a", "alpha", "https://a.example.com", false, vec![rule(50)]),
            ],
            HashMap::new(),
        );

        let fields: HashMap<String, String> = [("country".to_owned(), "US".to_owned())].into();
        let (campaign, _) = snapshot.resolve("org_a", None, &fields).unwrap();

        assert_eq!(campaign.campaign_id, "alpha");
    }

    #[test]
    fn falls_back_to_default_campaign_when_nothing_scores() {
        let snapshot = CampaignSnapshot::new(
            vec![campaign("org_a", "default", "https://fallback.example.com", false, vec![])],
            HashMap::new(),
        );

        let (campaign, _) = snapshot.resolve("org_a", None, &HashMap::new()).unwrap();
        assert_eq!(campaign.campaign_id, "default");
    }

    #[test]
    fn no_destination_when_nothing_matches_and_no_default() {
        let snapshot = CampaignSnapshot::new(vec![], HashMap::new());
        assert_eq!(
            snapshot.resolve("org_a", None, &HashMap::new()),
            Err(RouteError::NoDestination)
        );
    }

    #[test]
    fn tenant_isolation_in_resolution() {
        let snapshot = CampaignSnapshot::new(
            vec![campaign("org_b", "only-b", "https://b.example.com", false, vec![])],
            HashMap::new(),
        );

        assert_eq!(
            snapshot.resolve("org_a", Some("only-b"), &HashMap::new()),
            Err(RouteError::NoDestination)
        );
    }

    #[test]
    fn append_params_merges_with_inbound_precedence() {
        let merged = build_destination(
            "https://shop.example.com/s?utm=old",
            true,
            &[("click_id".to_owned(), "abc".to_owned()), ("utm".to_owned(), "new".to_owned())],
        );

        assert!(merged.contains("click_id=abc"));
        assert!(merged.contains("utm=new"));
        assert!(!merged.contains("utm=old"));
    }

    #[test]
    fn append_params_false_leaves_destination_untouched() {
        let merged = build_destination(
            "https://shop.example.com/s",
            false,
            &[("click_id".to_owned(), "abc".to_owned())],
        );
        assert_eq!(merged, "https://shop.example.com/s");
    }
}
