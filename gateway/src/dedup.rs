//! Deduplication.
//!
//! `claim(tenantId, clickId, ttl) -> {fresh, duplicate}` with at-most-one "fresh" result per key
//! within the TTL across the whole fleet. The key is always namespaced by tenant id: a
//! claim in one tenant never affects another.
//!
//! Degrades open on store failure or deadline: the click is treated as fresh and is not tagged
//! duplicate, because the redirect SLO and "never lose data" outrank perfect dedup. A circuit breaker sits
//! in front of the remote store so a single slow dependency cannot collapse the SLO.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use scc::HashMap as ConcurrentHashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    Fresh,
    Duplicate,
    /// The store was unreachable or the deadline expired; the caller degrades open.
    DegradedOpen,
}

#[async_trait::async_trait]
pub trait DedupStore: Send + Sync {
    /// Atomic "claim if absent" primitive. Implementations race many concurrent callers for the
    /// same key; exactly one must observe `Ok(true)` (fresh) within the TTL.
    async fn claim_if_absent(&self, key: &str, ttl: Duration) -> anyhow::Result<bool>;
}

/// Monotonic millisecond clock so tests don't depend on wall time. Exposed separately from
/// [`ClaimOutcome`] because the breaker and the in-memory store both need "now" without pulling
/// in a real clock dependency.
fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Simple three-state breaker: closed (calls pass through), open (calls fail fast until the
/// cooldown elapses), half-open (a single probe call is allowed through).
pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    consecutive_failures: AtomicU32,
    opened_at_ms: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold,
            cooldown,
            consecutive_failures: AtomicU32::new(0),
            opened_at_ms: AtomicU64::new(0),
        }
    }

    fn is_open(&self) -> bool {
        let opened_at = self.opened_at_ms.load(Ordering::Acquire);
        if opened_at == 0 {
            return false;
        }

        let elapsed = now_ms().saturating_sub(opened_at);
        if elapsed >= self.cooldown.as_millis() as u64 {
            // Half-open: let the next call probe, rearm the timer so only one probe is admitted
            // per cooldown window.
            self.opened_at_ms.store(now_ms(), Ordering::Release);
            false
        } else {
            true
        }
    }

    fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
        self.opened_at_ms.store(0, Ordering::Release);
    }

    fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        if failures >= self.failure_threshold {
            self.opened_at_ms.store(now_ms(), Ordering::Release);
        }
    }
}

/// Wraps any [`DedupStore`] with a deadline and a circuit breaker, degrading open on failure
/// rather than blocking the hot path.
pub struct DedupClaimer<S> {
    store: S,
    breaker: CircuitBreaker,
}

impl<S: DedupStore> DedupClaimer<S> {
    pub fn new(store: S, failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            store,
            breaker: CircuitBreaker::new(failure_threshold, cooldown),
        }
    }

    /// `key` must already be tenant-namespaced by the caller.
    pub async fn claim(&self, key: &str, ttl: Duration, deadline: Duration) -> ClaimOutcome {
        if self.breaker.is_open() {
            warn!(key, "dedup circuit breaker open, degrading open");
            return ClaimOutcome::DegradedOpen;
        }

        match tokio::time::timeout(deadline, self.store.claim_if_absent(key, ttl)).await {
            Ok(Ok(fresh)) => {
                self.breaker.record_success();
                if fresh {
                    ClaimOutcome::Fresh
                } else {
                    ClaimOutcome::Duplicate
                }
            }
            Ok(Err(error)) => {
                self.breaker.record_failure();
                warn!(key, error = %error, "dedup store error, degrading open");
                ClaimOutcome::DegradedOpen
            }
            Err(_) => {
                self.breaker.record_failure();
                warn!(key, "dedup claim deadline exceeded, degrading open");
                ClaimOutcome::DegradedOpen
            }
        }
    }
}

#[async_trait::async_trait]
impl DedupStore for std::sync::Arc<dyn DedupStore> {
    async fn claim_if_absent(&self, key: &str, ttl: Duration) -> anyhow::Result<bool> {
        self.as_ref().claim_if_absent(key, ttl).await
    }
}

/// Namespaces a dedup key by tenant id so a claim in one tenant never affects another.
pub fn dedup_key(tenant_id: &str, click_id: &str) -> String {
    format!("{tenant_id}:{click_id}")
}

/// In-process TTL store, suitable standalone deployments and tests. A real fleet-wide deployment
/// would point [`DedupClaimer`] at a shared store instead.
#[derive(Default)]
pub struct LocalDedupStore {
    entries: ConcurrentHashMap<String, u64>,
}

#[async_trait::async_trait]
impl DedupStore for LocalDedupStore {
    async fn claim_if_absent(&self, key: &str, ttl: Duration) -> anyhow::Result<bool> {
        let now = now_ms();
        let expires_at = now + ttl.as_millis() as u64;

        let mut fresh = false;

        match self.entries.entry_async(key.to_owned()).await {
            scc::hash_map::Entry::Occupied(mut entry) => {
                if *entry.get() <= now {
                    // Expired: treat as a fresh claim and reset the TTL.
                    *entry.get_mut() = expires_at;
                    fresh = true;
                }
            }
            scc::hash_map::Entry::Vacant(entry) => {
                entry.insert_entry(expires_at);
                fresh = true;
            }
        }

        Ok(fresh)
    }
}

/// HTTP-backed implementation calling a shared external dedup service.
pub struct RemoteDedupStore {
    http: reqwest::Client,
    base_url: String,
}

impl RemoteDedupStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait::async_trait]
impl DedupStore for RemoteDedupStore {
    async fn claim_if_absent(&self, key: &str, ttl: Duration) -> anyhow::Result<bool> {
        let response = self
            .http
            .post(format!("{}/claim", self.base_url))
            .json(&serde_json::json!({ "key": key, "ttl_secs": ttl.as_secs() }))
            .send()
            .await?
            .error_for_status()?;

        #[derive(serde::Deserialize)]
        struct ClaimResponse {
            fresh: bool,
        }

        let body: ClaimResponse = response.json().await?;
        Ok(body.fresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn at_most_one_fresh_claim_per_key() {
        let store = LocalDedupStore::default();
        let claimer = DedupClaimer::new(store, 5, Duration::from_secs(1));

        let key = dedup_key("org_a", "click-1");
        let ttl = Duration::from_secs(5);
        let deadline = Duration::from_millis(50);

        let first = claimer.claim(&key, ttl, deadline).await;
        let second = claimer.claim(&key, ttl, deadline).await;

        assert_eq!(first, ClaimOutcome::Fresh);
        assert_eq!(second, ClaimOutcome::Duplicate);
    }

    #[tokio::test]
    async fn claims_are_tenant_namespaced() {
        let store = LocalDedupStore::default();
        let claimer = DedupClaimer::new(store, 5, Duration::from_secs(1));
        let ttl = Duration::from_secs(5);
        let deadline = Duration::from_millis(50);

        let a = claimer.claim(&dedup_key("org_a", "click-1"), ttl, deadline).await;
        let b = claimer.claim(&dedup_key("org_b", "click-1"), ttl, deadline).await;

        assert_eq!(a, ClaimOutcome::Fresh);
        assert_eq!(b, ClaimOutcome::Fresh);
    }

    struct AlwaysFailsStore;

    #[async_trait::async_trait]
    impl DedupStore for AlwaysFailsStore {
        async fn claim_if_absent(&self, _key: &str, _ttl: Duration) -> anyhow::Result<bool> {
            anyhow::bail!("simulated outage")
        }
    }

    #[tokio::test]
    async fn degrades_open_on_store_failure() {
        let claimer = DedupClaimer::new(AlwaysFailsStore, 5, Duration::from_secs(60));
        let outcome = claimer
            .claim("org_a:click-1", Duration::from_secs(5), Duration::from_millis(50))
            .await;
        assert_eq!(outcome, ClaimOutcome::DegradedOpen);
    }

    #[tokio::test]
    async fn breaker_opens_after_threshold_and_fails_fast() {
        let claimer = DedupClaimer::new(AlwaysFailsStore, 2, Duration::from_secs(60));

        let _ = claimer
            .claim("org_a:c1", Duration::from_secs(5), Duration::from_millis(50))
            .await;
        let _ = claimer
            .claim("org_a:c2", Duration::from_secs(5), Duration::from_millis(50))
            .await;

        assert!(claimer.breaker.is_open());
    }
}
