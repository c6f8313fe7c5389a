//! Configuration loading and validation.
//!
//! Two-stage pattern: a serializable [`ConfFile`] is loaded from a JSON file then layered with
//! `CLICKGATE_*` environment variable overrides (via `envy`), and converted into an immutable
//! [`Conf`] that the rest of the process consumes. [`ConfHandle`] wraps the result in a lock so
//! it could be hot-reloaded later without readers ever observing a half-built value.

use std::env;
use std::sync::Arc;

use anyhow::Context as _;
use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const CONFIG_PATH_ENV: &str = "CLICKGATE_CONFIG_PATH";
const ENV_PREFIX: &str = "CLICKGATE_";

/// On-disk / environment representation. Every field has a sane default so a fresh deployment
/// can start from an empty file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfFile {
    /// Stable instance id, generated on first boot and persisted thereafter. `None` until [`ConfHandle::init`] fills it in for a fresh config file.
    pub instance_id: Option<Uuid>,

    pub listen_addr: String,
    pub body_capture_cap_bytes: usize,
    pub handler_deadline_ms: u64,

    pub identity_addr: String,
    pub identity_call_timeout_ms: u64,

    pub dedup_addr: String,
    pub dedup_window_secs: u64,
    pub dedup_call_deadline_ms: u64,
    pub dedup_breaker_failure_threshold: u32,
    pub dedup_breaker_cooldown_ms: u64,

    pub sink_addr: String,
    pub sink_batch_max_size: usize,
    pub sink_batch_max_age_ms: u64,
    pub sink_append_deadline_ms: u64,

    pub worker_count: usize,
    pub queue_capacity: usize,
    pub queue_warning_threshold_pct: u8,
    pub queue_shed_threshold_pct: u8,

    pub dlq_addr: String,
    pub dlq_retry_ceiling: u32,
    pub dlq_backoff_base_ms: u64,
    pub dlq_backoff_max_ms: u64,
    pub dlq_poll_interval_ms: u64,
    pub dlq_reclaim_batch_size: usize,
    pub permanent_failure_path: Utf8PathBuf,

    pub snapshot_refresh_interval_secs: u64,
    pub campaign_store_addr: String,

    pub log_directive: String,
    pub log_path: Utf8PathBuf,
}

impl Default for ConfFile {
    fn default() -> Self {
        Self {
            instance_id: None,

            listen_addr: "0.0.0.0:8080".to_owned(),
            body_capture_cap_bytes: 16 * 1024,
            handler_deadline_ms: 45,

            identity_addr: "http://127.0.0.1:9000".to_owned(),
            identity_call_timeout_ms: 10,

            dedup_addr: "http://127.0.0.1:9001".to_owned(),
            dedup_window_secs: 5,
            dedup_call_deadline_ms: 10,
            dedup_breaker_failure_threshold: 5,
            dedup_breaker_cooldown_ms: 2_000,

            sink_addr: "http://127.0.0.1:9002".to_owned(),
            sink_batch_max_size: 256,
            sink_batch_max_age_ms: 250,
            sink_append_deadline_ms: 2_000,

            worker_count: 4,
            queue_capacity: 100_000,
            queue_warning_threshold_pct: 70,
            queue_shed_threshold_pct: 90,

            dlq_addr: "http://127.0.0.1:9003".to_owned(),
            dlq_retry_ceiling: 8,
            dlq_backoff_base_ms: 500,
            dlq_backoff_max_ms: 60_000,
            dlq_poll_interval_ms: 1_000,
            dlq_reclaim_batch_size: 64,
            permanent_failure_path: Utf8PathBuf::from("./permanent-failures.ndjson"),

            snapshot_refresh_interval_secs: 5,
            campaign_store_addr: "http://127.0.0.1:9004".to_owned(),

            log_directive: "info".to_owned(),
            log_path: Utf8PathBuf::from("./clickgate.log"),
        }
    }
}

/// Validated, immutable configuration consumed by the rest of the process.
#[derive(Debug, Clone)]
pub struct Conf {
    /// Surfaced on `/health` for fleet operators.
    pub instance_id: Uuid,
    pub hostname: String,

    pub listen_addr: std::net::SocketAddr,
    pub body_capture_cap_bytes: usize,
    pub handler_deadline: std::time::Duration,

    pub identity_addr: String,
    pub identity_call_timeout: std::time::Duration,

    pub dedup_addr: String,
    pub dedup_window: std::time::Duration,
    pub dedup_call_deadline: std::time::Duration,
    pub dedup_breaker_failure_threshold: u32,
    pub dedup_breaker_cooldown: std::time::Duration,

    pub sink_addr: String,
    pub sink_batch_max_size: usize,
    pub sink_batch_max_age: std::time::Duration,
    pub sink_append_deadline: std::time::Duration,

    pub worker_count: usize,
    pub queue_capacity: usize,
    pub queue_warning_threshold_pct: u8,
    pub queue_shed_threshold_pct: u8,

    pub dlq_addr: String,
    pub dlq_retry_ceiling: u32,
    pub dlq_backoff_base: std::time::Duration,
    pub dlq_backoff_max: std::time::Duration,
    pub dlq_poll_interval: std::time::Duration,
    pub dlq_reclaim_batch_size: usize,
    pub permanent_failure_path: Utf8PathBuf,

    pub snapshot_refresh_interval: std::time::Duration,
    pub campaign_store_addr: String,

    pub log_directive: String,
    pub log_path: Utf8PathBuf,
}

impl Conf {
    pub fn from_conf_file(file: &ConfFile) -> anyhow::Result<Self> {
        anyhow::ensure!(file.worker_count > 0, "worker_count must be at least 1");
        anyhow::ensure!(file.queue_capacity > 0, "queue_capacity must be at least 1");
        anyhow::ensure!(
            file.queue_warning_threshold_pct < file.queue_shed_threshold_pct,
            "queue_warning_threshold_pct must be lower than queue_shed_threshold_pct"
        );
        anyhow::ensure!(
            file.queue_shed_threshold_pct <= 100,
            "queue_shed_threshold_pct must be a percentage"
        );
        anyhow::ensure!(
            file.sink_batch_max_size > 0,
            "sink_batch_max_size must be at least 1"
        );
        anyhow::ensure!(
            file.body_capture_cap_bytes > 0,
            "body_capture_cap_bytes must be at least 1"
        );
        anyhow::ensure!(file.dlq_retry_ceiling > 0, "dlq_retry_ceiling must be at least 1");
        anyhow::ensure!(file.dlq_reclaim_batch_size > 0, "dlq_reclaim_batch_size must be at least 1");

        let listen_addr = file
            .listen_addr
            .parse()
            .with_context(|| format!("invalid listen_addr: {}", file.listen_addr))?;

        Ok(Self {
            instance_id: file.instance_id.unwrap_or_else(Uuid::new_v4),
            hostname: resolve_hostname(),

            listen_addr,
            body_capture_cap_bytes: file.body_capture_cap_bytes,
            handler_deadline: std::time::Duration::from_millis(file.handler_deadline_ms),

            identity_addr: file.identity_addr.clone(),
            identity_call_timeout: std::time::Duration::from_millis(file.identity_call_timeout_ms),

            dedup_addr: file.dedup_addr.clone(),
            dedup_window: std::time::Duration::from_secs(file.dedup_window_secs),
            dedup_call_deadline: std::time::Duration::from_millis(file.dedup_call_deadline_ms),
            dedup_breaker_failure_threshold: file.dedup_breaker_failure_threshold,
            dedup_breaker_cooldown: std::time::Duration::from_millis(file.dedup_breaker_cooldown_ms),

            sink_addr: file.sink_addr.clone(),
            sink_batch_max_size: file.sink_batch_max_size,
            sink_batch_max_age: std::time::Duration::from_millis(file.sink_batch_max_age_ms),
            sink_append_deadline: std::time::Duration::from_millis(file.sink_append_deadline_ms),

            worker_count: file.worker_count,
            queue_capacity: file.queue_capacity,
            queue_warning_threshold_pct: file.queue_warning_threshold_pct,
            queue_shed_threshold_pct: file.queue_shed_threshold_pct,

            dlq_addr: file.dlq_addr.clone(),
            dlq_retry_ceiling: file.dlq_retry_ceiling,
            dlq_backoff_base: std::time::Duration::from_millis(file.dlq_backoff_base_ms),
            dlq_backoff_max: std::time::Duration::from_millis(file.dlq_backoff_max_ms),
            dlq_poll_interval: std::time::Duration::from_millis(file.dlq_poll_interval_ms),
            dlq_reclaim_batch_size: file.dlq_reclaim_batch_size,
            permanent_failure_path: file.permanent_failure_path.clone(),

            snapshot_refresh_interval: std::time::Duration::from_secs(file.snapshot_refresh_interval_secs),
            campaign_store_addr: file.campaign_store_addr.clone(),

            log_directive: file.log_directive.clone(),
            log_path: file.log_path.clone(),
        })
    }
}

/// Configuration handle, source of truth for current configuration state.
#[derive(Clone)]
pub struct ConfHandle {
    inner: Arc<parking_lot::RwLock<Arc<Conf>>>,
}

impl ConfHandle {
    /// Loads configuration from the path in `CLICKGATE_CONFIG_PATH` (or a sane default path),
    /// merges `CLICKGATE_*` environment overrides, and validates the result. Startup is
    /// rejected on invalid values.
    pub fn init() -> anyhow::Result<Self> {
        let mut conf_file = load_conf_file()?;

        let instance_id_was_missing = conf_file.instance_id.is_none();
        let conf = Conf::from_conf_file(&conf_file).context("invalid configuration")?;

        if instance_id_was_missing {
            conf_file.instance_id = Some(conf.instance_id);
            persist_instance_id(&conf_file);
        }

        Ok(Self {
            inner: Arc::new(parking_lot::RwLock::new(Arc::new(conf))),
        })
    }

    #[doc(hidden)]
    pub fn mock(conf_file: ConfFile) -> anyhow::Result<Self> {
        let conf = Conf::from_conf_file(&conf_file)?;
        Ok(Self {
            inner: Arc::new(parking_lot::RwLock::new(Arc::new(conf))),
        })
    }

    /// Returns current configuration state (do not hold it forever as it may become outdated).
    pub fn get_conf(&self) -> Arc<Conf> {
        self.inner.read().clone()
    }
}

/// Best-effort: persists a freshly-generated instance id back to the config file on disk so it
/// survives restarts. Absence of `CLICKGATE_CONFIG_PATH` just means there is no file
/// to write back to; that is not an error.
fn persist_instance_id(conf_file: &ConfFile) {
    let Ok(path) = env::var(CONFIG_PATH_ENV) else {
        return;
    };

    match serde_json::to_string_pretty(conf_file) {
        Ok(json) => {
            if let Err(error) = std::fs::write(&path, json) {
                warn!(%error, path, "failed to persist generated instance id to config file");
            }
        }
        Err(error) => warn!(%error, "failed to serialize config file while persisting instance id"),
    }
}

fn resolve_hostname() -> String {
    env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "unknown".to_owned())
}

fn load_conf_file() -> anyhow::Result<ConfFile> {
    let base = if let Ok(path) = env::var(CONFIG_PATH_ENV) {
        let contents = std::fs::read_to_string(&path).with_context(|| format!("failed to read {path}"))?;
        serde_json::from_str(&contents).with_context(|| format!("invalid JSON config at {path}"))?
    } else {
        ConfFile::default()
    };

    envy::prefixed(ENV_PREFIX)
        .from_env::<EnvOverrides>()
        .context("invalid CLICKGATE_* environment variables")?
        .apply(base)
}

/// Every field optional: only variables actually present in the environment override the file.
#[derive(Debug, Deserialize, Default)]
struct EnvOverrides {
    listen_addr: Option<String>,
    body_capture_cap_bytes: Option<usize>,
    handler_deadline_ms: Option<u64>,
    identity_addr: Option<String>,
    identity_call_timeout_ms: Option<u64>,
    dedup_addr: Option<String>,
    dedup_window_secs: Option<u64>,
    dedup_call_deadline_ms: Option<u64>,
    sink_addr: Option<String>,
    sink_batch_max_size: Option<usize>,
    sink_batch_max_age_ms: Option<u64>,
    sink_append_deadline_ms: Option<u64>,
    worker_count: Option<usize>,
    queue_capacity: Option<usize>,
    dlq_addr: Option<String>,
    dlq_retry_ceiling: Option<u32>,
    snapshot_refresh_interval_secs: Option<u64>,
    campaign_store_addr: Option<String>,
    log_directive: Option<String>,
}

impl EnvOverrides {
    fn apply(self, mut base: ConfFile) -> anyhow::Result<ConfFile> {
        if let Some(v) = self.listen_addr {
            base.listen_addr = v;
        }
        if let Some(v) = self.body_capture_cap_bytes {
            base.body_capture_cap_bytes = v;
        }
        if let Some(v) = self.handler_deadline_ms {
            base.handler_deadline_ms = v;
        }
        if let Some(v) = self.identity_addr {
            base.identity_addr = v;
        }
        if let Some(v) = self.identity_call_timeout_ms {
            base.identity_call_timeout_ms = v;
        }
        if let Some(v) = self.dedup_addr {
            base.dedup_addr = v;
        }
        if let Some(v) = self.dedup_window_secs {
            base.dedup_window_secs = v;
        }
        if let Some(v) = self.dedup_call_deadline_ms {
            base.dedup_call_deadline_ms = v;
        }
        if let Some(v) = self.sink_addr {
            base.sink_addr = v;
        }
        if let Some(v) = self.sink_batch_max_size {
            base.sink_batch_max_size = v;
        }
        if let Some(v) = self.sink_batch_max_age_ms {
            base.sink_batch_max_age_ms = v;
        }
        if let Some(v) = self.sink_append_deadline_ms {
            base.sink_append_deadline_ms = v;
        }
        if let Some(v) = self.worker_count {
            base.worker_count = v;
        }
        if let Some(v) = self.queue_capacity {
            base.queue_capacity = v;
        }
        if let Some(v) = self.dlq_addr {
            base.dlq_addr = v;
        }
        if let Some(v) = self.dlq_retry_ceiling {
            base.dlq_retry_ceiling = v;
        }
        if let Some(v) = self.snapshot_refresh_interval_secs {
            base.snapshot_refresh_interval_secs = v;
        }
        if let Some(v) = self.campaign_store_addr {
            base.campaign_store_addr = v;
        }
        if let Some(v) = self.log_directive {
            base.log_directive = v;
        }

        Ok(base)
    }
}
