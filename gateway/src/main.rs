//! Process entry point: loads configuration, wires every collaborator behind its trait object,
//! spawns every background task under a shared [`ShutdownHandle`], and waits for a termination
//! signal before shutting down cooperatively. A single foreground process; no service wrapper.

#[macro_use]
extern crate tracing;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clickgate::config::ConfHandle;
use clickgate::dedup::{DedupClaimer, DedupStore, RemoteDedupStore};
use clickgate::identity::{IdentityClient, RemoteIdentityClient};
use clickgate::listener::GatewayListener;
use clickgate::log::ClickgateLog;
use clickgate::metrics::Metrics;
use clickgate::pipeline::{
    AsyncPipeline, Dlq, DlqReclaimerTask, FilePermanentFailureSink, PermanentFailureSink, RemoteDlq, RemoteEventSink,
    WorkerTask,
};
use clickgate::router::refresh::SnapshotRefreshTask;
use clickgate::router::{CampaignStore, RemoteCampaignStore, Router};
use clickgate::{Dedup, GatewayState};
use clickgate_task::{spawn_task, ChildTask, ShutdownHandle, ShutdownSignal, Task};

fn main() -> anyhow::Result<()> {
    let conf_handle = ConfHandle::init().context("unable to initialize configuration")?;
    let conf = conf_handle.get_conf();

    let _logger_guard =
        clickgate_log::init::<ClickgateLog>(&conf.log_path, &conf.log_directive, None).context("failed to setup logger")?;

    info!(version = env!("CARGO_PKG_VERSION"), instance_id = %conf.instance_id, "clickgate starting");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build async runtime")?;

    let Tasks {
        inner: _inner,
        shutdown_handle,
        shutdown_signal,
    } = runtime.block_on(spawn_tasks(conf_handle))?;

    // `all_closed` below waits on every clone of `shutdown_signal` being dropped. The template
    // held by `Tasks` for `register` is one such clone, so it must go before we wait on it.
    drop(shutdown_signal);

    runtime.block_on(wait_for_shutdown_signal());

    info!("shutdown signal received, stopping");
    shutdown_handle.signal();

    runtime.block_on(async {
        tokio::select! {
            _ = shutdown_handle.all_closed() => {
                debug!("all tasks closed gracefully");
            }
            _ = tokio::time::sleep(Duration::from_secs(10)) => {
                warn!("some tasks did not terminate in time");
            }
        }
    });

    runtime.shutdown_timeout(Duration::from_secs(3));

    Ok(())
}

/// Registry of every background task spawned by the process.
struct Tasks {
    inner: Vec<ChildTask<anyhow::Result<()>>>,
    shutdown_handle: ShutdownHandle,
    shutdown_signal: ShutdownSignal,
}

impl Tasks {
    fn new() -> Self {
        let (shutdown_handle, shutdown_signal) = ShutdownHandle::new();
        Self {
            inner: Vec::new(),
            shutdown_handle,
            shutdown_signal,
        }
    }

    fn register<T>(&mut self, task: T)
    where
        T: Task<Output = anyhow::Result<()>> + 'static,
    {
        self.inner.push(spawn_task(task, self.shutdown_signal.clone()));
    }
}

async fn spawn_tasks(conf_handle: ConfHandle) -> anyhow::Result<Tasks> {
    let conf = conf_handle.get_conf();
    let mut tasks = Tasks::new();

    let identity_client: Arc<dyn IdentityClient> = Arc::new(RemoteIdentityClient::new(conf.identity_addr.clone()));

    let dedup_store: Arc<dyn DedupStore> = Arc::new(RemoteDedupStore::new(conf.dedup_addr.clone()));
    let dedup: Arc<Dedup> = Arc::new(DedupClaimer::new(
        dedup_store,
        conf.dedup_breaker_failure_threshold,
        conf.dedup_breaker_cooldown,
    ));

    let campaign_store: Arc<dyn CampaignStore> = Arc::new(RemoteCampaignStore::new(conf.campaign_store_addr.clone()));
    let router = Router::new();

    let dlq: Arc<dyn Dlq> = Arc::new(RemoteDlq::new(conf.dlq_addr.clone()));

    let (pipeline, shared_receiver) = AsyncPipeline::bounded(
        conf.queue_capacity,
        conf.queue_warning_threshold_pct,
        conf.queue_shed_threshold_pct,
        dlq.clone(),
    );

    let metrics = Arc::new(Metrics::new());

    let state = GatewayState {
        conf_handle: conf_handle.clone(),
        identity_client,
        dedup,
        router: router.clone(),
        campaign_store: campaign_store.clone(),
        pipeline,
        metrics: metrics.clone(),
    };

    tasks.register(
        GatewayListener::bind(conf.listen_addr, state.clone())
            .await
            .context("failed to bind listener")?,
    );

    tasks.register(SnapshotRefreshTask {
        store: campaign_store,
        router,
        interval: conf.snapshot_refresh_interval,
    });

    let sink: Arc<dyn clickgate::pipeline::EventSink> = Arc::new(RemoteEventSink::new(conf.sink_addr.clone()));

    for worker_id in 0..conf.worker_count {
        tasks.register(WorkerTask {
            worker_id,
            receiver: shared_receiver.clone(),
            sink: sink.clone(),
            dlq: dlq.clone(),
            batch_max_size: conf.sink_batch_max_size,
            batch_max_age: conf.sink_batch_max_age,
            append_deadline: conf.sink_append_deadline,
            metrics: metrics.clone(),
        });
    }

    let permanent_failure_sink: Arc<dyn PermanentFailureSink> =
        Arc::new(FilePermanentFailureSink::new(conf.permanent_failure_path.clone()));

    tasks.register(DlqReclaimerTask {
        dlq,
        sink,
        permanent_failure_sink,
        retry_ceiling: conf.dlq_retry_ceiling,
        backoff_base: conf.dlq_backoff_base,
        backoff_max: conf.dlq_backoff_max,
        append_deadline: conf.sink_append_deadline,
        poll_interval: conf.dlq_poll_interval,
        batch_size: conf.dlq_reclaim_batch_size,
        metrics,
    });

    tasks.register(clickgate_log::LogDeleterTask::<ClickgateLog>::new(conf.log_path.clone()));

    Ok(tasks)
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
    let mut interrupt = signal(SignalKind::interrupt()).expect("failed to register SIGINT handler");

    tokio::select! {
        _ = terminate.recv() => {}
        _ = interrupt.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
