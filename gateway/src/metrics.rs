//! Lightweight in-process counters.
//!
//! A handful of `AtomicU64` counters exposed on `/metrics` in Prometheus text format — enough to
//! alert on queue saturation, sink failures, and permanent failures without pulling in a full
//! metrics registry.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct Metrics {
    pub dedup_claims_fresh: AtomicU64,
    pub dedup_claims_duplicate: AtomicU64,
    pub dedup_degraded_open: AtomicU64,
    pub pipeline_accepted: AtomicU64,
    pub pipeline_shed_to_dlq: AtomicU64,
    pub pipeline_rejected: AtomicU64,
    pub sink_batches_ok: AtomicU64,
    pub sink_batches_failed: AtomicU64,
    pub dlq_permanent_failures: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for (name, value) in [
            ("clickgate_dedup_claims_fresh_total", self.dedup_claims_fresh.load(Ordering::Relaxed)),
            ("clickgate_dedup_claims_duplicate_total", self.dedup_claims_duplicate.load(Ordering::Relaxed)),
            ("clickgate_dedup_degraded_open_total", self.dedup_degraded_open.load(Ordering::Relaxed)),
            ("clickgate_pipeline_accepted_total", self.pipeline_accepted.load(Ordering::Relaxed)),
            ("clickgate_pipeline_shed_to_dlq_total", self.pipeline_shed_to_dlq.load(Ordering::Relaxed)),
            ("clickgate_pipeline_rejected_total", self.pipeline_rejected.load(Ordering::Relaxed)),
            ("clickgate_sink_batches_ok_total", self.sink_batches_ok.load(Ordering::Relaxed)),
            ("clickgate_sink_batches_failed_total", self.sink_batches_failed.load(Ordering::Relaxed)),
            ("clickgate_dlq_permanent_failures_total", self.dlq_permanent_failures.load(Ordering::Relaxed)),
        ] {
            out.push_str(&format!("# TYPE {name} counter\n{name} {value}\n"));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_every_counter_name() {
        let metrics = Metrics::new();
        metrics.pipeline_accepted.fetch_add(3, Ordering::Relaxed);
        let rendered = metrics.render();

        assert!(rendered.contains("clickgate_pipeline_accepted_total 3"));
        assert!(rendered.contains("clickgate_dlq_permanent_failures_total 0"));
    }
}
