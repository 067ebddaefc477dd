//! Per-process counters/histograms: one `Arc`-wrapped struct built once per
//! binary from the shared meter and cloned into every loop/handler that
//! needs to record something.

use std::sync::Arc;

use opentelemetry::metrics::{Counter, Histogram};
use opentelemetry::KeyValue;

#[derive(Clone)]
pub struct DppTelemetry {
    inner: Arc<Inner>,
}

struct Inner {
    admission_total: Counter<u64>,
    worker_jobs_total: Counter<u64>,
    reaper_reconciled_total: Counter<u64>,
    reconciler_cases_total: Counter<u64>,
    claim_lost_total: Counter<u64>,

    tick_ms: Histogram<u64>,
    finalize_ms: Histogram<u64>,
}

impl DppTelemetry {
    pub fn new(service_name: &'static str) -> Self {
        let meter = crate::meter(service_name);

        let admission_total = meter
            .u64_counter("dpp.admission_total")
            .with_description("Total admission attempts, partitioned by outcome")
            .build();
        let worker_jobs_total = meter
            .u64_counter("dpp.worker_jobs_total")
            .with_description("Total worker job executions, partitioned by outcome")
            .build();
        let reaper_reconciled_total = meter
            .u64_counter("dpp.reaper_reconciled_total")
            .with_description("Total timed-out runs finalized by the Reaper")
            .build();
        let reconciler_cases_total = meter
            .u64_counter("dpp.reconciler_cases_total")
            .with_description("Total stuck-claim recoveries, partitioned by recovery case")
            .build();
        let claim_lost_total = meter
            .u64_counter("dpp.claim_lost_total")
            .with_description("Total finalize claim races lost, partitioned by component")
            .build();

        let tick_ms = meter
            .u64_histogram("dpp.tick_ms")
            .with_description("Supervisor loop sweep runtime")
            .with_unit("ms")
            .build();
        let finalize_ms = meter
            .u64_histogram("dpp.finalize_ms")
            .with_description("Worker execute-and-finalize runtime")
            .with_unit("ms")
            .build();

        Self {
            inner: Arc::new(Inner {
                admission_total,
                worker_jobs_total,
                reaper_reconciled_total,
                reconciler_cases_total,
                claim_lost_total,
                tick_ms,
                finalize_ms,
            }),
        }
    }

    pub fn admission(&self, status: &'static str) {
        self.inner.admission_total.add(1, &[KeyValue::new("status", status)]);
    }

    pub fn worker_job(&self, status: &'static str) {
        self.inner.worker_jobs_total.add(1, &[KeyValue::new("status", status)]);
    }

    pub fn reaper_reconciled(&self) {
        self.inner.reaper_reconciled_total.add(1, &[]);
    }

    pub fn reconciler_case(&self, case: &'static str) {
        self.inner.reconciler_cases_total.add(1, &[KeyValue::new("case", case)]);
    }

    pub fn claim_lost(&self, component: &'static str) {
        self.inner.claim_lost_total.add(1, &[KeyValue::new("component", component)]);
    }

    pub fn tick_ms(&self, component: &'static str, ms: u64) {
        self.inner.tick_ms.record(ms, &[KeyValue::new("component", component)]);
    }

    pub fn finalize_ms(&self, ms: u64) {
        self.inner.finalize_ms.record(ms, &[]);
    }
}
