//! Prometheus metrics instrumentation for pcci.
//!
//! All metrics are conditionally compiled behind the `metrics` feature flag.
//! A worker lives for a single job, so there is no scrape endpoint: the
//! binary writes [`gather_metrics`] output to a textfile for a node
//! exporter to pick up.
//!
//! # Metrics
//!
//! ## Counters
//! - `pcci_registrations_refused_total` - Workers that stood down at capacity
//! - `pcci_jobs_leased_total` - Jobs popped from the queue
//! - `pcci_attempts_total` - Provision+run attempts, by result
//! - `pcci_jobs_reported_total` - Published artifacts, by verdict
//! - `pcci_harness_failures_total` - Reports flagged as harness failures
//!
//! ## Histograms
//! - `pcci_attempt_duration_seconds` - Attempt wall-clock duration
#![cfg(feature = "metrics")]

use prometheus::{exponential_buckets, CounterVec, HistogramVec, IntCounter, Opts, Registry};
use std::sync::LazyLock;

/// Global Prometheus registry for pcci metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

pub static REGISTRATIONS_REFUSED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "pcci_registrations_refused_total",
        "Workers that stood down because the worker ceiling was reached",
    )
    .expect("pcci_registrations_refused_total metric creation failed")
});

/// Labels:
/// - `organization`: The job's organization
pub static JOBS_LEASED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new("pcci_jobs_leased_total", "Total number of jobs leased");
    CounterVec::new(opts, &["organization"])
        .expect("pcci_jobs_leased_total metric creation failed")
});

/// Labels:
/// - `result`: `pass` or `fail`
pub static ATTEMPTS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new("pcci_attempts_total", "Total number of harness attempts");
    CounterVec::new(opts, &["result"]).expect("pcci_attempts_total metric creation failed")
});

/// Labels:
/// - `organization`: The job's organization
/// - `verdict`: `PASS` or `FAIL`
pub static JOBS_REPORTED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new("pcci_jobs_reported_total", "Total number of published artifacts");
    CounterVec::new(opts, &["organization", "verdict"])
        .expect("pcci_jobs_reported_total metric creation failed")
});

pub static HARNESS_FAILURES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "pcci_harness_failures_total",
        "Reports whose harness output matched a transient-failure signature",
    )
    .expect("pcci_harness_failures_total metric creation failed")
});

/// Labels:
/// - `result`: `pass` or `fail`
pub static ATTEMPT_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let buckets = exponential_buckets(30.0, 2.0, 8).expect("bucket creation failed");
    let opts = prometheus::HistogramOpts::new(
        "pcci_attempt_duration_seconds",
        "Harness attempt duration in seconds",
    )
    .buckets(buckets);
    HistogramVec::new(opts, &["result"])
        .expect("pcci_attempt_duration_seconds metric creation failed")
});

/// Register all metrics with the global registry.
///
/// This function is idempotent - calling it multiple times is safe.
pub fn init_metrics() -> anyhow::Result<()> {
    let registry = &*REGISTRY;

    for metric in [
        Box::new(REGISTRATIONS_REFUSED_TOTAL.clone()) as Box<dyn prometheus::core::Collector>,
        Box::new(JOBS_LEASED_TOTAL.clone()),
        Box::new(ATTEMPTS_TOTAL.clone()),
        Box::new(JOBS_REPORTED_TOTAL.clone()),
        Box::new(HARNESS_FAILURES_TOTAL.clone()),
        Box::new(ATTEMPT_DURATION_SECONDS.clone()),
    ] {
        if let Err(e) = registry.register(metric) {
            let msg = e.to_string();
            if !msg.contains("Duplicate metrics collector registration attempted") {
                return Err(e.into());
            }
        }
    }

    Ok(())
}

pub fn record_registration_refused() {
    REGISTRATIONS_REFUSED_TOTAL.inc();
}

pub fn record_job_leased(organization: &str) {
    JOBS_LEASED_TOTAL.with_label_values(&[organization]).inc();
}

pub fn record_attempt(result: &str, duration_secs: f64) {
    ATTEMPTS_TOTAL.with_label_values(&[result]).inc();
    ATTEMPT_DURATION_SECONDS
        .with_label_values(&[result])
        .observe(duration_secs);
}

pub fn record_job_reported(organization: &str, verdict: &str, harness_failure: bool) {
    JOBS_REPORTED_TOTAL
        .with_label_values(&[organization, verdict])
        .inc();
    if harness_failure {
        HARNESS_FAILURES_TOTAL.inc();
    }
}

/// Gather all registered metrics in Prometheus text format.
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode_to_string(&metric_families)
        .map_err(Into::into)
}
