//! Prometheus metrics for cache operations.
//!
//! Each worker process registers against its own [`REGISTRY`] — metrics are
//! per-process, not aggregated across the shared table, since there is no
//! collector process in this architecture to scrape a single merged set.

use prometheus::{CounterVec, Gauge, Histogram, HistogramOpts, Opts, Registry};
use std::sync::LazyLock;

/// Per-process metrics registry.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Completed cache operations, labeled by command (`get`/`set`) and outcome
/// (`hit`/`miss`/`stored`/`error`).
pub static OPS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let counter = CounterVec::new(
        Opts::new("ttlcached_ops_total", "Cache operations processed"),
        &["command", "outcome"],
    )
    .unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

/// Number of occupied slots in the shared table, as observed by this process
/// the last time it touched the table. Not a live cross-process gauge —
/// each worker and the janitor update it from their own vantage point.
pub static TABLE_OCCUPANCY: LazyLock<Gauge> = LazyLock::new(|| {
    let gauge = Gauge::new("ttlcached_table_occupancy", "Occupied slots in the shared table").unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

/// Connections this worker is currently servicing.
pub static ACTIVE_CONNECTIONS: LazyLock<Gauge> = LazyLock::new(|| {
    let gauge = Gauge::new("ttlcached_active_connections", "Connections currently open on this worker").unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

/// Wall-clock time to hold the table lock and complete one `get`/`set`.
pub static OP_LATENCY_SECONDS: LazyLock<Histogram> = LazyLock::new(|| {
    let histogram = Histogram::with_opts(
        HistogramOpts::new("ttlcached_op_latency_seconds", "Time holding the table lock per operation")
            .buckets(vec![0.00001, 0.00005, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1]),
    )
    .unwrap();
    REGISTRY.register(Box::new(histogram.clone())).unwrap();
    histogram
});

/// Encode this process's metrics in Prometheus text exposition format.
pub fn encode_metrics() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}
