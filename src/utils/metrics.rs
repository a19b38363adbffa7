use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    HistogramVec, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::LazyLock;

// --- Request Metrics ---

/// Total number of inbound requests accepted by the proxy.
///
/// Use it to monitor throughput and detect traffic spikes or drops.
/// Example Prometheus query: `rate(proxy_requests_total[5m])`.
pub static PROXY_REQUESTS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!("proxy_requests_total", "Total number of inbound proxied requests")
        .unwrap()
});

/// Requests successfully forwarded, per backend.
///
/// A forward counts as successful when the backend produced a response at all;
/// the response status is relayed verbatim and not judged here.
/// Example query: `rate(proxy_requests_forwarded_total{backend="..."}[5m])`.
pub static PROXY_REQUESTS_FORWARDED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "proxy_requests_forwarded_total",
        "Requests successfully forwarded per backend",
        &["backend"]
    )
    .unwrap()
});

/// Forwarding attempts that failed at the transport layer, per backend.
pub static PROXY_FORWARD_ERRORS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "proxy_forward_errors_total",
        "Transport-level forwarding failures per backend",
        &["backend"]
    )
    .unwrap()
});

/// Failover retries: dispatch attempts re-run against another endpoint after
/// a transport failure. Bounded at pool size per inbound request.
pub static FAILOVER_RETRIES: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!("failover_retries_total", "Dispatch retries after a forward failure")
        .unwrap()
});

/// Requests answered 502 because no live endpoint remained.
///
/// Any sustained rate here means the whole pool is unreachable.
/// Example query: `rate(bad_gateway_total[5m])`.
pub static BAD_GATEWAY_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!("bad_gateway_total", "Requests rejected with 502, pool exhausted")
        .unwrap()
});

// --- Pool State Metrics ---

/// Failed liveness probes per backend.
pub static PROBE_FAILURES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "probe_failures_total",
        "Failed TCP liveness probes per backend",
        &["backend"]
    )
    .unwrap()
});

/// Number of endpoints currently believed reachable.
///
/// Compare against `total_endpoints` for a pool health ratio.
pub static LIVE_ENDPOINTS: LazyLock<IntGauge> = LazyLock::new(|| {
    register_int_gauge!("live_endpoints", "Number of endpoints currently believed live").unwrap()
});

/// Total number of configured endpoints, fixed at startup.
pub static TOTAL_ENDPOINTS: LazyLock<IntGauge> = LazyLock::new(|| {
    register_int_gauge!("total_endpoints", "Total number of configured endpoints").unwrap()
});

/// 1 while every configured endpoint is believed unreachable, else 0.
pub static ALL_DOWN: LazyLock<IntGauge> = LazyLock::new(|| {
    register_int_gauge!("all_connections_down", "Whether the entire pool is unreachable").unwrap()
});

// --- Latency Metrics ---

/// Histogram of forward durations in seconds per backend, failures included.
///
/// Example query:
/// `histogram_quantile(0.95, sum(rate(proxy_forward_duration_seconds_bucket[5m])) by (le))`.
pub static FORWARD_LATENCY: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "proxy_forward_duration_seconds",
        "Forward duration in seconds per backend",
        &["backend"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]
    )
    .unwrap()
});
