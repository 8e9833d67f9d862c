use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};
use std::sync::{LazyLock, Once};

pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Request counters
pub static REQUESTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("sg_gateway_requests_total", "Total number of gateway requests"),
        &["route", "status"],
    )
    .expect("valid metric definition")
});

pub static AUTH_FAILURES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "sg_gateway_auth_failures_total",
        "Requests rejected by token validation",
    )
    .expect("valid metric definition")
});

// Upstream metrics
pub static PROXY_REQUESTS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "sg_gateway_upstream_requests_total",
        "Total number of single-target forwards",
    )
    .expect("valid metric definition")
});

pub static PROXY_LATENCY: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "sg_gateway_upstream_latency_seconds",
            "Single-target upstream latency",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
    )
    .expect("valid metric definition")
});

pub static FANOUT_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("sg_gateway_fanout_total", "Fan-out races by outcome"),
        &["outcome"],
    )
    .expect("valid metric definition")
});

static REGISTER: Once = Once::new();

/// Register all metrics with the registry. Safe to call more than once.
pub fn register_metrics() {
    REGISTER.call_once(|| {
        let collectors: [Box<dyn prometheus::core::Collector>; 5] = [
            Box::new(REQUESTS_TOTAL.clone()),
            Box::new(AUTH_FAILURES_TOTAL.clone()),
            Box::new(PROXY_REQUESTS_TOTAL.clone()),
            Box::new(PROXY_LATENCY.clone()),
            Box::new(FANOUT_TOTAL.clone()),
        ];
        for collector in collectors {
            if let Err(e) = REGISTRY.register(collector) {
                tracing::error!(error = %e, "failed to register metric");
            }
        }
    });
}
