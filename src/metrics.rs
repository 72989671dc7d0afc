use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Global metrics registry shared across the pipeline, SWR engine and store.
#[derive(Clone)]
pub struct GatewayMetrics {
    pub registry: Registry,
    /// Total HTTP requests processed, labeled by method and status code.
    pub http_requests_total: IntCounterVec,
    /// Cache outcomes, labeled hit / miss / bypass / error.
    pub cache_events_total: IntCounterVec,
    /// Background revalidations, labeled by outcome (refreshed / evicted / collapsed).
    pub revalidations_total: IntCounterVec,
    /// Keys currently being revalidated in the background.
    pub inflight_revalidations: IntGauge,
    /// Current byte footprint of the cache store.
    pub cache_used_bytes: IntGauge,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let http_requests_total = IntCounterVec::new(
            Opts::new("stratus_http_requests_total", "Total HTTP requests processed"),
            &["method", "status"],
        )
        .unwrap();

        let cache_events_total = IntCounterVec::new(
            Opts::new("stratus_cache_events_total", "Cache lookup outcomes"),
            &["event"],
        )
        .unwrap();

        let revalidations_total = IntCounterVec::new(
            Opts::new(
                "stratus_revalidations_total",
                "Background revalidation outcomes",
            ),
            &["outcome"],
        )
        .unwrap();

        let inflight_revalidations = IntGauge::new(
            "stratus_inflight_revalidations",
            "Keys currently being revalidated",
        )
        .unwrap();

        let cache_used_bytes =
            IntGauge::new("stratus_cache_used_bytes", "Cache byte footprint").unwrap();

        registry
            .register(Box::new(http_requests_total.clone()))
            .unwrap();
        registry
            .register(Box::new(cache_events_total.clone()))
            .unwrap();
        registry
            .register(Box::new(revalidations_total.clone()))
            .unwrap();
        registry
            .register(Box::new(inflight_revalidations.clone()))
            .unwrap();
        registry
            .register(Box::new(cache_used_bytes.clone()))
            .unwrap();

        Self {
            registry,
            http_requests_total,
            cache_events_total,
            revalidations_total,
            inflight_revalidations,
            cache_used_bytes,
        }
    }

    /// Renders the registry in the Prometheus text exposition format.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buf = Vec::new();
        if encoder.encode(&self.registry.gather(), &mut buf).is_err() {
            return String::new();
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

impl Default for GatewayMetrics {
    fn default() -> Self {
        Self::new()
    }
}
