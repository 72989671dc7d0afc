//! Stale-while-revalidate engine. A cache hit is answered immediately from
//! the stored entry while a background task refreshes it; a miss runs the
//! handler synchronously and stores the canonical encoding. Revalidation is
//! single-flight per key, and a failed revalidation deletes the entry so an
//! origin outage can never pin ever-staler data in the cache.

use std::sync::Arc;

use dashmap::DashSet;
use hyper::Method;
use tracing::{debug, warn};

use crate::cache::entry::CachedEntry;
use crate::cache::store::CacheStore;
use crate::cache::transcode::{self, store_with_timestamp};
use crate::codec::{Encoding, EncodingPolicy};
use crate::errors::GatewayError;
use crate::metrics::GatewayMetrics;
use crate::router::{GatewayRequest, Params, RouteSpec};

/// How a response was produced, for the `X-Cache` header and the access log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
    Bypass,
}

impl CacheStatus {
    /// The `X-Cache` header value. Bypassed requests are indistinguishable
    /// from misses on the wire.
    pub fn header_value(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss | CacheStatus::Bypass => "MISS",
        }
    }

    pub fn log_label(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "hit",
            CacheStatus::Miss => "miss",
            CacheStatus::Bypass => "bypass",
        }
    }
}

/// The engine's answer: an entry ready to emit (already matching the
/// client's acceptable encodings) and how it was obtained.
pub struct SwrOutcome {
    pub entry: Arc<CachedEntry>,
    pub status: CacheStatus,
}

/// Methods eligible for cache participation.
fn is_safe_method(method: &Method) -> bool {
    method == Method::GET || method == Method::HEAD || method == Method::OPTIONS
}

pub struct SwrEngine {
    store: Arc<CacheStore>,
    policy: EncodingPolicy,
    metrics: Arc<GatewayMetrics>,
    /// Keys currently being refreshed. Test-and-insert is atomic, which is
    /// what enforces at most one revalidation per key.
    in_flight: DashSet<String>,
}

impl SwrEngine {
    pub fn new(
        store: Arc<CacheStore>,
        policy: EncodingPolicy,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        Self {
            store,
            policy,
            metrics,
            in_flight: DashSet::new(),
        }
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub fn policy(&self) -> &EncodingPolicy {
        &self.policy
    }

    /// Number of in-flight background revalidations. Test hook.
    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    /// The decision procedure: serve from cache when possible, refresh in
    /// the background, fall through to the handler otherwise.
    pub async fn serve(
        self: &Arc<Self>,
        req: GatewayRequest,
        route: &RouteSpec,
        params: Params,
        key: &str,
        acceptable: &[Encoding],
    ) -> Result<SwrOutcome, GatewayError> {
        // Uncacheable routes and unsafe methods never touch the cache.
        if !route.cacheable || !is_safe_method(&req.method) {
            let result = (route.handler)(req, params).await?;
            let entry = transcode::to_cacheable(result, acceptable, &self.policy)?;
            return Ok(SwrOutcome {
                entry: Arc::new(entry),
                status: CacheStatus::Bypass,
            });
        }

        if let Some(stored) = self.store.get(key) {
            if !stored.body.is_empty() {
                debug!(key, "cache hit; scheduling background revalidation");
                self.metrics.cache_events_total.with_label_values(&["hit"]).inc();
                self.spawn_revalidation(key.to_string(), req, route, params);
                let entry = self.negotiate(stored, acceptable)?;
                return Ok(SwrOutcome {
                    entry,
                    status: CacheStatus::Hit,
                });
            }
        }

        // Miss: populate synchronously with the canonical store encoding,
        // then convert a copy for the client if its acceptable set differs.
        self.metrics.cache_events_total.with_label_values(&["miss"]).inc();
        let result = (route.handler)(req, params).await?;
        let entry = transcode::to_cacheable(result, &self.policy.compressed(), &self.policy)?;
        let stored = store_with_timestamp(&self.store, key, entry);
        self.metrics
            .cache_used_bytes
            .set(self.store.used_bytes() as i64);

        let entry = self.negotiate(stored, acceptable)?;
        Ok(SwrOutcome {
            entry,
            status: CacheStatus::Miss,
        })
    }

    /// Transcodes a copy of the entry only when its stored encoding is not
    /// in the client's acceptable set; a stored entry the client can decode
    /// is returned byte-for-byte.
    fn negotiate(
        &self,
        stored: Arc<CachedEntry>,
        acceptable: &[Encoding],
    ) -> Result<Arc<CachedEntry>, GatewayError> {
        if acceptable.contains(&stored.encoding()) {
            Ok(stored)
        } else {
            transcode::transcode(stored, acceptable, &self.policy)
        }
    }

    /// Launches the single-flight background refresh for `key`. If another
    /// refresh for the same key is running, this is a no-op.
    fn spawn_revalidation(
        self: &Arc<Self>,
        key: String,
        req: GatewayRequest,
        route: &RouteSpec,
        params: Params,
    ) {
        // Atomic test-and-insert: the loser of a race sees `false` here.
        if !self.in_flight.insert(key.clone()) {
            self.metrics
                .revalidations_total
                .with_label_values(&["collapsed"])
                .inc();
            return;
        }
        self.metrics.inflight_revalidations.inc();

        let engine = Arc::clone(self);
        let handler = Arc::clone(&route.handler);
        tokio::spawn(async move {
            let outcome = async {
                let result = handler(req, params).await?;
                let entry =
                    transcode::to_cacheable(result, &engine.policy.compressed(), &engine.policy)?;
                store_with_timestamp(&engine.store, &key, entry);
                Ok::<(), GatewayError>(())
            }
            .await;

            match outcome {
                Ok(()) => {
                    debug!(key = %key, "revalidation refreshed entry");
                    engine
                        .metrics
                        .revalidations_total
                        .with_label_values(&["refreshed"])
                        .inc();
                }
                Err(e) => {
                    // Serving ever-staler data indefinitely is worse than a
                    // miss: drop the entry and let the next request repopulate.
                    warn!(key = %key, error = %e, "revalidation failed; evicting entry");
                    engine.store.delete(&key);
                    engine
                        .metrics
                        .revalidations_total
                        .with_label_values(&["evicted"])
                        .inc();
                }
            }

            engine
                .metrics
                .cache_used_bytes
                .set(engine.store.used_bytes() as i64);
            engine.in_flight.remove(&key);
            engine.metrics.inflight_revalidations.dec();
        });
    }
}
