use stratus::*;

use std::sync::Arc;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

/// The main entry point for the Stratus gateway.
/// A standard synchronous `main` is used instead of `#[tokio::main]` because
/// the configuration must be read *before* building the async runtime to
/// determine how many worker threads the runtime should use.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Initialize Telemetry (Logging)
    telemetry::init_telemetry();

    // 2. Load Configuration from the environment (Synchronous)
    let cfg = Arc::new(config::load_config());

    tracing::info!(
        "Starting gateway with {} worker threads on {}...",
        cfg.workers,
        cfg.bind_addr()
    );

    // 3. Build Tokio Runtime
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(cfg.workers)
        .enable_all()
        .build()?;

    // 4. Start the Async Application Block
    rt.block_on(async {
        // --- Graceful Shutdown ---
        // A CancellationToken propagates shutdown signals to all spawned tasks.
        let shutdown_token = CancellationToken::new();

        let shutdown_token_signal = shutdown_token.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            tracing::info!("Shutdown signal received — initiating graceful shutdown...");
            shutdown_token_signal.cancel();
        });

        // Cache budget: explicit override, else 70% of free memory, else a
        // fixed fallback when the platform probe is unsupported.
        let max_bytes = match cfg.cache_max_bytes {
            Some(b) => b,
            None => mem::default_cache_budget().unwrap_or_else(|e| {
                tracing::warn!("Memory probe failed ({}); using 512 MiB cache budget", e);
                512 * 1024 * 1024
            }),
        };
        let store = Arc::new(CacheStore::new(CacheConfig::with_max_bytes(max_bytes)));
        tracing::info!("Cache budget: {} bytes", max_bytes);

        // Warm start from the persistence sidecar, then schedule dumps.
        let sidecar = cache::persist::default_path();
        cache::persist::load_into(&sidecar, &store).await;
        cache::persist::spawn_persistence(
            Arc::clone(&store),
            sidecar,
            shutdown_token.clone(),
        );

        // Codec availability is probed once; the policy is passed explicitly.
        let policy = EncodingPolicy::probe();
        let metrics = Arc::new(metrics::GatewayMetrics::new());
        let swr = Arc::new(SwrEngine::new(
            Arc::clone(&store),
            policy,
            Arc::clone(&metrics),
        ));

        // Route table: built-ins first, then the operator's proxy routes —
        // later declarations win, so operator routes can shadow built-ins.
        let mut routes = vec![metrics_route(Arc::clone(&metrics))];
        if let Some(path) = &cfg.route_file {
            match config::load_route_file(path) {
                Ok(entries) => {
                    for entry in entries {
                        match proxy::proxy_route(&entry.path, &entry.upstream, entry.cacheable) {
                            Ok(route) => routes.push(route),
                            Err(e) => {
                                tracing::error!("Skipping route {}: {}", entry.path, e)
                            }
                        }
                    }
                }
                Err(e) => tracing::error!("Could not load route file {}: {}", path, e),
            }
        }
        tracing::info!("Compiled {} routes", routes.len());

        let access_log = cfg
            .access_log_path
            .as_deref()
            .map(|p| Arc::new(telemetry::access_log::AccessLogger::new(p)));

        let gateway = Arc::new(Gateway {
            router: Router::compile(routes),
            swr,
            cors: if cfg.cors_enabled {
                cors::CorsConfig::default()
            } else {
                cors::CorsConfig::disabled()
            },
            metrics,
            access_log,
        });

        if let Err(e) =
            server::bind_and_serve(&cfg.bind_addr(), gateway, shutdown_token.clone()).await
        {
            tracing::error!("Server error: {}", e);
        }

        // Give the persistence task its final dump before the runtime drops.
        shutdown_token.cancel();
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    });

    Ok(())
}

/// Prometheus text exposition as a non-cacheable local route.
fn metrics_route(metrics: Arc<metrics::GatewayMetrics>) -> RouteSpec {
    let handler: Handler = Arc::new(move |_req, _params| {
        let metrics = Arc::clone(&metrics);
        Box::pin(async move {
            let mut headers = HeaderList::new();
            headers.set("content-type", "text/plain; version=0.0.4");
            Ok(HandlerResult::Response(router::UpstreamResponse {
                status: 200,
                headers,
                body: Bytes::from(metrics.render()),
            }))
        })
    });
    RouteSpec::new("/metrics", false, handler)
}

/// Waits for Ctrl+C or SIGTERM to initiate graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => { tracing::info!("Received Ctrl+C"); }
            _ = sigterm.recv() => { tracing::info!("Received SIGTERM"); }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("Failed to listen for Ctrl+C");
    }
}
