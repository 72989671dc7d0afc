//! Listener loop. Accepts TCP connections until the shutdown token fires and
//! serves each over HTTP/1 with a per-connection tokio task.

use std::net::SocketAddr;
use std::sync::Arc;

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::pipeline::Gateway;

/// Binds the listener and runs the accept loop to completion.
pub async fn bind_and_serve(
    addr: &str,
    gateway: Arc<Gateway>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Gateway listening on {}", listener.local_addr()?);
    serve(listener, gateway, shutdown).await;
    Ok(())
}

/// Accepts connections, or stops on the shutdown signal. Each connection is
/// handled on its own task; in-flight requests on accepted connections run
/// to completion after shutdown begins.
pub async fn serve(listener: TcpListener, gateway: Arc<Gateway>, shutdown: CancellationToken) {
    loop {
        let (stream, peer) = tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok(s) => s,
                    Err(e) => {
                        error!("Accept error: {}", e);
                        continue;
                    }
                }
            }
            _ = shutdown.cancelled() => {
                info!("Gateway shutting down gracefully — no new connections accepted.");
                break;
            }
        };

        let gateway = Arc::clone(&gateway);
        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let svc = service_fn(move |req| {
                let gateway = Arc::clone(&gateway);
                async move {
                    Ok::<_, std::convert::Infallible>(
                        gateway.handle(req, Some(peer)).await,
                    )
                }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, svc).await {
                debug!("Error serving HTTP/1 connection from {}: {:?}", peer, e);
            }
        });
    }
}

/// Helper for tests and embedding: binds an ephemeral port and returns the
/// bound address alongside the serving task.
pub async fn spawn_on_ephemeral_port(
    gateway: Arc<Gateway>,
    shutdown: CancellationToken,
) -> std::io::Result<(SocketAddr, tokio::task::JoinHandle<()>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let handle = tokio::spawn(serve(listener, gateway, shutdown));
    Ok((addr, handle))
}
