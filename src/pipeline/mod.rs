//! The request pipeline: short-circuits, route matching, key derivation,
//! SWR dispatch, encoding negotiation on the way out, CORS stamping, and
//! JSON error rendering. Every inbound request flows through `Gateway::handle`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::{Body as _, Incoming};
use hyper::header::{HeaderName, HeaderValue};
use hyper::{Method, Request, Response, StatusCode};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, error};

use crate::codec::parse_accept_encoding;
use crate::cors::CorsConfig;
use crate::errors::GatewayError;
use crate::keys::{self, UNIQUE_ID_HEADER};
use crate::memo::RequestMemo;
use crate::metrics::GatewayMetrics;
use crate::router::{GatewayRequest, Router};
use crate::swr::SwrEngine;
use crate::telemetry::access_log::{AccessLogEntry, AccessLogger};

/// The assembled gateway: compiled routes, SWR engine, CORS policy and
/// observability sinks. Built once at startup, shared across connections.
pub struct Gateway {
    pub router: Router,
    pub swr: Arc<SwrEngine>,
    pub cors: CorsConfig,
    pub metrics: Arc<GatewayMetrics>,
    pub access_log: Option<Arc<AccessLogger>>,
}

impl Gateway {
    /// Services one inbound request. Never returns an error: every failure
    /// path renders a JSON error response instead.
    pub async fn handle(
        self: &Arc<Self>,
        req: Request<Incoming>,
        peer: Option<SocketAddr>,
    ) -> Response<Full<Bytes>> {
        let start = Instant::now();
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        let response = self.dispatch(req, peer).await;
        let (response, cache_label) = match response {
            Ok((resp, status)) => (resp, status),
            Err(e) => (self.render_error(&e), "error"),
        };

        self.metrics
            .http_requests_total
            .with_label_values(&[method.as_str(), response.status().as_str()])
            .inc();

        if let Some(logger) = &self.access_log {
            logger.log(AccessLogEntry {
                timestamp: OffsetDateTime::now_utc()
                    .format(&Rfc3339)
                    .unwrap_or_default(),
                client_ip: peer.map(|p| p.ip().to_string()).unwrap_or_default(),
                method: method.to_string(),
                path,
                status: response.status().as_u16(),
                latency_ms: start.elapsed().as_millis() as u64,
                cache_status: cache_label.to_string(),
                bytes_sent: response.body().size_hint().exact().unwrap_or(0),
            });
        }

        response
    }

    /// The pipeline proper. Returns the response and the cache-status label
    /// for the access log.
    async fn dispatch(
        self: &Arc<Self>,
        req: Request<Incoming>,
        peer: Option<SocketAddr>,
    ) -> Result<(Response<Full<Bytes>>, &'static str), GatewayError> {
        let path = req.uri().path();

        // 1. Short-circuits that never reach the router.
        if path == "/favicon.ico" {
            return Ok((self.not_found(), "bypass"));
        }
        if path == "/healthcheck" {
            let body = serde_json::json!({
                "success": true,
                "message": "Health Check is good.",
            });
            return Ok((self.json_response(StatusCode::OK, &body), "bypass"));
        }
        if req.method() == Method::OPTIONS && self.cors.enabled {
            let mut resp = Response::builder()
                .status(StatusCode::NO_CONTENT)
                .body(Full::new(Bytes::new()))
                .expect("static preflight response");
            self.cors.apply(resp.headers_mut());
            return Ok((resp, "bypass"));
        }

        // 2. Route lookup: the last declared match wins.
        let Some((route, params)) = self.router.matches(path) else {
            debug!(path, "no route matched");
            return Ok((self.not_found(), "bypass"));
        };

        // 3. Buffer the body and snapshot the request so the SWR engine can
        //    clone it into background work.
        let (parts, body) = req.into_parts();
        let body = body.collect().await?.to_bytes();
        let gw_req = GatewayRequest {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            body,
            remote_addr: peer,
            scheme: "http",
            memo: Arc::new(RequestMemo::new()),
        };

        let key = gw_req
            .memo
            .key(|| {
                keys::request_key(
                    &gw_req.method,
                    gw_req.path(),
                    gw_req.query(),
                    gw_req.header(UNIQUE_ID_HEADER).unwrap_or(""),
                )
            })
            .to_string();
        let acceptable = gw_req
            .memo
            .encodings(|| parse_accept_encoding(gw_req.header("accept-encoding")))
            .to_vec();

        // 4. SWR decision procedure.
        let outcome = self
            .swr
            .serve(gw_req, route, params, &key, &acceptable)
            .await?;

        // 5. An empty body is a miss of substance, not a response. Empty
        //    payloads are never wrapped in a codec container, so a zero-length
        //    body here means the handler produced nothing — for every client,
        //    not just identity ones.
        if outcome.entry.body.is_empty() {
            return Ok((self.not_found(), outcome.status.log_label()));
        }

        let entry = &outcome.entry;
        let mut builder = Response::builder().status(
            StatusCode::from_u16(entry.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        );
        for (name, value) in entry.headers.iter() {
            builder = builder.header(name, value);
        }
        let mut resp = builder
            .body(Full::new(entry.body.clone()))
            .unwrap_or_else(|e| {
                error!("response assembly failed: {}", e);
                Response::new(Full::new(entry.body.clone()))
            });

        // 6. Stamp X-Cache unless the handler already claimed it.
        if !resp.headers().contains_key("x-cache") {
            resp.headers_mut().insert(
                HeaderName::from_static("x-cache"),
                HeaderValue::from_static(outcome.status.header_value()),
            );
        }
        self.cors.apply(resp.headers_mut());
        Ok((resp, outcome.status.log_label()))
    }

    /// Standard JSON 404.
    fn not_found(&self) -> Response<Full<Bytes>> {
        let body = serde_json::json!({
            "error": "Page not found!",
            "code": 404,
        });
        let mut resp = self.json_response(StatusCode::NOT_FOUND, &body);
        resp.headers_mut().insert(
            HeaderName::from_static("x-cache"),
            HeaderValue::from_static("MISS"),
        );
        resp
    }

    /// Renders an escaped error as the JSON error body, with `X-Cache: ERROR`.
    fn render_error(&self, err: &GatewayError) -> Response<Full<Bytes>> {
        let status =
            StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut body = serde_json::json!({
            "error": err.to_string(),
            "stack": format!("{:?}", err),
            "code": err.code(),
        });
        if let Some(text) = err.response_text() {
            body["responseText"] = serde_json::Value::String(text.to_string());
        }
        let mut resp = self.json_response(status, &body);
        resp.headers_mut().insert(
            HeaderName::from_static("x-cache"),
            HeaderValue::from_static("ERROR"),
        );
        self.metrics
            .cache_events_total
            .with_label_values(&["error"])
            .inc();
        resp
    }

    fn json_response(&self, status: StatusCode, body: &serde_json::Value) -> Response<Full<Bytes>> {
        let bytes = serde_json::to_vec(body).unwrap_or_default();
        let mut resp = Response::builder()
            .status(status)
            .header("content-type", "application/json")
            .header("content-length", bytes.len().to_string())
            .body(Full::new(Bytes::from(bytes)))
            .expect("static response headers are valid");
        self.cors.apply(resp.headers_mut());
        resp
    }
}
