//! Reverse-proxy route factory. A proxy route forwards the inbound request
//! to an upstream origin with hop-by-hop header hygiene and `X-Forwarded-*`
//! propagation, then normalizes the response body to identity encoding so
//! the SWR engine can re-compress it canonically for the store.

pub mod client_ip;

use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::{HeaderName, HeaderValue};
use hyper::{Request, Uri};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tracing::{debug, error};

use crate::cache::entry::HeaderList;
use crate::codec::{self, Encoding};
use crate::errors::{GatewayError, RouteError};
use crate::router::{
    construct_url, GatewayRequest, HandlerResult, Params, RouteSpec, UpstreamResponse,
};

/// Headers never forwarded upstream: the transport hop's own headers plus
/// origin security policies that must not leak through the proxy.
const STRIPPED_HEADERS: [&str; 5] = [
    "host",
    "connection",
    "strict-transport-security",
    "content-security-policy",
    "public-key-pins",
];

/// A parsed upstream origin: `http://host:port/path/template`.
#[derive(Debug, Clone)]
pub struct ProxyTarget {
    authority: String,
    path_template: String,
}

impl ProxyTarget {
    /// Parses an upstream URL. Only `http` origins are accepted — TLS is out
    /// of scope on both edges of the gateway.
    pub fn parse(url: &str) -> Result<Self, GatewayError> {
        let rest = url.strip_prefix("http://").ok_or_else(|| {
            GatewayError::Route(RouteError::new(
                500,
                format!("proxy target must be an http:// origin: {}", url),
            ))
        })?;
        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, "/"),
        };
        if authority.is_empty() {
            return Err(GatewayError::Route(RouteError::new(
                500,
                format!("proxy target has no host: {}", url),
            )));
        }
        let authority = if authority.contains(':') {
            authority.to_string()
        } else {
            format!("{}:80", authority)
        };
        Ok(Self {
            authority,
            path_template: path.to_string(),
        })
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    pub fn path_template(&self) -> &str {
        &self.path_template
    }
}

/// Builds a proxy route: requests matching `path` are forwarded to `target`,
/// with route params substituted into the target's path template.
pub fn proxy_route(path: &str, target: &str, cacheable: bool) -> Result<RouteSpec, GatewayError> {
    let target = Arc::new(ProxyTarget::parse(target)?);
    let handler: crate::router::Handler = Arc::new(move |req, params| {
        let target = Arc::clone(&target);
        Box::pin(async move { forward(&target, req, &params).await })
    });
    Ok(RouteSpec::new(path, cacheable, handler))
}

/// Assembles and issues the upstream request, returning the normalized
/// (identity-encoded) origin response.
async fn forward(
    target: &ProxyTarget,
    req: GatewayRequest,
    params: &Params,
) -> Result<HandlerResult, GatewayError> {
    // 1. Upstream URL: target path template + inbound query, verbatim.
    let mut path = construct_url(&target.path_template, params)?;
    if let Some(query) = req.query() {
        path.push('?');
        path.push_str(query);
    }
    let uri: Uri = path.parse().map_err(|e| {
        GatewayError::Route(RouteError::new(500, format!("bad upstream path: {}", e)))
    })?;

    // 2. Header hygiene: copy, then drop hop-by-hop and policy headers.
    let mut headers = req.headers.clone();
    let inbound_host = req.header("host").map(str::to_string);
    for name in STRIPPED_HEADERS {
        headers.remove(name);
    }

    // 3. Forwarding metadata.
    if let Some(host) = inbound_host {
        if let Ok(v) = HeaderValue::from_str(&host) {
            headers.insert(HeaderName::from_static("x-forwarded-host"), v);
        }
    }
    headers.insert(
        HeaderName::from_static("x-forwarded-proto"),
        HeaderValue::from_static(req.scheme),
    );
    if let Some(ip) = client_ip::derive_client_ip(req.remote_addr, &req.headers) {
        if let Ok(v) = HeaderValue::from_str(&ip) {
            headers.insert(HeaderName::from_static("x-forwarded-for"), v);
        }
    }

    // 4. The body is forwarded byte-identical; multipart uploads only lose
    //    content-length so the transport recomputes it for the new framing.
    let is_multipart = req
        .header("content-type")
        .map(|ct| ct.to_ascii_lowercase().starts_with("multipart/form-data"))
        .unwrap_or(false);
    if is_multipart {
        headers.remove("content-length");
    }

    let mut upstream_req = Request::builder()
        .method(req.method.clone())
        .uri(uri)
        .body(Full::new(req.body.clone()))
        .map_err(|e| GatewayError::Route(RouteError::new(500, e.to_string())))?;
    *upstream_req.headers_mut() = headers;
    upstream_req.headers_mut().insert(
        hyper::header::HOST,
        HeaderValue::from_str(target.authority())
            .map_err(|e| GatewayError::Route(RouteError::new(500, e.to_string())))?,
    );

    // 5. Issue the request over a fresh upstream connection.
    debug!(authority = %target.authority(), path = %upstream_req.uri(), "proxying upstream");
    let stream = TcpStream::connect(target.authority()).await.map_err(|e| {
        error!("failed to connect to upstream {}: {}", target.authority(), e);
        GatewayError::Route(RouteError::new(503, e.to_string()))
    })?;
    let io = TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await.map_err(|e| {
        error!("handshake failed with upstream {}: {}", target.authority(), e);
        GatewayError::Route(RouteError::new(502, e.to_string()))
    })?;

    // Drive the connection's IO in the background for the request's lifetime.
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!("upstream connection error: {:?}", e);
        }
    });

    let response = sender
        .send_request(upstream_req)
        .await
        .map_err(|e| GatewayError::Route(RouteError::new(502, e.to_string())))?;

    let status = response.status().as_u16();
    let mut headers: HeaderList = response
        .headers()
        .iter()
        .filter_map(|(n, v)| {
            v.to_str()
                .ok()
                .map(|v| (n.as_str().to_string(), v.to_string()))
        })
        .collect();
    let body = response
        .into_body()
        .collect()
        .await
        .map_err(GatewayError::Http)?
        .to_bytes();

    if !(200..300).contains(&status) {
        let text = String::from_utf8_lossy(&body).into_owned();
        return Err(GatewayError::Route(RouteError::new(status, text)));
    }

    // 6. Normalize to identity: the SWR engine owns canonical re-compression.
    let encoding = headers
        .get("content-encoding")
        .and_then(Encoding::from_token)
        .unwrap_or(Encoding::Identity);
    let body = if encoding == Encoding::Identity {
        body
    } else {
        Bytes::from(codec::decompress(&body, encoding)?)
    };
    headers.remove("content-encoding");
    headers.set("content-length", body.len().to_string());

    Ok(HandlerResult::Response(UpstreamResponse {
        status,
        headers,
        body,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_target_with_port_and_template() {
        let t = ProxyTarget::parse("http://origin.internal:8080/api/:version/items").unwrap();
        assert_eq!(t.authority(), "origin.internal:8080");
        assert_eq!(t.path_template(), "/api/:version/items");
    }

    #[test]
    fn test_parse_target_defaults_port_and_path() {
        let t = ProxyTarget::parse("http://origin.internal").unwrap();
        assert_eq!(t.authority(), "origin.internal:80");
        assert_eq!(t.path_template(), "/");
    }

    #[test]
    fn test_parse_rejects_https() {
        assert!(ProxyTarget::parse("https://origin.internal").is_err());
        assert!(ProxyTarget::parse("origin.internal").is_err());
    }
}
