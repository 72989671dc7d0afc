//! URL-pattern router. Patterns support literal segments, `:name` parameters
//! and `:name?` optional parameters. Matching iterates the route table in
//! reverse insertion order: the LAST declared route wins. That tie-break is a
//! deliberate contract relied on by applications that declare a catch-all
//! first and specializations after it.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use hyper::header::HeaderMap;
use hyper::{Method, Uri};

use crate::cache::entry::HeaderList;
use crate::errors::{GatewayError, ParamMissingError};
use crate::memo::RequestMemo;

/// Extracted path parameters, keyed by parameter name.
pub type Params = HashMap<String, String>;

/// An owned, cloneable snapshot of an inbound request. The body is buffered
/// up front so the SWR engine can hand a clone to background revalidation
/// without holding the connection's streaming body.
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub remote_addr: Option<SocketAddr>,
    pub scheme: &'static str,
    pub memo: Arc<RequestMemo>,
}

impl GatewayRequest {
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn query(&self) -> Option<&str> {
        self.uri.query()
    }

    /// First value of a request header, as UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// A full response produced by a handler (locally or proxied from upstream).
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    pub headers: HeaderList,
    pub body: Bytes,
}

/// What a route handler returns. The pipeline normalizes every variant into a
/// cacheable entry: responses keep their headers, JSON values are serialized
/// with `content-type: application/json`, strings become `text/plain`.
#[derive(Debug, Clone)]
pub enum HandlerResult {
    Response(UpstreamResponse),
    Json(serde_json::Value),
    Text(String),
}

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<HandlerResult, GatewayError>> + Send>>;

/// A route handler: invoked with the (cloneable) request and the extracted
/// path parameters.
pub type Handler = Arc<dyn Fn(GatewayRequest, Params) -> HandlerFuture + Send + Sync>;

/// One compiled pattern segment.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param { name: String, optional: bool },
}

/// A compiled URL-path pattern.
#[derive(Debug, Clone)]
pub struct Pattern {
    raw: String,
    segments: Vec<Segment>,
}

impl Pattern {
    /// Compiles a path pattern. `:name` declares a mandatory parameter
    /// segment, `:name?` an optional one.
    pub fn compile(pattern: &str) -> Self {
        let segments = pattern
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|seg| {
                if let Some(name) = seg.strip_prefix(':') {
                    match name.strip_suffix('?') {
                        Some(opt) => Segment::Param {
                            name: opt.to_string(),
                            optional: true,
                        },
                        None => Segment::Param {
                            name: name.to_string(),
                            optional: false,
                        },
                    }
                } else {
                    Segment::Literal(seg.to_string())
                }
            })
            .collect();
        Self {
            raw: pattern.to_string(),
            segments,
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Matches a candidate path, returning the extracted parameters, or
    /// `None` when the path does not fit the pattern.
    pub fn matches(&self, path: &str) -> Option<Params> {
        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut params = Params::new();
        let mut pi = 0;

        for segment in &self.segments {
            match segment {
                Segment::Literal(lit) => {
                    if parts.get(pi) != Some(&lit.as_str()) {
                        return None;
                    }
                    pi += 1;
                }
                Segment::Param { name, optional } => match parts.get(pi) {
                    Some(value) => {
                        params.insert(name.clone(), (*value).to_string());
                        pi += 1;
                    }
                    None if *optional => {}
                    None => return None,
                },
            }
        }

        if pi == parts.len() {
            Some(params)
        } else {
            None
        }
    }
}

/// Substitutes `:name` and `:name?` holes in a path template. A missing
/// mandatory parameter fails; optional holes resolve to the empty string.
pub fn construct_url(template: &str, params: &Params) -> Result<String, GatewayError> {
    let mut out = String::with_capacity(template.len());
    for seg in template.split('/').filter(|s| !s.is_empty()) {
        if let Some(name) = seg.strip_prefix(':') {
            match name.strip_suffix('?') {
                Some(opt) => {
                    if let Some(value) = params.get(opt) {
                        out.push('/');
                        out.push_str(value);
                    }
                }
                None => {
                    let value = params
                        .get(name)
                        .ok_or_else(|| ParamMissingError(name.to_string()))?;
                    out.push('/');
                    out.push_str(value);
                }
            }
        } else {
            out.push('/');
            out.push_str(seg);
        }
    }
    if out.is_empty() {
        out.push('/');
    }
    Ok(out)
}

/// An immutable route: compiled pattern, cacheability flag, handler.
#[derive(Clone)]
pub struct RouteSpec {
    pub pattern: Pattern,
    pub cacheable: bool,
    pub handler: Handler,
}

impl RouteSpec {
    pub fn new(pattern: &str, cacheable: bool, handler: Handler) -> Self {
        Self {
            pattern: Pattern::compile(pattern),
            cacheable,
            handler,
        }
    }
}

impl std::fmt::Debug for RouteSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteSpec")
            .field("pattern", &self.pattern.raw)
            .field("cacheable", &self.cacheable)
            .finish()
    }
}

/// The compiled route table. Built once at startup and shared immutably.
pub struct Router {
    routes: Vec<RouteSpec>,
}

impl Router {
    pub fn compile(routes: Vec<RouteSpec>) -> Self {
        Self { routes }
    }

    /// Finds the matching route for a path. Iterates in reverse insertion
    /// order so later-declared routes take precedence.
    pub fn matches(&self, path: &str) -> Option<(&RouteSpec, Params)> {
        self.routes
            .iter()
            .rev()
            .find_map(|route| route.pattern.matches(path).map(|params| (route, params)))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
