use crate::codec::Encoding;

/// Error raised by route handlers, most commonly by the reverse proxy when an
/// upstream origin answers with a non-2xx status. The pipeline renders it as a
/// JSON error body with `status` as the response status.
#[derive(Debug, thiserror::Error)]
#[error("route failed with status {status}")]
pub struct RouteError {
    pub status: u16,
    /// Captured upstream body text, surfaced in the rendered error JSON.
    pub response_text: Option<String>,
}

impl RouteError {
    pub fn new(status: u16, response_text: impl Into<String>) -> Self {
        Self {
            status,
            response_text: Some(response_text.into()),
        }
    }

    pub fn status_only(status: u16) -> Self {
        Self {
            status,
            response_text: None,
        }
    }
}

/// A mandatory `:name` parameter was absent when substituting a URL template.
#[derive(Debug, thiserror::Error)]
#[error("missing mandatory URL parameter `{0}`")]
pub struct ParamMissingError(pub String);

/// Compression or decompression failed. Carries the encoding so callers can
/// report which codec broke; they never silently fall back mid-stream.
#[derive(Debug, thiserror::Error)]
#[error("{encoding} codec failed: {message}")]
pub struct CodecError {
    pub encoding: Encoding,
    pub message: String,
}

impl CodecError {
    pub fn new(encoding: Encoding, err: impl std::fmt::Display) -> Self {
        Self {
            encoding,
            message: err.to_string(),
        }
    }
}

/// The umbrella error type handlers and the pipeline propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error(transparent)]
    Route(#[from] RouteError),

    #[error(transparent)]
    ParamMissing(#[from] ParamMissingError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    /// No target codec could produce the requested representation.
    #[error("no acceptable content-encoding could be produced")]
    EncodingUnavailable,

    /// The free-memory probe does not recognize this operating system.
    #[error("unsupported platform for memory probe: {0}")]
    UnsupportedPlatform(String),

    /// The cache slot was queried before initialization.
    #[error("cache accessed before initialization")]
    CacheAbsent,

    #[error("upstream I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("upstream HTTP error: {0}")]
    Http(#[from] hyper::Error),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl GatewayError {
    /// The HTTP status the pipeline should render for this error.
    pub fn status(&self) -> u16 {
        match self {
            GatewayError::Route(e) => e.status,
            GatewayError::ParamMissing(_) => 500,
            _ => 500,
        }
    }

    /// Machine-readable code stamped into the rendered error body.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Route(_) => "ROUTE_ERROR",
            GatewayError::ParamMissing(_) => "PARAM_MISSING",
            GatewayError::Codec(_) => "CODEC_ERROR",
            GatewayError::EncodingUnavailable => "ENCODING_UNAVAILABLE",
            GatewayError::UnsupportedPlatform(_) => "UNSUPPORTED_PLATFORM",
            GatewayError::CacheAbsent => "CACHE_ABSENT",
            GatewayError::Io(_) => "IO_ERROR",
            GatewayError::Http(_) => "HTTP_ERROR",
            GatewayError::Json(_) => "INVALID_JSON",
        }
    }

    /// Upstream body text, when the underlying error captured one.
    pub fn response_text(&self) -> Option<&str> {
        match self {
            GatewayError::Route(e) => e.response_text.as_deref(),
            _ => None,
        }
    }
}
