//! CORS header stamping. A pure header transform: the pipeline applies it to
//! every response when enabled, and answers preflight `OPTIONS` requests with
//! an empty 204 carrying only the CORS headers.

use hyper::header::{HeaderMap, HeaderValue};

#[derive(Debug, Clone)]
pub struct CorsConfig {
    pub enabled: bool,
    pub allow_origin: String,
    pub allow_methods: String,
    pub allow_headers: String,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allow_origin: "*".to_string(),
            allow_methods: "GET, HEAD, POST, PUT, PATCH, DELETE, OPTIONS".to_string(),
            allow_headers: "Content-Type, Authorization, Accept, Accept-Encoding, X-Unique-Id"
                .to_string(),
        }
    }
}

impl CorsConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Stamps the CORS headers onto a response header map. No-op when
    /// disabled.
    pub fn apply(&self, headers: &mut HeaderMap) {
        if !self.enabled {
            return;
        }
        let pairs = [
            ("access-control-allow-origin", &self.allow_origin),
            ("access-control-allow-methods", &self.allow_methods),
            ("access-control-allow-headers", &self.allow_headers),
        ];
        for (name, value) in pairs {
            if let Ok(v) = HeaderValue::from_str(value) {
                headers.insert(name, v);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_stamps_all_headers() {
        let cors = CorsConfig::default();
        let mut headers = HeaderMap::new();
        cors.apply(&mut headers);
        assert_eq!(
            headers.get("access-control-allow-origin").unwrap(),
            &HeaderValue::from_static("*")
        );
        assert!(headers
            .get("access-control-allow-methods")
            .unwrap()
            .to_str()
            .unwrap()
            .contains("POST"));
    }

    #[test]
    fn test_disabled_is_noop() {
        let cors = CorsConfig::disabled();
        let mut headers = HeaderMap::new();
        cors.apply(&mut headers);
        assert!(headers.is_empty());
    }
}
