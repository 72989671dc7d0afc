use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// One record in the JSON route file: a path pattern proxied to an upstream
/// origin.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RouteFileEntry {
    /// Path pattern, e.g. `/api/:version/items`.
    pub path: String,
    /// Upstream origin URL, e.g. `http://origin.internal:8080/items/:version`.
    pub upstream: String,
    /// Whether responses participate in the SWR cache. Default: true.
    #[serde(default = "default_cacheable")]
    pub cacheable: bool,
}

fn default_cacheable() -> bool {
    true
}

/// The global application configuration state, assembled from environment
/// variables at startup.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
    /// Path to a JSON route table. None: only built-in routes are served.
    pub route_file: Option<String>,
    /// Path to write structured access logs. If None, access logging is disabled.
    pub access_log_path: Option<String>,
    /// Cache byte budget override. None: 70% of free memory is probed.
    pub cache_max_bytes: Option<usize>,
    pub cors_enabled: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3000,
            workers: 4,
            route_file: None,
            access_log_path: None,
            cache_max_bytes: None,
            cors_enabled: true,
        }
    }
}

impl AppConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Reads configuration from the environment. A malformed value never takes
/// the gateway down: it is logged and replaced by the default.
pub fn load_config() -> AppConfig {
    let mut cfg = AppConfig::default();

    if let Ok(port) = std::env::var("PORT") {
        match port.parse() {
            Ok(p) => cfg.port = p,
            Err(_) => warn!("Ignoring malformed PORT value: {}", port),
        }
    }
    if let Some(host) = std::env::var("HOST")
        .ok()
        .or_else(|| std::env::var("HOSTNAME").ok())
    {
        cfg.host = host;
    }
    if let Ok(workers) = std::env::var("STRATUS_WORKERS") {
        match workers.parse() {
            Ok(w) if w > 0 => cfg.workers = w,
            _ => warn!("Ignoring malformed STRATUS_WORKERS value: {}", workers),
        }
    }
    if let Ok(bytes) = std::env::var("STRATUS_CACHE_MAX_BYTES") {
        match bytes.parse() {
            Ok(b) => cfg.cache_max_bytes = Some(b),
            Err(_) => warn!("Ignoring malformed STRATUS_CACHE_MAX_BYTES value: {}", bytes),
        }
    }
    cfg.route_file = std::env::var("STRATUS_ROUTES").ok();
    cfg.access_log_path = std::env::var("STRATUS_ACCESS_LOG").ok();

    info!("Loaded config: binding {}", cfg.bind_addr());
    cfg
}

/// Parses the JSON route file. A missing file is an empty table; malformed
/// JSON is a startup error the operator must fix.
pub fn load_route_file(path: &str) -> Result<Vec<RouteFileEntry>, crate::errors::GatewayError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(serde_json::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("Route file {} not found; serving built-in routes only", path);
            Ok(Vec::new())
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.host, "localhost");
        assert_eq!(cfg.bind_addr(), "localhost:3000");
        assert!(cfg.cors_enabled);
    }

    #[test]
    fn test_route_file_parsing() {
        let json = r#"[
            {"path": "/api/:id", "upstream": "http://origin:8080/items/:id"},
            {"path": "/live", "upstream": "http://origin:8080/live", "cacheable": false}
        ]"#;
        let entries: Vec<RouteFileEntry> = serde_json::from_str(json).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].cacheable, "cacheable defaults to true");
        assert!(!entries[1].cacheable);
    }
}
