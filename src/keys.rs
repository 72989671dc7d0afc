//! Request fingerprinting. Keys are xxh64 hashes over the normalized URL
//! (path plus query sorted by parameter name) so that two URLs differing only
//! in query-parameter order map to the same cache entry. Host and scheme are
//! deliberately excluded: the same path may be served from several hosts
//! pointing at one logical resource.

use hyper::Method;
use xxhash_rust::xxh64::xxh64;

/// Salt header consulted for per-client key separation.
pub const UNIQUE_ID_HEADER: &str = "x-unique-id";

/// Sorts query parameters by name, ascending Unicode code-point order.
/// The sort is stable: values of a repeated name keep their original order.
fn sorted_query(query: &str) -> String {
    let mut pairs: Vec<&str> = query.split('&').filter(|p| !p.is_empty()).collect();
    pairs.sort_by_key(|pair| pair.split('=').next().unwrap_or(""));
    pairs.join("&")
}

/// Reassembles `path + "?" + sortedQuery`, omitting the `?` when the query is
/// empty.
pub fn normalize(path: &str, query: Option<&str>) -> String {
    match query {
        Some(q) if !q.is_empty() => format!("{}?{}", path, sorted_query(q)),
        _ => path.to_string(),
    }
}

/// Splits a URL or origin-form target into `(path, query)`. Scheme and
/// authority, when present, are skipped without being interpreted.
fn split_target(url: &str) -> (&str, Option<&str>) {
    let after_authority = match url.find("://") {
        Some(idx) => {
            let rest = &url[idx + 3..];
            match rest.find('/') {
                Some(slash) => &rest[slash..],
                None => "/",
            }
        }
        None => url,
    };
    match after_authority.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (after_authority, None),
    }
}

/// Stable key for an arbitrary URL: `"u:" + hex(xxh64(salt + normalized))`.
pub fn url_key(url: &str, salt: &str) -> String {
    let (path, query) = split_target(url);
    let normalized = normalize(path, query);
    let hash = xxh64(format!("{}{}", salt, normalized).as_bytes(), 0);
    format!("u:{:016x}", hash)
}

/// Stable key for an inbound request:
/// `"req:" + hex(xxh64(path + sortedQuery + uniqueId))`.
///
/// GET keys carry no method tag so the fingerprint formula is exactly the
/// hash of the normalized URL; other safe methods are disambiguated with a
/// method prefix so a HEAD probe can never serve a GET body.
pub fn request_key(method: &Method, path: &str, query: Option<&str>, unique_id: &str) -> String {
    let normalized = normalize(path, query);
    let hash = xxh64(format!("{}{}", normalized, unique_id).as_bytes(), 0);
    if method == Method::GET {
        format!("req:{:016x}", hash)
    } else {
        format!("req:{}:{:016x}", method.as_str(), hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_order_does_not_change_key() {
        let a = request_key(&Method::GET, "/p", Some("a=1&c=3&b=2"), "");
        let b = request_key(&Method::GET, "/p", Some("a=1&b=2&c=3"), "");
        assert_eq!(a, b);
    }

    #[test]
    fn test_key_matches_hash_of_normalized_url() {
        let key = request_key(&Method::GET, "/p", Some("a=1&c=3&b=2"), "");
        let expected = xxh64(b"/p?a=1&b=2&c=3", 0);
        assert_eq!(key, format!("req:{:016x}", expected));
    }

    #[test]
    fn test_repeated_names_keep_value_order() {
        // Stable sort: b=2 stays before b=1.
        assert_eq!(sorted_query("b=2&a=0&b=1"), "a=0&b=2&b=1");
    }

    #[test]
    fn test_no_query_omits_separator() {
        assert_eq!(normalize("/path", None), "/path");
        assert_eq!(normalize("/path", Some("")), "/path");
    }

    #[test]
    fn test_salt_changes_key() {
        let anon = request_key(&Method::GET, "/p", None, "");
        let salted = request_key(&Method::GET, "/p", None, "client-42");
        assert_ne!(anon, salted);
    }

    #[test]
    fn test_head_and_get_use_distinct_keys() {
        let get = request_key(&Method::GET, "/p", None, "");
        let head = request_key(&Method::HEAD, "/p", None, "");
        assert_ne!(get, head);
        assert!(head.starts_with("req:HEAD:"));
    }

    #[test]
    fn test_url_key_ignores_scheme_and_host() {
        let a = url_key("http://one.example/p?x=1", "");
        let b = url_key("https://two.example:8443/p?x=1", "");
        let c = url_key("/p?x=1", "");
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert!(a.starts_with("u:"));
    }
}
