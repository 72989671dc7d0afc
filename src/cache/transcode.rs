//! Cacheable-object construction and cross-encoding conversion. Handler
//! results are normalized into a canonical compressed representation on the
//! way into the store; when a client's `Accept-Encoding` does not cover the
//! stored form, a copy is transcoded on the way out.

use std::sync::Arc;

use bytes::Bytes;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::codec::{self, Encoding, EncodingPolicy};
use crate::errors::GatewayError;
use crate::router::HandlerResult;

use super::entry::{CachedEntry, HeaderList};
use super::store::CacheStore;

/// Header recording when an entry passed through the store path.
pub const CACHE_DATE_HEADER: &str = "x-cache-date";

/// Normalizes a handler result into a cache entry encoded with the first
/// policy-preferred encoding present in `acceptable`.
///
/// Response-like results keep their status and headers (minus the encoding
/// and length headers, which are recomputed); JSON values serialize with
/// `content-type: application/json`; strings become `text/plain`.
pub fn to_cacheable(
    result: HandlerResult,
    acceptable: &[Encoding],
    policy: &EncodingPolicy,
) -> Result<CachedEntry, GatewayError> {
    let (status, mut headers, raw_body) = match result {
        HandlerResult::Response(resp) => {
            let current = resp
                .headers
                .get("content-encoding")
                .and_then(Encoding::from_token)
                .unwrap_or(Encoding::Identity);
            let decoded = if current == Encoding::Identity {
                resp.body.to_vec()
            } else {
                codec::decompress(&resp.body, current)?
            };
            let mut headers = resp.headers;
            headers.remove("content-encoding");
            headers.remove("content-length");
            (resp.status, headers, decoded)
        }
        HandlerResult::Json(value) => {
            let mut headers = HeaderList::new();
            headers.set("content-type", "application/json");
            (200, headers, serde_json::to_vec(&value)?)
        }
        HandlerResult::Text(text) => {
            let mut headers = HeaderList::new();
            headers.set("content-type", "text/plain");
            (200, headers, text.into_bytes())
        }
    };

    // An empty payload never enters a codec container: compressing it would
    // produce non-empty framing bytes and its emptiness must stay observable
    // from the stored body length.
    let store_encoding = if raw_body.is_empty() {
        Encoding::Identity
    } else {
        policy.pick(acceptable)
    };
    let body = codec::compress(&raw_body, store_encoding)?;
    headers.set("content-encoding", store_encoding.as_str());
    headers.set("content-length", body.len().to_string());
    Ok(CachedEntry::new(status, headers, Bytes::from(body)))
}

/// Re-encodes an entry for a client whose acceptable set excludes the stored
/// encoding. The stored entry is never mutated: when the preferred target
/// already matches, the same `Arc` is returned; otherwise a converted copy is
/// built.
pub fn transcode(
    entry: Arc<CachedEntry>,
    acceptable: &[Encoding],
    policy: &EncodingPolicy,
) -> Result<Arc<CachedEntry>, GatewayError> {
    // Empty stays empty: wrapping zero bytes in a codec container would make
    // the body non-empty on the wire.
    if entry.body.is_empty() {
        return Ok(entry);
    }
    let target = policy.pick(acceptable);
    let current = entry.encoding();
    if target == current {
        return Ok(entry);
    }

    let decoded =
        codec::decompress(&entry.body, current).map_err(|_| GatewayError::EncodingUnavailable)?;
    let body =
        codec::compress(&decoded, target).map_err(|_| GatewayError::EncodingUnavailable)?;

    let mut headers = entry.headers.clone();
    headers.set("content-encoding", target.as_str());
    headers.set("content-length", body.len().to_string());
    Ok(Arc::new(CachedEntry::new(
        entry.status,
        headers,
        Bytes::from(body),
    )))
}

/// Stamps the insertion timestamp, writes the entry to the store, and hands
/// back the stamped entry (the body `Bytes` are shared, not copied).
pub fn store_with_timestamp(store: &CacheStore, key: &str, mut entry: CachedEntry) -> Arc<CachedEntry> {
    let stamp = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"));
    entry.headers.set(CACHE_DATE_HEADER, stamp);
    store.set(key.to_string(), entry.clone());
    Arc::new(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::CacheConfig;
    use crate::router::UpstreamResponse;

    fn policy() -> EncodingPolicy {
        EncodingPolicy::probe()
    }

    #[test]
    fn test_json_result_is_tagged_and_compressed() {
        let entry = to_cacheable(
            HandlerResult::Json(serde_json::json!({"ok": true})),
            &[Encoding::Gzip],
            &policy(),
        )
        .unwrap();
        assert_eq!(entry.status, 200);
        assert_eq!(entry.headers.get("content-type"), Some("application/json"));
        assert_eq!(entry.headers.get("content-encoding"), Some("gzip"));
        let decoded = codec::decompress(&entry.body, Encoding::Gzip).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&decoded).unwrap();
        assert_eq!(value["ok"], true);
    }

    #[test]
    fn test_text_result_is_text_plain() {
        let entry = to_cacheable(
            HandlerResult::Text("hello".into()),
            &[Encoding::Identity],
            &policy(),
        )
        .unwrap();
        assert_eq!(entry.headers.get("content-type"), Some("text/plain"));
        assert_eq!(entry.headers.get("content-encoding"), Some("identity"));
        assert_eq!(entry.body.as_ref(), b"hello");
    }

    #[test]
    fn test_response_result_reencoded_from_gzip() {
        let gzipped = codec::compress(b"origin payload", Encoding::Gzip).unwrap();
        let mut headers = HeaderList::new();
        headers.set("content-type", "text/html");
        headers.set("content-encoding", "gzip");
        headers.set("content-length", gzipped.len().to_string());
        let result = HandlerResult::Response(UpstreamResponse {
            status: 201,
            headers,
            body: Bytes::from(gzipped),
        });

        let entry = to_cacheable(result, &[Encoding::Br], &policy()).unwrap();
        assert_eq!(entry.status, 201);
        assert_eq!(entry.headers.get("content-encoding"), Some("br"));
        assert_eq!(entry.headers.get("content-type"), Some("text/html"));
        assert_eq!(
            entry.headers.get("content-length"),
            Some(entry.body.len().to_string().as_str())
        );
        let decoded = codec::decompress(&entry.body, Encoding::Br).unwrap();
        assert_eq!(decoded, b"origin payload");
    }

    #[test]
    fn test_content_length_matches_body() {
        let entry = to_cacheable(
            HandlerResult::Text("x".repeat(500)),
            &[Encoding::Deflate],
            &policy(),
        )
        .unwrap();
        let len: usize = entry.headers.get("content-length").unwrap().parse().unwrap();
        assert_eq!(len, entry.body.len());
    }

    #[test]
    fn test_transcode_noop_returns_same_entry() {
        let entry = Arc::new(
            to_cacheable(
                HandlerResult::Text("body".into()),
                &[Encoding::Gzip],
                &policy(),
            )
            .unwrap(),
        );
        let out = transcode(Arc::clone(&entry), &[Encoding::Gzip, Encoding::Br], &policy());
        // Canonical pick is br, so a conversion happens; but gzip-only stays.
        let same = transcode(Arc::clone(&entry), &[Encoding::Gzip], &policy()).unwrap();
        assert!(Arc::ptr_eq(&entry, &same));
        assert!(out.is_ok());
    }

    #[test]
    fn test_transcode_converts_and_preserves_other_headers() {
        let mut src = to_cacheable(
            HandlerResult::Text("transcoded payload".into()),
            &[Encoding::Gzip],
            &policy(),
        )
        .unwrap();
        src.headers.set("x-custom", "kept");
        let src = Arc::new(src);

        let out = transcode(Arc::clone(&src), &[Encoding::Identity], &policy()).unwrap();
        assert_eq!(out.headers.get("content-encoding"), Some("identity"));
        assert_eq!(out.headers.get("x-custom"), Some("kept"));
        assert_eq!(out.body.as_ref(), b"transcoded payload");
        // The stored entry is untouched.
        assert_eq!(src.headers.get("content-encoding"), Some("gzip"));
    }

    #[test]
    fn test_empty_body_is_stored_identity() {
        // Even when the caller asks for a compressed store form, zero bytes
        // stay zero bytes.
        let entry = to_cacheable(
            HandlerResult::Text(String::new()),
            &[Encoding::Br, Encoding::Gzip],
            &policy(),
        )
        .unwrap();
        assert!(entry.body.is_empty());
        assert_eq!(entry.headers.get("content-encoding"), Some("identity"));
        assert_eq!(entry.headers.get("content-length"), Some("0"));
    }

    #[test]
    fn test_transcode_keeps_empty_body_empty() {
        let entry = Arc::new(
            to_cacheable(
                HandlerResult::Text(String::new()),
                &[Encoding::Gzip],
                &policy(),
            )
            .unwrap(),
        );
        let out = transcode(Arc::clone(&entry), &[Encoding::Gzip], &policy()).unwrap();
        assert!(Arc::ptr_eq(&entry, &out));
        assert!(out.body.is_empty());
    }

    #[test]
    fn test_store_with_timestamp_sets_cache_date() {
        let store = CacheStore::new(CacheConfig::with_max_bytes(1 << 20));
        let entry = to_cacheable(
            HandlerResult::Text("stamped".into()),
            &[Encoding::Identity],
            &policy(),
        )
        .unwrap();
        store_with_timestamp(&store, "req:stamp", entry);

        let stored = store.get("req:stamp").unwrap();
        let stamp = stored.headers.get(CACHE_DATE_HEADER).unwrap();
        assert!(OffsetDateTime::parse(stamp, &Rfc3339).is_ok());
    }
}
