//! Codec pool: brotli / gzip / deflate / identity compression for cached
//! response bodies. The canonical store format is the strongest encoding the
//! startup probe confirms working (brotli, falling back to gzip).

use std::io::Write;

use tracing::{info, warn};

use crate::errors::CodecError;

/// A content-encoding supported by the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    Br,
    Gzip,
    Deflate,
    Identity,
}

impl Encoding {
    /// The header token for this encoding.
    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::Br => "br",
            Encoding::Gzip => "gzip",
            Encoding::Deflate => "deflate",
            Encoding::Identity => "identity",
        }
    }

    /// Parses an `Accept-Encoding` / `Content-Encoding` token. Quality
    /// annotations (`;q=...`) are stripped; unknown tokens yield `None`.
    pub fn from_token(token: &str) -> Option<Self> {
        let token = token.split(';').next().unwrap_or("").trim();
        match token.to_ascii_lowercase().as_str() {
            "br" => Some(Encoding::Br),
            "gzip" | "x-gzip" => Some(Encoding::Gzip),
            "deflate" => Some(Encoding::Deflate),
            "identity" | "" => Some(Encoding::Identity),
            "*" => Some(Encoding::Identity),
            _ => None,
        }
    }
}

impl std::fmt::Display for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Brotli quality for stored entries. Maximum density: entries are written
/// once and served many times.
const BROTLI_QUALITY: i32 = 11;

/// Compresses `data` with the given encoding. `identity` is a pass-through.
pub fn compress(data: &[u8], encoding: Encoding) -> Result<Vec<u8>, CodecError> {
    match encoding {
        Encoding::Identity => Ok(data.to_vec()),
        Encoding::Br => {
            let params = brotli::enc::BrotliEncoderParams {
                quality: BROTLI_QUALITY,
                ..Default::default()
            };
            let mut input = std::io::Cursor::new(data);
            let mut out = Vec::with_capacity(data.len() / 2 + 64);
            brotli::BrotliCompress(&mut input, &mut out, &params)
                .map_err(|e| CodecError::new(Encoding::Br, e))?;
            Ok(out)
        }
        Encoding::Gzip => {
            let mut encoder = flate2::write::GzEncoder::new(
                Vec::with_capacity(data.len() / 2 + 64),
                flate2::Compression::best(),
            );
            encoder
                .write_all(data)
                .and_then(|_| encoder.finish())
                .map_err(|e| CodecError::new(Encoding::Gzip, e))
        }
        Encoding::Deflate => {
            let mut encoder = flate2::write::DeflateEncoder::new(
                Vec::with_capacity(data.len() / 2 + 64),
                flate2::Compression::best(),
            );
            encoder
                .write_all(data)
                .and_then(|_| encoder.finish())
                .map_err(|e| CodecError::new(Encoding::Deflate, e))
        }
    }
}

/// Decompresses `data` encoded with the given encoding.
pub fn decompress(data: &[u8], encoding: Encoding) -> Result<Vec<u8>, CodecError> {
    match encoding {
        Encoding::Identity => Ok(data.to_vec()),
        Encoding::Br => {
            let mut input = std::io::Cursor::new(data);
            let mut out = Vec::with_capacity(data.len() * 4);
            brotli::BrotliDecompress(&mut input, &mut out)
                .map_err(|e| CodecError::new(Encoding::Br, e))?;
            Ok(out)
        }
        Encoding::Gzip => {
            let mut decoder = flate2::write::GzDecoder::new(Vec::with_capacity(data.len() * 4));
            decoder
                .write_all(data)
                .and_then(|_| decoder.finish())
                .map_err(|e| CodecError::new(Encoding::Gzip, e))
        }
        Encoding::Deflate => {
            let mut decoder =
                flate2::write::DeflateDecoder::new(Vec::with_capacity(data.len() * 4));
            decoder
                .write_all(data)
                .and_then(|_| decoder.finish())
                .map_err(|e| CodecError::new(Encoding::Deflate, e))
        }
    }
}

/// Encoding preference order, probed once at startup and passed explicitly to
/// every component that negotiates encodings.
#[derive(Debug, Clone)]
pub struct EncodingPolicy {
    preferred: Vec<Encoding>,
}

impl EncodingPolicy {
    /// Probes codec availability and builds the preference list
    /// `[br, gzip, deflate, identity]`. Brotli is verified with a one-block
    /// round-trip; on failure it is removed globally and the canonical store
    /// encoding falls back to gzip.
    pub fn probe() -> Self {
        let mut preferred = Vec::with_capacity(4);
        let sample = b"stratus codec probe";
        let brotli_ok = compress(sample, Encoding::Br)
            .and_then(|c| decompress(&c, Encoding::Br))
            .map(|d| d == sample)
            .unwrap_or(false);
        if brotli_ok {
            preferred.push(Encoding::Br);
        } else {
            warn!("brotli probe failed; dropping br from preferred encodings");
        }
        preferred.extend([Encoding::Gzip, Encoding::Deflate, Encoding::Identity]);
        info!(canonical = %preferred[0], "codec pool ready");
        Self { preferred }
    }

    /// A policy with a fixed preference list. Test hook.
    pub fn with_preferred(preferred: Vec<Encoding>) -> Self {
        Self { preferred }
    }

    /// The first preferred encoding also present in `acceptable`, falling
    /// back to identity when the sets do not intersect.
    pub fn pick(&self, acceptable: &[Encoding]) -> Encoding {
        self.preferred
            .iter()
            .copied()
            .find(|enc| acceptable.contains(enc))
            .unwrap_or(Encoding::Identity)
    }

    /// The canonical store encoding: brotli when available, else gzip.
    pub fn canonical(&self) -> Encoding {
        self.preferred[0]
    }

    /// All non-identity encodings in preference order. This is the default
    /// `acceptable` set on the store path: cached entries are kept compressed.
    pub fn compressed(&self) -> Vec<Encoding> {
        self.preferred
            .iter()
            .copied()
            .filter(|e| *e != Encoding::Identity)
            .collect()
    }

    pub fn supports(&self, encoding: Encoding) -> bool {
        self.preferred.contains(&encoding)
    }
}

/// Parses an `Accept-Encoding` header value into the acceptable set.
/// An absent or empty header yields `[identity]`: a client that states no
/// preference must never receive bytes it cannot decode.
pub fn parse_accept_encoding(header: Option<&str>) -> Vec<Encoding> {
    let parsed: Vec<Encoding> = header
        .unwrap_or("")
        .split(',')
        .filter(|t| !t.trim().is_empty())
        .filter_map(Encoding::from_token)
        .collect();
    if parsed.is_empty() {
        vec![Encoding::Identity]
    } else {
        parsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_all_encodings() {
        let payload: Vec<u8> = "The quick brown fox jumps over the lazy dog. "
            .repeat(64)
            .into_bytes();
        for enc in [
            Encoding::Br,
            Encoding::Gzip,
            Encoding::Deflate,
            Encoding::Identity,
        ] {
            let compressed = compress(&payload, enc).expect("compress");
            let restored = decompress(&compressed, enc).expect("decompress");
            assert_eq!(restored, payload, "roundtrip failed for {}", enc);
        }
    }

    #[test]
    fn test_compression_shrinks_repetitive_input() {
        let payload: Vec<u8> = "aaaaaaaabbbbbbbb".repeat(256).into_bytes();
        for enc in [Encoding::Br, Encoding::Gzip, Encoding::Deflate] {
            let compressed = compress(&payload, enc).unwrap();
            assert!(
                compressed.len() < payload.len(),
                "{} did not shrink input",
                enc
            );
        }
    }

    #[test]
    fn test_empty_input_roundtrip() {
        for enc in [Encoding::Br, Encoding::Gzip, Encoding::Deflate] {
            let compressed = compress(b"", enc).unwrap();
            assert_eq!(decompress(&compressed, enc).unwrap(), b"");
        }
    }

    #[test]
    fn test_decompress_garbage_is_error() {
        let garbage = b"\x00\x01\x02definitely not compressed";
        assert!(decompress(garbage, Encoding::Gzip).is_err());
        assert!(decompress(garbage, Encoding::Br).is_err());
    }

    #[test]
    fn test_token_parsing() {
        assert_eq!(Encoding::from_token("br"), Some(Encoding::Br));
        assert_eq!(Encoding::from_token("GZIP"), Some(Encoding::Gzip));
        assert_eq!(Encoding::from_token("gzip;q=0.8"), Some(Encoding::Gzip));
        assert_eq!(Encoding::from_token("zstd"), None);
    }

    #[test]
    fn test_accept_encoding_parsing() {
        assert_eq!(
            parse_accept_encoding(Some("gzip, br")),
            vec![Encoding::Gzip, Encoding::Br]
        );
        // Present but empty: identity only.
        assert_eq!(parse_accept_encoding(Some("")), vec![Encoding::Identity]);
        // Only unknown tokens: identity only.
        assert_eq!(
            parse_accept_encoding(Some("zstd, lzma")),
            vec![Encoding::Identity]
        );
        // Absent behaves like empty.
        assert_eq!(parse_accept_encoding(None), vec![Encoding::Identity]);
    }

    #[test]
    fn test_policy_pick_prefers_strongest_acceptable() {
        let policy = EncodingPolicy::probe();
        assert_eq!(
            policy.pick(&[Encoding::Gzip, Encoding::Br]),
            policy.canonical()
        );
        assert_eq!(policy.pick(&[Encoding::Deflate]), Encoding::Deflate);
        assert_eq!(policy.pick(&[]), Encoding::Identity);
    }

    #[test]
    fn test_policy_without_brotli_falls_back_to_gzip() {
        let policy = EncodingPolicy::with_preferred(vec![
            Encoding::Gzip,
            Encoding::Deflate,
            Encoding::Identity,
        ]);
        assert_eq!(policy.canonical(), Encoding::Gzip);
        assert!(!policy.supports(Encoding::Br));
    }
}
