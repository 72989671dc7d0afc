//! Persistence sidecar. The cache is dumped to a little-endian binary file
//! every five seconds (single-flight: a tick is skipped while a previous dump
//! is still writing) and reloaded at startup for a best-effort warm start.
//!
//! File layout:
//!
//! ```text
//! magic "SWR1" | u8 version
//! entry := u32 keyLen | key (UTF-8)
//!        | u32 headersLen | headers ("name:value" lines, \n-separated)
//!        | i32 status
//!        | u32 bodyLen | body bytes
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::entry::{CachedEntry, HeaderList};
use super::store::CacheStore;

const MAGIC: &[u8; 4] = b"SWR1";
const VERSION: u8 = 1;

/// Dump interval.
pub const PERSIST_INTERVAL: Duration = Duration::from_secs(5);

/// Default sidecar location.
pub fn default_path() -> PathBuf {
    std::env::temp_dir().join("cache.bin")
}

/// Serializes a dump snapshot into the sidecar wire form.
pub fn encode(entries: &[(String, Arc<CachedEntry>)]) -> Vec<u8> {
    let mut out = Vec::with_capacity(
        entries
            .iter()
            .map(|(k, e)| k.len() + e.body.len() + e.headers.byte_size() + 17)
            .sum::<usize>()
            + 5,
    );
    out.extend_from_slice(MAGIC);
    out.push(VERSION);

    for (key, entry) in entries {
        let headers = entry.headers.to_wire();
        out.extend_from_slice(&(key.len() as u32).to_le_bytes());
        out.extend_from_slice(key.as_bytes());
        out.extend_from_slice(&(headers.len() as u32).to_le_bytes());
        out.extend_from_slice(headers.as_bytes());
        out.extend_from_slice(&(entry.status as i32).to_le_bytes());
        out.extend_from_slice(&(entry.body.len() as u32).to_le_bytes());
        out.extend_from_slice(&entry.body);
    }
    out
}

/// Parses the sidecar wire form. A wrong magic or version discards the whole
/// file; a truncated tail discards only the entries after the cut.
pub fn decode(bytes: &[u8]) -> Vec<(String, CachedEntry)> {
    if bytes.len() < 5 || &bytes[0..4] != MAGIC || bytes[4] != VERSION {
        if !bytes.is_empty() {
            warn!("cache sidecar has unknown magic/version; ignoring");
        }
        return Vec::new();
    }

    let mut entries = Vec::new();
    let mut pos = 5usize;

    loop {
        match decode_entry(bytes, pos) {
            Some((entry, next)) => {
                entries.push(entry);
                pos = next;
                if pos == bytes.len() {
                    break;
                }
            }
            None => {
                if pos != bytes.len() {
                    warn!(
                        parsed = entries.len(),
                        "cache sidecar truncated; dropping tail"
                    );
                }
                break;
            }
        }
    }
    entries
}

fn read_u32(bytes: &[u8], pos: usize) -> Option<(u32, usize)> {
    let raw = bytes.get(pos..pos + 4)?;
    Some((u32::from_le_bytes(raw.try_into().ok()?), pos + 4))
}

fn decode_entry(bytes: &[u8], pos: usize) -> Option<((String, CachedEntry), usize)> {
    let (key_len, pos) = read_u32(bytes, pos)?;
    let key = std::str::from_utf8(bytes.get(pos..pos + key_len as usize)?).ok()?;
    let pos = pos + key_len as usize;

    let (headers_len, pos) = read_u32(bytes, pos)?;
    let headers = std::str::from_utf8(bytes.get(pos..pos + headers_len as usize)?).ok()?;
    let pos = pos + headers_len as usize;

    let raw_status = bytes.get(pos..pos + 4)?;
    let status = i32::from_le_bytes(raw_status.try_into().ok()?);
    let pos = pos + 4;

    let (body_len, pos) = read_u32(bytes, pos)?;
    let body = bytes.get(pos..pos + body_len as usize)?;
    let pos = pos + body_len as usize;

    let entry = CachedEntry::new(
        u16::try_from(status).ok()?,
        HeaderList::from_wire(headers),
        Bytes::copy_from_slice(body),
    );
    Some(((key.to_string(), entry), pos))
}

/// Writes the current cache contents to `path`, atomically via a sibling
/// temp file and rename.
pub async fn dump_to(path: &Path, store: &CacheStore) -> std::io::Result<()> {
    let snapshot = store.dump();
    let encoded = encode(&snapshot);
    let tmp = path.with_extension("bin.tmp");
    tokio::fs::write(&tmp, &encoded).await?;
    tokio::fs::rename(&tmp, path).await?;
    debug!(
        entries = snapshot.len(),
        bytes = encoded.len(),
        "cache dumped to sidecar"
    );
    Ok(())
}

/// Restores the sidecar into the store. Missing or unreadable files are a
/// cold start, never an error.
pub async fn load_into(path: &Path, store: &CacheStore) {
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            let entries = decode(&bytes);
            if !entries.is_empty() {
                let count = entries.len();
                store.load(entries);
                info!(entries = count, path = %path.display(), "cache warm start");
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("could not read cache sidecar: {}", e),
    }
}

/// Spawns the dump scheduler: every five seconds, write the sidecar unless a
/// previous dump is still in flight. On shutdown a final dump is written.
pub fn spawn_persistence(
    store: Arc<CacheStore>,
    path: PathBuf,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let dumping = Arc::new(AtomicBool::new(false));
        let mut ticker = tokio::time::interval(PERSIST_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if dumping.swap(true, Ordering::AcqRel) {
                        debug!("previous cache dump still in flight; skipping tick");
                        continue;
                    }
                    let store = Arc::clone(&store);
                    let path = path.clone();
                    let flag = Arc::clone(&dumping);
                    tokio::spawn(async move {
                        if let Err(e) = dump_to(&path, &store).await {
                            warn!("cache dump failed: {}", e);
                        }
                        flag.store(false, Ordering::Release);
                    });
                }
                _ = shutdown.cancelled() => {
                    if let Err(e) = dump_to(&path, &store).await {
                        warn!("final cache dump failed: {}", e);
                    } else {
                        info!("final cache dump written");
                    }
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::CacheConfig;

    fn sample_entry(body: &str) -> CachedEntry {
        let mut headers = HeaderList::new();
        headers.set("content-encoding", "identity");
        headers.set("content-length", body.len().to_string());
        CachedEntry::new(200, headers, Bytes::copy_from_slice(body.as_bytes()))
    }

    #[test]
    fn test_encode_decode_roundtrip_multiple_entries() {
        let entries = vec![
            ("req:0001".to_string(), Arc::new(sample_entry("first body"))),
            ("req:0002".to_string(), Arc::new(sample_entry("second"))),
        ];
        let decoded = decode(&encode(&entries));
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].0, "req:0001");
        assert_eq!(decoded[0].1.body.as_ref(), b"first body");
        assert_eq!(decoded[1].1.status, 200);
        assert_eq!(
            decoded[1].1.headers.get("content-encoding"),
            Some("identity")
        );
    }

    #[test]
    fn test_decode_rejects_foreign_magic() {
        assert!(decode(b"NOPE\x01rest").is_empty());
        assert!(decode(b"").is_empty());
    }

    #[test]
    fn test_decode_drops_truncated_tail() {
        let entries = vec![
            ("k1".to_string(), Arc::new(sample_entry("aaaa"))),
            ("k2".to_string(), Arc::new(sample_entry("bbbb"))),
        ];
        let mut encoded = encode(&entries);
        encoded.truncate(encoded.len() - 3);
        let decoded = decode(&encoded);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].0, "k1");
    }

    #[tokio::test]
    async fn test_dump_and_load_file() {
        let dir = std::env::temp_dir().join("stratus-persist-test");
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("cache.bin");

        let store = CacheStore::new(CacheConfig::with_max_bytes(1 << 20));
        store.set("req:a".into(), sample_entry("hello"));
        dump_to(&path, &store).await.unwrap();

        let restored = CacheStore::new(CacheConfig::with_max_bytes(1 << 20));
        load_into(&path, &restored).await;
        assert_eq!(restored.len(), 1);
        assert_eq!(restored.get("req:a").unwrap().body.as_ref(), b"hello");

        tokio::fs::remove_file(&path).await.ok();
    }
}
