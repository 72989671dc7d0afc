//! The unit stored in the cache: an encoded response body with its status
//! and an ordered header list.

use bytes::Bytes;

use crate::codec::Encoding;

/// An ordered sequence of header pairs with case-insensitive lookup.
/// Duplicates are allowed; iteration preserves insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderList(Vec<(String, String)>);

impl HeaderList {
    pub fn new() -> Self {
        Self::default()
    }

    /// First value for `name`, case-insensitive.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Replaces every occurrence of `name` with a single pair.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.remove(name);
        self.0.push((name.to_string(), value.into()));
    }

    /// Appends without removing prior occurrences.
    pub fn append(&mut self, name: &str, value: impl Into<String>) {
        self.0.push((name.to_string(), value.into()));
    }

    pub fn remove(&mut self, name: &str) {
        self.0.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Serializes as `name:value` lines separated by `\n` (the sidecar wire
    /// form).
    pub fn to_wire(&self) -> String {
        self.0
            .iter()
            .map(|(n, v)| format!("{}:{}", n, v))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Parses the `name:value` line form. Lines without a colon are skipped.
    pub fn from_wire(wire: &str) -> Self {
        let pairs = wire
            .lines()
            .filter_map(|line| {
                line.split_once(':')
                    .map(|(n, v)| (n.to_string(), v.to_string()))
            })
            .collect();
        Self(pairs)
    }

    /// Approximate byte footprint of the header pairs.
    pub fn byte_size(&self) -> usize {
        self.0.iter().map(|(n, v)| n.len() + v.len() + 2).sum()
    }
}

impl FromIterator<(String, String)> for HeaderList {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A cached response. The body is opaque bytes, already encoded per the
/// `content-encoding` header.
#[derive(Debug, Clone)]
pub struct CachedEntry {
    pub status: u16,
    pub headers: HeaderList,
    pub body: Bytes,
}

impl CachedEntry {
    pub fn new(status: u16, headers: HeaderList, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// The body's encoding per `content-encoding`; identity when the header
    /// is absent or carries an unknown token.
    pub fn encoding(&self) -> Encoding {
        self.headers
            .get("content-encoding")
            .and_then(Encoding::from_token)
            .unwrap_or(Encoding::Identity)
    }

    /// Byte footprint charged against the cache budget: body plus headers
    /// plus a small fixed overhead for the bookkeeping around them.
    pub fn byte_size(&self) -> usize {
        self.body.len() + self.headers.byte_size() + 64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive_lookup() {
        let mut headers = HeaderList::new();
        headers.set("Content-Type", "text/plain");
        assert_eq!(headers.get("content-type"), Some("text/plain"));
        assert_eq!(headers.get("CONTENT-TYPE"), Some("text/plain"));
    }

    #[test]
    fn test_set_replaces_duplicates() {
        let mut headers = HeaderList::new();
        headers.append("x-tag", "a");
        headers.append("X-Tag", "b");
        headers.set("x-tag", "c");
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("x-tag"), Some("c"));
    }

    #[test]
    fn test_wire_roundtrip() {
        let mut headers = HeaderList::new();
        headers.set("content-type", "application/json");
        headers.set("content-encoding", "gzip");
        headers.append("set-cookie", "a=1");
        headers.append("set-cookie", "b=2");

        let restored = HeaderList::from_wire(&headers.to_wire());
        assert_eq!(restored, headers);
    }

    #[test]
    fn test_entry_encoding_defaults_to_identity() {
        let entry = CachedEntry::new(200, HeaderList::new(), Bytes::from_static(b"x"));
        assert_eq!(entry.encoding(), Encoding::Identity);
    }
}
