//! Per-request memoization. Derived request values (cache key, acceptable
//! encodings) are computed at most once per request: the memo lives inside
//! the request context, so its lifetime is exactly the request's and no
//! global table needs clearing.

use once_cell::sync::OnceCell;

use crate::codec::Encoding;

#[derive(Debug, Default)]
pub struct RequestMemo {
    key: OnceCell<String>,
    encodings: OnceCell<Vec<Encoding>>,
}

impl RequestMemo {
    pub fn new() -> Self {
        Self::default()
    }

    /// The request key, computed on first access.
    pub fn key(&self, derive: impl FnOnce() -> String) -> &str {
        self.key.get_or_init(derive)
    }

    /// The acceptable-encodings set, computed on first access.
    pub fn encodings(&self, derive: impl FnOnce() -> Vec<Encoding>) -> &[Encoding] {
        self.encodings.get_or_init(derive)
    }
}
