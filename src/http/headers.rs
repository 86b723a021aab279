//! HTTP header storage for a parsed [`Request`](crate::http::request::Request).
//!
//! Headers are stored in an ordered map from a UTF-8 decoded header name to
//! the raw header value bytes. Lookup is case-sensitive as stored — the
//! engine does not normalize header name case, matching the behavior
//! observed in the system this crate is modeled on. A header repeated on
//! the wire overwrites the previous value for the same name rather than
//! being concatenated.

use indexmap::IndexMap;

#[derive(Debug, Clone, Default)]
pub struct HeaderMap {
    headers: IndexMap<String, Vec<u8>>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self {
            headers: IndexMap::new(),
        }
    }

    /// Stores `value` under `name`, overwriting any prior value for the
    /// same name (last write wins).
    pub fn insert(&mut self, name: String, value: Vec<u8>) {
        self.headers.insert(name, value);
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.headers.get(name).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.headers.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}
