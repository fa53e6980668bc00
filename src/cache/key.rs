use std::fmt;

use serde::Serialize;
use xxhash_rust::xxh3::xxh3_128;

use crate::db::SqlValue;

/// Cache key: readable representation plus its stable digest.
///
/// The digest addresses the entry; the representation is kept for
/// pattern invalidation and debugging.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    repr:   String,
    digest: String
}

impl CacheKey {
    /// Key for a query and its bound parameters
    pub fn new(query: &str, params: &[SqlValue]) -> Self {
        Self::from_repr(format!("{}:{}", query, json_repr(&params)))
    }

    /// Key for an arbitrary named call and its serializable arguments.
    ///
    /// Used with [`cached_call`](super::cached_call) when the cached value
    /// does not come from a single query.
    pub fn for_call(name: &str, args: &impl Serialize) -> Self {
        Self::from_repr(format!("{}:{}", name, json_repr(args)))
    }

    fn from_repr(repr: String) -> Self {
        let digest = format!("{:032x}", xxh3_128(repr.as_bytes()));
        Self {
            repr,
            digest
        }
    }

    pub fn repr(&self) -> &str {
        &self.repr
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.digest)
    }
}

fn json_repr(value: &impl Serialize) -> String {
    serde_json::to_string(value).unwrap_or_default()
}
