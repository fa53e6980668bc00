use std::{future::Future, time::Duration};

use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, warn};

use super::{CacheKey, QueryCache};

/// Read-through caching of an arbitrary async call.
///
/// Returns the cached value under `key` when present and decodable as `T`;
/// otherwise runs `call`, caches a successful result with `ttl` and `tags`
/// and returns it. Errors are returned as-is and never cached.
///
/// ```no_run
/// use sql_query_layer::{
///     cache::{CacheKey, QueryCache, cached_call},
///     db::{ConnectionManager, Row, SqlValue},
///     error::DbError
/// };
///
/// # async fn run(cache: &QueryCache, db: &ConnectionManager) -> Result<(), DbError> {
/// let org_id = 7;
/// let key = CacheKey::for_call("org_courses", &org_id);
/// let courses: Vec<Row> = cached_call(cache, &key, None, [format!("org:{}", org_id)], || {
///     db.execute_query(
///         "SELECT id, title FROM courses WHERE org_id = $1",
///         &[SqlValue::from(org_id)]
///     )
/// })
/// .await?;
/// # Ok(())
/// # }
/// ```
pub async fn cached_call<T, E, F, Fut, I, S>(
    cache: &QueryCache,
    key: &CacheKey,
    ttl: Option<Duration>,
    tags: I,
    call: F
) -> Result<T, E>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    I: IntoIterator<Item = S>,
    S: Into<String>
{
    if let Some(cached) = cache.get_key(key) {
        match serde_json::from_value(cached) {
            Ok(value) => return Ok(value),
            Err(e) => debug!(key = %key, error = %e, "Cached value has a different shape")
        }
    }

    let value = call().await?;
    match serde_json::to_value(&value) {
        Ok(json) => cache.set_key(key, json, ttl, tags),
        Err(e) => warn!(key = %key, error = %e, "Result not cacheable")
    }
    Ok(value)
}
