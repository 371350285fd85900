//! Cache layer that orchestrates caching logic with network fetching.

use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::key::{CacheKey, CollectionClass, TtlPolicy};
use super::traits::{CacheResult, CacheStorage, CachedPayload};
use crate::api::schema::ShapeError;
use crate::api::ApiError;

/// Response cache shared by every store.
///
/// Entries older than their TTL are treated as absent and dropped when
/// looked up; nothing sweeps them in the background.
#[derive(Clone)]
pub struct CacheLayer {
  storage: Arc<dyn CacheStorage>,
  ttl: TtlPolicy,
}

impl CacheLayer {
  /// Create a new cache layer with the given storage backend.
  pub fn new(storage: Arc<dyn CacheStorage>) -> Self {
    Self {
      storage,
      ttl: TtlPolicy::default(),
    }
  }

  /// Replace the TTL table.
  pub fn with_ttl(mut self, ttl: TtlPolicy) -> Self {
    self.ttl = ttl;
    self
  }

  /// Fresh entry for `key`, if any.
  pub fn get(&self, key: &CacheKey) -> Option<CachedPayload> {
    let cached = self.storage.get(key)?;
    if cached.stored_at.elapsed() >= self.ttl.ttl_for(key) {
      debug!(class = ?key.class, kind = ?key.kind, "cache entry expired");
      self.storage.remove(key);
      return None;
    }
    Some(cached)
  }

  pub fn put(&self, key: CacheKey, payload: Value) {
    self.storage.put(
      key,
      CachedPayload {
        payload,
        stored_at: Instant::now(),
      },
    );
  }

  pub fn invalidate(&self, predicate: impl Fn(&CacheKey) -> bool) -> usize {
    self.storage.invalidate(&predicate)
  }

  /// Drop every entry belonging to one of `classes`.
  pub fn invalidate_classes(&self, classes: &[CollectionClass]) -> usize {
    let removed = self.invalidate(|key| key.in_classes(classes));
    debug!(?classes, removed, "invalidated cache entries");
    removed
  }

  pub fn clear(&self) {
    debug!("clearing response cache");
    self.storage.clear();
  }

  /// Cache-first read.
  ///
  /// 1. Fresh cached payload that decodes: return it without touching the network
  /// 2. Otherwise call `fetcher`, decode, and store the raw payload on success
  ///
  /// Payloads that fail to decode are never cached.
  pub async fn fetch<T, D, F, Fut>(
    &self,
    key: &CacheKey,
    decode: D,
    fetcher: F,
  ) -> Result<CacheResult<T>, ApiError>
  where
    D: Fn(&Value) -> Result<T, ShapeError>,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Value, ApiError>>,
  {
    if let Some(cached) = self.get(key) {
      match decode(&cached.payload) {
        Ok(data) => {
          debug!(class = ?key.class, kind = ?key.kind, "cache hit");
          return Ok(CacheResult::from_cache(data, cached.stored_at));
        }
        Err(e) => {
          warn!(class = ?key.class, error = %e, "dropping undecodable cache entry");
          self.storage.remove(key);
        }
      }
    }

    debug!(class = ?key.class, kind = ?key.kind, "cache miss");
    let payload = fetcher().await?;
    let data = decode(&payload)?;
    self.put(key.clone(), payload);
    Ok(CacheResult::from_network(data))
  }
}
