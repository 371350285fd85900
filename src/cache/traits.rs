//! Core traits and types for the caching system.

use serde_json::Value;
use tokio::time::Instant;

use super::key::CacheKey;

/// A stored response and when it was stored.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedPayload {
  pub payload: Value,
  pub stored_at: Instant,
}

/// Trait for cache storage backends.
///
/// Storage is freshness-agnostic: it keeps whatever it was given. The
/// [`CacheLayer`](super::CacheLayer) decides what is still fresh.
pub trait CacheStorage: Send + Sync {
  /// Entry for `key`, regardless of age.
  fn get(&self, key: &CacheKey) -> Option<CachedPayload>;

  /// Store `payload` under `key`, replacing any previous entry.
  fn put(&self, key: CacheKey, payload: CachedPayload);

  /// Drop the entry for `key`.
  fn remove(&self, key: &CacheKey);

  /// Drop every entry whose key matches. Returns how many were removed.
  fn invalidate(&self, predicate: &dyn Fn(&CacheKey) -> bool) -> usize;

  /// Drop everything.
  fn clear(&self);
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<Instant>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from cached data.
  pub fn from_cache(data: T, cached_at: Instant) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      cached_at: Some(cached_at),
    }
  }
}

/// Indicates where returned data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache, still within its TTL
  Cache,
}
