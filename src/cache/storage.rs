//! Cache storage implementations.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::key::CacheKey;
use super::traits::{CacheStorage, CachedPayload};

/// In-memory storage. Lives as long as the process.
#[derive(Default)]
pub struct MemoryStorage {
  entries: Mutex<HashMap<CacheKey, CachedPayload>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  fn entries(&self) -> MutexGuard<'_, HashMap<CacheKey, CachedPayload>> {
    self.entries.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

impl CacheStorage for MemoryStorage {
  fn get(&self, key: &CacheKey) -> Option<CachedPayload> {
    self.entries().get(key).cloned()
  }

  fn put(&self, key: CacheKey, payload: CachedPayload) {
    self.entries().insert(key, payload);
  }

  fn remove(&self, key: &CacheKey) {
    self.entries().remove(key);
  }

  fn invalidate(&self, predicate: &dyn Fn(&CacheKey) -> bool) -> usize {
    let mut entries = self.entries();
    let before = entries.len();
    entries.retain(|key, _| !predicate(key));
    before - entries.len()
  }

  fn clear(&self) {
    self.entries().clear();
  }
}

/// Storage implementation that doesn't cache anything.
/// Used when caching is disabled - all operations are no-ops.
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn get(&self, _key: &CacheKey) -> Option<CachedPayload> {
    None // Always miss
  }

  fn put(&self, _key: CacheKey, _payload: CachedPayload) {}

  fn remove(&self, _key: &CacheKey) {}

  fn invalidate(&self, _predicate: &dyn Fn(&CacheKey) -> bool) -> usize {
    0
  }

  fn clear(&self) {}
}
