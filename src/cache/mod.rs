//! In-memory response cache.
//!
//! This module provides the read-through cache shared by the domain stores:
//! - Structured keys `(collection class, operation kind, params hash)`
//! - Per-class TTLs, checked lazily on read
//! - Invalidation by typed predicate, typically a whole collection class

mod key;
mod layer;
mod storage;
mod traits;

pub use key::{CacheKey, CollectionClass, OperationKind, TtlPolicy};
pub use layer::CacheLayer;
pub use storage::{MemoryStorage, NoopStorage};
pub use traits::{CacheResult, CacheSource, CacheStorage, CachedPayload};
