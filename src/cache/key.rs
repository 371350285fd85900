//! Structured cache keys and the TTL table.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::config::CacheConfig;

/// The kind of entity a cached response belongs to. Writes invalidate by class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionClass {
  Tasks,
  Comments,
  Attachments,
  Invitations,
  Notifications,
  Users,
  AdminTasks,
  Dashboard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
  List,
  Detail,
  Stats,
  Count,
}

/// `(class, kind, params_hash)`. Two parameter sets with the same values
/// produce the same hash regardless of field order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
  pub class: CollectionClass,
  pub kind: OperationKind,
  pub params_hash: String,
}

impl CacheKey {
  pub fn new<P: Serialize + ?Sized>(class: CollectionClass, kind: OperationKind, params: &P) -> Self {
    let value = serde_json::to_value(params).unwrap_or(Value::Null);
    let mut canonical = String::new();
    write_canonical(&value, &mut canonical);

    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());

    Self {
      class,
      kind,
      params_hash: hex::encode(hasher.finalize()),
    }
  }

  /// Key for an operation without parameters.
  pub fn bare(class: CollectionClass, kind: OperationKind) -> Self {
    Self::new(class, kind, &Value::Null)
  }

  pub fn in_classes(&self, classes: &[CollectionClass]) -> bool {
    classes.contains(&self.class)
  }
}

/// Serialize JSON with object keys sorted at every level.
fn write_canonical(value: &Value, out: &mut String) {
  match value {
    Value::Object(map) => {
      let mut entries: Vec<_> = map.iter().collect();
      entries.sort_by(|a, b| a.0.cmp(b.0));
      out.push('{');
      for (i, (k, v)) in entries.into_iter().enumerate() {
        if i > 0 {
          out.push(',');
        }
        out.push_str(&Value::String(k.clone()).to_string());
        out.push(':');
        write_canonical(v, out);
      }
      out.push('}');
    }
    Value::Array(items) => {
      out.push('[');
      for (i, item) in items.iter().enumerate() {
        if i > 0 {
          out.push(',');
        }
        write_canonical(item, out);
      }
      out.push(']');
    }
    scalar => out.push_str(&scalar.to_string()),
  }
}

/// How long each class of response stays fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlPolicy {
  /// List and detail reads
  pub standard: Duration,
  /// Aggregate statistics
  pub aggregate: Duration,
  /// Notification feeds, written to more often
  pub feed: Duration,
}

impl Default for TtlPolicy {
  fn default() -> Self {
    Self {
      standard: Duration::from_secs(30),
      aggregate: Duration::from_secs(60),
      feed: Duration::from_secs(15),
    }
  }
}

impl TtlPolicy {
  pub fn from_config(config: &CacheConfig) -> Self {
    Self {
      standard: Duration::from_secs(config.list_ttl_secs),
      aggregate: Duration::from_secs(config.stats_ttl_secs),
      feed: Duration::from_secs(config.notifications_ttl_secs),
    }
  }

  pub fn ttl_for(&self, key: &CacheKey) -> Duration {
    match (key.class, key.kind) {
      (CollectionClass::Notifications, _) => self.feed,
      (_, OperationKind::Stats) => self.aggregate,
      _ => self.standard,
    }
  }
}
