//! State containers shared by the domain stores.

use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::watch;
use tracing::warn;

use crate::api::types::RecordId;
use crate::api::ApiError;
use crate::cache::{CacheResult, CacheSource};

/// One collection plus the status of the last operation on it.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreState<T> {
  pub collection: Vec<T>,
  pub loading: bool,
  pub error: Option<String>,
  /// Set when a read returned a payload we could not use
  pub warning: Option<String>,
}

impl<T> Default for StoreState<T> {
  fn default() -> Self {
    Self {
      collection: Vec::new(),
      loading: false,
      error: None,
      warning: None,
    }
  }
}

impl<T> StoreState<T> {
  pub fn begin_read(&mut self) {
    self.loading = true;
    self.error = None;
  }

  /// Apply the outcome of a collection read.
  ///
  /// A malformed payload keeps the previous collection and only records a
  /// warning. Other failures keep it too, but set `error` and propagate.
  pub fn finish_read(
    &mut self,
    result: Result<CacheResult<Vec<T>>, ApiError>,
    fallback: &str,
  ) -> Result<FetchOutcome, StoreError> {
    self.loading = false;
    match result {
      Ok(fetched) => {
        self.collection = fetched.data;
        self.warning = None;
        Ok(FetchOutcome::Fresh(fetched.source))
      }
      Err(ApiError::Malformed(shape)) => {
        let warning = format!("{}: {}", fallback, shape);
        warn!(error = %shape, "{}, keeping previous data", fallback);
        self.warning = Some(warning.clone());
        Ok(FetchOutcome::Stale { warning })
      }
      Err(e) => {
        self.error = Some(e.user_message(fallback));
        Err(e.into())
      }
    }
  }
}

/// How a read completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
  /// The collection was replaced with data from `source`.
  Fresh(CacheSource),
  /// The response was unusable; the previous collection was kept.
  Stale { warning: String },
}

impl FetchOutcome {
  pub fn is_stale(&self) -> bool {
    matches!(self, Self::Stale { .. })
  }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
  #[error(transparent)]
  Api(#[from] ApiError),

  /// A second optimistic edit was attempted while the first is unresolved.
  #[error("record {0} already has a change in progress")]
  EditInFlight(RecordId),

  #[error("record {0} is not loaded")]
  UnknownRecord(RecordId),

  /// The session could not be persisted or cleared.
  #[error("session storage failed: {0}")]
  Session(String),
}

impl StoreError {
  pub fn user_message(&self, fallback: &str) -> String {
    match self {
      Self::Api(e) => e.user_message(fallback),
      other => other.to_string(),
    }
  }
}

/// Store state behind a mutex, republished to watchers after every change.
///
/// Each update is applied and published as one step, so a watcher never sees
/// half of a change.
pub struct Published<S> {
  current: Mutex<S>,
  tx: watch::Sender<S>,
}

impl<S: Clone> Published<S> {
  pub fn new(initial: S) -> Self {
    let (tx, _) = watch::channel(initial.clone());
    Self {
      current: Mutex::new(initial),
      tx,
    }
  }

  fn lock(&self) -> MutexGuard<'_, S> {
    self.current.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn read<R>(&self, f: impl FnOnce(&S) -> R) -> R {
    f(&self.lock())
  }

  pub fn update<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
    let mut guard = self.lock();
    let result = f(&mut guard);
    self.tx.send_replace(guard.clone());
    result
  }

  pub fn snapshot(&self) -> S {
    self.lock().clone()
  }

  pub fn subscribe(&self) -> watch::Receiver<S> {
    self.tx.subscribe()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::schema::ShapeError;

  #[test]
  fn test_malformed_read_keeps_collection() {
    let mut state = StoreState {
      collection: vec![1, 2],
      ..Default::default()
    };
    state.begin_read();

    let outcome = state
      .finish_read(
        Err(ApiError::Malformed(ShapeError::Missing("tasks"))),
        "Failed to fetch tasks",
      )
      .unwrap();

    assert!(outcome.is_stale());
    assert_eq!(state.collection, vec![1, 2]);
    assert!(!state.loading);
    assert!(state.error.is_none());
    assert!(state.warning.as_deref().unwrap().contains("tasks"));
  }

  #[test]
  fn test_failed_read_keeps_collection_and_sets_error() {
    let mut state = StoreState {
      collection: vec![1],
      ..Default::default()
    };

    let err = state
      .finish_read(
        Err(ApiError::Server {
          status: 500,
          message: None,
        }),
        "Failed to fetch tasks",
      )
      .unwrap_err();

    assert!(matches!(err, StoreError::Api(ApiError::Server { .. })));
    assert_eq!(state.collection, vec![1]);
    assert_eq!(state.error.as_deref(), Some("Failed to fetch tasks"));
  }

  #[test]
  fn test_successful_read_clears_warning() {
    let mut state = StoreState::<i32> {
      warning: Some("old".into()),
      ..Default::default()
    };

    let outcome = state
      .finish_read(Ok(CacheResult::from_network(vec![3])), "x")
      .unwrap();

    assert_eq!(outcome, FetchOutcome::Fresh(CacheSource::Network));
    assert_eq!(state.collection, vec![3]);
    assert!(state.warning.is_none());
  }

  #[test]
  fn test_published_updates_reach_watchers() {
    let published = Published::new(0);
    let rx = published.subscribe();

    let doubled = published.update(|n| {
      *n = 21;
      *n * 2
    });

    assert_eq!(doubled, 42);
    assert_eq!(*rx.borrow(), 21);
    assert_eq!(published.snapshot(), 21);
  }
}
