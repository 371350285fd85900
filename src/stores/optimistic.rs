//! Optimistic edit bookkeeping.
//!
//! A store applies an edit to its collection before the server confirms it,
//! then either commits the server's version or restores the snapshot taken
//! when the edit began. These helpers work on any `Vec<T: Record>`.

use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use super::state::StoreError;
use crate::api::types::{Record, RecordId};

/// Source of placeholder ids for records created locally. Always negative,
/// so they never collide with server ids.
#[derive(Debug)]
pub struct TempIds(AtomicI64);

impl Default for TempIds {
  fn default() -> Self {
    Self(AtomicI64::new(-1))
  }
}

impl TempIds {
  pub fn next(&self) -> RecordId {
    self.0.fetch_sub(1, Ordering::Relaxed)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationState {
  Pending,
  Committed,
  RolledBack,
}

/// Record ids with an unresolved optimistic edit.
#[derive(Debug, Default, Clone)]
pub struct InFlight {
  ids: Arc<Mutex<HashSet<RecordId>>>,
}

impl InFlight {
  fn lock(&self) -> MutexGuard<'_, HashSet<RecordId>> {
    self.ids.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Claim `id` for an edit. Fails if another edit to it is still pending.
  pub fn begin(&self, label: &'static str, id: RecordId) -> Result<Mutation, StoreError> {
    self.begin_many(label, vec![id])
  }

  /// Claim every id at once, or none of them.
  pub fn begin_many(&self, label: &'static str, ids: Vec<RecordId>) -> Result<Mutation, StoreError> {
    let mut held = self.lock();
    if let Some(busy) = ids.iter().find(|id| held.contains(id)) {
      debug!(label, id = busy, "rejecting concurrent edit");
      return Err(StoreError::EditInFlight(*busy));
    }
    held.extend(ids.iter().copied());
    Ok(Mutation {
      label,
      ids,
      state: MutationState::Pending,
      in_flight: self.clone(),
    })
  }

  #[cfg(test)]
  pub fn contains(&self, id: RecordId) -> bool {
    self.lock().contains(&id)
  }
}

/// One pending edit. Releases its ids when resolved or dropped.
#[derive(Debug)]
pub struct Mutation {
  label: &'static str,
  ids: Vec<RecordId>,
  state: MutationState,
  in_flight: InFlight,
}

impl Mutation {
  pub fn commit(mut self) {
    self.state = MutationState::Committed;
    info!(label = self.label, ids = ?self.ids, "change committed");
  }

  pub fn roll_back(mut self, reason: &dyn std::fmt::Display) {
    self.state = MutationState::RolledBack;
    warn!(label = self.label, ids = ?self.ids, error = %reason, "change rolled back");
  }
}

impl Drop for Mutation {
  fn drop(&mut self) {
    if self.state == MutationState::Pending {
      warn!(label = self.label, ids = ?self.ids, "change abandoned before the server answered");
    }
    let mut held = self.in_flight.lock();
    for id in &self.ids {
      held.remove(id);
    }
  }
}

/// Pre-edit copy of a record and where it sat.
#[derive(Debug, Clone)]
pub struct Snapshot<T> {
  pub index: usize,
  pub record: T,
}

pub fn position<T: Record>(items: &[T], id: RecordId) -> Option<usize> {
  items.iter().position(|r| r.id() == id)
}

pub fn insert_head<T>(items: &mut Vec<T>, record: T) {
  items.insert(0, record);
}

/// Swap the placeholder for the server's record. If the server record is
/// already present (a refresh landed first) the placeholder is just removed.
pub fn commit_create<T: Record>(items: &mut Vec<T>, temp_id: RecordId, record: T) {
  let existing = position(items, record.id());
  match (position(items, temp_id), existing) {
    (Some(index), None) => items[index] = record,
    (Some(index), Some(_)) => {
      items.remove(index);
    }
    (None, None) => insert_head(items, record),
    (None, Some(_)) => {}
  }
}

pub fn rollback_create<T: Record>(items: &mut Vec<T>, temp_id: RecordId) {
  items.retain(|r| r.id() != temp_id);
}

/// Snapshot the record, then apply `edit` to it in place.
pub fn begin_update<T: Record>(
  items: &mut [T],
  id: RecordId,
  edit: impl FnOnce(&mut T),
) -> Option<Snapshot<T>> {
  let index = position(items, id)?;
  let snapshot = Snapshot {
    index,
    record: items[index].clone(),
  };
  edit(&mut items[index]);
  Some(snapshot)
}

pub fn commit_update<T: Record>(items: &mut [T], record: T) {
  if let Some(index) = position(items, record.id()) {
    items[index] = record;
  }
}

pub fn rollback_update<T: Record>(items: &mut Vec<T>, snapshot: Snapshot<T>) {
  match position(items, snapshot.record.id()) {
    Some(index) => items[index] = snapshot.record,
    None => restore_at(items, snapshot),
  }
}

/// Remove the record, remembering its position.
pub fn begin_delete<T: Record>(items: &mut Vec<T>, id: RecordId) -> Option<Snapshot<T>> {
  let index = position(items, id)?;
  let record = items.remove(index);
  Some(Snapshot { index, record })
}

pub fn rollback_delete<T: Record>(items: &mut Vec<T>, snapshot: Snapshot<T>) {
  if position(items, snapshot.record.id()).is_none() {
    restore_at(items, snapshot);
  }
}

fn restore_at<T>(items: &mut Vec<T>, snapshot: Snapshot<T>) {
  let index = snapshot.index.min(items.len());
  items.insert(index, snapshot.record);
}

#[cfg(test)]
mod tests {
  use super::*;

  #[derive(Debug, Clone, PartialEq)]
  struct Item {
    id: RecordId,
    label: &'static str,
  }

  impl Record for Item {
    fn id(&self) -> RecordId {
      self.id
    }
  }

  fn item(id: RecordId, label: &'static str) -> Item {
    Item { id, label }
  }

  fn items() -> Vec<Item> {
    vec![item(1, "a"), item(2, "b"), item(3, "c")]
  }

  #[test]
  fn test_temp_ids_are_negative_and_unique() {
    let ids = TempIds::default();
    let a = ids.next();
    let b = ids.next();
    assert!(a < 0 && b < 0);
    assert_ne!(a, b);
  }

  #[test]
  fn test_create_commit_and_rollback() {
    let mut list = items();
    insert_head(&mut list, item(-1, "new"));
    let mut committed = list.clone();

    commit_create(&mut committed, -1, item(10, "new"));
    assert_eq!(committed[0], item(10, "new"));
    assert_eq!(committed.len(), 4);

    rollback_create(&mut list, -1);
    assert_eq!(list, items());
  }

  #[test]
  fn test_commit_create_never_duplicates() {
    let mut list = items();
    insert_head(&mut list, item(-1, "new"));
    list.push(item(10, "new"));

    commit_create(&mut list, -1, item(10, "new"));

    assert_eq!(list.iter().filter(|i| i.id == 10).count(), 1);
    assert!(list.iter().all(|i| i.id != -1));
  }

  #[test]
  fn test_update_rollback_restores_exactly() {
    let mut list = items();
    let snapshot = begin_update(&mut list, 2, |i| i.label = "edited").unwrap();
    assert_eq!(list[1].label, "edited");

    rollback_update(&mut list, snapshot);
    assert_eq!(list, items());
  }

  #[test]
  fn test_update_unknown_record() {
    let mut list = items();
    assert!(begin_update(&mut list, 99, |_| {}).is_none());
    assert_eq!(list, items());
  }

  #[test]
  fn test_delete_rollback_restores_index() {
    let mut list = items();
    let snapshot = begin_delete(&mut list, 2).unwrap();
    assert_eq!(list, vec![item(1, "a"), item(3, "c")]);

    rollback_delete(&mut list, snapshot);
    assert_eq!(list, items());
  }

  #[test]
  fn test_delete_rollback_clamps_index() {
    let mut list = items();
    let snapshot = begin_delete(&mut list, 3).unwrap();
    list.clear();

    rollback_delete(&mut list, snapshot);
    assert_eq!(list, vec![item(3, "c")]);
  }

  #[test]
  fn test_in_flight_guard() {
    let in_flight = InFlight::default();
    let first = in_flight.begin("update", 7).unwrap();

    assert_eq!(
      in_flight.begin("update", 7).unwrap_err(),
      StoreError::EditInFlight(7)
    );
    assert!(in_flight.begin("update", 8).is_ok());

    first.commit();
    assert!(!in_flight.contains(7));
    assert!(in_flight.begin("update", 7).is_ok());
  }

  #[test]
  fn test_begin_many_is_all_or_nothing() {
    let in_flight = InFlight::default();
    let _held = in_flight.begin("read", 2).unwrap();

    let err = in_flight.begin_many("read all", vec![1, 2, 3]).unwrap_err();

    assert_eq!(err, StoreError::EditInFlight(2));
    assert!(!in_flight.contains(1));
    assert!(!in_flight.contains(3));
  }
}
