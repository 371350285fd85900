//! Task list, task writes, and task statistics.

use chrono::Utc;
use serde_json::{json, Value};
use std::future::Future;
use tokio::sync::watch;
use tracing::warn;

use super::optimistic::{
  begin_delete, begin_update, commit_create, commit_update, insert_head, rollback_create,
  rollback_delete, rollback_update, InFlight, TempIds,
};
use super::state::{FetchOutcome, Published, StoreError, StoreState};
use crate::api::types::{RecordId, Task, TaskChanges, TaskDraft, TaskFilters, TaskStats, User};
use crate::api::{schema, ApiClient, ApiError, Endpoint};
use crate::cache::{CacheKey, CacheLayer, CollectionClass, OperationKind};

/// Classes a task write can make stale.
const TASK_CLASSES: &[CollectionClass] = &[
  CollectionClass::Tasks,
  CollectionClass::AdminTasks,
  CollectionClass::Dashboard,
];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TasksState {
  pub tasks: StoreState<Task>,
  /// Last task loaded on its own
  pub current: Option<Task>,
  /// Counts derived from `tasks.collection`
  pub stats: TaskStats,
}

impl TasksState {
  fn refresh_stats(&mut self) {
    self.stats = TaskStats::from_tasks(&self.tasks.collection, Utc::now());
  }

  fn sync_current(&mut self, task: &Task) {
    if self.current.as_ref().is_some_and(|c| c.id == task.id) {
      self.current = Some(task.clone());
    }
  }
}

pub struct TasksStore {
  client: ApiClient,
  cache: CacheLayer,
  state: Published<TasksState>,
  in_flight: InFlight,
  temp_ids: TempIds,
}

impl TasksStore {
  pub fn new(client: ApiClient, cache: CacheLayer) -> Self {
    Self {
      client,
      cache,
      state: Published::new(TasksState::default()),
      in_flight: InFlight::default(),
      temp_ids: TempIds::default(),
    }
  }

  pub fn state(&self) -> TasksState {
    self.state.snapshot()
  }

  pub fn subscribe(&self) -> watch::Receiver<TasksState> {
    self.state.subscribe()
  }

  pub fn stats(&self) -> TaskStats {
    self.state.read(|s| s.stats)
  }

  pub async fn fetch_tasks(&self, filters: &TaskFilters) -> Result<FetchOutcome, StoreError> {
    self.state.update(|s| s.tasks.begin_read());

    let key = CacheKey::new(CollectionClass::Tasks, OperationKind::List, filters);
    let query = filters.to_query();
    let result = self
      .cache
      .fetch(
        &key,
        |p| schema::collection::<Task>(p, "tasks"),
        || self.client.call_query(Endpoint::ListTasks, query),
      )
      .await;

    self.state.update(|s| {
      let outcome = s.tasks.finish_read(result, "Failed to fetch tasks");
      s.refresh_stats();
      outcome
    })
  }

  pub async fn fetch_task(&self, id: RecordId) -> Result<Task, StoreError> {
    let key = CacheKey::new(CollectionClass::Tasks, OperationKind::Detail, &json!({ "id": id }));
    let result = self
      .cache
      .fetch(
        &key,
        |p| schema::record::<Task>(p, "task"),
        || self.client.call(Endpoint::GetTask(id)),
      )
      .await;

    match result {
      Ok(fetched) => {
        let task = fetched.data;
        self.state.update(|s| s.current = Some(task.clone()));
        Ok(task)
      }
      Err(e) => {
        self
          .state
          .update(|s| s.tasks.error = Some(e.user_message("Failed to fetch task")));
        Err(e.into())
      }
    }
  }

  /// Server-side statistics. The locally derived counts are in [`Self::stats`].
  pub async fn fetch_stats(&self) -> Result<TaskStats, StoreError> {
    let key = CacheKey::bare(CollectionClass::Tasks, OperationKind::Stats);
    let fetched = self
      .cache
      .fetch(
        &key,
        |p| schema::field_or_root::<TaskStats>(p, "stats"),
        || self.client.call(Endpoint::TaskStats),
      )
      .await?;
    Ok(fetched.data)
  }

  /// Users a task can be assigned to. Empty when the list cannot be loaded.
  pub async fn assignable_users(&self) -> Vec<User> {
    let key = CacheKey::new(
      CollectionClass::Users,
      OperationKind::List,
      &json!({ "scope": "assignable" }),
    );
    let result = self
      .cache
      .fetch(
        &key,
        |p| schema::collection::<User>(p, "users"),
        || self.client.call(Endpoint::AssignableUsers),
      )
      .await;

    match result {
      Ok(fetched) => fetched.data,
      Err(e) => {
        warn!(error = %e, "failed to fetch assignable users");
        Vec::new()
      }
    }
  }

  pub async fn create_task(&self, draft: TaskDraft) -> Result<Task, StoreError> {
    let temp_id = self.temp_ids.next();
    let mutation = self.in_flight.begin("create task", temp_id)?;
    let placeholder = Task::from_draft(temp_id, &draft);
    self.state.update(|s| {
      s.tasks.error = None;
      insert_head(&mut s.tasks.collection, placeholder);
      s.refresh_stats();
    });

    let result = self
      .client
      .call_json(Endpoint::CreateTask, &draft)
      .await
      .and_then(|p| Ok(schema::record::<Task>(&p, "task")?));
    self.cache.invalidate_classes(TASK_CLASSES);

    match result {
      Ok(task) => {
        self.state.update(|s| {
          commit_create(&mut s.tasks.collection, temp_id, task.clone());
          s.refresh_stats();
        });
        mutation.commit();
        Ok(task)
      }
      Err(e) => {
        self.state.update(|s| {
          rollback_create(&mut s.tasks.collection, temp_id);
          s.tasks.error = Some(e.user_message("Failed to create task"));
          s.refresh_stats();
        });
        mutation.roll_back(&e);
        Err(e.into())
      }
    }
  }

  pub async fn update_task(&self, id: RecordId, changes: TaskChanges) -> Result<Task, StoreError> {
    let request = self.client.call_json(Endpoint::UpdateTask(id), &changes);
    self
      .optimistic_update("update task", id, |t| changes.apply_to(t), request, "Failed to update task")
      .await
  }

  pub async fn update_status(&self, id: RecordId, status: &str) -> Result<Task, StoreError> {
    let body = json!({ "status": status });
    let request = self.client.call_json(Endpoint::UpdateTaskStatus(id), &body);
    self
      .optimistic_update(
        "update task status",
        id,
        |t| t.status = status.to_string(),
        request,
        "Failed to update task status",
      )
      .await
  }

  async fn optimistic_update<F>(
    &self,
    label: &'static str,
    id: RecordId,
    edit: impl FnOnce(&mut Task),
    request: F,
    fallback: &str,
  ) -> Result<Task, StoreError>
  where
    F: Future<Output = Result<Value, ApiError>>,
  {
    let mutation = self.in_flight.begin(label, id)?;
    let snapshot = self.state.update(|s| {
      s.tasks.error = None;
      let snapshot = begin_update(&mut s.tasks.collection, id, edit);
      s.refresh_stats();
      snapshot
    });

    let result = request
      .await
      .and_then(|p| Ok(schema::record::<Task>(&p, "task")?));
    self.cache.invalidate_classes(TASK_CLASSES);

    match result {
      Ok(mut task) => {
        if let Some(previous) = &snapshot {
          task.backfill_relations(&previous.record);
        }
        self.state.update(|s| {
          commit_update(&mut s.tasks.collection, task.clone());
          s.sync_current(&task);
          s.refresh_stats();
        });
        mutation.commit();
        Ok(task)
      }
      Err(e) => {
        self.state.update(|s| {
          if let Some(previous) = snapshot {
            rollback_update(&mut s.tasks.collection, previous);
          }
          s.tasks.error = Some(e.user_message(fallback));
          s.refresh_stats();
        });
        mutation.roll_back(&e);
        Err(e.into())
      }
    }
  }

  pub async fn delete_task(&self, id: RecordId) -> Result<(), StoreError> {
    let mutation = self.in_flight.begin("delete task", id)?;
    let snapshot = self.state.update(|s| {
      s.tasks.error = None;
      let snapshot = begin_delete(&mut s.tasks.collection, id);
      s.refresh_stats();
      snapshot
    });

    let result = self.client.call(Endpoint::DeleteTask(id)).await;
    self.cache.invalidate_classes(TASK_CLASSES);

    match result {
      Ok(_) => {
        self.state.update(|s| {
          if s.current.as_ref().is_some_and(|c| c.id == id) {
            s.current = None;
          }
        });
        mutation.commit();
        Ok(())
      }
      Err(e) => {
        self.state.update(|s| {
          if let Some(removed) = snapshot {
            rollback_delete(&mut s.tasks.collection, removed);
          }
          s.tasks.error = Some(e.user_message("Failed to delete task"));
          s.refresh_stats();
        });
        mutation.roll_back(&e);
        Err(e.into())
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::testing::{self, MockTransport};
  use crate::api::types::status;
  use crate::cache::CacheSource;
  use std::sync::Arc;

  fn store() -> (Arc<MockTransport>, TasksStore, CacheLayer) {
    let (mock, client) = testing::client();
    let cache = testing::cache();
    (mock, TasksStore::new(client, cache.clone()), cache)
  }

  fn task(id: RecordId, status: &str) -> Value {
    json!({ "id": id, "title": format!("Task {}", id), "status": status })
  }

  async fn loaded() -> (Arc<MockTransport>, TasksStore, CacheLayer) {
    let (mock, store, cache) = store();
    mock.push(
      200,
      json!({ "tasks": [task(1, "pending"), task(2, "in_progress"), task(3, "completed")] }),
    );
    store.fetch_tasks(&TaskFilters::default()).await.unwrap();
    (mock, store, cache)
  }

  fn ids(store: &TasksStore) -> Vec<RecordId> {
    store.state().tasks.collection.iter().map(|t| t.id).collect()
  }

  #[tokio::test]
  async fn test_fetch_tasks_uses_cache_and_derives_stats() {
    let (mock, store, _) = loaded().await;

    let outcome = store.fetch_tasks(&TaskFilters::default()).await.unwrap();

    assert_eq!(outcome, FetchOutcome::Fresh(CacheSource::Cache));
    assert_eq!(mock.request_count(), 1);
    let stats = store.stats();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.in_progress, 1);
  }

  #[tokio::test]
  async fn test_fetch_tasks_accepts_paginated_envelope_and_sends_filters() {
    let (mock, store, _) = store();
    mock.push(200, json!({ "tasks": { "data": [task(5, "pending")], "total": 1 } }));
    let filters = TaskFilters {
      status: Some(status::PENDING.into()),
      ..Default::default()
    };

    store.fetch_tasks(&filters).await.unwrap();

    assert_eq!(ids(&store), vec![5]);
    assert_eq!(
      mock.requests()[0].query,
      vec![("status".to_string(), "pending".to_string())]
    );
  }

  #[tokio::test]
  async fn test_malformed_list_keeps_previous_tasks() {
    let (mock, store, _) = loaded().await;
    mock.push(200, json!({ "items": [] }));

    let outcome = store
      .fetch_tasks(&TaskFilters {
        search: Some("x".into()),
        ..Default::default()
      })
      .await
      .unwrap();

    assert!(outcome.is_stale());
    assert_eq!(ids(&store), vec![1, 2, 3]);
    assert!(store.state().tasks.warning.is_some());
  }

  #[tokio::test]
  async fn test_failed_fetch_keeps_previous_tasks() {
    let (mock, store, _) = loaded().await;
    mock.push(500, json!({ "message": "Server Error" }));

    let err = store
      .fetch_tasks(&TaskFilters {
        priority: Some("high".into()),
        ..Default::default()
      })
      .await
      .unwrap_err();

    assert!(matches!(err, StoreError::Api(ApiError::Server { .. })));
    assert_eq!(ids(&store), vec![1, 2, 3]);
    assert_eq!(store.state().tasks.error.as_deref(), Some("Server Error"));
  }

  #[tokio::test]
  async fn test_overdue_counts_only_open_tasks() {
    let (mock, store, _) = store();
    mock.push(
      200,
      json!({ "tasks": [
        { "id": 1, "status": "pending", "due_date": "2000-01-01" },
        { "id": 2, "status": "completed", "due_date": "2000-01-01" },
        { "id": 3, "status": "pending", "due_date": "2999-01-01" },
        { "id": 4, "status": "pending" }
      ] }),
    );

    store.fetch_tasks(&TaskFilters::default()).await.unwrap();

    assert_eq!(store.stats().overdue, 1);
  }

  #[tokio::test]
  async fn test_create_shows_placeholder_then_commits() {
    let (mock, store, _) = loaded().await;
    let gate = mock.hold_next();
    mock.push(201, json!({ "task": task(10, "pending") }));
    let rx = store.subscribe();

    let (created, _) = tokio::join!(
      store.create_task(TaskDraft {
        title: "New".into(),
        ..Default::default()
      }),
      async {
        while mock.request_count() < 2 {
          tokio::task::yield_now().await;
        }
        let pending = rx.borrow().tasks.collection[0].clone();
        assert!(pending.is_temp);
        assert!(pending.id < 0);
        assert_eq!(pending.title, "New");
        gate.send(()).unwrap();
      }
    );

    assert_eq!(created.unwrap().id, 10);
    assert_eq!(ids(&store), vec![10, 1, 2, 3]);
    assert_eq!(store.stats().total, 4);
  }

  #[tokio::test]
  async fn test_create_rollback_surfaces_validation_errors() {
    let (mock, store, _) = loaded().await;
    mock.push(
      422,
      json!({ "message": "Invalid", "errors": { "title": ["The title field is required."] } }),
    );

    let err = store.create_task(TaskDraft::default()).await.unwrap_err();

    assert!(matches!(err, StoreError::Api(ApiError::Client { status: 422, .. })));
    assert_eq!(ids(&store), vec![1, 2, 3]);
    assert_eq!(
      store.state().tasks.error.as_deref(),
      Some("The title field is required.")
    );
  }

  #[tokio::test]
  async fn test_create_without_task_field_rolls_back() {
    let (mock, store, _) = loaded().await;
    mock.push(201, json!({ "message": "Created" }));

    let err = store
      .create_task(TaskDraft {
        title: "New".into(),
        ..Default::default()
      })
      .await
      .unwrap_err();

    assert!(matches!(err, StoreError::Api(ApiError::Malformed(_))));
    assert_eq!(ids(&store), vec![1, 2, 3]);
  }

  #[tokio::test]
  async fn test_update_rollback_restores_snapshot() {
    let (mock, store, _) = loaded().await;
    let before = store.state().tasks.collection.clone();
    mock.push(500, Value::Null);

    let err = store
      .update_task(
        2,
        TaskChanges {
          title: Some("Renamed".into()),
          ..Default::default()
        },
      )
      .await
      .unwrap_err();

    assert!(matches!(err, StoreError::Api(ApiError::Server { .. })));
    assert_eq!(store.state().tasks.collection, before);
    assert_eq!(store.state().tasks.error.as_deref(), Some("Failed to update task"));
  }

  #[tokio::test]
  async fn test_update_commit_backfills_relations() {
    let (mock, store, _) = store();
    mock.push(
      200,
      json!({ "tasks": [{ "id": 1, "title": "A", "status": "pending", "assignee": { "id": 4, "name": "Ann" } }] }),
    );
    store.fetch_tasks(&TaskFilters::default()).await.unwrap();
    mock.push(200, json!({ "task": { "id": 1, "title": "B", "status": "pending" } }));

    let updated = store
      .update_task(
        1,
        TaskChanges {
          title: Some("B".into()),
          ..Default::default()
        },
      )
      .await
      .unwrap();

    assert_eq!(updated.extra["assignee"]["name"], "Ann");
    assert_eq!(store.state().tasks.collection[0].title, "B");
  }

  #[tokio::test]
  async fn test_status_change_is_visible_while_pending() {
    let (mock, store, _) = loaded().await;
    let gate = mock.hold_next();
    mock.push(200, json!({ "task": task(1, "completed") }));
    let rx = store.subscribe();

    let (result, _) = tokio::join!(store.update_status(1, status::COMPLETED), async {
      while mock.request_count() < 2 {
        tokio::task::yield_now().await;
      }
      assert_eq!(rx.borrow().tasks.collection[0].status, "completed");
      assert_eq!(rx.borrow().stats.completed, 2);
      gate.send(()).unwrap();
    });

    result.unwrap();
    assert_eq!(mock.requests()[1].path, "/api/tasks/1/status");
  }

  #[tokio::test]
  async fn test_second_edit_to_same_task_is_rejected() {
    let (mock, store, _) = loaded().await;
    let gate = mock.hold_next();
    mock.push(200, json!({ "task": task(1, "completed") }));

    let (first, second) = tokio::join!(store.update_status(1, status::COMPLETED), async {
      while mock.request_count() < 2 {
        tokio::task::yield_now().await;
      }
      let second = store.update_status(1, status::IN_PROGRESS).await;
      gate.send(()).unwrap();
      second
    });

    assert!(first.is_ok());
    assert_eq!(second.unwrap_err(), StoreError::EditInFlight(1));
    assert_eq!(mock.request_count(), 2);
    assert_eq!(store.state().tasks.collection[0].status, "completed");
  }

  #[tokio::test]
  async fn test_delete_rollback_restores_position() {
    let (mock, store, _) = loaded().await;
    mock.push(403, json!({ "message": "This action is unauthorized." }));

    let err = store.delete_task(2).await.unwrap_err();

    assert_eq!(err.user_message("Failed to delete task"), "This action is unauthorized.");
    assert_eq!(ids(&store), vec![1, 2, 3]);
  }

  #[tokio::test]
  async fn test_writes_invalidate_task_classes() {
    let (mock, store, cache) = loaded().await;
    let dashboard = CacheKey::bare(CollectionClass::Dashboard, OperationKind::Stats);
    let comments = CacheKey::bare(CollectionClass::Comments, OperationKind::List);
    cache.put(dashboard.clone(), json!({}));
    cache.put(comments.clone(), json!({}));
    mock.push(200, Value::Null);

    store.delete_task(3).await.unwrap();

    assert_eq!(ids(&store), vec![1, 2]);
    assert!(cache.get(&dashboard).is_none());
    assert!(cache.get(&comments).is_some());

    mock.push(200, json!({ "tasks": [task(1, "pending")] }));
    store.fetch_tasks(&TaskFilters::default()).await.unwrap();
    assert_eq!(mock.request_count(), 3);
  }

  #[tokio::test]
  async fn test_fetch_task_sets_current() {
    let (mock, store, _) = store();
    mock.push(200, json!({ "task": task(7, "pending") }));

    let fetched = store.fetch_task(7).await.unwrap();

    assert_eq!(fetched.id, 7);
    assert_eq!(store.state().current.map(|t| t.id), Some(7));
  }

  #[tokio::test]
  async fn test_server_stats_and_assignable_users() {
    let (mock, store, _) = store();
    mock.push(200, json!({ "total": 4, "completed": 1, "in_progress": 2, "overdue": 1 }));
    mock.push(500, Value::Null);

    let stats = store.fetch_stats().await.unwrap();
    let users = store.assignable_users().await;

    assert_eq!(stats.in_progress, 2);
    assert!(users.is_empty());
    assert_eq!(mock.paths(), vec!["/api/tasks/stats", "/api/tasks/users/list"]);
  }
}
