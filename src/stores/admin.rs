//! Administrator views: every user, every task, and dashboard counts.

use serde_json::json;
use tokio::sync::watch;
use tracing::warn;

use super::optimistic::{
  begin_delete, begin_update, commit_update, rollback_delete, rollback_update, InFlight,
};
use super::state::{FetchOutcome, Published, StoreError, StoreState};
use crate::api::types::{DashboardStats, RecordId, Task, User};
use crate::api::{schema, ApiClient, Endpoint};
use crate::cache::{CacheKey, CacheLayer, CollectionClass, OperationKind};

const USER_CLASSES: &[CollectionClass] = &[CollectionClass::Users, CollectionClass::Dashboard];

/// Deleting a user also drops the tasks they owned.
const DELETE_USER_CLASSES: &[CollectionClass] = &[
  CollectionClass::Users,
  CollectionClass::Dashboard,
  CollectionClass::AdminTasks,
  CollectionClass::Tasks,
];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdminState {
  pub users: StoreState<User>,
  pub tasks: StoreState<Task>,
  pub dashboard: DashboardStats,
}

pub struct AdminStore {
  client: ApiClient,
  cache: CacheLayer,
  state: Published<AdminState>,
  in_flight: InFlight,
}

impl AdminStore {
  pub fn new(client: ApiClient, cache: CacheLayer) -> Self {
    Self {
      client,
      cache,
      state: Published::new(AdminState::default()),
      in_flight: InFlight::default(),
    }
  }

  pub fn state(&self) -> AdminState {
    self.state.snapshot()
  }

  pub fn subscribe(&self) -> watch::Receiver<AdminState> {
    self.state.subscribe()
  }

  pub async fn fetch_users(&self) -> Result<FetchOutcome, StoreError> {
    self.state.update(|s| s.users.begin_read());

    let key = CacheKey::new(
      CollectionClass::Users,
      OperationKind::List,
      &json!({ "scope": "admin" }),
    );
    let result = self
      .cache
      .fetch(&key, schema::data_collection::<User>, || {
        self.client.call(Endpoint::AdminUsers)
      })
      .await;

    self
      .state
      .update(|s| s.users.finish_read(result, "Failed to fetch users"))
  }

  pub async fn fetch_all_tasks(&self) -> Result<FetchOutcome, StoreError> {
    self.state.update(|s| s.tasks.begin_read());

    let key = CacheKey::bare(CollectionClass::AdminTasks, OperationKind::List);
    let result = self
      .cache
      .fetch(&key, schema::data_collection::<Task>, || {
        self.client.call(Endpoint::AdminTasks)
      })
      .await;

    self
      .state
      .update(|s| s.tasks.finish_read(result, "Failed to fetch tasks"))
  }

  pub async fn fetch_dashboard_stats(&self) -> Result<DashboardStats, StoreError> {
    let key = CacheKey::bare(CollectionClass::Dashboard, OperationKind::Stats);
    let result = self
      .cache
      .fetch(&key, schema::data_or_root::<DashboardStats>, || {
        self.client.call(Endpoint::DashboardStats)
      })
      .await;

    self.state.update(|s| match result {
      Ok(fetched) => {
        s.dashboard = fetched.data;
        Ok(fetched.data)
      }
      Err(e) => {
        s.users.error = Some(e.user_message("Failed to fetch stats"));
        Err(e.into())
      }
    })
  }

  pub async fn update_user_role(&self, id: RecordId, role: &str) -> Result<User, StoreError> {
    let mutation = self.in_flight.begin("update user role", id)?;
    let snapshot = self.state.update(|s| {
      s.users.error = None;
      begin_update(&mut s.users.collection, id, |u| u.role = role.to_string())
    });

    let result = self
      .client
      .call_json(Endpoint::UpdateUserRole(id), &json!({ "role": role }))
      .await
      .and_then(|p| Ok(schema::data_or_root::<User>(&p)?));
    self.cache.invalidate_classes(USER_CLASSES);

    match result {
      Ok(user) => {
        self
          .state
          .update(|s| commit_update(&mut s.users.collection, user.clone()));
        let session = self.client.session();
        if session.user().is_some_and(|me| me.id == user.id) {
          if let Err(e) = session.update_user(user.clone()) {
            warn!(error = %e, "failed to store updated role of the signed-in user");
          }
        }
        mutation.commit();
        Ok(user)
      }
      Err(e) => {
        self.state.update(|s| {
          if let Some(previous) = snapshot {
            rollback_update(&mut s.users.collection, previous);
          }
          s.users.error = Some(e.user_message("Failed to update user role"));
        });
        mutation.roll_back(&e);
        Err(e.into())
      }
    }
  }

  pub async fn delete_user(&self, id: RecordId) -> Result<(), StoreError> {
    let mutation = self.in_flight.begin("delete user", id)?;
    let snapshot = self.state.update(|s| {
      s.users.error = None;
      begin_delete(&mut s.users.collection, id)
    });

    let result = self.client.call(Endpoint::DeleteUser(id)).await;
    self.cache.invalidate_classes(DELETE_USER_CLASSES);

    match result {
      Ok(_) => {
        mutation.commit();
        Ok(())
      }
      Err(e) => {
        self.state.update(|s| {
          if let Some(removed) = snapshot {
            rollback_delete(&mut s.users.collection, removed);
          }
          s.users.error = Some(e.user_message("Failed to delete user"));
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
  use crate::api::ApiError;
  use crate::cache::CacheSource;
  use serde_json::Value;
  use std::sync::Arc;

  async fn loaded() -> (Arc<MockTransport>, AdminStore) {
    let (mock, client) = testing::client();
    let store = AdminStore::new(client, testing::cache());
    mock.push(
      200,
      json!({ "data": [
        { "id": 1, "name": "Tester", "role": "member" },
        { "id": 2, "name": "Root", "role": "admin" }
      ] }),
    );
    store.fetch_users().await.unwrap();
    (mock, store)
  }

  fn roles(store: &AdminStore) -> Vec<(RecordId, String)> {
    store
      .state()
      .users
      .collection
      .into_iter()
      .map(|u| (u.id, u.role))
      .collect()
  }

  #[tokio::test]
  async fn test_bare_and_wrapped_payloads() {
    let (mock, client) = testing::client();
    let store = AdminStore::new(client, testing::cache());
    mock.push(200, json!([{ "id": 3, "title": "Bare", "status": "pending" }]));
    mock.push(200, json!({ "data": { "total_users": 2, "total_tasks": 5, "overdue_tasks": 1 } }));

    let outcome = store.fetch_all_tasks().await.unwrap();
    let stats = store.fetch_dashboard_stats().await.unwrap();

    assert_eq!(outcome, FetchOutcome::Fresh(CacheSource::Network));
    assert_eq!(store.state().tasks.collection[0].title, "Bare");
    assert_eq!(stats.total_tasks, 5);
    assert_eq!(store.state().dashboard.overdue_tasks, 1);
  }

  #[tokio::test]
  async fn test_role_update_rollback() {
    let (mock, store) = loaded().await;
    mock.push(422, json!({ "errors": { "role": ["The selected role is invalid."] } }));

    let err = store.update_user_role(2, "owner").await.unwrap_err();

    assert!(matches!(err, StoreError::Api(ApiError::Client { status: 422, .. })));
    assert_eq!(roles(&store), vec![(1, "member".into()), (2, "admin".into())]);
    assert_eq!(
      store.state().users.error.as_deref(),
      Some("The selected role is invalid.")
    );
  }

  #[tokio::test]
  async fn test_role_update_of_self_refreshes_session() {
    let (mock, store) = loaded().await;
    mock.push(200, json!({ "data": { "id": 1, "name": "Tester", "role": "admin" } }));

    store.update_user_role(1, "admin").await.unwrap();

    assert_eq!(roles(&store)[0], (1, "admin".into()));
    assert!(store.client.session().is_admin());
  }

  #[tokio::test]
  async fn test_delete_user_rollback_and_commit() {
    let (mock, store) = loaded().await;
    mock.push_network_error("reset");
    mock.push(200, Value::Null);

    assert!(store.delete_user(1).await.is_err());
    assert_eq!(roles(&store).len(), 2);

    store.delete_user(1).await.unwrap();
    assert_eq!(roles(&store), vec![(2, "admin".into())]);
    assert_eq!(mock.paths()[2], "/api/admin/users/1");
  }
}
