//! Login, registration and logout.

use serde_json::Value;
use tracing::{info, warn};

use super::state::StoreError;
use crate::api::types::{AuthSession, Credentials, Registration, User};
use crate::api::{schema, ApiClient, ApiError, Endpoint};
use crate::cache::CacheLayer;

pub struct AuthStore {
  client: ApiClient,
  cache: CacheLayer,
}

impl AuthStore {
  pub fn new(client: ApiClient, cache: CacheLayer) -> Self {
    Self { client, cache }
  }

  pub fn is_authenticated(&self) -> bool {
    self.client.session().is_authenticated()
  }

  pub fn is_admin(&self) -> bool {
    self.client.session().is_admin()
  }

  pub fn user(&self) -> Option<User> {
    self.client.session().user()
  }

  pub async fn login(&self, credentials: &Credentials) -> Result<User, StoreError> {
    self.preflight().await;
    let payload = self.client.call_json(Endpoint::Login, credentials).await?;
    self.start_session(&payload)
  }

  pub async fn register(&self, registration: &Registration) -> Result<User, StoreError> {
    self.preflight().await;
    let payload = self.client.call_json(Endpoint::Register, registration).await?;
    self.start_session(&payload)
  }

  /// End the session. The local session and cache are cleared even when the
  /// server call fails.
  pub async fn logout(&self) {
    self.preflight().await;
    if let Err(e) = self.client.call(Endpoint::Logout).await {
      warn!(error = %e, "logout request failed, clearing local session anyway");
    }
    self.client.session().clear();
    self.cache.clear();
    info!("logged out");
  }

  /// Reload the signed-in user from the server.
  pub async fn current_user(&self) -> Result<User, StoreError> {
    let payload = self.client.call(Endpoint::CurrentUser).await?;
    let user: User = schema::field_or_root(&payload, "user").map_err(ApiError::from)?;
    self
      .client
      .session()
      .update_user(user.clone())
      .map_err(|e| StoreError::Session(e.to_string()))?;
    Ok(user)
  }

  /// A failed CSRF pre-flight is not fatal; the following call reports the
  /// real problem if there is one.
  async fn preflight(&self) {
    if let Err(e) = self.client.csrf_preflight().await {
      warn!(error = %e, "CSRF pre-flight failed, continuing without it");
    }
  }

  fn start_session(&self, payload: &Value) -> Result<User, StoreError> {
    let session: AuthSession = schema::auth_session(payload).map_err(ApiError::from)?;
    let user = session.user.clone();
    self
      .client
      .session()
      .establish(session)
      .map_err(|e| StoreError::Session(e.to_string()))?;
    self.cache.clear();
    info!(user_id = user.id, "signed in");
    Ok(user)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::testing::{self, MockTransport};
  use crate::api::transport::Body;
  use crate::cache::{CacheKey, CollectionClass, OperationKind};
  use serde_json::json;
  use std::sync::Arc;

  fn store() -> (Arc<MockTransport>, AuthStore, CacheLayer) {
    let (mock, client) = testing::client();
    client.session().clear();
    let cache = testing::cache();
    (mock, AuthStore::new(client, cache.clone()), cache)
  }

  fn credentials() -> Credentials {
    Credentials {
      email: "ann@example.com".into(),
      password: "secret".into(),
    }
  }

  fn auth_payload(role: &str) -> Value {
    json!({ "token": "abc", "user": { "id": 4, "name": "Ann", "email": "ann@example.com", "role": role } })
  }

  #[tokio::test]
  async fn test_login_fetches_csrf_then_stores_session() {
    let (mock, store, cache) = store();
    let stale = CacheKey::bare(CollectionClass::Tasks, OperationKind::List);
    cache.put(stale.clone(), json!({ "tasks": [] }));
    mock.push(204, Value::Null);
    mock.push(200, auth_payload("admin"));

    let user = store.login(&credentials()).await.unwrap();

    assert_eq!(user.id, 4);
    assert!(store.is_authenticated());
    assert!(store.is_admin());
    assert!(cache.get(&stale).is_none());
    assert_eq!(mock.paths(), vec!["/sanctum/csrf-cookie", "/api/login"]);
    assert_eq!(
      mock.requests()[1].body,
      Body::Json(json!({ "email": "ann@example.com", "password": "secret" }))
    );
  }

  #[tokio::test]
  async fn test_login_survives_csrf_failure() {
    let (mock, store, _) = store();
    mock.push_network_error("refused");
    mock.push(200, auth_payload("member"));

    store.login(&credentials()).await.unwrap();

    assert!(store.is_authenticated());
    assert!(!store.is_admin());
  }

  #[tokio::test]
  async fn test_login_without_token_is_rejected() {
    let (mock, store, _) = store();
    mock.push(204, Value::Null);
    mock.push(200, json!({ "user": { "id": 4 } }));

    let err = store.login(&credentials()).await.unwrap_err();

    assert!(matches!(err, StoreError::Api(ApiError::Malformed(_))));
    assert!(!store.is_authenticated());
  }

  #[tokio::test]
  async fn test_register_posts_confirmation() {
    let (mock, store, _) = store();
    mock.push(204, Value::Null);
    mock.push(201, auth_payload("member"));

    store
      .register(&Registration {
        name: "Ann".into(),
        email: "ann@example.com".into(),
        password: "secret".into(),
        password_confirmation: "secret".into(),
      })
      .await
      .unwrap();

    assert_eq!(mock.paths()[1], "/api/register");
    assert_eq!(store.user().unwrap().name, "Ann");
  }

  #[tokio::test]
  async fn test_logout_clears_even_when_server_fails() {
    let (mock, store, cache) = store();
    mock.push(204, Value::Null);
    mock.push(200, auth_payload("member"));
    store.login(&credentials()).await.unwrap();
    let key = CacheKey::bare(CollectionClass::Notifications, OperationKind::Count);
    cache.put(key.clone(), json!({ "count": 1 }));
    mock.push(500, Value::Null);

    store.logout().await;

    assert!(!store.is_authenticated());
    assert!(cache.get(&key).is_none());
  }

  #[tokio::test]
  async fn test_current_user_refreshes_session() {
    let (mock, client) = testing::client();
    let store = AuthStore::new(client, testing::cache());
    mock.push(200, json!({ "id": 1, "name": "Renamed", "role": "member" }));

    let user = store.current_user().await.unwrap();

    assert_eq!(user.name, "Renamed");
    assert_eq!(store.user().unwrap().name, "Renamed");
  }
}
