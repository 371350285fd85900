//! Authenticated session: bearer token plus the signed-in user.
//!
//! The session is persisted in a key-value store under `token` and `user`
//! so it survives restarts, and is shared by every component that needs the
//! token. Any 401 tears it down and raises the "login required" signal.

use color_eyre::{eyre::eyre, Result};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::api::types::{AuthSession, User};

const TOKEN_KEY: &str = "token";
const USER_KEY: &str = "user";

/// Persistent string key-value storage.
pub trait KeyValueStore: Send + Sync {
  fn get(&self, key: &str) -> Result<Option<String>>;
  fn set(&self, key: &str, value: &str) -> Result<()>;
  fn remove(&self, key: &str) -> Result<()>;
}

/// Shared handle to the current session. Cheap to clone.
#[derive(Clone)]
pub struct Session {
  inner: Arc<SessionInner>,
}

struct SessionInner {
  storage: Arc<dyn KeyValueStore>,
  current: Mutex<Option<AuthSession>>,
  login_required: watch::Sender<bool>,
}

impl Session {
  /// Load whatever session was persisted. Unreadable state counts as signed out.
  pub fn restore(storage: Arc<dyn KeyValueStore>) -> Self {
    let current = match load(storage.as_ref()) {
      Ok(session) => session,
      Err(e) => {
        warn!(error = %e, "discarding unreadable stored session");
        None
      }
    };
    let (login_required, _) = watch::channel(false);

    Self {
      inner: Arc::new(SessionInner {
        storage,
        current: Mutex::new(current),
        login_required,
      }),
    }
  }

  fn with_current<R>(&self, f: impl FnOnce(&mut Option<AuthSession>) -> R) -> R {
    let mut guard = self
      .inner
      .current
      .lock()
      .unwrap_or_else(PoisonError::into_inner);
    f(&mut guard)
  }

  pub fn token(&self) -> Option<String> {
    self.with_current(|s| s.as_ref().map(|s| s.token.clone()))
  }

  pub fn user(&self) -> Option<User> {
    self.with_current(|s| s.as_ref().map(|s| s.user.clone()))
  }

  pub fn is_authenticated(&self) -> bool {
    self.with_current(|s| s.as_ref().is_some_and(|s| !s.token.is_empty()))
  }

  pub fn is_admin(&self) -> bool {
    self.with_current(|s| s.as_ref().is_some_and(|s| s.user.is_admin()))
  }

  /// Store a fresh session after login or registration.
  pub fn establish(&self, session: AuthSession) -> Result<()> {
    let user_json = serde_json::to_string(&session.user)
      .map_err(|e| eyre!("Failed to serialize user: {}", e))?;
    self.inner.storage.set(USER_KEY, &user_json)?;
    self.inner.storage.set(TOKEN_KEY, &session.token)?;

    info!(user_id = session.user.id, "session established");
    self.with_current(|s| *s = Some(session));
    self.inner.login_required.send_replace(false);
    Ok(())
  }

  /// Replace the stored user, keeping the token.
  pub fn update_user(&self, user: User) -> Result<()> {
    let user_json =
      serde_json::to_string(&user).map_err(|e| eyre!("Failed to serialize user: {}", e))?;
    self.inner.storage.set(USER_KEY, &user_json)?;
    self.with_current(|s| {
      if let Some(session) = s.as_mut() {
        session.user = user;
      }
    });
    Ok(())
  }

  /// Forget the session (logout).
  pub fn clear(&self) {
    self.with_current(|s| *s = None);
    for key in [TOKEN_KEY, USER_KEY] {
      if let Err(e) = self.inner.storage.remove(key) {
        warn!(key, error = %e, "failed to remove stored session value");
      }
    }
  }

  /// The server rejected our credentials: clear everything and ask for a login.
  pub fn expire(&self) {
    warn!("session rejected by server, login required");
    self.clear();
    self.inner.login_required.send_replace(true);
  }

  /// Flips to `true` whenever the session is torn down by a 401.
  pub fn subscribe_login_required(&self) -> watch::Receiver<bool> {
    self.inner.login_required.subscribe()
  }
}

fn load(storage: &dyn KeyValueStore) -> Result<Option<AuthSession>> {
  let (Some(token), Some(user_json)) = (storage.get(TOKEN_KEY)?, storage.get(USER_KEY)?) else {
    return Ok(None);
  };
  let user: User =
    serde_json::from_str(&user_json).map_err(|e| eyre!("Failed to parse stored user: {}", e))?;
  Ok(Some(AuthSession { token, user }))
}

/// In-process key-value store.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryStore {
  values: Mutex<std::collections::HashMap<String, String>>,
}

#[cfg(test)]
impl KeyValueStore for MemoryStore {
  fn get(&self, key: &str) -> Result<Option<String>> {
    Ok(self.values.lock().unwrap().get(key).cloned())
  }

  fn set(&self, key: &str, value: &str) -> Result<()> {
    self
      .values
      .lock()
      .unwrap()
      .insert(key.to_string(), value.to_string());
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<()> {
    self.values.lock().unwrap().remove(key);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::db::Database;
  use serde_json::json;

  fn user(role: &str) -> User {
    serde_json::from_value(json!({"id": 9, "name": "Robin", "email": "r@example.com", "role": role}))
      .unwrap()
  }

  #[test]
  fn test_session_survives_restart() {
    let storage: Arc<dyn KeyValueStore> = Arc::new(Database::open_in_memory().unwrap());
    let session = Session::restore(Arc::clone(&storage));
    assert!(!session.is_authenticated());

    session
      .establish(AuthSession {
        token: "tok".into(),
        user: user("admin"),
      })
      .unwrap();

    let restored = Session::restore(storage);
    assert_eq!(restored.token().as_deref(), Some("tok"));
    assert!(restored.is_admin());
  }

  #[test]
  fn test_corrupt_user_is_treated_as_signed_out() {
    let storage = Arc::new(MemoryStore::default());
    storage.set(TOKEN_KEY, "tok").unwrap();
    storage.set(USER_KEY, "{not json").unwrap();
    let session = Session::restore(storage);
    assert!(!session.is_authenticated());
  }

  #[test]
  fn test_expire_clears_storage_and_signals() {
    let storage = Arc::new(MemoryStore::default());
    let session = Session::restore(storage.clone());
    session
      .establish(AuthSession {
        token: "tok".into(),
        user: user("member"),
      })
      .unwrap();
    let login_required = session.subscribe_login_required();

    session.expire();

    assert!(session.token().is_none());
    assert!(session.user().is_none());
    assert_eq!(storage.get(TOKEN_KEY).unwrap(), None);
    assert_eq!(storage.get(USER_KEY).unwrap(), None);
    assert!(*login_required.borrow());
  }

  #[test]
  fn test_update_user_keeps_token() {
    let session = Session::restore(Arc::new(MemoryStore::default()));
    session
      .establish(AuthSession {
        token: "tok".into(),
        user: user("member"),
      })
      .unwrap();
    session.update_user(user("admin")).unwrap();
    assert!(session.is_admin());
    assert_eq!(session.token().as_deref(), Some("tok"));
  }
}
