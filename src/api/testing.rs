//! Scripted transport for tests.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

use super::client::ApiClient;
use super::transport::{ApiRequest, ApiResponse, Transport, TransportError};
use crate::api::types::{AuthSession, User};
use crate::cache::{CacheLayer, MemoryStorage};
use crate::config::ApiConfig;
use crate::session::{MemoryStore, Session};

/// Replays queued responses in order and records every request it sees.
#[derive(Default)]
pub struct MockTransport {
  responses: Mutex<VecDeque<Result<ApiResponse, TransportError>>>,
  requests: Mutex<Vec<ApiRequest>>,
  gate: Mutex<Option<oneshot::Receiver<()>>>,
}

impl MockTransport {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push(&self, status: u16, body: Value) {
    self
      .responses
      .lock()
      .unwrap()
      .push_back(Ok(ApiResponse::new(status, body)));
  }

  pub fn push_network_error(&self, message: &str) {
    self
      .responses
      .lock()
      .unwrap()
      .push_back(Err(TransportError(message.to_string())));
  }

  /// Hold the next request until the returned sender fires.
  pub fn hold_next(&self) -> oneshot::Sender<()> {
    let (tx, rx) = oneshot::channel();
    *self.gate.lock().unwrap() = Some(rx);
    tx
  }

  pub fn requests(&self) -> Vec<ApiRequest> {
    self.requests.lock().unwrap().clone()
  }

  pub fn request_count(&self) -> usize {
    self.requests.lock().unwrap().len()
  }

  pub fn paths(&self) -> Vec<String> {
    self.requests().into_iter().map(|r| r.path).collect()
  }
}

#[async_trait]
impl Transport for MockTransport {
  async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
    self.requests.lock().unwrap().push(request);
    let gate = self.gate.lock().unwrap().take();
    if let Some(rx) = gate {
      let _ = rx.await;
    }
    let next = self.responses.lock().unwrap().pop_front();
    next.unwrap_or_else(|| Err(TransportError("no scripted response".to_string())))
  }
}

/// Client wired to a mock transport with a signed-in member.
pub fn client() -> (Arc<MockTransport>, ApiClient) {
  let mock = Arc::new(MockTransport::new());
  let session = Session::restore(Arc::new(MemoryStore::default()));
  let user: User = serde_json::from_value(serde_json::json!({
    "id": 1,
    "name": "Tester",
    "email": "tester@example.com",
    "role": "member"
  }))
  .unwrap();
  session
    .establish(AuthSession {
      token: "test-token".to_string(),
      user,
    })
    .unwrap();
  let client = ApiClient::new(mock.clone(), &ApiConfig::new("http://localhost"), session);
  (mock, client)
}

/// Fresh cache with the default TTL table.
pub fn cache() -> CacheLayer {
  CacheLayer::new(Arc::new(MemoryStorage::new()))
}
