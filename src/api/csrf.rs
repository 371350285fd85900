//! Single-flight CSRF cookie pre-flight.
//!
//! Login, register and logout need a fresh CSRF cookie. Callers arriving while
//! a pre-flight is running share it; a completed pre-flight is reused for a
//! short window and then dropped so a later, unrelated call fetches anew.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::error::ApiError;
use super::transport::{ApiRequest, Method, Transport};

type Preflight = Shared<BoxFuture<'static, Result<Instant, ApiError>>>;

pub struct CsrfPreflight {
  transport: Arc<dyn Transport>,
  path: String,
  reuse_window: Duration,
  slot: Mutex<Option<Preflight>>,
}

impl CsrfPreflight {
  pub fn new(transport: Arc<dyn Transport>, path: impl Into<String>, reuse_window: Duration) -> Self {
    Self {
      transport,
      path: path.into(),
      reuse_window,
      slot: Mutex::new(None),
    }
  }

  /// Make sure a CSRF cookie was fetched recently, sharing any in-flight request.
  pub async fn ensure(&self) -> Result<(), ApiError> {
    let preflight = {
      let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
      let reusable = slot.as_ref().is_some_and(|p| match p.peek() {
        None => true,
        Some(Ok(done_at)) => done_at.elapsed() < self.reuse_window,
        Some(Err(_)) => false,
      });
      if reusable {
        debug!("joining existing CSRF pre-flight");
      } else {
        *slot = Some(self.start());
      }
      slot.clone()
    };

    match preflight {
      Some(p) => p.await.map(|_| ()),
      None => Ok(()),
    }
  }

  fn start(&self) -> Preflight {
    let transport = Arc::clone(&self.transport);
    let request = ApiRequest::new(Method::Get, self.path.clone());
    async move {
      debug!(path = %request.path, "fetching CSRF cookie");
      let response = transport
        .send(request)
        .await
        .map_err(|e| ApiError::Network(e.0))?;
      if !response.is_success() {
        warn!(status = response.status, "CSRF pre-flight failed");
        return Err(ApiError::from_response(
          response.status,
          "csrf-cookie",
          &response.body,
        ));
      }
      Ok(Instant::now())
    }
    .boxed()
    .shared()
  }
}
