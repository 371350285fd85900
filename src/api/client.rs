//! HTTP client for the task API: endpoint resolution, the single 404
//! fallback, status mapping and session teardown on 401.

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use super::csrf::CsrfPreflight;
use super::endpoints::{Endpoint, EndpointResolver};
use super::error::ApiError;
use super::transport::{ApiRequest, ApiResponse, Body, FilePart, Transport};
use crate::config::ApiConfig;
use crate::session::Session;

/// Task management API client.
///
/// Resolves endpoints to prefixed paths, attaches the bearer token, retries a
/// 404 exactly once without the prefix, and tears the session down on 401.
#[derive(Clone)]
pub struct ApiClient {
  transport: Arc<dyn Transport>,
  resolver: EndpointResolver,
  session: Session,
  csrf: Arc<CsrfPreflight>,
}

impl ApiClient {
  pub fn new(transport: Arc<dyn Transport>, config: &ApiConfig, session: Session) -> Self {
    let csrf = CsrfPreflight::new(
      Arc::clone(&transport),
      config.csrf_path.clone(),
      Duration::from_millis(config.csrf_reuse_ms),
    );
    Self {
      transport,
      resolver: EndpointResolver::new(&config.prefix),
      session,
      csrf: Arc::new(csrf),
    }
  }

  pub fn session(&self) -> &Session {
    &self.session
  }

  /// Call an endpoint that takes no parameters.
  pub async fn call(&self, endpoint: Endpoint) -> Result<Value, ApiError> {
    self.execute(endpoint, Vec::new(), Body::Empty).await
  }

  /// Call an endpoint with query string parameters.
  pub async fn call_query(
    &self,
    endpoint: Endpoint,
    query: Vec<(String, String)>,
  ) -> Result<Value, ApiError> {
    self.execute(endpoint, query, Body::Empty).await
  }

  /// Call an endpoint with a JSON body.
  pub async fn call_json<B: Serialize>(&self, endpoint: Endpoint, body: &B) -> Result<Value, ApiError> {
    let value = serde_json::to_value(body).map_err(|e| ApiError::Encode(e.to_string()))?;
    self.execute(endpoint, Vec::new(), Body::Json(value)).await
  }

  /// Upload a file as multipart form data.
  pub async fn call_multipart(&self, endpoint: Endpoint, file: FilePart) -> Result<Value, ApiError> {
    self.execute(endpoint, Vec::new(), Body::Multipart(file)).await
  }

  /// Fetch the CSRF cookie, sharing any pre-flight already in progress.
  pub async fn csrf_preflight(&self) -> Result<(), ApiError> {
    self.csrf.ensure().await
  }

  async fn execute(
    &self,
    endpoint: Endpoint,
    query: Vec<(String, String)>,
    body: Body,
  ) -> Result<Value, ApiError> {
    let primary = self
      .resolver
      .resolve(&endpoint)
      .with_query(query)
      .with_body(body);

    let response = self.send(&primary).await?;
    if response.status == 404 {
      if let Some(alternate) = self.resolver.fallback(&primary) {
        warn!(
          primary = %primary.path,
          fallback = %alternate.path,
          "primary path returned 404, retrying once without prefix"
        );
        let retry = self.send(&alternate).await?;
        return self.interpret(&alternate, retry);
      }
    }
    self.interpret(&primary, response)
  }

  async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
    let mut request = request.clone();
    request.bearer = self.session.token();
    let method = request.method.as_str();
    let path = request.path.clone();

    debug!(method, path = %path, "dispatching request");
    let response = self.transport.send(request).await.map_err(|e| {
      error!(method, path = %path, error = %e, "network error");
      ApiError::Network(e.0)
    })?;
    debug!(method, path = %path, status = response.status, "received response");
    Ok(response)
  }

  fn interpret(&self, request: &ApiRequest, response: ApiResponse) -> Result<Value, ApiError> {
    if response.is_success() {
      return Ok(response.body);
    }
    if response.status == 401 {
      self.session.expire();
      return Err(ApiError::Unauthorized);
    }
    Err(ApiError::from_response(
      response.status,
      &request.path,
      &response.body,
    ))
  }
}
