//! HTTP transport: one request in, status plus JSON body out.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::config::ApiConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
  Get,
  Post,
  Put,
  Patch,
  Delete,
}

impl Method {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Get => "GET",
      Self::Post => "POST",
      Self::Put => "PUT",
      Self::Patch => "PATCH",
      Self::Delete => "DELETE",
    }
  }
}

/// A file sent as `multipart/form-data`.
#[derive(Debug, Clone, PartialEq)]
pub struct FilePart {
  pub field: String,
  pub file_name: String,
  pub mime: Option<String>,
  pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Body {
  Empty,
  Json(Value),
  Multipart(FilePart),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
  pub method: Method,
  pub path: String,
  pub query: Vec<(String, String)>,
  pub body: Body,
  pub bearer: Option<String>,
}

impl ApiRequest {
  pub fn new(method: Method, path: impl Into<String>) -> Self {
    Self {
      method,
      path: path.into(),
      query: Vec::new(),
      body: Body::Empty,
      bearer: None,
    }
  }

  pub fn with_query(mut self, query: Vec<(String, String)>) -> Self {
    self.query = query;
    self
  }

  pub fn with_body(mut self, body: Body) -> Self {
    self.body = body;
    self
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
  pub status: u16,
  pub body: Value,
}

impl ApiResponse {
  pub fn new(status: u16, body: Value) -> Self {
    Self { status, body }
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }
}

/// The request never produced a response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

/// Sends a single request. Implementations never retry.
#[async_trait]
pub trait Transport: Send + Sync {
  async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError>;
}

/// Transport backed by `reqwest`, with a cookie jar for the CSRF cookie.
pub struct ReqwestTransport {
  client: reqwest::Client,
  base_url: Url,
}

impl ReqwestTransport {
  pub fn new(config: &ApiConfig) -> Result<Self> {
    let base_url =
      Url::parse(&config.url).map_err(|e| eyre!("Invalid API url {}: {}", config.url, e))?;

    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .cookie_store(true)
      .default_headers(headers)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client, base_url })
  }
}

/// Append `path` to `base`, keeping any path the base already has.
fn join_url(base: &Url, path: &str) -> Url {
  let mut url = base.clone();
  let joined = format!("{}{}", base.path().trim_end_matches('/'), path);
  url.set_path(&joined);
  url
}

fn to_reqwest(method: Method) -> reqwest::Method {
  match method {
    Method::Get => reqwest::Method::GET,
    Method::Post => reqwest::Method::POST,
    Method::Put => reqwest::Method::PUT,
    Method::Patch => reqwest::Method::PATCH,
    Method::Delete => reqwest::Method::DELETE,
  }
}

#[async_trait]
impl Transport for ReqwestTransport {
  async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
    let url = join_url(&self.base_url, &request.path);
    let mut builder = self
      .client
      .request(to_reqwest(request.method), url)
      .query(&request.query);

    if let Some(token) = &request.bearer {
      builder = builder.bearer_auth(token);
    }

    builder = match request.body {
      Body::Empty => builder,
      Body::Json(value) => builder.json(&value),
      Body::Multipart(file) => {
        let mut part = reqwest::multipart::Part::bytes(file.bytes).file_name(file.file_name);
        if let Some(mime) = &file.mime {
          part = part
            .mime_str(mime)
            .map_err(|e| TransportError(format!("invalid mime type {}: {}", mime, e)))?;
        }
        builder.multipart(reqwest::multipart::Form::new().part(file.field, part))
      }
    };

    let response = builder
      .send()
      .await
      .map_err(|e| TransportError(e.to_string()))?;
    let status = response.status().as_u16();
    let bytes = response
      .bytes()
      .await
      .map_err(|e| TransportError(e.to_string()))?;

    let body = if bytes.is_empty() {
      Value::Null
    } else {
      serde_json::from_slice(&bytes).unwrap_or_else(|e| {
        debug!(status, error = %e, "response body is not JSON");
        Value::Null
      })
    };

    Ok(ApiResponse { status, body })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn url(base: &str, path: &str) -> String {
    join_url(&Url::parse(base).unwrap(), path).to_string()
  }

  #[test]
  fn test_url_joins_onto_base_path() {
    assert_eq!(
      url("https://example.com/backend/", "/api/tasks"),
      "https://example.com/backend/api/tasks"
    );
  }

  #[test]
  fn test_url_without_base_path() {
    assert_eq!(
      url("https://example.com", "/tasks/3"),
      "https://example.com/tasks/3"
    );
  }

  #[test]
  fn test_invalid_base_url() {
    assert!(ReqwestTransport::new(&ApiConfig::new("not a url")).is_err());
  }
}
