use serde_json::Value;
use thiserror::Error;

use super::schema::ShapeError;

const CONNECTIVITY_MESSAGE: &str =
  "Unable to connect to the API server. Please check your connection or try again later.";

/// Errors produced by an API call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ApiError {
  /// No response was received.
  #[error("network error: {0}")]
  Network(String),

  /// The session is no longer valid. The stored session has been cleared.
  #[error("unauthenticated, please log in again")]
  Unauthorized,

  /// 404 on both the primary and the fallback path.
  #[error("not found: {path}")]
  NotFound { path: String, message: Option<String> },

  /// Any other 4xx.
  #[error("request rejected (HTTP {status}): {}", message.as_deref().unwrap_or("no details"))]
  Client { status: u16, message: Option<String> },

  /// 5xx.
  #[error("server error (HTTP {status}): {}", message.as_deref().unwrap_or("no details"))]
  Server { status: u16, message: Option<String> },

  /// The request body could not be serialized.
  #[error("could not encode request: {0}")]
  Encode(String),

  /// The payload did not have the expected shape.
  #[error("malformed response: {0}")]
  Malformed(#[from] ShapeError),
}

impl ApiError {
  /// Classify a non-2xx, non-401 response.
  pub fn from_response(status: u16, path: &str, body: &Value) -> Self {
    let message = extract_message(body);
    match status {
      404 => Self::NotFound {
        path: path.to_string(),
        message,
      },
      500..=599 => Self::Server { status, message },
      _ => Self::Client { status, message },
    }
  }

  /// Message supplied by the server, if any.
  pub fn server_message(&self) -> Option<&str> {
    match self {
      Self::NotFound { message, .. }
      | Self::Client { message, .. }
      | Self::Server { message, .. } => message.as_deref(),
      _ => None,
    }
  }

  /// Text to surface to the user: the server's own message when there is one,
  /// otherwise `fallback` (or the connectivity notice for network failures).
  pub fn user_message(&self, fallback: &str) -> String {
    if let Some(message) = self.server_message() {
      return message.to_string();
    }
    match self {
      Self::Network(_) => CONNECTIVITY_MESSAGE.to_string(),
      Self::Unauthorized => self.to_string(),
      _ => fallback.to_string(),
    }
  }
}

/// Pull a human readable message out of an error body.
///
/// Prefers `message`; otherwise flattens a validation `errors` map
/// (`{"title": ["required"], ...}`) into newline separated lines.
fn extract_message(body: &Value) -> Option<String> {
  if let Some(errors) = body.get("errors").and_then(Value::as_object) {
    let lines: Vec<&str> = errors
      .values()
      .flat_map(|v| match v {
        Value::Array(items) => items.iter().filter_map(Value::as_str).collect::<Vec<_>>(),
        Value::String(s) => vec![s.as_str()],
        _ => Vec::new(),
      })
      .collect();
    if !lines.is_empty() {
      return Some(lines.join("\n"));
    }
  }

  body
    .get("message")
    .and_then(Value::as_str)
    .filter(|m| !m.is_empty())
    .map(String::from)
}
