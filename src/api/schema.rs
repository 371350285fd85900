//! Typed validators for response envelopes.
//!
//! The backend wraps payloads in a named field (`{"tasks": [...]}`), sometimes
//! paginated (`{"tasks": {"data": [...]}}`), and the admin endpoints use
//! `{"data": ...}` or no envelope at all. These helpers turn a raw JSON body
//! into a typed value or a [`ShapeError`], keeping "did the call succeed"
//! separate from "was the payload well-formed".

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShapeError {
  #[error("response is missing `{0}`")]
  Missing(&'static str),

  #[error("`{field}` has an unexpected shape: {reason}")]
  Invalid { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl ToString) -> ShapeError {
  ShapeError::Invalid {
    field,
    reason: reason.to_string(),
  }
}

/// Unwrap a paginated `{"data": [...]}` object, or accept a bare array.
fn list_items<'a>(value: &'a Value, field: &'static str) -> Result<&'a Value, ShapeError> {
  match value {
    Value::Array(_) => Ok(value),
    Value::Object(obj) => obj
      .get("data")
      .filter(|d| d.is_array())
      .ok_or_else(|| invalid(field, "expected an array or a paginated object")),
    other => Err(invalid(field, format!("expected an array, got {}", kind(other)))),
  }
}

fn kind(value: &Value) -> &'static str {
  match value {
    Value::Null => "null",
    Value::Bool(_) => "a boolean",
    Value::Number(_) => "a number",
    Value::String(_) => "a string",
    Value::Array(_) => "an array",
    Value::Object(_) => "an object",
  }
}

fn decode<T: DeserializeOwned>(value: &Value, field: &'static str) -> Result<T, ShapeError> {
  T::deserialize(value).map_err(|e| invalid(field, e))
}

/// Collection stored under `field`, plain or paginated.
pub fn collection<T: DeserializeOwned>(
  payload: &Value,
  field: &'static str,
) -> Result<Vec<T>, ShapeError> {
  let value = payload.get(field).ok_or(ShapeError::Missing(field))?;
  decode(list_items(value, field)?, field)
}

/// Single record stored under `field`.
pub fn record<T: DeserializeOwned>(payload: &Value, field: &'static str) -> Result<T, ShapeError> {
  match payload.get(field) {
    Some(value @ Value::Object(_)) => decode(value, field),
    Some(other) => Err(invalid(field, format!("expected an object, got {}", kind(other)))),
    None => Err(ShapeError::Missing(field)),
  }
}

/// Value under `field` if present, otherwise the whole payload.
pub fn field_or_root<T: DeserializeOwned>(
  payload: &Value,
  field: &'static str,
) -> Result<T, ShapeError> {
  decode(payload.get(field).unwrap_or(payload), field)
}

/// Admin-style envelope: `{"data": ...}` or the bare value.
pub fn data_or_root<T: DeserializeOwned>(payload: &Value) -> Result<T, ShapeError> {
  field_or_root(payload, "data")
}

/// Admin-style collection: `{"data": [...]}`, paginated, or a bare array.
pub fn data_collection<T: DeserializeOwned>(payload: &Value) -> Result<Vec<T>, ShapeError> {
  match payload {
    Value::Array(_) => decode(payload, "data"),
    _ => collection(payload, "data"),
  }
}

/// Counter stored under `field`.
pub fn count(payload: &Value, field: &'static str) -> Result<u64, ShapeError> {
  let value = payload.get(field).ok_or(ShapeError::Missing(field))?;
  value
    .as_u64()
    .ok_or_else(|| invalid(field, format!("expected a count, got {}", kind(value))))
}

#[derive(Debug, Deserialize)]
struct AuthEnvelope {
  token: String,
  user: super::types::User,
}

/// Login and register responses: `{"token": ..., "user": {...}}`.
pub fn auth_session(payload: &Value) -> Result<super::types::AuthSession, ShapeError> {
  if payload.get("token").and_then(Value::as_str).is_none() {
    return Err(ShapeError::Missing("token"));
  }
  let envelope: AuthEnvelope = decode(payload, "user")?;
  Ok(super::types::AuthSession {
    token: envelope.token,
    user: envelope.user,
  })
}
