//! REST client for the task management backend.

pub mod client;
pub mod csrf;
pub mod endpoints;
pub mod error;
pub mod schema;
#[cfg(test)]
pub mod testing;
pub mod transport;
pub mod types;

pub use client::ApiClient;
pub use endpoints::Endpoint;
pub use error::ApiError;
