//! Domain stores.
//!
//! Each store owns its in-memory collections, reads through the shared
//! response cache, and applies writes optimistically: the local state changes
//! first and is either reconciled with the server's answer or rolled back.

pub mod admin;
pub mod attachments;
pub mod auth;
pub mod comments;
pub mod interactions;
mod optimistic;
pub mod state;
pub mod tasks;

use std::sync::Arc;

pub use admin::AdminStore;
pub use attachments::AttachmentsStore;
pub use auth::AuthStore;
pub use comments::CommentsStore;
pub use interactions::InteractionsStore;
pub use state::{FetchOutcome, StoreError};
pub use tasks::TasksStore;

use crate::api::transport::Transport;
use crate::api::ApiClient;
use crate::cache::{CacheLayer, MemoryStorage, NoopStorage, TtlPolicy};
use crate::config::Config;
use crate::session::{KeyValueStore, Session};

/// Every store, sharing one client, one session and one cache.
pub struct Stores {
  pub auth: AuthStore,
  pub tasks: TasksStore,
  pub comments: CommentsStore,
  pub attachments: AttachmentsStore,
  pub interactions: InteractionsStore,
  pub admin: AdminStore,
  session: Session,
}

impl Stores {
  pub fn new(config: &Config, transport: Arc<dyn Transport>, storage: Arc<dyn KeyValueStore>) -> Self {
    let session = Session::restore(storage);
    let client = ApiClient::new(transport, &config.api, session.clone());
    let cache = if config.cache.enabled {
      CacheLayer::new(Arc::new(MemoryStorage::new()))
    } else {
      CacheLayer::new(Arc::new(NoopStorage))
    }
    .with_ttl(TtlPolicy::from_config(&config.cache));

    Self {
      auth: AuthStore::new(client.clone(), cache.clone()),
      tasks: TasksStore::new(client.clone(), cache.clone()),
      comments: CommentsStore::new(client.clone(), cache.clone()),
      attachments: AttachmentsStore::new(client.clone(), cache.clone()),
      interactions: InteractionsStore::new(client.clone(), cache.clone()),
      admin: AdminStore::new(client, cache),
      session,
    }
  }

  pub fn session(&self) -> &Session {
    &self.session
  }
}
