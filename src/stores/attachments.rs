//! Files attached to one task.

use serde_json::json;
use tokio::sync::watch;

use super::optimistic::{begin_delete, position, rollback_delete, InFlight};
use super::state::{FetchOutcome, Published, StoreError, StoreState};
use crate::api::transport::FilePart;
use crate::api::types::{Attachment, RecordId};
use crate::api::{schema, ApiClient, Endpoint};
use crate::cache::{CacheKey, CacheLayer, CollectionClass, OperationKind};

/// Comments embed their attachments, so both go stale together.
const ATTACHMENT_CLASSES: &[CollectionClass] =
  &[CollectionClass::Attachments, CollectionClass::Comments];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttachmentsState {
  pub attachments: StoreState<Attachment>,
  pub task_id: Option<RecordId>,
}

pub struct AttachmentsStore {
  client: ApiClient,
  cache: CacheLayer,
  state: Published<AttachmentsState>,
  in_flight: InFlight,
}

impl AttachmentsStore {
  pub fn new(client: ApiClient, cache: CacheLayer) -> Self {
    Self {
      client,
      cache,
      state: Published::new(AttachmentsState::default()),
      in_flight: InFlight::default(),
    }
  }

  pub fn state(&self) -> AttachmentsState {
    self.state.snapshot()
  }

  pub fn subscribe(&self) -> watch::Receiver<AttachmentsState> {
    self.state.subscribe()
  }

  pub async fn fetch_attachments(&self, task_id: RecordId) -> Result<FetchOutcome, StoreError> {
    self.state.update(|s| {
      if s.task_id != Some(task_id) {
        s.attachments.collection.clear();
        s.task_id = Some(task_id);
      }
      s.attachments.begin_read();
    });

    let key = CacheKey::new(
      CollectionClass::Attachments,
      OperationKind::List,
      &json!({ "task_id": task_id }),
    );
    let result = self
      .cache
      .fetch(
        &key,
        |p| schema::collection::<Attachment>(p, "attachments"),
        || self.client.call(Endpoint::ListAttachments { task_id }),
      )
      .await;

    self
      .state
      .update(|s| s.attachments.finish_read(result, "Failed to fetch attachments"))
  }

  /// Upload a file. Not optimistic: the attachment only appears once stored.
  pub async fn upload(&self, task_id: RecordId, file: FilePart) -> Result<Attachment, StoreError> {
    self.state.update(|s| {
      s.attachments.loading = true;
      s.attachments.error = None;
    });

    let result = self
      .client
      .call_multipart(Endpoint::UploadAttachment { task_id }, file)
      .await
      .and_then(|p| Ok(schema::record::<Attachment>(&p, "attachment")?));
    self.cache.invalidate_classes(ATTACHMENT_CLASSES);

    self.state.update(|s| {
      s.attachments.loading = false;
      match result {
        Ok(attachment) => {
          let items = &mut s.attachments.collection;
          if s.task_id == Some(task_id) && position(items, attachment.id).is_none() {
            items.push(attachment.clone());
          }
          Ok(attachment)
        }
        Err(e) => {
          s.attachments.error = Some(e.user_message("Failed to upload attachment"));
          Err(e.into())
        }
      }
    })
  }

  pub async fn delete_attachment(&self, id: RecordId) -> Result<(), StoreError> {
    let mutation = self.in_flight.begin("delete attachment", id)?;
    let snapshot = self.state.update(|s| {
      s.attachments.error = None;
      begin_delete(&mut s.attachments.collection, id)
    });

    let result = self.client.call(Endpoint::DeleteAttachment(id)).await;
    self.cache.invalidate_classes(ATTACHMENT_CLASSES);

    match result {
      Ok(_) => {
        mutation.commit();
        Ok(())
      }
      Err(e) => {
        self.state.update(|s| {
          if let Some(removed) = snapshot {
            rollback_delete(&mut s.attachments.collection, removed);
          }
          s.attachments.error = Some(e.user_message("Failed to delete attachment"));
        });
        mutation.roll_back(&e);
        Err(e.into())
      }
    }
  }
}
