//! Comments of one task, with one level of replies.

use serde_json::json;
use tokio::sync::watch;
use tracing::warn;

use super::optimistic::{commit_create, insert_head, position, rollback_create, InFlight, TempIds};
use super::state::{FetchOutcome, Published, StoreError, StoreState};
use crate::api::types::{Comment, CommentDraft, RecordId, User, UserRef};
use crate::api::{schema, ApiClient, Endpoint};
use crate::cache::{CacheKey, CacheLayer, CollectionClass, OperationKind};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommentsState {
  pub comments: StoreState<Comment>,
  /// Task the loaded comments belong to
  pub task_id: Option<RecordId>,
}

/// Where a comment sits in the thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
  TopLevel(usize),
  Reply { parent: usize, index: usize },
}

fn locate(comments: &[Comment], id: RecordId) -> Option<Placement> {
  if let Some(index) = position(comments, id) {
    return Some(Placement::TopLevel(index));
  }
  comments.iter().enumerate().find_map(|(parent, c)| {
    position(&c.replies, id).map(|index| Placement::Reply { parent, index })
  })
}

fn at_mut(comments: &mut [Comment], placement: Placement) -> &mut Comment {
  match placement {
    Placement::TopLevel(index) => &mut comments[index],
    Placement::Reply { parent, index } => &mut comments[parent].replies[index],
  }
}

fn find_mut(comments: &mut [Comment], id: RecordId) -> Option<&mut Comment> {
  locate(comments, id).map(|placement| at_mut(comments, placement))
}

fn decode_comments(payload: &serde_json::Value) -> Result<Vec<Comment>, schema::ShapeError> {
  let mut comments = schema::collection::<Comment>(payload, "comments")?;
  for comment in &mut comments {
    comment.ensure_author();
  }
  Ok(comments)
}

pub struct CommentsStore {
  client: ApiClient,
  cache: CacheLayer,
  state: Published<CommentsState>,
  in_flight: InFlight,
  temp_ids: TempIds,
}

impl CommentsStore {
  pub fn new(client: ApiClient, cache: CacheLayer) -> Self {
    Self {
      client,
      cache,
      state: Published::new(CommentsState::default()),
      in_flight: InFlight::default(),
      temp_ids: TempIds::default(),
    }
  }

  pub fn state(&self) -> CommentsState {
    self.state.snapshot()
  }

  pub fn subscribe(&self) -> watch::Receiver<CommentsState> {
    self.state.subscribe()
  }

  /// Load the thread of `task_id`. Switching to another task drops the old
  /// thread first, so a failed load never shows comments of the wrong task.
  pub async fn fetch_comments(&self, task_id: RecordId) -> Result<FetchOutcome, StoreError> {
    self.state.update(|s| {
      if s.task_id != Some(task_id) {
        s.comments.collection.clear();
        s.task_id = Some(task_id);
      }
      s.comments.begin_read();
    });

    let key = CacheKey::new(
      CollectionClass::Comments,
      OperationKind::List,
      &json!({ "task_id": task_id }),
    );
    let result = self
      .cache
      .fetch(&key, decode_comments, || {
        self.client.call(Endpoint::ListComments { task_id })
      })
      .await;

    self
      .state
      .update(|s| s.comments.finish_read(result, "Failed to fetch comments"))
  }

  /// Post a comment, or a reply when `draft.parent_id` is set.
  ///
  /// The placeholder is only shown when `task_id` is the loaded thread;
  /// comments on any other task are sent without touching local state.
  pub async fn add_comment(&self, task_id: RecordId, draft: CommentDraft) -> Result<Comment, StoreError> {
    let temp_id = self.temp_ids.next();
    let author = self.client.session().user().as_ref().map(UserRef::from);
    let placeholder = Comment::from_draft(temp_id, &draft, author);

    self.state.update(|s| {
      s.comments.error = None;
      if s.task_id != Some(task_id) {
        return Ok(());
      }
      let items = &mut s.comments.collection;
      match draft.parent_id {
        Some(parent_id) => {
          let parent = position(items, parent_id).ok_or(StoreError::UnknownRecord(parent_id))?;
          items[parent].replies.push(placeholder);
        }
        None => insert_head(items, placeholder),
      }
      Ok::<_, StoreError>(())
    })?;
    let mutation = self.in_flight.begin("add comment", temp_id)?;

    let result = self
      .client
      .call_json(Endpoint::CreateComment { task_id }, &draft)
      .await
      .and_then(|p| Ok(schema::record::<Comment>(&p, "comment")?));
    self.cache.invalidate_classes(&[CollectionClass::Comments]);

    match result {
      Ok(mut comment) => {
        comment.ensure_author();
        self.state.update(|s| {
          if s.task_id != Some(task_id) {
            return;
          }
          let items = &mut s.comments.collection;
          match draft.parent_id {
            Some(parent_id) => {
              if let Some(parent) = position(items, parent_id) {
                commit_reply(&mut items[parent].replies, temp_id, comment.clone());
              }
            }
            None => commit_create(items, temp_id, comment.clone()),
          }
        });
        mutation.commit();
        Ok(comment)
      }
      Err(e) => {
        self.state.update(|s| {
          let items = &mut s.comments.collection;
          rollback_create(items, temp_id);
          for parent in items.iter_mut() {
            rollback_create(&mut parent.replies, temp_id);
          }
          s.comments.error = Some(e.user_message("Failed to add comment"));
        });
        mutation.roll_back(&e);
        Err(e.into())
      }
    }
  }

  pub async fn update_comment(&self, id: RecordId, content: &str) -> Result<Comment, StoreError> {
    let mutation = self.in_flight.begin("update comment", id)?;
    let snapshot = self.state.update(|s| {
      s.comments.error = None;
      find_mut(&mut s.comments.collection, id).map(|comment| {
        let previous = comment.clone();
        comment.content = content.to_string();
        previous
      })
    });

    let result = self
      .client
      .call_json(Endpoint::UpdateComment(id), &json!({ "content": content }))
      .await
      .and_then(|p| Ok(schema::record::<Comment>(&p, "comment")?));
    self.cache.invalidate_classes(&[CollectionClass::Comments]);

    match result {
      Ok(mut comment) => {
        if let Some(previous) = &snapshot {
          if comment.user.is_none() {
            comment.user = previous.user.clone();
          }
          if comment.replies.is_empty() {
            comment.replies = previous.replies.clone();
          }
        }
        comment.ensure_author();
        self.state.update(|s| {
          if let Some(slot) = find_mut(&mut s.comments.collection, id) {
            *slot = comment.clone();
          }
        });
        mutation.commit();
        Ok(comment)
      }
      Err(e) => {
        self.state.update(|s| {
          if let Some(previous) = snapshot {
            if let Some(slot) = find_mut(&mut s.comments.collection, id) {
              *slot = previous;
            }
          }
          s.comments.error = Some(e.user_message("Failed to update comment"));
        });
        mutation.roll_back(&e);
        Err(e.into())
      }
    }
  }

  /// Delete a comment or a reply.
  pub async fn delete_comment(&self, id: RecordId) -> Result<(), StoreError> {
    let mutation = self.in_flight.begin("delete comment", id)?;
    let removed = self.state.update(|s| {
      s.comments.error = None;
      let items = &mut s.comments.collection;
      locate(items, id).map(|placement| match placement {
        Placement::TopLevel(index) => (placement, None, items.remove(index)),
        Placement::Reply { parent, index } => {
          (placement, Some(items[parent].id), items[parent].replies.remove(index))
        }
      })
    });

    let result = self.client.call(Endpoint::DeleteComment(id)).await;
    self.cache.invalidate_classes(&[CollectionClass::Comments]);

    match result {
      Ok(_) => {
        mutation.commit();
        Ok(())
      }
      Err(e) => {
        self.state.update(|s| {
          if let Some((placement, parent_id, comment)) = removed {
            restore(&mut s.comments.collection, placement, parent_id, comment);
          }
          s.comments.error = Some(e.user_message("Failed to delete comment"));
        });
        mutation.roll_back(&e);
        Err(e.into())
      }
    }
  }

  /// Users that can be @-mentioned on `task_id`. Empty on failure.
  pub async fn mentionable_users(&self, task_id: RecordId) -> Vec<User> {
    let key = CacheKey::new(
      CollectionClass::Users,
      OperationKind::List,
      &json!({ "mentionable_for": task_id }),
    );
    let result = self
      .cache
      .fetch(
        &key,
        |p| schema::collection::<User>(p, "users"),
        || self.client.call(Endpoint::MentionableUsers { task_id }),
      )
      .await;

    result.map(|r| r.data).unwrap_or_else(|e| {
      warn!(task_id, error = %e, "failed to fetch mentionable users");
      Vec::new()
    })
  }
}

/// Like `commit_create`, but a reply that lost its placeholder goes to the
/// end of the thread rather than the head.
fn commit_reply(replies: &mut Vec<Comment>, temp_id: RecordId, reply: Comment) {
  let existing = position(replies, reply.id);
  match (position(replies, temp_id), existing) {
    (Some(index), None) => replies[index] = reply,
    (Some(index), Some(_)) => {
      replies.remove(index);
    }
    (None, None) => replies.push(reply),
    (None, Some(_)) => {}
  }
}

fn restore(
  comments: &mut Vec<Comment>,
  placement: Placement,
  parent_id: Option<RecordId>,
  comment: Comment,
) {
  match (placement, parent_id.and_then(|id| position(comments, id))) {
    (Placement::TopLevel(index), _) => {
      let index = index.min(comments.len());
      comments.insert(index, comment);
    }
    (Placement::Reply { index, .. }, Some(parent)) => {
      let replies = &mut comments[parent].replies;
      let index = index.min(replies.len());
      replies.insert(index, comment);
    }
    // The parent itself is gone; nothing to reattach to.
    (Placement::Reply { .. }, None) => {}
  }
}
