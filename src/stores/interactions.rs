//! Invitations and notifications.
//!
//! The server uses one "interaction" id for an invitation and the
//! notification announcing it. Both collections live in a single state value
//! so accepting or declining updates them together.

use serde_json::{json, Value};
use tokio::sync::watch;
use tracing::{info, warn};

use super::optimistic::{
  begin_update, commit_update, position, rollback_delete, rollback_update, InFlight, Snapshot,
};
use super::state::{FetchOutcome, Published, StoreError, StoreState};
use crate::api::types::{Invitation, Notification, RecordId, UserRef};
use crate::api::{schema, ApiClient, Endpoint};
use crate::cache::{CacheKey, CacheLayer, CollectionClass, OperationKind};

const READ: &str = "read";

/// Accepting an invitation grants access to its task.
const RESPONSE_CLASSES: &[CollectionClass] = &[
  CollectionClass::Invitations,
  CollectionClass::Notifications,
  CollectionClass::Tasks,
];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InteractionsState {
  pub invitations: StoreState<Invitation>,
  pub notifications: StoreState<Notification>,
  /// Last count reported by the server
  pub unread_count: u64,
}

impl InteractionsState {
  pub fn unread_notifications(&self) -> Vec<Notification> {
    self
      .notifications
      .collection
      .iter()
      .filter(|n| n.is_unread())
      .cloned()
      .collect()
  }

  pub fn pending_invitations(&self) -> Vec<Invitation> {
    self
      .invitations
      .collection
      .iter()
      .filter(|i| i.is_pending())
      .cloned()
      .collect()
  }

  /// Remove invitation `id` and the notification that announces it.
  ///
  /// The notification is matched by its own id first, then by
  /// `metadata.invitation_id`.
  fn detach(&mut self, id: RecordId) -> Detached {
    let invitation = position(&self.invitations.collection, id).map(|index| Snapshot {
      index,
      record: self.invitations.collection.remove(index),
    });

    let notifications = &mut self.notifications.collection;
    let index = position(notifications, id)
      .or_else(|| notifications.iter().position(|n| n.invitation_id() == Some(id)));
    let notification = index.map(|index| Snapshot {
      index,
      record: notifications.remove(index),
    });

    Detached {
      invitation,
      notification,
    }
  }

  fn reattach(&mut self, detached: Detached) {
    if let Some(snapshot) = detached.invitation {
      rollback_delete(&mut self.invitations.collection, snapshot);
    }
    if let Some(snapshot) = detached.notification {
      rollback_delete(&mut self.notifications.collection, snapshot);
    }
  }
}

struct Detached {
  invitation: Option<Snapshot<Invitation>>,
  notification: Option<Snapshot<Notification>>,
}

fn decode_invitations(payload: &Value) -> Result<Vec<Invitation>, schema::ShapeError> {
  let mut invitations = schema::collection::<Invitation>(payload, "invitations")?;
  for invitation in &mut invitations {
    invitation.user.get_or_insert_with(UserRef::unknown);
  }
  Ok(invitations)
}

#[derive(Debug, Clone, Copy)]
enum Response {
  Accept,
  Decline,
}

pub struct InteractionsStore {
  client: ApiClient,
  cache: CacheLayer,
  state: Published<InteractionsState>,
  in_flight: InFlight,
}

impl InteractionsStore {
  pub fn new(client: ApiClient, cache: CacheLayer) -> Self {
    Self {
      client,
      cache,
      state: Published::new(InteractionsState::default()),
      in_flight: InFlight::default(),
    }
  }

  pub fn state(&self) -> InteractionsState {
    self.state.snapshot()
  }

  pub fn subscribe(&self) -> watch::Receiver<InteractionsState> {
    self.state.subscribe()
  }

  pub fn unread_notifications(&self) -> Vec<Notification> {
    self.state.read(InteractionsState::unread_notifications)
  }

  pub fn pending_invitations(&self) -> Vec<Invitation> {
    self.state.read(InteractionsState::pending_invitations)
  }

  pub async fn fetch_pending_invitations(&self) -> Result<FetchOutcome, StoreError> {
    self.state.update(|s| s.invitations.begin_read());

    let key = CacheKey::new(
      CollectionClass::Invitations,
      OperationKind::List,
      &json!({ "scope": "pending" }),
    );
    let result = self
      .cache
      .fetch(&key, decode_invitations, || {
        self.client.call(Endpoint::PendingInvitations)
      })
      .await;

    self
      .state
      .update(|s| s.invitations.finish_read(result, "Failed to fetch invitations"))
  }

  /// Invitations sent for one task. Not kept in the store.
  pub async fn fetch_task_invitations(&self, task_id: RecordId) -> Result<Vec<Invitation>, StoreError> {
    let key = CacheKey::new(
      CollectionClass::Invitations,
      OperationKind::List,
      &json!({ "task_id": task_id }),
    );
    let fetched = self
      .cache
      .fetch(&key, decode_invitations, || {
        self.client.call(Endpoint::TaskInvitations { task_id })
      })
      .await?;
    Ok(fetched.data)
  }

  pub async fn send_invitation(&self, task_id: RecordId, email: &str) -> Result<Invitation, StoreError> {
    let result = self
      .client
      .call_json(Endpoint::SendInvitation { task_id }, &json!({ "email": email }))
      .await
      .and_then(|p| Ok(schema::record::<Invitation>(&p, "invitation")?));
    self.cache.invalidate_classes(&[CollectionClass::Invitations]);

    match result {
      Ok(invitation) => {
        info!(task_id, invitation_id = invitation.id, "invitation sent");
        Ok(invitation)
      }
      Err(e) => {
        self
          .state
          .update(|s| s.invitations.error = Some(e.user_message("Failed to send invitation")));
        Err(e.into())
      }
    }
  }

  pub async fn accept_invitation(&self, id: RecordId) -> Result<Option<Invitation>, StoreError> {
    self.respond(id, Response::Accept).await
  }

  pub async fn decline_invitation(&self, id: RecordId) -> Result<Option<Invitation>, StoreError> {
    self.respond(id, Response::Decline).await
  }

  /// Remove the invitation and its notification, then tell the server.
  /// The response may echo the updated invitation.
  async fn respond(&self, id: RecordId, response: Response) -> Result<Option<Invitation>, StoreError> {
    let (label, endpoint, fallback) = match response {
      Response::Accept => (
        "accept invitation",
        Endpoint::AcceptInvitation(id),
        "Failed to accept invitation",
      ),
      Response::Decline => (
        "decline invitation",
        Endpoint::DeclineInvitation(id),
        "Failed to decline invitation",
      ),
    };
    let mutation = self.in_flight.begin(label, id)?;
    let detached = self.state.update(|s| {
      s.invitations.error = None;
      s.detach(id)
    });

    let result = self.client.call(endpoint).await.and_then(|p| match p.get("invitation") {
      None | Some(Value::Null) => Ok(None),
      Some(_) => Ok(Some(schema::record::<Invitation>(&p, "invitation")?)),
    });
    self.cache.invalidate_classes(RESPONSE_CLASSES);

    match result {
      Ok(invitation) => {
        if detached.notification.as_ref().is_some_and(|n| n.record.is_unread()) {
          self
            .state
            .update(|s| s.unread_count = s.unread_count.saturating_sub(1));
        }
        mutation.commit();
        Ok(invitation)
      }
      Err(e) => {
        self.state.update(|s| {
          s.reattach(detached);
          s.invitations.error = Some(e.user_message(fallback));
        });
        mutation.roll_back(&e);
        Err(e.into())
      }
    }
  }

  pub async fn fetch_notifications(&self) -> Result<FetchOutcome, StoreError> {
    self.state.update(|s| s.notifications.begin_read());

    let key = CacheKey::bare(CollectionClass::Notifications, OperationKind::List);
    let result = self
      .cache
      .fetch(
        &key,
        |p| schema::collection::<Notification>(p, "notifications"),
        || self.client.call(Endpoint::ListNotifications),
      )
      .await;

    self
      .state
      .update(|s| s.notifications.finish_read(result, "Failed to fetch notifications"))
  }

  /// Unread count from the server. Failures count as zero.
  pub async fn unread_count(&self) -> u64 {
    let key = CacheKey::bare(CollectionClass::Notifications, OperationKind::Count);
    let result = self
      .cache
      .fetch(
        &key,
        |p| schema::count(p, "count"),
        || self.client.call(Endpoint::UnreadCount),
      )
      .await;

    let count = result.map(|r| r.data).unwrap_or_else(|e| {
      warn!(error = %e, "failed to get unread count");
      0
    });
    self.state.update(|s| s.unread_count = count);
    count
  }

  pub async fn mark_as_read(&self, id: RecordId) -> Result<Notification, StoreError> {
    let mutation = self.in_flight.begin("mark notification read", id)?;
    let snapshot = self.state.update(|s| {
      s.notifications.error = None;
      begin_update(&mut s.notifications.collection, id, |n| n.status = READ.to_string())
    });

    let result = self
      .client
      .call(Endpoint::MarkNotificationRead(id))
      .await
      .and_then(|p| Ok(schema::record::<Notification>(&p, "notification")?));
    self.cache.invalidate_classes(&[CollectionClass::Notifications]);

    match result {
      Ok(notification) => {
        let was_unread = snapshot.as_ref().is_some_and(|s| s.record.is_unread());
        self.state.update(|s| {
          commit_update(&mut s.notifications.collection, notification.clone());
          if was_unread && !notification.is_unread() {
            s.unread_count = s.unread_count.saturating_sub(1);
          }
        });
        mutation.commit();
        Ok(notification)
      }
      Err(e) => {
        self.state.update(|s| {
          if let Some(previous) = snapshot {
            rollback_update(&mut s.notifications.collection, previous);
          }
          s.notifications.error = Some(e.user_message("Failed to mark notification as read"));
        });
        mutation.roll_back(&e);
        Err(e.into())
      }
    }
  }

  /// Mark every unread notification as read.
  ///
  /// A rollback restores only the statuses this call changed, so writes that
  /// committed in the meantime (an accepted invitation, say) stay applied.
  pub async fn mark_all_as_read(&self) -> Result<(), StoreError> {
    let unread: Vec<RecordId> = self.state.read(|s| {
      s.notifications
        .collection
        .iter()
        .filter(|n| n.is_unread())
        .map(|n| n.id)
        .collect()
    });
    let mutation = self.in_flight.begin_many("mark all notifications read", unread.clone())?;
    let (previous, previous_count) = self.state.update(|s| {
      s.notifications.error = None;
      let mut previous = Vec::with_capacity(unread.len());
      for n in s.notifications.collection.iter_mut() {
        if unread.contains(&n.id) {
          previous.push((n.id, std::mem::replace(&mut n.status, READ.to_string())));
        }
      }
      (previous, std::mem::take(&mut s.unread_count))
    });

    let result = self.client.call(Endpoint::MarkAllNotificationsRead).await;
    self.cache.invalidate_classes(&[CollectionClass::Notifications]);

    match result {
      Ok(_) => {
        mutation.commit();
        Ok(())
      }
      Err(e) => {
        self.state.update(|s| {
          let items = &mut s.notifications.collection;
          let mut gone = 0;
          for (id, status) in previous {
            match position(items, id) {
              Some(index) if items[index].status == READ => items[index].status = status,
              Some(_) => {}
              None => gone += 1,
            }
          }
          s.unread_count = previous_count.saturating_sub(gone);
          s.notifications.error =
            Some(e.user_message("Failed to mark all notifications as read"));
        });
        mutation.roll_back(&e);
        Err(e.into())
      }
    }
  }
}
