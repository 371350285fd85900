//! Logical operations and the paths they resolve to.

use super::transport::{ApiRequest, Method};
use super::types::RecordId;

/// Every call the client makes, independent of its concrete path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
  // Auth
  Login,
  Register,
  Logout,
  CurrentUser,

  // Tasks
  ListTasks,
  GetTask(RecordId),
  CreateTask,
  UpdateTask(RecordId),
  DeleteTask(RecordId),
  UpdateTaskStatus(RecordId),
  TaskStats,
  AssignableUsers,

  // Comments
  ListComments { task_id: RecordId },
  CreateComment { task_id: RecordId },
  UpdateComment(RecordId),
  DeleteComment(RecordId),
  MentionableUsers { task_id: RecordId },

  // Attachments
  ListAttachments { task_id: RecordId },
  UploadAttachment { task_id: RecordId },
  DeleteAttachment(RecordId),

  // Invitations
  PendingInvitations,
  TaskInvitations { task_id: RecordId },
  SendInvitation { task_id: RecordId },
  AcceptInvitation(RecordId),
  DeclineInvitation(RecordId),

  // Notifications
  ListNotifications,
  UnreadCount,
  MarkNotificationRead(RecordId),
  MarkAllNotificationsRead,

  // Admin
  AdminUsers,
  UpdateUserRole(RecordId),
  DeleteUser(RecordId),
  DashboardStats,
  AdminTasks,
}

impl Endpoint {
  pub fn method(&self) -> Method {
    use Endpoint::*;
    match self {
      CurrentUser | ListTasks | GetTask(_) | TaskStats | AssignableUsers | ListComments { .. }
      | MentionableUsers { .. } | ListAttachments { .. } | PendingInvitations
      | TaskInvitations { .. } | ListNotifications | UnreadCount | AdminUsers | DashboardStats
      | AdminTasks => Method::Get,
      Login | Register | Logout | CreateTask | CreateComment { .. } | UploadAttachment { .. }
      | SendInvitation { .. } | AcceptInvitation(_) | DeclineInvitation(_) => Method::Post,
      UpdateTask(_) | UpdateComment(_) | UpdateUserRole(_) => Method::Put,
      UpdateTaskStatus(_) | MarkNotificationRead(_) | MarkAllNotificationsRead => Method::Patch,
      DeleteTask(_) | DeleteComment(_) | DeleteAttachment(_) | DeleteUser(_) => Method::Delete,
    }
  }

  /// Path relative to the API prefix.
  pub fn path(&self) -> String {
    use Endpoint::*;
    match self {
      Login => "/login".to_string(),
      Register => "/register".to_string(),
      Logout => "/logout".to_string(),
      CurrentUser => "/user".to_string(),

      ListTasks | CreateTask => "/tasks".to_string(),
      GetTask(id) | UpdateTask(id) | DeleteTask(id) => format!("/tasks/{}", id),
      UpdateTaskStatus(id) => format!("/tasks/{}/status", id),
      TaskStats => "/tasks/stats".to_string(),
      AssignableUsers => "/tasks/users/list".to_string(),

      ListComments { task_id } | CreateComment { task_id } => {
        format!("/tasks/{}/comments", task_id)
      }
      UpdateComment(id) | DeleteComment(id) => format!("/interactions/{}/comment", id),
      MentionableUsers { task_id } => format!("/tasks/{}/mentionable-users", task_id),

      ListAttachments { task_id } | UploadAttachment { task_id } => {
        format!("/tasks/{}/attachments", task_id)
      }
      DeleteAttachment(id) => format!("/attachments/{}", id),

      PendingInvitations => "/user/invitations/pending".to_string(),
      TaskInvitations { task_id } => format!("/tasks/{}/invitations", task_id),
      SendInvitation { task_id } => format!("/tasks/{}/invite", task_id),
      AcceptInvitation(id) => format!("/interactions/{}/accept", id),
      DeclineInvitation(id) => format!("/interactions/{}/decline", id),

      ListNotifications => "/user/notifications".to_string(),
      UnreadCount => "/user/notifications/unread-count".to_string(),
      MarkNotificationRead(id) => format!("/interactions/{}/read", id),
      MarkAllNotificationsRead => "/user/notifications/mark-all-read".to_string(),

      AdminUsers => "/admin/users".to_string(),
      UpdateUserRole(id) => format!("/admin/users/{}/role", id),
      DeleteUser(id) => format!("/admin/users/{}", id),
      DashboardStats => "/admin/dashboard-stats".to_string(),
      AdminTasks => "/admin/tasks".to_string(),
    }
  }
}

/// Maps endpoints to prefixed requests and derives the single 404 fallback.
#[derive(Debug, Clone)]
pub struct EndpointResolver {
  prefix: String,
}

impl EndpointResolver {
  /// `prefix` is normalized to a leading slash and no trailing slash.
  pub fn new(prefix: &str) -> Self {
    let trimmed = prefix.trim_matches('/');
    let prefix = if trimmed.is_empty() {
      String::new()
    } else {
      format!("/{}", trimmed)
    };
    Self { prefix }
  }

  pub fn resolve(&self, endpoint: &Endpoint) -> ApiRequest {
    ApiRequest::new(endpoint.method(), format!("{}{}", self.prefix, endpoint.path()))
  }

  /// The alternate request to try once after a 404: same request, prefix removed.
  ///
  /// `None` when there is no prefix or the path does not start with it.
  pub fn fallback(&self, primary: &ApiRequest) -> Option<ApiRequest> {
    if self.prefix.is_empty() {
      return None;
    }
    let rest = primary.path.strip_prefix(&self.prefix)?;
    if !rest.starts_with('/') {
      return None;
    }
    let mut alternate = primary.clone();
    alternate.path = rest.to_string();
    Some(alternate)
  }
}
