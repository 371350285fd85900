//! Domain records exchanged with the task management API.
//!
//! Records keep every attribute the client does not model in an `extra` bag,
//! so a record fetched, snapshotted and restored is identical to what the
//! server sent.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type RecordId = i64;

/// Attributes carried through without interpretation.
pub type Extra = Map<String, Value>;

/// A record with a stable id that can live in a store collection.
pub trait Record: Clone + Send + Sync + 'static {
  fn id(&self) -> RecordId;
}

/// Task status values understood by the backend.
pub mod status {
  pub const PENDING: &str = "pending";
  pub const IN_PROGRESS: &str = "in_progress";
  pub const COMPLETED: &str = "completed";
}

/// Compact user reference embedded in comments and invitations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRef {
  pub id: RecordId,
  #[serde(default)]
  pub name: String,
  #[serde(flatten)]
  pub extra: Extra,
}

impl UserRef {
  /// Placeholder author used when the server omits one.
  pub fn unknown() -> Self {
    Self {
      id: 0,
      name: "Unknown User".to_string(),
      extra: Extra::new(),
    }
  }
}

impl From<&User> for UserRef {
  fn from(user: &User) -> Self {
    Self {
      id: user.id,
      name: user.name.clone(),
      extra: Extra::new(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
  pub id: RecordId,
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub email: String,
  #[serde(default)]
  pub role: String,
  #[serde(flatten)]
  pub extra: Extra,
}

impl User {
  pub fn is_admin(&self) -> bool {
    self.role == "admin"
  }
}

impl Record for User {
  fn id(&self) -> RecordId {
    self.id
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
  pub id: RecordId,
  #[serde(default)]
  pub title: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(default)]
  pub status: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub priority: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub due_date: Option<String>,
  #[serde(flatten)]
  pub extra: Extra,
  #[serde(skip)]
  pub is_temp: bool,
}

impl Task {
  /// Build the local placeholder shown while a create is in flight.
  pub fn from_draft(temp_id: RecordId, draft: &TaskDraft) -> Self {
    let mut extra = Extra::new();
    if let Some(assignee) = draft.assigned_to {
      extra.insert("assigned_to".to_string(), Value::from(assignee));
    }
    Self {
      id: temp_id,
      title: draft.title.clone(),
      description: draft.description.clone(),
      status: draft
        .status
        .clone()
        .unwrap_or_else(|| status::PENDING.to_string()),
      priority: draft.priority.clone(),
      due_date: draft.due_date.clone(),
      extra,
      is_temp: true,
    }
  }

  /// Parse `due_date`, accepting RFC 3339, `YYYY-MM-DD HH:MM:SS` and plain dates.
  pub fn due_at(&self) -> Option<DateTime<Utc>> {
    let raw = self.due_date.as_deref()?.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
      return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
      return Some(dt.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
      .ok()
      .and_then(|d| d.and_hms_opt(0, 0, 0))
      .map(|dt| dt.and_utc())
  }

  pub fn is_completed(&self) -> bool {
    self.status == status::COMPLETED
  }

  /// Overdue means due before `now` and not completed. Unparseable dates never count.
  pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
    !self.is_completed() && self.due_at().is_some_and(|due| due < now)
  }

  /// Copy embedded relation objects the server left out of a write response.
  pub fn backfill_relations(&mut self, previous: &Task) {
    for (key, value) in &previous.extra {
      if value.is_object() && !self.extra.contains_key(key) {
        self.extra.insert(key.clone(), value.clone());
      }
    }
  }
}

impl Record for Task {
  fn id(&self) -> RecordId {
    self.id
  }
}

/// Fields for a new task.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskDraft {
  pub title: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub status: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub priority: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub due_date: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub assigned_to: Option<RecordId>,
}

/// Partial task update. Only set fields are sent and applied.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskChanges {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub title: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub status: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub priority: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub due_date: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub assigned_to: Option<RecordId>,
}

impl TaskChanges {
  pub fn apply_to(&self, task: &mut Task) {
    if let Some(title) = &self.title {
      task.title = title.clone();
    }
    if let Some(description) = &self.description {
      task.description = Some(description.clone());
    }
    if let Some(status) = &self.status {
      task.status = status.clone();
    }
    if let Some(priority) = &self.priority {
      task.priority = Some(priority.clone());
    }
    if let Some(due_date) = &self.due_date {
      task.due_date = Some(due_date.clone());
    }
    if let Some(assignee) = self.assigned_to {
      task
        .extra
        .insert("assigned_to".to_string(), Value::from(assignee));
    }
  }
}

/// Filters for listing tasks. Also the parameter set of the list cache key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskFilters {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub status: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub priority: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub search: Option<String>,
}

impl TaskFilters {
  /// Query string pairs, skipping empty values.
  pub fn to_query(&self) -> Vec<(String, String)> {
    [
      ("status", &self.status),
      ("priority", &self.priority),
      ("search", &self.search),
    ]
    .into_iter()
    .filter_map(|(name, value)| {
      value
        .as_deref()
        .filter(|v| !v.is_empty())
        .map(|v| (name.to_string(), v.to_string()))
    })
    .collect()
  }
}

/// Task counts shown on the dashboard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStats {
  #[serde(default)]
  pub total: usize,
  #[serde(default)]
  pub completed: usize,
  #[serde(default)]
  pub in_progress: usize,
  #[serde(default)]
  pub overdue: usize,
}

impl TaskStats {
  pub fn from_tasks(tasks: &[Task], now: DateTime<Utc>) -> Self {
    Self {
      total: tasks.len(),
      completed: tasks.iter().filter(|t| t.is_completed()).count(),
      in_progress: tasks
        .iter()
        .filter(|t| t.status == status::IN_PROGRESS)
        .count(),
      overdue: tasks.iter().filter(|t| t.is_overdue(now)).count(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
  pub id: RecordId,
  #[serde(default)]
  pub content: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub parent_id: Option<RecordId>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub user: Option<UserRef>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub replies: Vec<Comment>,
  #[serde(flatten)]
  pub extra: Extra,
  #[serde(skip)]
  pub is_temp: bool,
}

impl Comment {
  pub fn from_draft(temp_id: RecordId, draft: &CommentDraft, author: Option<UserRef>) -> Self {
    Self {
      id: temp_id,
      content: draft.content.clone(),
      parent_id: draft.parent_id,
      user: author,
      replies: Vec::new(),
      extra: Extra::new(),
      is_temp: true,
    }
  }

  /// Give this comment and its replies an author, falling back to the placeholder.
  pub fn ensure_author(&mut self) {
    if self.user.is_none() {
      self.user = Some(UserRef::unknown());
    }
    for reply in &mut self.replies {
      reply.ensure_author();
    }
  }
}

impl Record for Comment {
  fn id(&self) -> RecordId {
    self.id
  }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CommentDraft {
  pub content: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub parent_id: Option<RecordId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
  pub id: RecordId,
  #[serde(default, alias = "file_name")]
  pub filename: String,
  #[serde(flatten)]
  pub extra: Extra,
}

impl Record for Attachment {
  fn id(&self) -> RecordId {
    self.id
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invitation {
  pub id: RecordId,
  #[serde(default)]
  pub status: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub task_id: Option<RecordId>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub user: Option<UserRef>,
  #[serde(flatten)]
  pub extra: Extra,
}

impl Invitation {
  pub fn is_pending(&self) -> bool {
    self.status == "pending"
  }
}

impl Record for Invitation {
  fn id(&self) -> RecordId {
    self.id
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationMetadata {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub invitation_id: Option<RecordId>,
  #[serde(flatten)]
  pub extra: Extra,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
  pub id: RecordId,
  #[serde(default)]
  pub status: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub metadata: Option<NotificationMetadata>,
  #[serde(flatten)]
  pub extra: Extra,
}

impl Notification {
  pub fn is_unread(&self) -> bool {
    self.status == "unread"
  }

  /// Invitation this notification announces, if any.
  pub fn invitation_id(&self) -> Option<RecordId> {
    self.metadata.as_ref().and_then(|m| m.invitation_id)
  }
}

impl Record for Notification {
  fn id(&self) -> RecordId {
    self.id
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardStats {
  #[serde(default)]
  pub total_users: u64,
  #[serde(default)]
  pub total_tasks: u64,
  #[serde(default)]
  pub completed_tasks: u64,
  #[serde(default)]
  pub pending_tasks: u64,
  #[serde(default)]
  pub overdue_tasks: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
  pub email: String,
  pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Registration {
  pub name: String,
  pub email: String,
  pub password: String,
  pub password_confirmation: String,
}

/// Token and user returned by login and register.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthSession {
  pub token: String,
  pub user: User,
}
