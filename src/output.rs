//! Plain-text rendering of store data for the terminal.

use crate::api::types::{
  Attachment, Comment, DashboardStats, Invitation, Notification, Task, TaskStats, User, UserRef,
};
use crate::stores::FetchOutcome;

/// Truncate a string to max length, adding ellipsis if needed
pub fn truncate(s: &str, max_len: usize) -> String {
  if s.chars().count() <= max_len {
    s.to_string()
  } else if max_len <= 3 {
    s.chars().take(max_len).collect()
  } else {
    let truncated: String = s.chars().take(max_len - 3).collect();
    format!("{}...", truncated)
  }
}

fn user_name(user: Option<&UserRef>) -> &str {
  user.map(|u| u.name.as_str()).unwrap_or("Unknown User")
}

/// One line noting a stale read, if there was one.
pub fn outcome_note(outcome: &FetchOutcome) -> Option<String> {
  match outcome {
    FetchOutcome::Stale { warning } => Some(format!("warning: {} (showing previous data)", warning)),
    FetchOutcome::Fresh(_) => None,
  }
}

pub fn task_line(task: &Task) -> String {
  format!(
    "{:>6}  {:<12} {:<8} {:<12} {}",
    task.id,
    task.status,
    task.priority.as_deref().unwrap_or("-"),
    task
      .due_at()
      .map(|d| d.format("%Y-%m-%d").to_string())
      .unwrap_or_else(|| "-".to_string()),
    truncate(&task.title, 60)
  )
}

pub fn tasks_table(tasks: &[Task]) -> String {
  if tasks.is_empty() {
    return "No tasks.".to_string();
  }
  let mut lines = vec![format!(
    "{:>6}  {:<12} {:<8} {:<12} {}",
    "ID", "STATUS", "PRIORITY", "DUE", "TITLE"
  )];
  lines.extend(tasks.iter().map(task_line));
  lines.join("\n")
}

pub fn task_detail(task: &Task) -> String {
  let mut lines = vec![
    format!("#{} {}", task.id, task.title),
    format!("status:   {}", task.status),
    format!("priority: {}", task.priority.as_deref().unwrap_or("-")),
    format!("due:      {}", task.due_date.as_deref().unwrap_or("-")),
  ];
  if let Some(description) = task.description.as_deref().filter(|d| !d.is_empty()) {
    lines.push(String::new());
    lines.push(description.to_string());
  }
  lines.join("\n")
}

pub fn task_stats(stats: &TaskStats) -> String {
  format!(
    "total: {}  completed: {}  in progress: {}  overdue: {}",
    stats.total, stats.completed, stats.in_progress, stats.overdue
  )
}

pub fn users_table(users: &[User]) -> String {
  if users.is_empty() {
    return "No users.".to_string();
  }
  users
    .iter()
    .map(|u| format!("{:>6}  {:<8} {:<24} {}", u.id, u.role, truncate(&u.name, 24), u.email))
    .collect::<Vec<_>>()
    .join("\n")
}

pub fn comment_thread(comments: &[Comment]) -> String {
  if comments.is_empty() {
    return "No comments.".to_string();
  }
  let mut lines = Vec::new();
  for comment in comments {
    lines.push(format!(
      "[{}] {}: {}",
      comment.id,
      user_name(comment.user.as_ref()),
      comment.content
    ));
    for reply in &comment.replies {
      lines.push(format!(
        "    [{}] {}: {}",
        reply.id,
        user_name(reply.user.as_ref()),
        reply.content
      ));
    }
  }
  lines.join("\n")
}

pub fn attachments_table(attachments: &[Attachment]) -> String {
  if attachments.is_empty() {
    return "No attachments.".to_string();
  }
  attachments
    .iter()
    .map(|a| format!("{:>6}  {}", a.id, a.filename))
    .collect::<Vec<_>>()
    .join("\n")
}

pub fn invitations_table(invitations: &[Invitation]) -> String {
  if invitations.is_empty() {
    return "No invitations.".to_string();
  }
  invitations
    .iter()
    .map(|i| {
      let task = i
        .task_id
        .map(|t| format!("task #{}", t))
        .unwrap_or_else(|| "-".to_string());
      format!(
        "{:>6}  {:<10} {:<12} from {}",
        i.id,
        i.status,
        task,
        user_name(i.user.as_ref())
      )
    })
    .collect::<Vec<_>>()
    .join("\n")
}

pub fn notifications_table(notifications: &[Notification]) -> String {
  if notifications.is_empty() {
    return "No notifications.".to_string();
  }
  notifications
    .iter()
    .map(|n| {
      let marker = if n.is_unread() { "*" } else { " " };
      let message = n
        .extra
        .get("message")
        .and_then(|m| m.as_str())
        .unwrap_or("");
      format!("{} {:>6}  {}", marker, n.id, truncate(message, 70))
    })
    .collect::<Vec<_>>()
    .join("\n")
}

pub fn dashboard(stats: &DashboardStats) -> String {
  [
    format!("users:           {}", stats.total_users),
    format!("tasks:           {}", stats.total_tasks),
    format!("  completed:     {}", stats.completed_tasks),
    format!("  pending:       {}", stats.pending_tasks),
    format!("  overdue:       {}", stats.overdue_tasks),
  ]
  .join("\n")
}
