//! Subcommands and their dispatch onto the stores.

use clap::Subcommand;
use color_eyre::{eyre::eyre, Report, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::api::transport::FilePart;
use crate::api::types::{
  CommentDraft, Credentials, RecordId, Registration, TaskChanges, TaskDraft, TaskFilters,
};
use crate::config::Config;
use crate::output;
use crate::stores::{FetchOutcome, StoreError, Stores};

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Sign in and store the session
  Login {
    email: String,
    /// Falls back to TASKDESK_PASSWORD
    #[arg(short, long)]
    password: Option<String>,
  },
  /// Create an account and sign in
  Register {
    name: String,
    email: String,
    #[arg(short, long)]
    password: Option<String>,
  },
  /// Sign out and forget the stored session
  Logout,
  /// Show the signed-in user
  Whoami,
  /// Work with tasks
  Tasks {
    #[command(subcommand)]
    action: TaskAction,
  },
  /// Task comments and replies
  Comments {
    #[command(subcommand)]
    action: CommentAction,
  },
  /// Files attached to tasks
  Attachments {
    #[command(subcommand)]
    action: AttachmentAction,
  },
  /// Task invitations
  Invitations {
    #[command(subcommand)]
    action: InvitationAction,
  },
  /// Your notifications
  Notifications {
    #[command(subcommand)]
    action: NotificationAction,
  },
  /// Administration (admin role only)
  Admin {
    #[command(subcommand)]
    action: AdminAction,
  },
}

#[derive(Subcommand, Debug)]
pub enum TaskAction {
  /// List tasks
  List {
    #[arg(long)]
    status: Option<String>,
    #[arg(long)]
    priority: Option<String>,
    #[arg(long)]
    search: Option<String>,
  },
  /// Show one task
  Show { id: RecordId },
  /// Create a task
  Create {
    title: String,
    #[arg(short, long)]
    description: Option<String>,
    #[arg(long)]
    status: Option<String>,
    #[arg(long)]
    priority: Option<String>,
    /// Due date, e.g. 2025-01-31
    #[arg(long)]
    due: Option<String>,
    /// Assignee user id
    #[arg(long)]
    assign: Option<RecordId>,
  },
  /// Change fields of a task
  Update {
    id: RecordId,
    #[arg(long)]
    title: Option<String>,
    #[arg(short, long)]
    description: Option<String>,
    #[arg(long)]
    priority: Option<String>,
    #[arg(long)]
    due: Option<String>,
    #[arg(long)]
    assign: Option<RecordId>,
  },
  /// Set the status of a task
  Status { id: RecordId, status: String },
  /// Delete a task
  Delete { id: RecordId },
  /// Task counts
  Stats {
    /// Ask the server instead of counting the listed tasks
    #[arg(long)]
    server: bool,
  },
  /// Users tasks can be assigned to
  Users,
}

#[derive(Subcommand, Debug)]
pub enum CommentAction {
  /// Show the comment thread of a task
  List { task_id: RecordId },
  /// Comment on a task, or reply to a comment
  Add {
    task_id: RecordId,
    content: String,
    #[arg(long)]
    reply_to: Option<RecordId>,
  },
  /// Change the text of a comment
  Edit { id: RecordId, content: String },
  /// Delete a comment or reply
  Delete { id: RecordId },
  /// Users that can be mentioned on a task
  Mentionable { task_id: RecordId },
}

#[derive(Subcommand, Debug)]
pub enum AttachmentAction {
  List { task_id: RecordId },
  /// Upload a file to a task
  Upload { task_id: RecordId, path: PathBuf },
  Delete { id: RecordId },
}

#[derive(Subcommand, Debug)]
pub enum InvitationAction {
  /// Invitations waiting for your answer
  List,
  /// Invitations sent for a task
  Task { task_id: RecordId },
  /// Invite someone to a task by email
  Send { task_id: RecordId, email: String },
  Accept { id: RecordId },
  Decline { id: RecordId },
}

#[derive(Subcommand, Debug)]
pub enum NotificationAction {
  List,
  /// Number of unread notifications
  Unread,
  /// Mark one notification as read
  Read { id: RecordId },
  /// Mark every notification as read
  ReadAll,
}

#[derive(Subcommand, Debug)]
pub enum AdminAction {
  Users,
  /// Change a user's role
  Role { id: RecordId, role: String },
  DeleteUser { id: RecordId },
  /// Dashboard counts
  Stats,
  /// Every task in the system
  Tasks,
}

fn report(fallback: &'static str) -> impl FnOnce(StoreError) -> Report {
  move |e| eyre!("{}", e.user_message(fallback))
}

fn print_outcome(outcome: &FetchOutcome) {
  if let Some(note) = output::outcome_note(outcome) {
    eprintln!("{}", note);
  }
}

fn password(given: Option<String>) -> Result<String> {
  match given {
    Some(p) => Ok(p),
    None => Config::get_password(),
  }
}

fn require_login(stores: &Stores) -> Result<()> {
  if stores.auth.is_authenticated() {
    Ok(())
  } else {
    Err(eyre!("Not logged in. Run `taskdesk login <email>` first."))
  }
}

fn require_admin(stores: &Stores) -> Result<()> {
  require_login(stores)?;
  if stores.auth.is_admin() {
    Ok(())
  } else {
    Err(eyre!("This command requires an administrator account."))
  }
}

/// Run one command against the stores, printing results to stdout.
pub async fn run(command: Command, stores: &Stores) -> Result<()> {
  match command {
    Command::Login { email, password: given } => {
      let credentials = Credentials {
        email,
        password: password(given)?,
      };
      let user = stores.auth.login(&credentials).await.map_err(report("Login failed"))?;
      println!("Logged in as {} <{}>", user.name, user.email);
      bootstrap(stores).await;
    }
    Command::Register {
      name,
      email,
      password: given,
    } => {
      let password = password(given)?;
      let registration = Registration {
        name,
        email,
        password_confirmation: password.clone(),
        password,
      };
      let user = stores
        .auth
        .register(&registration)
        .await
        .map_err(report("Registration failed"))?;
      println!("Registered and logged in as {}", user.name);
      bootstrap(stores).await;
    }
    Command::Logout => {
      stores.auth.logout().await;
      println!("Logged out.");
    }
    Command::Whoami => {
      require_login(stores)?;
      let user = stores
        .auth
        .current_user()
        .await
        .map_err(report("Failed to load user"))?;
      println!("{} <{}> ({})", user.name, user.email, user.role);
    }
    Command::Tasks { action } => {
      require_login(stores)?;
      run_tasks(action, stores).await?;
    }
    Command::Comments { action } => {
      require_login(stores)?;
      run_comments(action, stores).await?;
    }
    Command::Attachments { action } => {
      require_login(stores)?;
      run_attachments(action, stores).await?;
    }
    Command::Invitations { action } => {
      require_login(stores)?;
      run_invitations(action, stores).await?;
    }
    Command::Notifications { action } => {
      require_login(stores)?;
      run_notifications(action, stores).await?;
    }
    Command::Admin { action } => {
      require_admin(stores)?;
      run_admin(action, stores).await?;
    }
  }
  Ok(())
}

/// What a freshly signed-in user should see first.
async fn bootstrap(stores: &Stores) {
  let unread = stores.interactions.unread_count().await;
  if let Err(e) = stores.interactions.fetch_notifications().await {
    debug!(error = %e, "notifications not loaded after sign-in");
  }
  if let Err(e) = stores.interactions.fetch_pending_invitations().await {
    debug!(error = %e, "pending invitations not loaded after sign-in");
  }
  let pending = stores.interactions.pending_invitations().len();
  info!(unread, pending, "session bootstrapped");
  println!("{} unread notification(s), {} pending invitation(s)", unread, pending);
}

async fn run_tasks(action: TaskAction, stores: &Stores) -> Result<()> {
  let tasks = &stores.tasks;
  match action {
    TaskAction::List {
      status,
      priority,
      search,
    } => {
      let filters = TaskFilters {
        status,
        priority,
        search,
      };
      let outcome = tasks
        .fetch_tasks(&filters)
        .await
        .map_err(report("Failed to fetch tasks"))?;
      print_outcome(&outcome);
      println!("{}", output::tasks_table(&tasks.state().tasks.collection));
    }
    TaskAction::Show { id } => {
      let task = tasks.fetch_task(id).await.map_err(report("Failed to fetch task"))?;
      println!("{}", output::task_detail(&task));
    }
    TaskAction::Create {
      title,
      description,
      status,
      priority,
      due,
      assign,
    } => {
      let draft = TaskDraft {
        title,
        description,
        status,
        priority,
        due_date: due,
        assigned_to: assign,
      };
      let task = tasks
        .create_task(draft)
        .await
        .map_err(report("Failed to create task"))?;
      println!("Created task #{}", task.id);
    }
    TaskAction::Update {
      id,
      title,
      description,
      priority,
      due,
      assign,
    } => {
      let changes = TaskChanges {
        title,
        description,
        status: None,
        priority,
        due_date: due,
        assigned_to: assign,
      };
      let task = tasks
        .update_task(id, changes)
        .await
        .map_err(report("Failed to update task"))?;
      println!("{}", output::task_line(&task));
    }
    TaskAction::Status { id, status } => {
      let task = tasks
        .update_status(id, &status)
        .await
        .map_err(report("Failed to update task status"))?;
      println!("{}", output::task_line(&task));
    }
    TaskAction::Delete { id } => {
      tasks
        .delete_task(id)
        .await
        .map_err(report("Failed to delete task"))?;
      println!("Deleted task #{}", id);
    }
    TaskAction::Stats { server } => {
      let stats = if server {
        tasks.fetch_stats().await.map_err(report("Failed to fetch stats"))?
      } else {
        let outcome = tasks
          .fetch_tasks(&TaskFilters::default())
          .await
          .map_err(report("Failed to fetch tasks"))?;
        print_outcome(&outcome);
        tasks.stats()
      };
      println!("{}", output::task_stats(&stats));
    }
    TaskAction::Users => {
      println!("{}", output::users_table(&tasks.assignable_users().await));
    }
  }
  Ok(())
}

async fn run_comments(action: CommentAction, stores: &Stores) -> Result<()> {
  let comments = &stores.comments;
  match action {
    CommentAction::List { task_id } => {
      let outcome = comments
        .fetch_comments(task_id)
        .await
        .map_err(report("Failed to fetch comments"))?;
      print_outcome(&outcome);
      println!("{}", output::comment_thread(&comments.state().comments.collection));
    }
    CommentAction::Add {
      task_id,
      content,
      reply_to,
    } => {
      if reply_to.is_some() {
        // A reply is placed under its parent, so the thread must be loaded.
        comments
          .fetch_comments(task_id)
          .await
          .map_err(report("Failed to fetch comments"))?;
      }
      let draft = CommentDraft {
        content,
        parent_id: reply_to,
      };
      let comment = comments
        .add_comment(task_id, draft)
        .await
        .map_err(report("Failed to add comment"))?;
      println!("Added comment #{}", comment.id);
    }
    CommentAction::Edit { id, content } => {
      comments
        .update_comment(id, &content)
        .await
        .map_err(report("Failed to update comment"))?;
      println!("Updated comment #{}", id);
    }
    CommentAction::Delete { id } => {
      comments
        .delete_comment(id)
        .await
        .map_err(report("Failed to delete comment"))?;
      println!("Deleted comment #{}", id);
    }
    CommentAction::Mentionable { task_id } => {
      println!("{}", output::users_table(&comments.mentionable_users(task_id).await));
    }
  }
  Ok(())
}

async fn read_file_part(path: &Path) -> Result<FilePart> {
  let bytes = tokio::fs::read(path)
    .await
    .map_err(|e| eyre!("Failed to read {}: {}", path.display(), e))?;
  let file_name = path
    .file_name()
    .and_then(|n| n.to_str())
    .ok_or_else(|| eyre!("Not a file path: {}", path.display()))?
    .to_string();
  Ok(FilePart {
    field: "file".to_string(),
    file_name,
    mime: None,
    bytes,
  })
}

async fn run_attachments(action: AttachmentAction, stores: &Stores) -> Result<()> {
  let attachments = &stores.attachments;
  match action {
    AttachmentAction::List { task_id } => {
      let outcome = attachments
        .fetch_attachments(task_id)
        .await
        .map_err(report("Failed to fetch attachments"))?;
      print_outcome(&outcome);
      println!(
        "{}",
        output::attachments_table(&attachments.state().attachments.collection)
      );
    }
    AttachmentAction::Upload { task_id, path } => {
      let file = read_file_part(&path).await?;
      let attachment = attachments
        .upload(task_id, file)
        .await
        .map_err(report("Failed to upload attachment"))?;
      println!("Uploaded {} as attachment #{}", attachment.filename, attachment.id);
    }
    AttachmentAction::Delete { id } => {
      attachments
        .delete_attachment(id)
        .await
        .map_err(report("Failed to delete attachment"))?;
      println!("Deleted attachment #{}", id);
    }
  }
  Ok(())
}

async fn run_invitations(action: InvitationAction, stores: &Stores) -> Result<()> {
  let interactions = &stores.interactions;
  match action {
    InvitationAction::List => {
      let outcome = interactions
        .fetch_pending_invitations()
        .await
        .map_err(report("Failed to fetch invitations"))?;
      print_outcome(&outcome);
      println!("{}", output::invitations_table(&interactions.pending_invitations()));
    }
    InvitationAction::Task { task_id } => {
      let invitations = interactions
        .fetch_task_invitations(task_id)
        .await
        .map_err(report("Failed to fetch invitations"))?;
      println!("{}", output::invitations_table(&invitations));
    }
    InvitationAction::Send { task_id, email } => {
      let invitation = interactions
        .send_invitation(task_id, &email)
        .await
        .map_err(report("Failed to send invitation"))?;
      println!("Invited {} (invitation #{})", email, invitation.id);
    }
    InvitationAction::Accept { id } => {
      interactions
        .accept_invitation(id)
        .await
        .map_err(report("Failed to accept invitation"))?;
      println!("Accepted invitation #{}", id);
    }
    InvitationAction::Decline { id } => {
      interactions
        .decline_invitation(id)
        .await
        .map_err(report("Failed to decline invitation"))?;
      println!("Declined invitation #{}", id);
    }
  }
  Ok(())
}

async fn run_notifications(action: NotificationAction, stores: &Stores) -> Result<()> {
  let interactions = &stores.interactions;
  match action {
    NotificationAction::List => {
      let outcome = interactions
        .fetch_notifications()
        .await
        .map_err(report("Failed to fetch notifications"))?;
      print_outcome(&outcome);
      println!(
        "{}",
        output::notifications_table(&interactions.state().notifications.collection)
      );
    }
    NotificationAction::Unread => {
      println!("{}", interactions.unread_count().await);
    }
    NotificationAction::Read { id } => {
      interactions
        .mark_as_read(id)
        .await
        .map_err(report("Failed to mark notification as read"))?;
      println!("Marked notification #{} as read", id);
    }
    NotificationAction::ReadAll => {
      // Load first so the local copies are updated along with the server.
      interactions
        .fetch_notifications()
        .await
        .map_err(report("Failed to fetch notifications"))?;
      interactions
        .mark_all_as_read()
        .await
        .map_err(report("Failed to mark all notifications as read"))?;
      println!("All notifications marked as read");
    }
  }
  Ok(())
}

async fn run_admin(action: AdminAction, stores: &Stores) -> Result<()> {
  let admin = &stores.admin;
  match action {
    AdminAction::Users => {
      let outcome = admin.fetch_users().await.map_err(report("Failed to fetch users"))?;
      print_outcome(&outcome);
      println!("{}", output::users_table(&admin.state().users.collection));
    }
    AdminAction::Role { id, role } => {
      let user = admin
        .update_user_role(id, &role)
        .await
        .map_err(report("Failed to update user role"))?;
      println!("{} is now {}", user.name, user.role);
    }
    AdminAction::DeleteUser { id } => {
      admin
        .delete_user(id)
        .await
        .map_err(report("Failed to delete user"))?;
      println!("Deleted user #{}", id);
    }
    AdminAction::Stats => {
      let stats = admin
        .fetch_dashboard_stats()
        .await
        .map_err(report("Failed to fetch stats"))?;
      println!("{}", output::dashboard(&stats));
    }
    AdminAction::Tasks => {
      let outcome = admin
        .fetch_all_tasks()
        .await
        .map_err(report("Failed to fetch tasks"))?;
      print_outcome(&outcome);
      println!("{}", output::tasks_table(&admin.state().tasks.collection));
    }
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::testing::MockTransport;
  use crate::api::types::AuthSession;
  use crate::config::ApiConfig;
  use crate::session::MemoryStore;
  use clap::Parser;
  use serde_json::json;
  use std::sync::Arc;

  #[derive(Parser, Debug)]
  struct Cli {
    #[command(subcommand)]
    command: Command,
  }

  fn stores(role: Option<&str>) -> (Arc<MockTransport>, Stores) {
    let mock = Arc::new(MockTransport::new());
    let config = Config {
      api: ApiConfig::new("http://localhost"),
      cache: Default::default(),
      log_level: "info".into(),
    };
    let stores = Stores::new(&config, mock.clone(), Arc::new(MemoryStore::default()));
    if let Some(role) = role {
      stores
        .session()
        .establish(AuthSession {
          token: "t".into(),
          user: serde_json::from_value(json!({ "id": 1, "name": "Me", "role": role })).unwrap(),
        })
        .unwrap();
    }
    (mock, stores)
  }

  #[test]
  fn test_parse_nested_subcommands() {
    let cli = Cli::try_parse_from(["taskdesk", "tasks", "list", "--status", "pending"]).unwrap();
    assert!(matches!(
      cli.command,
      Command::Tasks {
        action: TaskAction::List { status: Some(ref s), .. }
      } if s == "pending"
    ));

    let cli =
      Cli::try_parse_from(["taskdesk", "comments", "add", "4", "thanks", "--reply-to", "9"]).unwrap();
    assert!(matches!(
      cli.command,
      Command::Comments {
        action: CommentAction::Add {
          task_id: 4,
          reply_to: Some(9),
          ..
        }
      }
    ));

    assert!(Cli::try_parse_from(["taskdesk", "admin", "delete-user", "x"]).is_err());
  }

  #[tokio::test]
  async fn test_admin_commands_require_admin_role() {
    let (mock, stores) = stores(Some("member"));

    let err = run(Command::Admin { action: AdminAction::Users }, &stores)
      .await
      .unwrap_err();

    assert!(err.to_string().contains("administrator"));
    assert_eq!(mock.request_count(), 0);
  }

  #[tokio::test]
  async fn test_commands_require_login() {
    let (mock, stores) = stores(None);

    let err = run(
      Command::Notifications {
        action: NotificationAction::Unread,
      },
      &stores,
    )
    .await
    .unwrap_err();

    assert!(err.to_string().contains("Not logged in"));
    assert_eq!(mock.request_count(), 0);
  }

  fn push_sign_in(mock: &MockTransport) {
    mock.push(204, serde_json::Value::Null);
    mock.push(200, json!({ "token": "t", "user": { "id": 1, "name": "Me", "role": "member" } }));
    mock.push(200, json!({ "count": 1 }));
    mock.push(200, json!({ "notifications": [] }));
    mock.push(200, json!({ "invitations": [] }));
  }

  fn bootstrapped_paths(auth_path: &str) -> Vec<String> {
    [
      "/sanctum/csrf-cookie",
      auth_path,
      "/api/user/notifications/unread-count",
      "/api/user/notifications",
      "/api/user/invitations/pending",
    ]
    .map(String::from)
    .to_vec()
  }

  #[tokio::test]
  async fn test_login_bootstraps_inbox() {
    let (mock, stores) = stores(None);
    push_sign_in(&mock);

    run(
      Command::Login {
        email: "me@example.com".into(),
        password: Some("pw".into()),
      },
      &stores,
    )
    .await
    .unwrap();

    assert_eq!(mock.paths(), bootstrapped_paths("/api/login"));
  }

  #[tokio::test]
  async fn test_register_bootstraps_inbox() {
    let (mock, stores) = stores(None);
    push_sign_in(&mock);

    run(
      Command::Register {
        name: "Me".into(),
        email: "me@example.com".into(),
        password: Some("pw".into()),
      },
      &stores,
    )
    .await
    .unwrap();

    assert_eq!(mock.paths(), bootstrapped_paths("/api/register"));
    assert_eq!(stores.interactions.state().unread_count, 1);
  }

  #[tokio::test]
  async fn test_failure_reports_server_message() {
    let (mock, stores) = stores(Some("member"));
    mock.push(403, json!({ "message": "You cannot delete this task." }));

    let err = run(
      Command::Tasks {
        action: TaskAction::Delete { id: 3 },
      },
      &stores,
    )
    .await
    .unwrap_err();

    assert_eq!(err.to_string(), "You cannot delete this task.");
  }
}
