mod api;
mod cache;
mod commands;
mod config;
mod db;
mod output;
mod session;
mod stores;

use clap::Parser;
use color_eyre::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;

use api::transport::ReqwestTransport;
use db::Database;
use stores::Stores;

#[derive(Parser, Debug)]
#[command(name = "taskdesk")]
#[command(about = "A command-line client for the task management API")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/taskdesk/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: commands::Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = config::Config::load(args.config.as_deref())?;

  // Opening the database also creates the data directory the log lives in.
  let db = Arc::new(Database::open()?);
  let _log_guard = init_logging(&config.log_level, &Database::data_dir()?.join("taskdesk.log"));
  tracing::info!("taskdesk starting");

  let transport = Arc::new(ReqwestTransport::new(&config.api)?);
  let stores = Stores::new(&config, transport, db);

  let result = commands::run(args.command, &stores).await;
  if result.is_err() && *stores.session().subscribe_login_required().borrow() {
    eprintln!("Your session has expired. Run `taskdesk login <email>` to sign in again.");
  }
  result
}

/// File-based logging; stdout is reserved for command output.
fn init_logging(level: &str, log_path: &Path) -> Option<WorkerGuard> {
  let log_dir = log_path.parent()?;
  let file_name = log_path.file_name()?.to_str()?;

  let file_appender = tracing_appender::rolling::never(log_dir, file_name);
  let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

  let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

  tracing_subscriber::fmt()
    .with_writer(non_blocking)
    .with_env_filter(env_filter)
    .with_ansi(false)
    .init();

  Some(guard)
}
