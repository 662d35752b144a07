//! tasktrack
//!
//! Command-line front end for the personal task tracker. Each invocation
//! opens the store, runs one command through the task service and drains
//! the background worker pool before exiting.

use anyhow::{Result, anyhow};
use clap::Parser;
use serde_json::json;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;
use tasktrack::cache::TaskCache;
use tasktrack::cli::{Cli, Command, FormatArg, UserCommand};
use tasktrack::config::Config;
use tasktrack::db::Database;
use tasktrack::error::TaskError;
use tasktrack::format::{
    OutputFormat, format_task_markdown, format_tasks_markdown, format_users_markdown, to_json,
};
use tasktrack::pool::WorkerPool;
use tasktrack::service::{CachedTaskService, DbTaskService, TaskService};
use tasktrack::types::Task;
use tokio_util::sync::CancellationToken;
use tracing::{Level, debug, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on --log option
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    match cli.log.as_str() {
        "0" | "off" => {
            // No logging
        }
        "1" | "stdout" => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(std::io::stdout)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        "2" | "stderr" => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(std::io::stderr)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        filename => {
            // Log to file (append mode)
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(filename)?;
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(file)
                .with_ansi(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }

    let mut config = Config::load_or_default(cli.config.as_deref().map(Path::new))?;

    // Override from CLI arguments
    if let Some(db_path) = &cli.database {
        config.database.path = db_path.into();
    }
    if cli.no_cache {
        config.cache.enabled = false;
    }

    let format = match cli.format {
        FormatArg::Json => OutputFormat::Json,
        FormatArg::Markdown => OutputFormat::Markdown,
    };
    let user = cli.user.or(config.default_user);

    config.ensure_db_dir()?;
    let db = Database::open(&config.database.path)?;
    debug!(path = ?config.database.path, "Database opened");

    let db_service = Arc::new(DbTaskService::new(db));

    // Ctrl-C cancels the in-flight command and any queued background work.
    let root = CancellationToken::new();
    {
        let root = root.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted");
                root.cancel();
            }
        });
    }

    let pool = Arc::new(WorkerPool::new(config.workers.count).with_shutdown(&root));
    let service: Arc<dyn TaskService> = if config.cache.enabled {
        Arc::new(
            CachedTaskService::new(
                Arc::clone(&db_service),
                Arc::new(TaskCache::new()),
                Arc::clone(&pool),
            )
            .with_policy(config.cache.refresh_policy()),
        )
    } else {
        info!("Read cache disabled");
        db_service.clone()
    };

    let ctx = root.child_token();
    let result = match cli.command {
        Command::User(UserCommand::Add { username }) => db_service
            .register_user(&username)
            .and_then(|u| render(format, &u, || format_users_markdown(std::slice::from_ref(&u)))),
        Command::User(UserCommand::List) => db_service
            .users()
            .and_then(|users| render(format, &users, || format_users_markdown(&users))),
        Command::Add(args) => match require_user(user) {
            Ok(user_id) => service
                .create(&ctx, args.into_new_task(user_id))
                .await
                .and_then(|t| render_task(format, &t)),
            Err(e) => Err(e),
        },
        Command::Show { id } => service
            .show(&ctx, id)
            .await
            .and_then(|t| render_task(format, &t)),
        Command::List => match require_user(user) {
            Ok(user_id) => service
                .list(&ctx, user_id)
                .await
                .and_then(|tasks| render(format, &tasks, || format_tasks_markdown(&tasks))),
            Err(e) => Err(e),
        },
        Command::Update(args) => service
            .update(&ctx, args.id, args.to_patch())
            .await
            .and_then(|t| render_task(format, &t)),
        Command::Delete { id } => service.delete(&ctx, id).await.and_then(|()| {
            render(format, &json!({ "deleted": id }), || {
                format!("Deleted task `#{}` and its subtasks.\n", id)
            })
        }),
        Command::Done { id } => service
            .complete(&ctx, id)
            .await
            .and_then(|t| render_task(format, &t)),
        Command::Status { id, status } => service
            .change_status(&ctx, id, status)
            .await
            .and_then(|t| render_task(format, &t)),
        Command::Priority { id, priority } => service
            .change_priority(&ctx, id, priority)
            .await
            .and_then(|t| render_task(format, &t)),
    };

    // Let cache maintenance finish before the process goes away.
    pool.stop().await;

    match result {
        Ok(output) => {
            print!("{}", output);
            Ok(())
        }
        Err(e) => {
            if format == OutputFormat::Json {
                println!(
                    "{}",
                    json!({ "code": e.code(), "message": e.to_string() })
                );
            }
            Err(anyhow!(e))
        }
    }
}

fn require_user(user: Option<i64>) -> Result<i64, TaskError> {
    user.ok_or_else(|| {
        TaskError::invalid("user", "no acting user; pass --user or set default_user")
    })
}

fn render<T, F>(format: OutputFormat, value: &T, markdown: F) -> Result<String, TaskError>
where
    T: serde::Serialize + ?Sized,
    F: FnOnce() -> String,
{
    match format {
        OutputFormat::Json => Ok(to_json(value)? + "\n"),
        OutputFormat::Markdown => Ok(markdown()),
    }
}

fn render_task(format: OutputFormat, task: &Task) -> Result<String, TaskError> {
    render(format, task, || format_task_markdown(task))
}
