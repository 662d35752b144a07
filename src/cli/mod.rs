//! CLI command definitions for tasktrack
//!
//! This module defines the CLI structure using clap's derive macros.
//! The main entry point is the `Cli` struct which contains subcommands.

use crate::types::{NewTask, Priority, TaskPatch, TaskStatus};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};

/// Output format flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum FormatArg {
    /// Nested markdown checklist (default)
    #[default]
    Markdown,
    /// Pretty-printed JSON
    Json,
}

/// Personal hierarchical task tracker
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Path to database file (overrides config)
    #[arg(short, long, global = true)]
    pub database: Option<String>,

    /// Acting user ID (overrides config)
    #[arg(short, long, global = true)]
    pub user: Option<i64>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = FormatArg::Markdown, global = true)]
    pub format: FormatArg,

    /// Bypass the read cache
    #[arg(long, global = true)]
    pub no_cache: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Logging output: 0/off, 1/stdout, 2/stderr (default), or filename
    #[arg(short, long, default_value = "2", global = true)]
    pub log: String,

    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Manage users
    #[command(subcommand)]
    User(UserCommand),

    /// Create a task
    Add(AddArgs),

    /// Show a task with all of its subtasks
    Show {
        /// Task ID
        id: i64,
    },

    /// List the acting user's root tasks with their subtasks
    List,

    /// Edit fields of a task
    Update(UpdateArgs),

    /// Delete a task and all of its subtasks
    Delete {
        /// Task ID
        id: i64,
    },

    /// Mark a task done
    Done {
        /// Task ID
        id: i64,
    },

    /// Change a task's status (todo, in-progress, done)
    Status {
        /// Task ID
        id: i64,
        /// New status
        #[arg(value_parser = parse_status)]
        status: TaskStatus,
    },

    /// Change a task's priority (low, medium, high)
    Priority {
        /// Task ID
        id: i64,
        /// New priority
        #[arg(value_parser = parse_priority)]
        priority: Priority,
    },
}

#[derive(Subcommand, Debug)]
pub enum UserCommand {
    /// Register a user
    Add {
        /// Unique username
        username: String,
    },
    /// List users
    List,
}

/// Arguments for the add subcommand
#[derive(Args, Debug)]
pub struct AddArgs {
    /// Task title
    pub title: String,

    /// Parent task ID for nesting
    #[arg(short, long)]
    pub parent: Option<i64>,

    /// Longer description
    #[arg(long)]
    pub description: Option<String>,

    /// Due date (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    pub due: Option<NaiveDate>,

    /// Tag (repeatable)
    #[arg(short, long = "tag", value_name = "TAG")]
    pub tags: Vec<String>,

    /// Priority (low, medium, high)
    #[arg(long, value_parser = parse_priority)]
    pub priority: Option<Priority>,

    /// Position among siblings
    #[arg(long)]
    pub order: Option<i32>,
}

impl AddArgs {
    pub fn into_new_task(self, user_id: i64) -> NewTask {
        NewTask {
            user_id,
            parent_id: self.parent,
            title: self.title,
            description: self.description,
            due_date: self.due,
            tags: self.tags,
            priority: self.priority,
            display_order: self.order,
        }
    }
}

/// Arguments for the update subcommand
#[derive(Args, Debug)]
pub struct UpdateArgs {
    /// Task ID
    pub id: i64,

    #[arg(long)]
    pub title: Option<String>,

    #[arg(long, conflicts_with = "clear_description")]
    pub description: Option<String>,

    /// Remove the description
    #[arg(long)]
    pub clear_description: bool,

    /// Due date (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date, conflicts_with = "clear_due")]
    pub due: Option<NaiveDate>,

    /// Remove the due date
    #[arg(long)]
    pub clear_due: bool,

    /// Replace tags (repeatable)
    #[arg(short, long = "tag", value_name = "TAG")]
    pub tags: Vec<String>,

    /// Remove all tags
    #[arg(long, conflicts_with = "tags")]
    pub clear_tags: bool,

    #[arg(long)]
    pub order: Option<i32>,

    #[arg(long, value_parser = parse_status)]
    pub status: Option<TaskStatus>,

    #[arg(long, value_parser = parse_priority)]
    pub priority: Option<Priority>,
}

impl UpdateArgs {
    pub fn to_patch(&self) -> TaskPatch {
        TaskPatch {
            title: self.title.clone(),
            description: if self.clear_description {
                Some(None)
            } else {
                self.description.clone().map(Some)
            },
            due_date: if self.clear_due {
                Some(None)
            } else {
                self.due.map(Some)
            },
            tags: if self.clear_tags {
                Some(Vec::new())
            } else if self.tags.is_empty() {
                None
            } else {
                Some(self.tags.clone())
            },
            display_order: self.order,
            status: self.status,
            priority: self.priority,
        }
    }
}

fn parse_status(s: &str) -> Result<TaskStatus, String> {
    TaskStatus::from_str(s).ok_or_else(|| format!("unknown status '{}'", s))
}

fn parse_priority(s: &str) -> Result<Priority, String> {
    Priority::from_str(s).ok_or_else(|| format!("unknown priority '{}'", s))
}

fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| format!("invalid date '{}': {}", s, e))
}
