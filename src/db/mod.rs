//! SQLite store for users and tasks.

pub mod tasks;
pub mod users;

use crate::error::{TaskError, TaskResult};
use crate::types::{NewTask, Task, TaskPatch, User};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

mod embedded {
    use refinery::embed_migrations;
    embed_migrations!("migrations");
}

/// Store contract consumed by the task services.
///
/// Tree queries return flat rows; assembling them is the caller's job.
pub trait TaskStore: Send + Sync + 'static {
    /// Every task reachable from `root_id`, root first. Empty if the root does
    /// not exist.
    fn fetch_tree(&self, root_id: i64) -> TaskResult<Vec<Task>>;

    fn fetch_by_id(&self, task_id: i64) -> TaskResult<Task>;

    /// Root tasks owned by `user_id`, in display order.
    fn list_roots(&self, user_id: i64) -> TaskResult<Vec<Task>>;

    fn insert_task(&self, input: &NewTask) -> TaskResult<Task>;

    fn update_task(&self, task_id: i64, patch: &TaskPatch) -> TaskResult<Task>;

    /// Delete a task and all of its descendants.
    fn delete_task(&self, task_id: i64) -> TaskResult<()>;

    fn create_user(&self, username: &str) -> TaskResult<User>;

    fn get_user(&self, user_id: i64) -> TaskResult<User>;

    fn list_users(&self) -> TaskResult<Vec<User>>;
}

/// Database handle wrapping a SQLite connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create the database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> TaskResult<Self> {
        let conn = Connection::open(path)?;

        // Enable WAL mode for concurrent access
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA foreign_keys=ON;
             PRAGMA busy_timeout=5000;",
        )?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.run_migrations()?;

        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> TaskResult<Self> {
        let conn = Connection::open_in_memory()?;

        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.run_migrations()?;

        Ok(db)
    }

    /// Run database migrations.
    fn run_migrations(&self) -> TaskResult<()> {
        let mut conn = self.lock()?;
        embedded::migrations::runner()
            .run(&mut *conn)
            .map_err(TaskError::internal)?;
        Ok(())
    }

    fn lock(&self) -> TaskResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| TaskError::internal("database connection lock poisoned"))
    }

    /// Execute a function with exclusive access to the connection.
    pub fn with_conn<F, T>(&self, f: F) -> TaskResult<T>
    where
        F: FnOnce(&Connection) -> TaskResult<T>,
    {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Execute a function with mutable access to the connection (for transactions).
    pub fn with_conn_mut<F, T>(&self, f: F) -> TaskResult<T>
    where
        F: FnOnce(&mut Connection) -> TaskResult<T>,
    {
        let mut conn = self.lock()?;
        f(&mut conn)
    }
}

impl TaskStore for Database {
    fn fetch_tree(&self, root_id: i64) -> TaskResult<Vec<Task>> {
        self.get_task_rows(root_id)
    }

    fn fetch_by_id(&self, task_id: i64) -> TaskResult<Task> {
        self.get_task(task_id)?
            .ok_or_else(|| TaskError::task_not_found(task_id))
    }

    fn list_roots(&self, user_id: i64) -> TaskResult<Vec<Task>> {
        self.list_root_tasks(user_id)
    }

    fn insert_task(&self, input: &NewTask) -> TaskResult<Task> {
        self.create_task(input)
    }

    fn update_task(&self, task_id: i64, patch: &TaskPatch) -> TaskResult<Task> {
        self.apply_patch(task_id, patch)
    }

    fn delete_task(&self, task_id: i64) -> TaskResult<()> {
        if self.delete_subtree(task_id)? {
            Ok(())
        } else {
            Err(TaskError::task_not_found(task_id))
        }
    }

    fn create_user(&self, username: &str) -> TaskResult<User> {
        self.insert_user(username)
    }

    fn get_user(&self, user_id: i64) -> TaskResult<User> {
        self.find_user(user_id)?
            .ok_or_else(|| TaskError::user_not_found(user_id))
    }

    fn list_users(&self) -> TaskResult<Vec<User>> {
        self.all_users()
    }
}

/// Get the current timestamp in milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
