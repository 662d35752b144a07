//! Task CRUD and subtree queries.

use super::{Database, now_ms};
use crate::error::{TaskError, TaskResult};
use crate::types::{NewTask, Priority, Task, TaskPatch, TaskStatus};
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::debug;

const TASK_COLUMNS: &str = "t.id, t.user_id, t.parent_id, t.title, t.description, t.due_date, \
     t.tags, t.status, t.completed, t.priority, t.display_order, t.created_at, t.updated_at";

pub fn parse_task_row(row: &Row) -> rusqlite::Result<Task> {
    let tags_json: String = row.get("tags")?;
    let status: String = row.get("status")?;
    let priority: String = row.get("priority")?;

    Ok(Task {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        parent_id: row.get("parent_id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        due_date: row.get("due_date")?,
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        display_order: row.get("display_order")?,
        status: TaskStatus::from_str(&status).unwrap_or_default(),
        completed: row.get("completed")?,
        priority: Priority::from_str(&priority).unwrap_or_default(),
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        sub_tasks: Vec::new(),
        total_count: 0,
        completed_count: 0,
        progress: 0.0,
    })
}

/// Internal helper to get a task using an existing connection (avoids deadlock).
fn get_task_internal(conn: &Connection, task_id: i64) -> TaskResult<Option<Task>> {
    let sql = format!("SELECT {} FROM tasks t WHERE t.id = ?1", TASK_COLUMNS);
    let task = conn
        .query_row(&sql, params![task_id], parse_task_row)
        .optional()?;
    Ok(task)
}

impl Database {
    /// Insert a new task. Ownership and parent checks are the caller's concern;
    /// the foreign keys only guarantee the referenced rows exist.
    pub fn create_task(&self, input: &NewTask) -> TaskResult<Task> {
        let now = now_ms();
        let priority = input.priority.unwrap_or_default();
        let tags_json = serde_json::to_string(&input.tags)?;

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            // New tasks go to the end of their sibling list unless told otherwise.
            let display_order = match input.display_order {
                Some(order) => order,
                None => tx.query_row(
                    "SELECT COALESCE(MAX(display_order) + 1, 0) FROM tasks
                     WHERE user_id = ?1 AND parent_id IS ?2",
                    params![input.user_id, input.parent_id],
                    |row| row.get(0),
                )?,
            };

            tx.execute(
                "INSERT INTO tasks (
                    user_id, parent_id, title, description, due_date, tags,
                    status, completed, priority, display_order, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, ?9, ?10, ?10)",
                params![
                    input.user_id,
                    input.parent_id,
                    input.title,
                    input.description,
                    input.due_date,
                    tags_json,
                    TaskStatus::Todo.as_str(),
                    priority.as_str(),
                    display_order,
                    now,
                ],
            )?;
            let id = tx.last_insert_rowid();
            let task = get_task_internal(&tx, id)?.ok_or_else(|| TaskError::task_not_found(id))?;

            tx.commit()?;
            debug!(task_id = id, user_id = input.user_id, "Inserted task");
            Ok(task)
        })
    }

    /// Get a task by ID.
    pub fn get_task(&self, task_id: i64) -> TaskResult<Option<Task>> {
        self.with_conn(|conn| get_task_internal(conn, task_id))
    }

    /// The task and all of its descendants as flat rows, root first.
    ///
    /// Rows are ordered by depth, then sibling display order, then ID, so
    /// children appear in display order once assembled.
    pub fn get_task_rows(&self, root_id: i64) -> TaskResult<Vec<Task>> {
        self.with_conn(|conn| {
            let sql = format!(
                "WITH RECURSIVE subtree(id, depth) AS (
                    SELECT id, 0 FROM tasks WHERE id = ?1
                    UNION ALL
                    SELECT c.id, s.depth + 1 FROM tasks c
                    INNER JOIN subtree s ON c.parent_id = s.id
                )
                SELECT {} FROM tasks t
                INNER JOIN subtree s ON t.id = s.id
                ORDER BY s.depth, t.display_order, t.id",
                TASK_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![root_id], parse_task_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    /// Root tasks (no parent) owned by a user.
    pub fn list_root_tasks(&self, user_id: i64) -> TaskResult<Vec<Task>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM tasks t
                 WHERE t.user_id = ?1 AND t.parent_id IS NULL
                 ORDER BY t.display_order, t.id",
                TASK_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![user_id], parse_task_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    /// Apply a partial update and return the stored row.
    /// The completion flag always follows the resulting status.
    pub fn apply_patch(&self, task_id: i64, patch: &TaskPatch) -> TaskResult<Task> {
        let now = now_ms();

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let task =
                get_task_internal(&tx, task_id)?.ok_or_else(|| TaskError::task_not_found(task_id))?;

            let title = patch.title.clone().unwrap_or(task.title);
            let description = patch.description.clone().unwrap_or(task.description);
            let due_date = patch.due_date.unwrap_or(task.due_date);
            let tags = patch.tags.clone().unwrap_or(task.tags);
            let display_order = patch.display_order.unwrap_or(task.display_order);
            let status = patch.status.unwrap_or(task.status);
            let priority = patch.priority.unwrap_or(task.priority);

            tx.execute(
                "UPDATE tasks SET
                    title = ?1, description = ?2, due_date = ?3, tags = ?4,
                    display_order = ?5, status = ?6, completed = ?7, priority = ?8,
                    updated_at = ?9
                WHERE id = ?10",
                params![
                    title,
                    description,
                    due_date,
                    serde_json::to_string(&tags)?,
                    display_order,
                    status.as_str(),
                    status.is_completed(),
                    priority.as_str(),
                    now,
                    task_id,
                ],
            )?;

            let updated =
                get_task_internal(&tx, task_id)?.ok_or_else(|| TaskError::task_not_found(task_id))?;
            tx.commit()?;
            Ok(updated)
        })
    }

    /// Delete a task and its descendants. Returns false if the task did not exist.
    pub fn delete_subtree(&self, task_id: i64) -> TaskResult<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            // Find all descendants using recursive CTE and delete them
            let deleted = tx.execute(
                "WITH RECURSIVE descendants(id) AS (
                    SELECT ?1
                    UNION ALL
                    SELECT c.id FROM tasks c
                    INNER JOIN descendants d ON c.parent_id = d.id
                )
                DELETE FROM tasks WHERE id IN (SELECT id FROM descendants)",
                params![task_id],
            )?;
            tx.commit()?;
            debug!(task_id, deleted, "Deleted task subtree");
            Ok(deleted > 0)
        })
    }
}
