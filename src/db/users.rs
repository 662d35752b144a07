//! Task owners.

use super::{Database, now_ms};
use crate::error::TaskResult;
use crate::types::User;
use rusqlite::{OptionalExtension, Row, params};

fn parse_user_row(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get("id")?,
        username: row.get("username")?,
        created_at: row.get("created_at")?,
    })
}

impl Database {
    /// Register a user. A duplicate username is a conflict.
    pub fn insert_user(&self, username: &str) -> TaskResult<User> {
        let now = now_ms();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (username, created_at) VALUES (?1, ?2)",
                params![username, now],
            )?;
            Ok(User {
                id: conn.last_insert_rowid(),
                username: username.to_string(),
                created_at: now,
            })
        })
    }

    pub fn find_user(&self, user_id: i64) -> TaskResult<Option<User>> {
        self.with_conn(|conn| {
            let user = conn
                .query_row(
                    "SELECT id, username, created_at FROM users WHERE id = ?1",
                    params![user_id],
                    parse_user_row,
                )
                .optional()?;
            Ok(user)
        })
    }

    pub fn all_users(&self) -> TaskResult<Vec<User>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id, username, created_at FROM users ORDER BY id")?;
            let users = stmt
                .query_map([], parse_user_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(users)
        })
    }
}
