//! In-memory read cache for assembled task trees and per-user root lists.
//!
//! There is no eviction and no TTL: entries live until invalidated by a write
//! or until the cache is dropped. Every key carries a generation counter that
//! advances on each invalidation or authoritative write. Fetch-then-populate
//! paths read the generation before fetching and hand it back with the result,
//! so a fetch that raced with a write is discarded instead of resurrecting
//! pre-write data.

use crate::types::Task;
use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;
use tracing::trace;

/// Cache key: one assembled task tree, or one user's ordered root list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Task(i64),
    UserTasks(i64),
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Task(id) => write!(f, "task:{}", id),
            CacheKey::UserTasks(user_id) => write!(f, "user:{}:tasks", user_id),
        }
    }
}

/// Cached value.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheValue {
    Task(Task),
    List(Vec<Task>),
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<CacheKey, CacheValue>,
    generations: HashMap<CacheKey, u64>,
}

impl CacheState {
    fn bump(&mut self, key: CacheKey) -> u64 {
        let generation = self.generations.entry(key).or_insert(0);
        *generation += 1;
        *generation
    }
}

/// Concurrent cache shared by foreground callers and pool workers.
///
/// Thread-safe: all methods take `&self`. Values are cloned in and out; no
/// lock is ever held across an await point.
#[derive(Default)]
pub struct TaskCache {
    state: RwLock<CacheState>,
}

impl TaskCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &CacheKey) -> Option<CacheValue> {
        let state = self.state.read().unwrap();
        state.entries.get(key).cloned()
    }

    pub fn get_task(&self, task_id: i64) -> Option<Task> {
        match self.get(&CacheKey::Task(task_id)) {
            Some(CacheValue::Task(task)) => Some(task),
            _ => None,
        }
    }

    pub fn get_list(&self, user_id: i64) -> Option<Vec<Task>> {
        match self.get(&CacheKey::UserTasks(user_id)) {
            Some(CacheValue::List(tasks)) => Some(tasks),
            _ => None,
        }
    }

    /// Current generation of `key`. Pass it back to [`TaskCache::put_if_current`].
    pub fn generation(&self, key: &CacheKey) -> u64 {
        let state = self.state.read().unwrap();
        state.generations.get(key).copied().unwrap_or(0)
    }

    /// Store an authoritative value, superseding any in-flight fetch for `key`.
    pub fn store(&self, key: CacheKey, value: CacheValue) {
        let mut state = self.state.write().unwrap();
        state.bump(key);
        state.entries.insert(key, value);
    }

    /// Store a fetched value only if `key` has not been written or invalidated
    /// since `generation` was read. Returns whether the value was stored.
    pub fn put_if_current(&self, key: CacheKey, generation: u64, value: CacheValue) -> bool {
        let mut state = self.state.write().unwrap();
        let current = state.generations.get(&key).copied().unwrap_or(0);
        if current != generation {
            trace!(%key, generation, current, "Discarding superseded cache fill");
            return false;
        }
        state.entries.insert(key, value);
        true
    }

    /// Remove `key`. Returns whether an entry was present.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        let mut state = self.state.write().unwrap();
        state.bump(*key);
        state.entries.remove(key).is_some()
    }

    /// Remove every cached task tree that has `task_id` strictly below its
    /// root. Returns the number of entries removed.
    pub fn invalidate_containing(&self, task_id: i64) -> usize {
        let mut state = self.state.write().unwrap();
        let stale: Vec<CacheKey> = state
            .entries
            .iter()
            .filter_map(|(key, value)| match value {
                CacheValue::Task(tree) if tree.has_descendant(task_id) => Some(*key),
                _ => None,
            })
            .collect();
        for key in &stale {
            state.bump(*key);
            state.entries.remove(key);
        }
        stale.len()
    }

    pub fn len(&self) -> usize {
        self.state.read().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut state = self.state.write().unwrap();
        let keys: Vec<CacheKey> = state.entries.keys().copied().collect();
        for key in keys {
            state.bump(key);
        }
        state.entries.clear();
    }
}
