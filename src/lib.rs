//! Personal hierarchical task tracker.
//!
//! This module exports the core components for testing and integration:
//! the SQLite store, tree assembly, the task services and the background
//! worker pool that keeps the read cache warm.

pub mod cache;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod format;
pub mod pool;
pub mod service;
pub mod tree;
pub mod types;
