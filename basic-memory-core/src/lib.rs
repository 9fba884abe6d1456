//! # basic-memory-core
//!
//! Core library for basic-memory — a local knowledge-graph engine that
//! mirrors a directory of Markdown (and other) files into a structured
//! graph of entities, observations, and relations, keeping a full-text
//! search index consistent with the files on disk.
//!
//! This library provides:
//! - Domain types for entities, observations, relations, and search
//! - A SQLite storage layer with schema migrations
//! - The sync orchestrator that drives the two-pass file-to-graph protocol
//! - Full-text search indexing and graph context assembly
//! - Configuration management and logging infrastructure
//!
//! ## Architecture
//!
//! Files on disk are the source of truth. Sync walks the project root,
//! diffs file checksums against the database, and replays any new,
//! modified, moved, or deleted files into the `entities` / `observations`
//! / `relations` tables and the `search_index` FTS5 table.
//!
//! ## Example
//!
//! ```rust,no_run
//! use basic_memory_core::{Config, Database, SyncCoordinator};
//! use std::sync::Arc;
//!
//! let config = Config::load().expect("failed to load config");
//! let db = Database::open(&Config::database_path()).expect("failed to open database");
//! db.migrate().expect("failed to run migrations");
//! let db = Arc::new(db);
//!
//! let coordinator = SyncCoordinator::new(db, config.project.root.clone());
//! let report = coordinator.sync_all().expect("sync failed");
//! coordinator.flush_index();
//! println!("synced {} changes", report.total_changes());
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use context::ContextBuilder;
pub use db::{Database, NewEntity};
pub use error::{Error, Result};
pub use link_resolver::LinkResolver;
pub use sync::SyncCoordinator;
pub use types::*;

// Public modules
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod hash;
pub mod link_resolver;
pub mod logging;
pub mod markdown;
pub mod scan;
pub mod search;
pub mod sync;
pub mod types;
