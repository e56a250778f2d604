//! PageSpace Core Hierarchy Engine
//!
//! This crate maintains the page hierarchy of a document workspace: pages grouped
//! into spaces, nested under parent pages, and ordered among their siblings by
//! fractional position keys.
//!
//! # Architecture
//!
//! - **Adjacency list**: each page stores its parent id; trees are assembled in memory
//! - **Fractional positions**: inserting between two siblings never rewrites the others
//! - **Soft delete**: deleted pages keep their placement until restored or purged
//! - **libsql**: embedded SQLite-compatible storage with a unique sibling-position index
//!
//! # Modules
//!
//! - [`models`] - Data structures (Page, NewPage, PagePatch, etc.)
//! - [`db`] - Storage layer, position keys and domain events
//! - [`services`] - Tree reads, structural writes, lifecycle and the service facade
//! - [`operations`] - Placement retry
//! - [`config`] - Engine configuration
//! - [`logging`] - Tracing subscriber setup

pub mod config;
pub mod db;
pub mod logging;
pub mod models;
pub mod operations;
pub mod services;

// Re-export commonly used types
pub use config::TreeConfig;
pub use db::{MemoryStore, PageStore, PageTransaction, PositionKeyAllocator, SqliteStore, TreeEvent};
pub use models::*;
pub use services::*;
