//! Data Models
//!
//! This module contains the data structures shared by the storage layer and
//! the hierarchy services:
//!
//! - `Page` - The hierarchy node (document page)
//! - `NewPage` / `PagePatch` - Create parameters and sparse updates
//! - `PageSummary` - Page annotated with `has_children` for tree views
//! - `Attachment` - Collaborator data re-parented on cross-space moves

mod page;

pub use page::{Attachment, CascadeResult, NewPage, Page, PagePatch, PageSummary};
