//! Business Services
//!
//! This module contains the hierarchy engine:
//!
//! - `TreeReader` - Children, descendants, ancestors, child checks
//! - `TreeMutator` - Create, move, cross-space subtree moves
//! - `LifecycleManager` - Soft delete, restore, permanent delete, trash
//! - `PageTreeService` - Transactional facade with retry and domain events
//!
//! The components operate inside a caller-supplied [`PageTransaction`](crate::db::PageTransaction);
//! `PageTreeService` owns the transaction boundary for single-operation calls.

pub mod attachments;
pub mod error;
pub mod lifecycle;
pub mod page_tree_service;
pub mod protected;
pub mod tree_mutator;
pub mod tree_reader;

pub use attachments::{AttachmentReassigner, StoreAttachmentReassigner};
pub use error::{ErrorKind, TreeError, TreeResult};
pub use lifecycle::LifecycleManager;
pub use page_tree_service::PageTreeService;
pub use protected::ProtectedTitleGuard;
pub use tree_mutator::TreeMutator;
pub use tree_reader::TreeReader;
