//! Database Layer
//!
//! Storage for the page hierarchy:
//!
//! - [`PageStore`] / [`PageTransaction`]: the storage collaborator the services depend on
//! - [`MemoryStore`]: in-process store with the same constraints as the schema
//! - [`SqliteStore`]: embedded libsql database (WAL, foreign keys, unique sibling positions)
//! - [`fractional_ordering`]: position key allocation
//! - [`events`]: domain events broadcast after committed changes

mod error;
pub mod events;
pub mod fractional_ordering;
mod memory_store;
mod page_store;
mod sqlite_store;

pub use error::{StoreError, StoreResult};
pub use events::TreeEvent;
pub use fractional_ordering::{KeyError, PositionKeyAllocator};
pub use memory_store::MemoryStore;
pub use page_store::{PageStore, PageTransaction};
pub use sqlite_store::SqliteStore;
