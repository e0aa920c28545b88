//! Record store — the single source of truth for queue and sequence state.
//!
//! All cross-worker coordination happens through the store's atomic
//! conditional updates (compare-and-swap on status/cursor), never through
//! in-process locks, so multiple worker processes can share one store.

pub mod libsql_backend;
pub mod memory;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlStore;
pub use memory::MemoryStore;
pub use traits::RecordStore;
