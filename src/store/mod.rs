//! Store backends for the shared quota, cache and dead-letter state.

pub mod libsql_backend;
pub mod memory;
pub mod migrations;

pub use libsql_backend::LibSqlBackend;
pub use memory::MemoryStore;
