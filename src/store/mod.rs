//! Persistence layer: libSQL-backed processed-message store.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{ClaimState, ProcessedRecord, ProcessedStore};
