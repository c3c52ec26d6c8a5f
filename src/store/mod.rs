//! Persistence layer: libSQL-backed storage for events, preferences and feedback.

mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::Database;
