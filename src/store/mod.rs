//! Persistence layer — libSQL-backed storage for campaigns, messages,
//! replies and the opt-out tables.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::Database;
