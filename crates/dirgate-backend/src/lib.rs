//! Directory backends for Dirgate
//!
//! The frontend talks to a [`DirectoryBackend`]; [`SqlBackend`] is the
//! sqlx implementation serving SQLite, PostgreSQL and MySQL user stores.

pub mod sql;
pub mod traits;

pub use sql::SqlBackend;
pub use traits::*;
