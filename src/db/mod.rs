//! Database module for PostgreSQL connections and statement execution

pub mod connection;
pub mod executor;

pub use connection::{init_pool, ogr_connection_string, DbPool};
pub use executor::{PgExecutor, RecordingExecutor, SqlExecutor, TextRow};
