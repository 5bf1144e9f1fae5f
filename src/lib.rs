pub mod config;
pub mod connector;
pub mod db;
pub mod error;
pub mod ingestion;

pub use config::ImporterConfig;
pub use error::{ErrorKind, ImportError, Result};
