//! Statement execution seam used by the FDW connector

use crate::error::{ImportError, Result};
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use std::sync::Mutex;

/// A row as returned by [`SqlExecutor::fetch_rows`], every column read as text.
pub type TextRow = Vec<Option<String>>;

#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Run one statement, returning the number of affected rows
    async fn execute(&self, sql: &str) -> Result<u64>;

    /// Run a query whose columns are all text (cast with `::text` where needed)
    async fn fetch_rows(&self, sql: &str) -> Result<Vec<TextRow>>;
}

/// [`SqlExecutor`] backed by a PostgreSQL pool
#[derive(Clone)]
pub struct PgExecutor {
    pool: PgPool,
}

impl PgExecutor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SqlExecutor for PgExecutor {
    async fn execute(&self, sql: &str) -> Result<u64> {
        let result = sqlx::raw_sql(sql)
            .execute(&self.pool)
            .await
            .map_err(|e| ImportError::ConnectorInfrastructure(e.to_string()))?;
        Ok(result.rows_affected())
    }

    async fn fetch_rows(&self, sql: &str) -> Result<Vec<TextRow>> {
        let rows = sqlx::query(sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| ImportError::ConnectorInfrastructure(e.to_string()))?;

        rows.iter()
            .map(|row| {
                (0..row.len())
                    .map(|idx| {
                        row.try_get::<Option<String>, _>(idx)
                            .map_err(|e| ImportError::ConnectorInfrastructure(e.to_string()))
                    })
                    .collect()
            })
            .collect()
    }
}

/// [`SqlExecutor`] that records statements instead of running them.
///
/// Used for dry runs; queries are answered from canned rows matched by
/// statement prefix, and a statement prefix can be marked as failing.
#[derive(Default)]
pub struct RecordingExecutor {
    statements: Mutex<Vec<String>>,
    failures: Mutex<Vec<String>>,
    canned_rows: Mutex<Vec<(String, Vec<TextRow>)>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every statement starting with `prefix`
    pub fn fail_on(&self, prefix: &str) {
        lock(&self.failures).push(prefix.to_string());
    }

    /// Answer queries starting with `prefix` with `rows`
    pub fn respond_with(&self, prefix: &str, rows: Vec<TextRow>) {
        lock(&self.canned_rows).push((prefix.to_string(), rows));
    }

    pub fn statements(&self) -> Vec<String> {
        lock(&self.statements).clone()
    }

    fn record(&self, sql: &str) -> Result<()> {
        lock(&self.statements).push(sql.to_string());
        let failing = lock(&self.failures).iter().any(|p| sql.starts_with(p.as_str()));
        if failing {
            return Err(ImportError::ConnectorInfrastructure(format!("statement failed: {}", sql)));
        }
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl SqlExecutor for RecordingExecutor {
    async fn execute(&self, sql: &str) -> Result<u64> {
        self.record(sql)?;
        Ok(0)
    }

    async fn fetch_rows(&self, sql: &str) -> Result<Vec<TextRow>> {
        self.record(sql)?;
        Ok(lock(&self.canned_rows)
            .iter()
            .find(|(prefix, _)| sql.starts_with(prefix.as_str()))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default())
    }
}
