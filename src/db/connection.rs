//! Database connection management using sqlx

use crate::config::DatabaseConfig;
use crate::error::Result;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use std::time::Duration;

pub type DbPool = PgPool;

fn connect_options(config: &DatabaseConfig, user: &str) -> PgConnectOptions {
    PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .username(user)
        .password(&config.password)
        .database(&config.database)
}

/// Initialize a connection pool for the given role
pub async fn init_pool(config: &DatabaseConfig, user: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(4)
        .acquire_timeout(Duration::from_secs(30))
        .connect_with(connect_options(config, user))
        .await?;

    // Test the connection
    sqlx::query("SELECT 1").execute(&pool).await?;

    Ok(pool)
}

/// Connection string in the form GDAL's PostgreSQL driver expects
pub fn ogr_connection_string(config: &DatabaseConfig) -> String {
    format!(
        "PG:host={} port={} user={} dbname={} password={}",
        config.host, config.port, config.user, config.database, config.password
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ogr_connection_string() {
        let config = DatabaseConfig {
            host: "db.local".to_string(),
            port: 5433,
            user: "importer".to_string(),
            password: "secret".to_string(),
            database: "carto_db".to_string(),
            superuser: "postgres".to_string(),
        };
        assert_eq!(
            ogr_connection_string(&config),
            "PG:host=db.local port=5433 user=importer dbname=carto_db password=secret"
        );
    }
}
