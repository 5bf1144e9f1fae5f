//! Connectors - copy data from queryable remote sources through FDW
//!
//! [`Connector`] checks the user's resolved configuration for the provider
//! before any FDW object is created, and caps copies to the configured rows.

pub mod configuration;
pub mod fdw;
pub mod fdw_sql;
pub mod providers;

pub use configuration::{ConnectorConfiguration, ConnectorConfigurations, ResolvedConfiguration};
pub use fdw::{FdwConnector, FdwConnectorOptions, FdwContext, FdwProvider, FdwSession};
pub use providers::ProviderKind;

use crate::config::ImporterConfig;
use crate::db::executor::{SqlExecutor, TextRow};
use crate::error::{ImportError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    pub max_rows: Option<u64>,
    pub max_listed_tables: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CopyWarnings {
    /// Set when the copy stopped at exactly this many rows
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_rows_per_connection: Option<u64>,
}

impl CopyWarnings {
    pub fn is_empty(&self) -> bool {
        self.max_rows_per_connection.is_none()
    }

    pub fn user_message(&self) -> Option<&'static str> {
        self.max_rows_per_connection.map(|_| "too many rows requested")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTable {
    pub schema: String,
    pub name: String,
}

impl RemoteTable {
    pub fn from_row(row: TextRow) -> Option<Self> {
        let mut columns = row.into_iter();
        let schema = columns.next().flatten().unwrap_or_default();
        let name = columns.next().flatten()?;
        Some(Self { schema, name })
    }
}

/// Who the copy is run for
#[derive(Debug, Clone)]
pub struct ConnectorContext {
    pub user_id: String,
    pub organization_id: Option<String>,
    /// Database role owning the destination table
    pub database_username: String,
}

pub struct Connector {
    kind: ProviderKind,
    fdw: FdwConnector,
    configuration: ResolvedConfiguration,
    max_listed_tables: Option<u64>,
}

impl Connector {
    pub fn new(
        kind: ProviderKind,
        params: &Value,
        context: &ConnectorContext,
        configurations: &ConnectorConfigurations,
        config: &ImporterConfig,
        superuser: Arc<dyn SqlExecutor>,
        user: Arc<dyn SqlExecutor>,
    ) -> Result<Self> {
        let configuration =
            configurations.for_user(kind, &context.user_id, context.organization_id.as_deref());
        if !configuration.enabled {
            return Err(ImportError::ConnectorConfigInvalid(format!(
                "provider {} is not enabled for this user",
                kind
            )));
        }

        let provider = kind.build(params)?;
        let fdw = FdwConnector::new(
            provider,
            superuser,
            user,
            FdwConnectorOptions {
                username: context.database_username.clone(),
                superuser_name: config.database.superuser.clone(),
                foreign_schema: config.ogr2ogr.schema.clone(),
                statement_timeout: config.connectors.statement_timeout(),
            },
        );
        Ok(Self {
            kind,
            fdw,
            configuration,
            max_listed_tables: config.connectors.max_listed_tables,
        })
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    pub fn configuration(&self) -> &ResolvedConfiguration {
        &self.configuration
    }

    /// Parameter problems; connection parameters only when `only_connection`
    pub fn errors(&self, only_connection: bool) -> Vec<String> {
        self.fdw.provider().errors(only_connection)
    }

    /// Requested limits, capped by the configured row limit; a zero row
    /// limit counts as none requested
    pub fn effective_limits(&self, requested: &Limits) -> Limits {
        let requested_rows = requested.max_rows.filter(|n| *n > 0);
        let max_rows = match (requested_rows, self.configuration.max_rows.filter(|n| *n > 0)) {
            (Some(requested), Some(configured)) => Some(requested.min(configured)),
            (requested, configured) => requested.or(configured),
        };
        Limits {
            max_rows,
            max_listed_tables: requested.max_listed_tables.or(self.max_listed_tables),
        }
    }

    pub async fn copy_table(&self, schema: &str, table: &str, limits: &Limits) -> Result<CopyWarnings> {
        let limits = self.effective_limits(limits);
        info!("Copying {} table into {}.{} with {:?}", self.kind, schema, table, limits);
        self.fdw.copy_table(schema, table, &limits).await
    }

    pub async fn list_tables(&self, limits: &Limits) -> Result<Vec<RemoteTable>> {
        self.fdw.list_tables(&self.effective_limits(limits)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderDefaults;
    use crate::db::executor::RecordingExecutor;
    use serde_json::json;

    fn importer_config() -> ImporterConfig {
        let mut config = ImporterConfig::default();
        config.connectors.providers.insert(
            "mysql".to_string(),
            ProviderDefaults {
                enabled: true,
                max_rows: Some(100),
            },
        );
        config
    }

    fn context() -> ConnectorContext {
        ConnectorContext {
            user_id: "alice".to_string(),
            organization_id: None,
            database_username: "cartodb_user_alice".to_string(),
        }
    }

    fn connector(kind: ProviderKind, executor: &Arc<RecordingExecutor>) -> Result<Connector> {
        let config = importer_config();
        let configurations = ConnectorConfigurations::new(config.connectors.clone());
        Connector::new(
            kind,
            &json!({
                "connection": {"server": "my.example.com", "database": "geo", "username": "u", "password": "p"},
                "table": "points"
            }),
            &context(),
            &configurations,
            &config,
            executor.clone(),
            executor.clone(),
        )
    }

    #[test]
    fn test_remote_table_from_row() {
        let table = RemoteTable::from_row(vec![Some("public".to_string()), Some("roads".to_string())]);
        assert_eq!(
            table,
            Some(RemoteTable {
                schema: "public".to_string(),
                name: "roads".to_string()
            })
        );
        assert_eq!(RemoteTable::from_row(vec![Some("public".to_string()), None]), None);
    }

    #[test]
    fn test_copy_warning_message() {
        let warnings = CopyWarnings {
            max_rows_per_connection: Some(10),
        };
        assert_eq!(warnings.user_message(), Some("too many rows requested"));
        assert_eq!(CopyWarnings::default().user_message(), None);
    }

    #[test]
    fn test_disabled_provider_is_rejected() {
        let executor = Arc::new(RecordingExecutor::new());
        let err = connector(ProviderKind::SqlServer, &executor).err().unwrap();
        assert!(matches!(err, ImportError::ConnectorConfigInvalid(_)));
        assert!(executor.statements().is_empty());
    }

    #[test]
    fn test_effective_limits() {
        let executor = Arc::new(RecordingExecutor::new());
        let connector = connector(ProviderKind::MySql, &executor).unwrap();

        assert_eq!(connector.effective_limits(&Limits::default()).max_rows, Some(100));
        let fewer = Limits {
            max_rows: Some(10),
            max_listed_tables: None,
        };
        assert_eq!(connector.effective_limits(&fewer).max_rows, Some(10));
        let more = Limits {
            max_rows: Some(1000),
            max_listed_tables: Some(3),
        };
        assert_eq!(
            connector.effective_limits(&more),
            Limits {
                max_rows: Some(100),
                max_listed_tables: Some(3)
            }
        );
    }

    #[tokio::test]
    async fn test_zero_row_limit_keeps_configured_cap() {
        let executor = Arc::new(RecordingExecutor::new());
        executor.respond_with("SELECT count(*)", vec![vec![Some("100".to_string())]]);
        let connector = connector(ProviderKind::MySql, &executor).unwrap();
        let zero = Limits {
            max_rows: Some(0),
            max_listed_tables: None,
        };
        assert_eq!(connector.effective_limits(&zero).max_rows, Some(100));

        let warnings = connector.copy_table("alice", "points", &zero).await.unwrap();
        assert_eq!(warnings.max_rows_per_connection, Some(100));
        assert!(executor
            .statements()
            .iter()
            .any(|s| s.starts_with("CREATE TABLE \"alice\".\"points\"") && s.ends_with(" LIMIT 100;")));
    }

    #[tokio::test]
    async fn test_copy_uses_mysql_odbc_server() {
        let executor = Arc::new(RecordingExecutor::new());
        executor.respond_with("SELECT count(*)", vec![vec![Some("100".to_string())]]);
        let connector = connector(ProviderKind::MySql, &executor).unwrap();

        let warnings = connector
            .copy_table("alice", "points", &Limits::default())
            .await
            .unwrap();
        assert_eq!(warnings.max_rows_per_connection, Some(100));

        let statements = executor.statements();
        assert!(statements[0].starts_with("CREATE SERVER \"mysql_"));
        assert!(statements[0].contains("FOREIGN DATA WRAPPER odbc_fdw"));
        assert!(statements
            .iter()
            .any(|s| s.starts_with("CREATE USER MAPPING FOR \"cartodb_user_alice\"")));
        assert!(statements
            .iter()
            .any(|s| s.starts_with("IMPORT FOREIGN SCHEMA \"geo\" LIMIT TO (\"points\")")));
        assert!(statements.iter().any(|s| s.starts_with("CREATE TABLE \"alice\".\"points\"")));
        assert!(statements.last().unwrap().starts_with("DROP SERVER IF EXISTS \"mysql_"));
    }

    #[tokio::test]
    async fn test_invalid_params_create_nothing() {
        let executor = Arc::new(RecordingExecutor::new());
        let config = importer_config();
        let configurations = ConnectorConfigurations::new(config.connectors.clone());
        let connector = Connector::new(
            ProviderKind::MySql,
            &json!({"connection": {"server": "s"}}),
            &context(),
            &configurations,
            &config,
            executor.clone(),
            executor.clone(),
        )
        .unwrap();

        let err = connector.copy_table("alice", "t", &Limits::default()).await.err().unwrap();
        assert!(matches!(err, ImportError::ConnectorConfigInvalid(_)));
        assert!(executor.statements().is_empty());
    }
}
