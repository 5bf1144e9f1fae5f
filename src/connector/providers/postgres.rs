//! PostgreSQL provider through postgres_fdw

use crate::connector::fdw::{FdwContext, FdwProvider};
use crate::connector::fdw_sql::{self, FdwOptions};
use crate::connector::providers::ProviderParams;
use crate::connector::RemoteTable;
use crate::error::Result;
use async_trait::async_trait;

const FDW: &str = "postgres_fdw";
const DEFAULT_PORT: &str = "5432";
const DEFAULT_SCHEMA: &str = "public";
const REQUIRED: [&str; 3] = ["server", "database", "username"];
const ACCEPTED: [&str; 6] = ["server", "port", "database", "username", "password", "sslmode"];

pub struct PostgresProvider {
    params: ProviderParams,
}

impl PostgresProvider {
    pub fn new(params: ProviderParams) -> Self {
        Self { params }
    }

    fn server_options(&self) -> FdwOptions {
        let mut options = vec![
            ("host".to_string(), self.params.connection_value("server").unwrap_or_default()),
            (
                "port".to_string(),
                self.params
                    .connection_value("port")
                    .unwrap_or_else(|| DEFAULT_PORT.to_string()),
            ),
            ("dbname".to_string(), self.params.connection_value("database").unwrap_or_default()),
        ];
        if let Some(sslmode) = self.params.connection_value("sslmode") {
            options.push(("sslmode".to_string(), sslmode));
        }
        options
    }

    fn usermap_options(&self) -> FdwOptions {
        let mut options = vec![(
            "user".to_string(),
            self.params.connection_value("username").unwrap_or_default(),
        )];
        if let Some(password) = self.params.connection_value("password") {
            options.push(("password".to_string(), password));
        }
        options
    }

    fn remote_schema(&self) -> &str {
        self.params.schema.as_deref().unwrap_or(DEFAULT_SCHEMA)
    }
}

#[async_trait]
impl FdwProvider for PostgresProvider {
    fn provider_name(&self) -> &'static str {
        "postgres"
    }

    fn errors(&self, only_connection: bool) -> Vec<String> {
        let mut errors = self.params.common_errors(only_connection, &REQUIRED, Some(&ACCEPTED[..]));
        if !only_connection && self.params.sql_query.is_some() {
            errors.push("Parameter 'sql_query' is not supported by postgres".to_string());
        }
        errors
    }

    async fn create_server(&self, ctx: &FdwContext) -> Result<()> {
        ctx.execute_as_superuser(&fdw_sql::create_server(FDW, &ctx.server_name, &self.server_options()))
            .await?;
        Ok(())
    }

    async fn create_usermap(&self, ctx: &FdwContext, username: &str) -> Result<()> {
        ctx.execute_as_superuser(&fdw_sql::create_usermap(
            &ctx.server_name,
            username,
            &self.usermap_options(),
        ))
        .await?;
        Ok(())
    }

    fn staging_schema(&self, ctx: &FdwContext) -> Option<String> {
        Some(ctx.server_name.clone())
    }

    /// postgres_fdw has no name prefix option, so the table is imported into
    /// the session's own schema, renamed there and then moved
    async fn create_foreign_table(&self, ctx: &FdwContext) -> Result<String> {
        let remote_table = self.params.table.clone().unwrap_or_default();
        let foreign_table = format!("{}{}", ctx.foreign_prefix, remote_table);
        let staging = &ctx.server_name;

        ctx.execute_as_superuser(&fdw_sql::create_schema(staging)).await?;
        ctx.execute_as_superuser(&fdw_sql::import_foreign_schema(
            &ctx.server_name,
            self.remote_schema(),
            staging,
            Some(&[remote_table.as_str()][..]),
            &[],
        ))
        .await?;
        ctx.execute_as_superuser(&fdw_sql::rename_foreign_table(staging, &remote_table, &foreign_table))
            .await?;
        ctx.execute_as_superuser(&fdw_sql::set_foreign_table_schema(
            staging,
            &foreign_table,
            &ctx.foreign_schema,
        ))
        .await?;
        ctx.execute_as_superuser(&fdw_sql::grant_select(&ctx.foreign_schema, &foreign_table, &ctx.username))
            .await?;
        Ok(foreign_table)
    }

    async fn list_tables(&self, ctx: &FdwContext, limit: Option<u64>) -> Result<Vec<RemoteTable>> {
        let listing = format!("{}tables", ctx.foreign_prefix);
        let options: FdwOptions = vec![
            ("schema_name".to_string(), "information_schema".to_string()),
            ("table_name".to_string(), "tables".to_string()),
        ];
        ctx.execute_as_superuser(&fdw_sql::create_foreign_table(
            &ctx.server_name,
            &ctx.foreign_schema,
            &listing,
            &["table_schema text", "table_name text"],
            &options,
        ))
        .await?;

        let limit_clause = limit.map(|n| format!(" LIMIT {}", n)).unwrap_or_default();
        let rows = ctx
            .fetch_as_superuser(&format!(
                "SELECT table_schema, table_name FROM {} \
                 WHERE table_schema NOT IN ('pg_catalog', 'information_schema') \
                 ORDER BY 1, 2{};",
                ctx.qualified_foreign_table_name(&listing),
                limit_clause
            ))
            .await;
        ctx.execute_as_superuser(&fdw_sql::drop_foreign_table(&ctx.foreign_schema, &listing))
            .await?;

        Ok(rows?.into_iter().filter_map(RemoteTable::from_row).collect())
    }
}
