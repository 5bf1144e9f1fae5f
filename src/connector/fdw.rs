//! FDW connector lifecycle
//!
//! Every copy or listing runs inside an [`FdwSession`]: a transient server,
//! its user mappings, at most one foreign table and an optional staging
//! schema. The session is torn down on every exit path (foreign table, staging
//! schema, user mappings, server), and a teardown failure is logged without
//! replacing the original error.

use crate::connector::fdw_sql;
use crate::connector::{CopyWarnings, Limits, RemoteTable};
use crate::db::executor::{SqlExecutor, TextRow};
use crate::error::{ImportError, Result};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Maximum identifier length in PostgreSQL
pub const MAX_PG_IDENTIFIER_LEN: usize = 63;
/// Characters always left available for the table part of foreign table names
pub const MIN_TAB_ID_LEN: usize = 10;
const UNIQUE_SUFFIX_LEN: usize = 32;

/// Provider-specific FDW operations
///
/// Implementations supply the wrapper name and options; the connector owns
/// sequencing and teardown.
#[async_trait]
pub trait FdwProvider: Send + Sync {
    /// Name used to derive server names, e.g. `mysql`
    fn provider_name(&self) -> &'static str;

    /// Every parameter problem at once; empty when valid
    fn errors(&self, only_connection: bool) -> Vec<String>;

    async fn create_server(&self, ctx: &FdwContext) -> Result<()>;

    async fn create_usermap(&self, ctx: &FdwContext, username: &str) -> Result<()>;

    /// Private schema the provider creates while building the foreign table,
    /// dropped on teardown
    fn staging_schema(&self, _ctx: &FdwContext) -> Option<String> {
        None
    }

    /// Create the foreign table to copy from, returning its name in `ctx.foreign_schema`
    async fn create_foreign_table(&self, ctx: &FdwContext) -> Result<String>;

    async fn list_tables(&self, ctx: &FdwContext, limit: Option<u64>) -> Result<Vec<RemoteTable>>;
}

/// Names and executors shared by all statements of one session
pub struct FdwContext {
    pub server_name: String,
    pub foreign_schema: String,
    pub foreign_prefix: String,
    /// Database role of the user the data is copied for
    pub username: String,
    pub superuser_name: String,
    superuser: Arc<dyn SqlExecutor>,
    user: Arc<dyn SqlExecutor>,
    statement_timeout: Duration,
}

impl FdwContext {
    pub async fn execute_as_superuser(&self, sql: &str) -> Result<u64> {
        debug!("FDW (superuser): {}", sql);
        bounded(self.statement_timeout, sql, self.superuser.execute(sql)).await
    }

    pub async fn execute(&self, sql: &str) -> Result<u64> {
        debug!("FDW: {}", sql);
        bounded(self.statement_timeout, sql, self.user.execute(sql)).await
    }

    pub async fn fetch_as_superuser(&self, sql: &str) -> Result<Vec<TextRow>> {
        debug!("FDW (superuser): {}", sql);
        bounded(self.statement_timeout, sql, self.superuser.fetch_rows(sql)).await
    }

    pub async fn fetch(&self, sql: &str) -> Result<Vec<TextRow>> {
        debug!("FDW: {}", sql);
        bounded(self.statement_timeout, sql, self.user.fetch_rows(sql)).await
    }

    pub fn qualified_foreign_table_name(&self, table: &str) -> String {
        fdw_sql::qualified_table_name(Some(&self.foreign_schema), table)
    }

    /// Roles that need a user mapping, in creation order
    pub fn usermap_users(&self) -> Vec<String> {
        let mut users = vec![self.username.clone()];
        if self.superuser_name != self.username {
            users.push(self.superuser_name.clone());
        }
        users
    }
}

async fn bounded<T, F>(timeout: Duration, sql: &str, statement: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, statement).await {
        Ok(result) => result,
        Err(_) => Err(ImportError::Cancelled(format!(
            "statement exceeded {}s: {}",
            timeout.as_secs(),
            sql
        ))),
    }
}

/// Lowercase, `[a-z0-9_]` only, never starting with a digit
pub fn sanitize_identifier(name: &str) -> String {
    let mut sanitized: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    if sanitized.is_empty() || sanitized.starts_with(|c: char| c.is_ascii_digit()) {
        sanitized.insert(0, '_');
    }
    sanitized
}

/// `<provider>_<suffix>`, short enough to leave [`MIN_TAB_ID_LEN`] characters
/// for foreign table names built from it
pub fn server_name(provider_name: &str, unique_suffix: &str) -> String {
    let max_len = MAX_PG_IDENTIFIER_LEN - unique_suffix.len() - MIN_TAB_ID_LEN - 1;
    let provider: String = sanitize_identifier(provider_name).chars().take(max_len).collect();
    format!("{}_{}", provider, unique_suffix)
}

fn unique_suffix() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    debug_assert_eq!(suffix.len(), UNIQUE_SUFFIX_LEN);
    suffix
}

/// Owned description of everything a session may have created
struct Teardown {
    superuser: Arc<dyn SqlExecutor>,
    server_name: String,
    usermaps: Vec<String>,
    foreign_table: Option<(String, String)>,
    staging_schema: Option<String>,
    statement_timeout: Duration,
}

impl Teardown {
    async fn run(self) {
        info!("Connector cleanup for {}", self.server_name);
        let mut statements = Vec::new();
        if let Some((schema, table)) = &self.foreign_table {
            statements.push(fdw_sql::drop_foreign_table(schema, table));
        }
        if let Some(schema) = &self.staging_schema {
            statements.push(fdw_sql::drop_schema(schema));
        }
        for user in self.usermaps.iter().rev() {
            statements.push(fdw_sql::drop_usermap(&self.server_name, user));
        }
        statements.push(fdw_sql::drop_server(&self.server_name));

        for sql in statements {
            if let Err(e) = bounded(self.statement_timeout, &sql, self.superuser.execute(&sql)).await {
                error!("Connector cleanup step failed ({}): {}", sql, e);
            }
        }
        debug!("Connector cleaned up {}", self.server_name);
    }
}

/// Scoped FDW objects of one copy or listing
///
/// Every object is named after the session's server, so concurrent sessions
/// never share one.
///
/// Call [`FdwSession::release`] on every path; if the session is dropped
/// without it (e.g. the enclosing future was cancelled) the teardown is
/// spawned on the current tokio runtime.
pub struct FdwSession {
    ctx: FdwContext,
    foreign_table: Option<String>,
    staging_schema: Option<String>,
    released: bool,
}

impl FdwSession {
    pub fn context(&self) -> &FdwContext {
        &self.ctx
    }

    pub fn foreign_table(&self) -> Option<&str> {
        self.foreign_table.as_deref()
    }

    /// Create the server and the user mappings for the copying user and the superuser
    pub async fn open(&mut self, provider: &dyn FdwProvider) -> Result<()> {
        info!("Creating FDW server {}", self.ctx.server_name);
        provider.create_server(&self.ctx).await?;
        for user in self.ctx.usermap_users() {
            info!("Creating user mapping for {}", user);
            provider.create_usermap(&self.ctx, &user).await?;
        }
        Ok(())
    }

    pub async fn create_foreign_table(&mut self, provider: &dyn FdwProvider) -> Result<String> {
        info!("Creating foreign table on {}", self.ctx.server_name);
        self.staging_schema = provider.staging_schema(&self.ctx);
        let name = provider.create_foreign_table(&self.ctx).await?;
        self.foreign_table = Some(name.clone());
        Ok(name)
    }

    pub async fn release(mut self) {
        if let Some(teardown) = self.teardown() {
            teardown.run().await;
        }
    }

    fn teardown(&mut self) -> Option<Teardown> {
        if self.released {
            return None;
        }
        self.released = true;
        Some(Teardown {
            superuser: Arc::clone(&self.ctx.superuser),
            server_name: self.ctx.server_name.clone(),
            usermaps: self.ctx.usermap_users(),
            foreign_table: self
                .foreign_table
                .take()
                .map(|t| (self.ctx.foreign_schema.clone(), t)),
            staging_schema: self.staging_schema.take(),
            statement_timeout: self.ctx.statement_timeout,
        })
    }
}

impl Drop for FdwSession {
    fn drop(&mut self) {
        let Some(teardown) = self.teardown() else { return };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!("FDW session {} dropped before release", teardown.server_name);
                handle.spawn(teardown.run());
            }
            Err(_) => error!(
                "FDW session {} dropped outside a runtime; server left behind",
                teardown.server_name
            ),
        }
    }
}

/// Runs copy and listing operations for one provider
pub struct FdwConnector {
    provider: Box<dyn FdwProvider>,
    superuser: Arc<dyn SqlExecutor>,
    user: Arc<dyn SqlExecutor>,
    username: String,
    superuser_name: String,
    foreign_schema: String,
    statement_timeout: Duration,
}

pub struct FdwConnectorOptions {
    pub username: String,
    pub superuser_name: String,
    pub foreign_schema: String,
    pub statement_timeout: Duration,
}

impl FdwConnector {
    pub fn new(
        provider: Box<dyn FdwProvider>,
        superuser: Arc<dyn SqlExecutor>,
        user: Arc<dyn SqlExecutor>,
        options: FdwConnectorOptions,
    ) -> Self {
        Self {
            provider,
            superuser,
            user,
            username: options.username,
            superuser_name: options.superuser_name,
            foreign_schema: options.foreign_schema,
            statement_timeout: options.statement_timeout,
        }
    }

    pub fn provider(&self) -> &dyn FdwProvider {
        self.provider.as_ref()
    }

    pub fn validate(&self, only_connection: bool) -> Result<()> {
        let errors = self.provider.errors(only_connection);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ImportError::ConnectorConfigInvalid(errors.join("; ")))
        }
    }

    /// New session with a fresh server name; nothing is created yet
    pub fn session(&self) -> FdwSession {
        let server_name = server_name(self.provider.provider_name(), &unique_suffix());
        FdwSession {
            ctx: FdwContext {
                foreign_prefix: format!("{}_", server_name),
                server_name,
                foreign_schema: self.foreign_schema.clone(),
                username: self.username.clone(),
                superuser_name: self.superuser_name.clone(),
                superuser: Arc::clone(&self.superuser),
                user: Arc::clone(&self.user),
                statement_timeout: self.statement_timeout,
            },
            foreign_table: None,
            staging_schema: None,
            released: false,
        }
    }

    /// Copy the remote table into `schema.table`, returning row-cap warnings
    pub async fn copy_table(&self, schema: &str, table: &str, limits: &Limits) -> Result<CopyWarnings> {
        info!("Connector copy table {}.{}", schema, table);
        self.validate(false)?;

        let mut session = self.session();
        let result = self.copy_in_session(&mut session, schema, table, limits).await;
        if let Err(e) = &result {
            error!("Connector error: {}", e);
        }
        session.release().await;
        result
    }

    pub async fn list_tables(&self, limits: &Limits) -> Result<Vec<RemoteTable>> {
        self.validate(true)?;

        let mut session = self.session();
        let result = match session.open(self.provider.as_ref()).await {
            Ok(()) => {
                self.provider
                    .list_tables(session.context(), limits.max_listed_tables)
                    .await
            }
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            error!("Connector error: {}", e);
        }
        session.release().await;
        result
    }

    async fn copy_in_session(
        &self,
        session: &mut FdwSession,
        schema: &str,
        table: &str,
        limits: &Limits,
    ) -> Result<CopyWarnings> {
        session.open(self.provider.as_ref()).await?;
        let foreign_table = session.create_foreign_table(self.provider.as_ref()).await?;

        let ctx = session.context();
        let local_table = fdw_sql::qualified_table_name(Some(schema), table);
        info!("Copying foreign table {} into {}", foreign_table, local_table);
        ctx.execute(&fdw_sql::copy_foreign_table(
            &local_table,
            &ctx.qualified_foreign_table_name(&foreign_table),
            limits.max_rows,
        ))
        .await?;

        self.check_copied_table_size(ctx, &local_table, limits.max_rows).await
    }

    /// Copying exactly `max_rows` rows may mean the remote table had more
    async fn check_copied_table_size(
        &self,
        ctx: &FdwContext,
        local_table: &str,
        max_rows: Option<u64>,
    ) -> Result<CopyWarnings> {
        let mut warnings = CopyWarnings::default();
        let Some(max_rows) = max_rows.filter(|n| *n > 0) else {
            return Ok(warnings);
        };

        let rows = ctx.fetch(&fdw_sql::count_rows(local_table)).await?;
        let count = rows
            .first()
            .and_then(|row| row.first().cloned().flatten())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .ok_or_else(|| {
                ImportError::ConnectorInfrastructure(format!("could not count rows of {}", local_table))
            })?;

        if count == max_rows {
            warn!("Maximum rows per connection ({}) reached for {}", max_rows, local_table);
            warnings.max_rows_per_connection = Some(max_rows);
        }
        Ok(warnings)
    }
}
