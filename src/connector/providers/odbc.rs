//! ODBC-backed providers through odbc_fdw
//!
//! MySQL, SQL Server and Hive differ only in driver name, defaults and how
//! connection parameters map onto ODBC attributes. The generic flavor passes
//! the `connection` attributes through untouched.

use crate::connector::fdw::{FdwContext, FdwProvider};
use crate::connector::fdw_sql::{self, escape_single_quotes, FdwOptions};
use crate::connector::providers::ProviderParams;
use crate::connector::RemoteTable;
use crate::error::Result;
use async_trait::async_trait;

const FDW: &str = "odbc_fdw";
const ATTRIBUTE_PREFIX: &str = "odbc_";
/// Attributes that carry credentials and belong in the user mapping
const CREDENTIAL_ATTRIBUTES: [&str; 2] = ["UID", "PWD"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OdbcFlavor {
    MySql,
    SqlServer,
    Hive,
    Generic,
}

impl OdbcFlavor {
    pub fn provider_name(&self) -> &'static str {
        match self {
            OdbcFlavor::MySql => "mysql",
            OdbcFlavor::SqlServer => "sqlserver",
            OdbcFlavor::Hive => "hive",
            OdbcFlavor::Generic => "odbc",
        }
    }

    fn driver(&self) -> Option<&'static str> {
        match self {
            OdbcFlavor::MySql => Some("MySQL"),
            OdbcFlavor::SqlServer => Some("FreeTDS"),
            OdbcFlavor::Hive => Some("Hortonworks Hive ODBC Driver 64-bit"),
            OdbcFlavor::Generic => None,
        }
    }

    fn default_port(&self) -> Option<&'static str> {
        match self {
            OdbcFlavor::MySql => Some("3306"),
            OdbcFlavor::SqlServer => Some("1433"),
            OdbcFlavor::Hive => Some("10000"),
            OdbcFlavor::Generic => None,
        }
    }

    fn default_schema(&self) -> &'static str {
        match self {
            OdbcFlavor::SqlServer => "dbo",
            OdbcFlavor::Hive => "default",
            OdbcFlavor::MySql | OdbcFlavor::Generic => "",
        }
    }

    fn required(&self) -> &'static [&'static str] {
        match self {
            OdbcFlavor::MySql | OdbcFlavor::SqlServer => &["server", "database", "username"],
            OdbcFlavor::Hive => &["server"],
            OdbcFlavor::Generic => &[],
        }
    }

    /// Connection parameter name -> ODBC attribute name
    fn attributes(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            OdbcFlavor::MySql => &[
                ("server", "SERVER"),
                ("port", "PORT"),
                ("database", "DATABASE"),
                ("username", "UID"),
                ("password", "PWD"),
            ],
            OdbcFlavor::SqlServer => &[
                ("server", "Server"),
                ("port", "Port"),
                ("database", "Database"),
                ("username", "UID"),
                ("password", "PWD"),
            ],
            OdbcFlavor::Hive => &[
                ("server", "HOST"),
                ("port", "PORT"),
                ("database", "Schema"),
                ("username", "UID"),
                ("password", "PWD"),
            ],
            OdbcFlavor::Generic => &[],
        }
    }
}

pub struct OdbcProvider {
    flavor: OdbcFlavor,
    params: ProviderParams,
}

impl OdbcProvider {
    pub fn new(flavor: OdbcFlavor, params: ProviderParams) -> Self {
        Self { flavor, params }
    }

    pub fn flavor(&self) -> OdbcFlavor {
        self.flavor
    }

    /// All ODBC attributes for the connection, driver first
    fn connection_attributes(&self) -> Vec<(String, String)> {
        let mut attributes = Vec::new();
        if let Some(driver) = self.flavor.driver() {
            attributes.push(("DRIVER".to_string(), driver.to_string()));
        }

        if self.flavor == OdbcFlavor::Generic {
            for key in self.params.connection_keys() {
                if let Some(value) = self.params.connection_value(&key) {
                    attributes.push((key, value));
                }
            }
            return attributes;
        }

        for (param, attribute) in self.flavor.attributes() {
            let value = self
                .params
                .connection_value(param)
                .or_else(|| match *param {
                    "port" => self.flavor.default_port().map(str::to_string),
                    _ => None,
                });
            if let Some(value) = value {
                attributes.push((attribute.to_string(), value));
            }
        }
        attributes
    }

    fn split_attributes(&self) -> (FdwOptions, FdwOptions) {
        let (credentials, server): (Vec<_>, Vec<_>) = self
            .connection_attributes()
            .into_iter()
            .map(|(name, value)| (format!("{}{}", ATTRIBUTE_PREFIX, name), value))
            .partition(|(name, _)| {
                let attribute = &name[ATTRIBUTE_PREFIX.len()..];
                CREDENTIAL_ATTRIBUTES.contains(&attribute.to_uppercase().as_str())
            });
        (server, credentials)
    }

    fn remote_schema(&self) -> String {
        self.params
            .schema
            .clone()
            .or_else(|| match self.flavor {
                OdbcFlavor::MySql => self.params.connection_value("database"),
                _ => None,
            })
            .unwrap_or_else(|| self.flavor.default_schema().to_string())
    }
}

#[async_trait]
impl FdwProvider for OdbcProvider {
    fn provider_name(&self) -> &'static str {
        self.flavor.provider_name()
    }

    fn errors(&self, only_connection: bool) -> Vec<String> {
        if self.flavor == OdbcFlavor::Generic {
            let mut errors = self.params.common_errors(only_connection, &[], None);
            let has = |key: &str| {
                self.params
                    .connection_keys()
                    .iter()
                    .any(|k| k.eq_ignore_ascii_case(key) && self.params.connection_value(k).is_some())
            };
            if self.params.connection.is_some() && !has("dsn") && !has("driver") {
                errors.push("Must define either 'dsn' or 'driver' in 'connection'".to_string());
            }
            return errors;
        }

        let accepted: Vec<&str> = self.flavor.attributes().iter().map(|(p, _)| *p).collect();
        self.params
            .common_errors(only_connection, self.flavor.required(), Some(accepted.as_slice()))
    }

    async fn create_server(&self, ctx: &FdwContext) -> Result<()> {
        let (server, _) = self.split_attributes();
        ctx.execute_as_superuser(&fdw_sql::create_server(FDW, &ctx.server_name, &server))
            .await?;
        Ok(())
    }

    async fn create_usermap(&self, ctx: &FdwContext, username: &str) -> Result<()> {
        let (_, credentials) = self.split_attributes();
        ctx.execute_as_superuser(&fdw_sql::create_usermap(&ctx.server_name, username, &credentials))
            .await?;
        Ok(())
    }

    async fn create_foreign_table(&self, ctx: &FdwContext) -> Result<String> {
        let table = self.params.table.clone().unwrap_or_default();
        let remote_schema = self.remote_schema();
        let mut options: FdwOptions = Vec::new();

        let sql = match &self.params.sql_query {
            Some(query) => {
                options.push(("sql_query".to_string(), query.clone()));
                options.push(("table".to_string(), table.clone()));
                options.push(("prefix".to_string(), ctx.foreign_prefix.clone()));
                fdw_sql::import_foreign_schema(&ctx.server_name, &remote_schema, &ctx.foreign_schema, None, &options)
            }
            None => {
                options.push(("prefix".to_string(), ctx.foreign_prefix.clone()));
                fdw_sql::import_foreign_schema(
                    &ctx.server_name,
                    &remote_schema,
                    &ctx.foreign_schema,
                    Some(&[table.as_str()][..]),
                    &options,
                )
            }
        };
        ctx.execute_as_superuser(&sql).await?;

        let foreign_table = format!("{}{}", ctx.foreign_prefix, table);
        ctx.execute_as_superuser(&fdw_sql::grant_select(&ctx.foreign_schema, &foreign_table, &ctx.username))
            .await?;
        Ok(foreign_table)
    }

    async fn list_tables(&self, ctx: &FdwContext, limit: Option<u64>) -> Result<Vec<RemoteTable>> {
        let server = escape_single_quotes(&ctx.server_name);
        let sql = match limit {
            Some(n) => format!("SELECT schema::text, name::text FROM ODBCTablesList('{}', {});", server, n),
            None => format!("SELECT schema::text, name::text FROM ODBCTablesList('{}');", server),
        };
        let rows = ctx.fetch_as_superuser(&sql).await?;
        Ok(rows.into_iter().filter_map(RemoteTable::from_row).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn provider(flavor: OdbcFlavor, value: serde_json::Value) -> OdbcProvider {
        OdbcProvider::new(flavor, ProviderParams::from_value(&value).unwrap())
    }

    #[test]
    fn test_mysql_attributes_split_credentials() {
        let p = provider(
            OdbcFlavor::MySql,
            json!({
                "connection": {"server": "my.example.com", "database": "geo", "username": "u", "password": "p"},
                "table": "points"
            }),
        );
        let (server, credentials) = p.split_attributes();
        assert_eq!(
            server,
            vec![
                ("odbc_DRIVER".to_string(), "MySQL".to_string()),
                ("odbc_SERVER".to_string(), "my.example.com".to_string()),
                ("odbc_PORT".to_string(), "3306".to_string()),
                ("odbc_DATABASE".to_string(), "geo".to_string()),
            ]
        );
        assert_eq!(
            credentials,
            vec![
                ("odbc_UID".to_string(), "u".to_string()),
                ("odbc_PWD".to_string(), "p".to_string()),
            ]
        );
        assert_eq!(p.remote_schema(), "geo");
    }

    #[test]
    fn test_sqlserver_defaults() {
        let p = provider(
            OdbcFlavor::SqlServer,
            json!({"connection": {"server": "s", "database": "d", "username": "u"}, "table": "t"}),
        );
        assert!(p.errors(false).is_empty());
        assert_eq!(p.remote_schema(), "dbo");
        let (server, _) = p.split_attributes();
        assert!(server.contains(&("odbc_Port".to_string(), "1433".to_string())));
    }

    #[test]
    fn test_mysql_missing_parameters() {
        let p = provider(OdbcFlavor::MySql, json!({"connection": {"server": "s", "host": "x"}}));
        let errors = p.errors(false);
        assert!(errors.contains(&"Missing required connection parameter 'database'".to_string()));
        assert!(errors.contains(&"Invalid connection parameter 'host'".to_string()));
        assert!(errors.contains(&"Missing required parameter 'table'".to_string()));

        let connection_only = p.errors(true);
        assert!(!connection_only.iter().any(|e| e.contains("'table'")));
    }

    #[test]
    fn test_generic_requires_dsn_or_driver() {
        let missing = provider(OdbcFlavor::Generic, json!({"connection": {"server": "s"}, "table": "t"}));
        assert_eq!(
            missing.errors(false),
            vec!["Must define either 'dsn' or 'driver' in 'connection'"]
        );

        let dsn = provider(OdbcFlavor::Generic, json!({"connection": {"dsn": "warehouse", "uid": "u"}, "table": "t"}));
        assert!(dsn.errors(false).is_empty());
        let (server, credentials) = dsn.split_attributes();
        assert_eq!(server, vec![("odbc_dsn".to_string(), "warehouse".to_string())]);
        assert_eq!(credentials, vec![("odbc_uid".to_string(), "u".to_string())]);
    }

    #[test]
    fn test_hive_only_needs_server() {
        let p = provider(OdbcFlavor::Hive, json!({"connection": {"server": "hive.local"}, "table": "t"}));
        assert!(p.errors(false).is_empty());
        assert_eq!(p.remote_schema(), "default");
    }
}
