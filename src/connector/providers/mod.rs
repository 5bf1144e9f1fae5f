//! Connector providers
//!
//! The set of providers is closed: [`ProviderKind`] is resolved once from the
//! request and `build` maps every kind to its implementation.

pub mod odbc;
pub mod postgres;

pub use odbc::{OdbcFlavor, OdbcProvider};
pub use postgres::PostgresProvider;

use crate::connector::fdw::FdwProvider;
use crate::error::{ImportError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Postgres,
    MySql,
    SqlServer,
    Hive,
    Odbc,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 5] = [
        ProviderKind::Postgres,
        ProviderKind::MySql,
        ProviderKind::SqlServer,
        ProviderKind::Hive,
        ProviderKind::Odbc,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ProviderKind::Postgres => "postgres",
            ProviderKind::MySql => "mysql",
            ProviderKind::SqlServer => "sqlserver",
            ProviderKind::Hive => "hive",
            ProviderKind::Odbc => "odbc",
        }
    }

    pub fn build(self, params: &Value) -> Result<Box<dyn FdwProvider>> {
        let params = ProviderParams::from_value(params)?;
        Ok(match self {
            ProviderKind::Postgres => Box::new(PostgresProvider::new(params)),
            ProviderKind::MySql => Box::new(OdbcProvider::new(OdbcFlavor::MySql, params)),
            ProviderKind::SqlServer => Box::new(OdbcProvider::new(OdbcFlavor::SqlServer, params)),
            ProviderKind::Hive => Box::new(OdbcProvider::new(OdbcFlavor::Hive, params)),
            ProviderKind::Odbc => Box::new(OdbcProvider::new(OdbcFlavor::Generic, params)),
        })
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ProviderKind {
    type Err = ImportError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_lowercase();
        ProviderKind::ALL
            .into_iter()
            .find(|kind| kind.name() == wanted)
            .ok_or_else(|| ImportError::ConnectorConfigInvalid(format!("Invalid provider '{}'", s)))
    }
}

const KNOWN_PARAMETERS: [&str; 5] = ["provider", "connection", "table", "schema", "sql_query"];

/// Connector request parameters, kept loose so validation can report every problem
#[derive(Debug, Clone, Default)]
pub struct ProviderParams {
    pub connection: Option<Map<String, Value>>,
    pub table: Option<String>,
    pub schema: Option<String>,
    pub sql_query: Option<String>,
    pub unknown: Vec<String>,
}

impl ProviderParams {
    pub fn from_value(value: &Value) -> Result<Self> {
        let object = value.as_object().ok_or_else(|| {
            ImportError::ConnectorConfigInvalid("connector parameters must be an object".to_string())
        })?;

        let text = |key: &str| object.get(key).and_then(value_text).filter(|v| !v.is_empty());
        Ok(Self {
            connection: object.get("connection").and_then(Value::as_object).cloned(),
            table: text("table"),
            schema: text("schema"),
            sql_query: text("sql_query"),
            unknown: object
                .keys()
                .filter(|k| !KNOWN_PARAMETERS.contains(&k.as_str()))
                .cloned()
                .collect(),
        })
    }

    pub fn connection_value(&self, key: &str) -> Option<String> {
        self.connection
            .as_ref()
            .and_then(|c| c.get(key))
            .and_then(value_text)
            .filter(|v| !v.is_empty())
    }

    pub fn connection_keys(&self) -> Vec<String> {
        self.connection
            .as_ref()
            .map(|c| c.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Checks shared by all providers
    pub fn common_errors(
        &self,
        only_connection: bool,
        required: &[&str],
        accepted: Option<&[&str]>,
    ) -> Vec<String> {
        let mut errors = Vec::new();
        if self.connection.is_none() {
            errors.push("Missing 'connection' parameters".to_string());
        } else {
            for key in required {
                if self.connection_value(key).is_none() {
                    errors.push(format!("Missing required connection parameter '{}'", key));
                }
            }
            if let Some(accepted) = accepted {
                for key in self.connection_keys() {
                    if !accepted.contains(&key.as_str()) {
                        errors.push(format!("Invalid connection parameter '{}'", key));
                    }
                }
            }
        }
        if !only_connection {
            if self.table.is_none() {
                errors.push("Missing required parameter 'table'".to_string());
            }
            for key in &self.unknown {
                errors.push(format!("Invalid parameter '{}'", key));
            }
        }
        errors
    }
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_provider_names_round_trip() {
        for kind in ProviderKind::ALL {
            assert_eq!(kind.name().parse::<ProviderKind>().unwrap(), kind);
        }
        assert_eq!(" MySQL ".parse::<ProviderKind>().unwrap(), ProviderKind::MySql);
    }

    #[test]
    fn test_unknown_provider() {
        let err = "oracle".parse::<ProviderKind>().err().unwrap();
        assert!(matches!(err, ImportError::ConnectorConfigInvalid(_)));
    }

    #[test]
    fn test_build_every_kind() {
        let params = json!({"connection": {"server": "h"}, "table": "t"});
        for kind in ProviderKind::ALL {
            assert_eq!(kind.build(&params).unwrap().provider_name(), kind.name());
        }
    }

    #[test]
    fn test_params_must_be_object() {
        assert!(ProviderKind::MySql.build(&json!("nope")).is_err());
    }

    #[test]
    fn test_params_parsing() {
        let params = ProviderParams::from_value(&json!({
            "provider": "mysql",
            "connection": {"server": "h", "port": 3306},
            "table": "t",
            "bogus": 1
        }))
        .unwrap();
        assert_eq!(params.connection_value("port").as_deref(), Some("3306"));
        assert_eq!(params.table.as_deref(), Some("t"));
        assert_eq!(params.unknown, vec!["bogus"]);
    }

    #[test]
    fn test_common_errors_collects_everything() {
        let params = ProviderParams::from_value(&json!({"bogus": 1})).unwrap();
        let errors = params.common_errors(false, &["server"], None);
        assert_eq!(errors.len(), 3);

        let connection_only = params.common_errors(true, &["server"], None);
        assert_eq!(connection_only, vec!["Missing 'connection' parameters"]);
    }
}
