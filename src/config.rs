//! Importer configuration
//!
//! Defaults, optionally overlaid by a JSON file and then by `GEO_IMPORTER_*`
//! environment variables.

use crate::error::{ImportError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ImporterConfig {
    pub http: HttpConfig,
    pub unp: UnpConfig,
    pub ogr2ogr: Ogr2ogrConfig,
    pub database: DatabaseConfig,
    pub connectors: ConnectorsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub max_redirects: usize,
    pub verify_ssl_cert: bool,
    /// Hard ceiling for a single download, independent of storage quota.
    pub max_download_size: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 60,
            request_timeout_secs: 600,
            max_redirects: 5,
            verify_ssl_cert: false,
            max_download_size: 5_242_880,
        }
    }
}

impl HttpConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UnpConfig {
    pub binary: String,
    pub temporary_directory: PathBuf,
    pub timeout_secs: u64,
}

impl Default for UnpConfig {
    fn default() -> Self {
        Self {
            binary: "unp".to_string(),
            temporary_directory: PathBuf::from("/tmp/imports"),
            timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Ogr2ogrConfig {
    pub binary: String,
    /// Alternative binary used for CSV and GeoJSON sources.
    pub csv_binary: Option<String>,
    pub schema: String,
    pub csv_guessing: bool,
    pub quoted_fields_guessing: bool,
    pub timeout_secs: u64,
}

impl Default for Ogr2ogrConfig {
    fn default() -> Self {
        Self {
            binary: "ogr2ogr".to_string(),
            csv_binary: None,
            schema: "cdb_importer".to_string(),
            csv_guessing: false,
            quoted_fields_guessing: true,
            timeout_secs: 1800,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    /// Role used for FDW server and user-mapping DDL.
    pub superuser: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: String::new(),
            database: "cartodb".to_string(),
            superuser: "postgres".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderDefaults {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub max_rows: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorsConfig {
    pub providers: HashMap<String, ProviderDefaults>,
    pub max_listed_tables: Option<u64>,
    /// Upper bound for any single FDW statement
    pub statement_timeout_secs: u64,
}

impl Default for ConnectorsConfig {
    fn default() -> Self {
        Self {
            providers: HashMap::new(),
            max_listed_tables: Some(500),
            statement_timeout_secs: 600,
        }
    }
}

impl ConnectorsConfig {
    pub fn defaults_for(&self, provider: &str) -> ProviderDefaults {
        self.providers.get(provider).cloned().unwrap_or_default()
    }

    pub fn statement_timeout(&self) -> Duration {
        Duration::from_secs(self.statement_timeout_secs)
    }
}

impl ImporterConfig {
    /// Load configuration from an optional JSON file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)?;
                serde_json::from_str(&content)?
            }
            None => ImporterConfig::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("GEO_IMPORTER_HTTP_TIMEOUT") {
            self.http.request_timeout_secs = parse_env("GEO_IMPORTER_HTTP_TIMEOUT", &v)?;
        }
        if let Some(v) = lookup("GEO_IMPORTER_VERIFY_SSL") {
            self.http.verify_ssl_cert = parse_env("GEO_IMPORTER_VERIFY_SSL", &v)?;
        }
        if let Some(v) = lookup("GEO_IMPORTER_MAX_DOWNLOAD_SIZE") {
            self.http.max_download_size = parse_env("GEO_IMPORTER_MAX_DOWNLOAD_SIZE", &v)?;
        }
        if let Some(v) = lookup("GEO_IMPORTER_TMP_DIR") {
            self.unp.temporary_directory = PathBuf::from(v);
        }
        if let Some(v) = lookup("GEO_IMPORTER_UNP_BINARY") {
            self.unp.binary = v;
        }
        if let Some(v) = lookup("GEO_IMPORTER_OGR2OGR_BINARY") {
            self.ogr2ogr.binary = v;
        }
        if let Some(v) = lookup("GEO_IMPORTER_DB_HOST") {
            self.database.host = v;
        }
        if let Some(v) = lookup("GEO_IMPORTER_DB_PORT") {
            self.database.port = parse_env("GEO_IMPORTER_DB_PORT", &v)?;
        }
        if let Some(v) = lookup("GEO_IMPORTER_DB_USER") {
            self.database.user = v;
        }
        if let Some(v) = lookup("GEO_IMPORTER_DB_PASSWORD") {
            self.database.password = v;
        }
        if let Some(v) = lookup("GEO_IMPORTER_DB_NAME") {
            self.database.database = v;
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ImportError::Config(format!("invalid value for {}: {}", key, value)))
}
