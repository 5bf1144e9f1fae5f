//! Bulk Loader - composes and runs the ogr2ogr invocation that loads a
//! source file into the import schema

use crate::config::{DatabaseConfig, Ogr2ogrConfig};
use crate::error::{ImportError, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_ENCODING: &str = "UTF-8";
const OUTPUT_FORMAT: [&str; 2] = ["-f", "PostgreSQL"];
const NEW_LAYER_TYPE: [&str; 2] = ["-nlt", "PROMOTE_TO_MULTI"];
const LAYER_CREATION: [&str; 4] = ["-lco", "DIM=2", "-lco", "PRECISION=NO"];
const PROJECTION: [&str; 2] = ["-t_srs", "EPSG:4326"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// Create a new relation
    Import,
    /// Load into an existing relation
    Append,
}

pub struct BulkLoader {
    table_name: String,
    filepath: PathBuf,
    layer: Option<String>,
    database: DatabaseConfig,
    config: Ogr2ogrConfig,
    cancel: CancellationToken,
    pub overwrite: bool,
    pub encoding: String,
    pub shape_encoding: String,
    pub csv_guessing: bool,
    pub quoted_fields_guessing: bool,
    exit_code: Option<i32>,
    command_output: String,
}

impl BulkLoader {
    pub fn new(
        table_name: impl Into<String>,
        filepath: impl Into<PathBuf>,
        database: &DatabaseConfig,
        config: &Ogr2ogrConfig,
        layer: Option<String>,
    ) -> Self {
        Self {
            table_name: table_name.into(),
            filepath: filepath.into(),
            layer,
            database: database.clone(),
            config: config.clone(),
            cancel: CancellationToken::new(),
            overwrite: false,
            encoding: DEFAULT_ENCODING.to_string(),
            shape_encoding: String::new(),
            csv_guessing: config.csv_guessing,
            quoted_fields_guessing: config.quoted_fields_guessing,
            exit_code: None,
            command_output: String::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn filepath(&self) -> &Path {
        &self.filepath
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn command_output(&self) -> &str {
        &self.command_output
    }

    /// Binary used for this file; CSV and GeoJSON may go to a dedicated one
    pub fn executable(&self) -> &str {
        match &self.config.csv_binary {
            Some(binary) if self.is_csv() || self.is_geojson() => binary,
            _ => &self.config.binary,
        }
    }

    /// Environment switches passed to the loader process
    pub fn environment(&self, mode: LoadMode) -> Vec<(String, String)> {
        let mut env = vec![
            ("OSM_USE_CUSTOM_INDEXING".to_string(), "NO".to_string()),
            ("PG_USE_COPY".to_string(), "YES".to_string()),
            ("PGCLIENTENCODING".to_string(), self.encoding.clone()),
        ];
        if mode == LoadMode::Import && !self.shape_encoding.is_empty() {
            env.push(("SHAPE_ENCODING".to_string(), self.shape_encoding.clone()));
        }
        env
    }

    /// Loader arguments, without the executable
    pub fn arguments(&self, mode: LoadMode) -> Vec<String> {
        let mut args: Vec<String> = Vec::new();
        match mode {
            LoadMode::Import => {
                args.extend(OUTPUT_FORMAT.iter().map(|s| s.to_string()));
                if self.overwrite {
                    args.push("-overwrite".to_string());
                }
                args.extend(self.guessing_options());
                args.push(self.postgres_options());
                args.extend(self.projection_options());
                args.extend(LAYER_CREATION.iter().map(|s| s.to_string()));
            }
            LoadMode::Append => {
                args.push("-append".to_string());
                args.extend(OUTPUT_FORMAT.iter().map(|s| s.to_string()));
                args.push(self.postgres_options());
                args.extend(self.projection_options());
            }
        }
        args.push(self.filepath.display().to_string());
        if let Some(layer) = &self.layer {
            args.push(layer.clone());
        }
        args.push("-nln".to_string());
        args.push(format!("{}.{}", self.config.schema, self.table_name));
        args.extend(NEW_LAYER_TYPE.iter().map(|s| s.to_string()));
        args
    }

    /// Shell-readable command line for `mode`
    pub fn build_command(&self, mode: LoadMode) -> String {
        let env = self
            .environment(mode)
            .into_iter()
            .map(|(k, v)| format!("{}={}", k, v));
        let args = self.arguments(mode).into_iter().map(|arg| {
            match arg.strip_prefix("PG:") {
                Some(conninfo) => format!("PG:\"{}\"", conninfo),
                None => arg,
            }
        });
        env.chain(std::iter::once(self.executable().to_string()))
            .chain(args)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Run the loader; success is judged by the caller from `exit_code`
    pub async fn run(&mut self, append_mode: bool) -> Result<&mut Self> {
        let mode = if append_mode { LoadMode::Append } else { LoadMode::Import };
        info!("Running loader: {}", self.redacted_command(mode));

        let mut command = Command::new(self.executable());
        command
            .args(self.arguments(mode))
            .envs(self.environment(mode))
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let timeout = Duration::from_secs(self.config.timeout_secs);
        let output = tokio::select! {
            _ = self.cancel.cancelled() => {
                return Err(ImportError::Cancelled(format!("load of {}", self.filepath.display())));
            }
            result = tokio::time::timeout(timeout, command.output()) => match result {
                Err(_) => return Err(ImportError::Cancelled(format!(
                    "load of {} exceeded {}s", self.filepath.display(), timeout.as_secs()
                ))),
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(ImportError::ToolNotInstalled { tool: self.executable().to_string() });
                }
                Ok(Err(e)) => return Err(ImportError::Io(e)),
                Ok(Ok(output)) => output,
            },
        };

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        self.command_output = text;
        self.exit_code = Some(output.status.code().unwrap_or(-1));

        match self.exit_code {
            Some(0) => debug!("Loader finished for {}", self.table_name),
            code => warn!(
                "Loader exited with {:?} for {}: {}",
                code,
                self.table_name,
                self.command_output.trim()
            ),
        }
        Ok(self)
    }

    fn redacted_command(&self, mode: LoadMode) -> String {
        let command = self.build_command(mode);
        if self.database.password.is_empty() {
            return command;
        }
        command.replace(
            &format!("password={}", self.database.password),
            "password=[REDACTED]",
        )
    }

    fn postgres_options(&self) -> String {
        crate::db::connection::ogr_connection_string(&self.database)
    }

    fn guessing_options(&self) -> Vec<String> {
        if !(self.csv_guessing && self.is_csv()) {
            return Vec::new();
        }
        // guessing quoted fields means not forcing them to strings
        let quoted_as_string = if self.quoted_fields_guessing { "NO" } else { "YES" };
        vec![
            "-oo".to_string(),
            "AUTODETECT_TYPE=YES".to_string(),
            "-oo".to_string(),
            format!("QUOTED_FIELDS_AS_STRING={}", quoted_as_string),
        ]
    }

    fn projection_options(&self) -> Vec<String> {
        if self.is_csv() || self.has_extension(".ods") {
            return Vec::new();
        }
        PROJECTION.iter().map(|s| s.to_string()).collect()
    }

    fn is_csv(&self) -> bool {
        self.has_extension(".csv")
    }

    fn is_geojson(&self) -> bool {
        self.has_extension(".geojson")
    }

    fn has_extension(&self, extension: &str) -> bool {
        self.filepath
            .to_string_lossy()
            .to_lowercase()
            .ends_with(extension)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn database() -> DatabaseConfig {
        DatabaseConfig {
            host: "db.internal".to_string(),
            port: 5432,
            user: "importer".to_string(),
            password: "s3cret".to_string(),
            database: "carto_db".to_string(),
            superuser: "postgres".to_string(),
        }
    }

    fn loader(path: &str) -> BulkLoader {
        BulkLoader::new("importer_123", path, &database(), &Ogr2ogrConfig::default(), None)
    }

    #[test]
    fn test_import_command() {
        let mut loader = loader("/tmp/bogus.shp");
        loader.overwrite = true;
        assert_eq!(
            loader.build_command(LoadMode::Import),
            "OSM_USE_CUSTOM_INDEXING=NO PG_USE_COPY=YES PGCLIENTENCODING=UTF-8 ogr2ogr \
             -f PostgreSQL -overwrite \
             PG:\"host=db.internal port=5432 user=importer dbname=carto_db password=s3cret\" \
             -t_srs EPSG:4326 -lco DIM=2 -lco PRECISION=NO /tmp/bogus.shp \
             -nln cdb_importer.importer_123 -nlt PROMOTE_TO_MULTI"
        );
    }

    #[test]
    fn test_append_command() {
        let loader = loader("/tmp/bogus.kml");
        let command = loader.build_command(LoadMode::Append);
        assert!(command.contains("ogr2ogr -append -f PostgreSQL PG:"));
        assert!(!command.contains("-overwrite"));
        assert!(!command.contains("-lco"));
        assert!(command.ends_with("-nln cdb_importer.importer_123 -nlt PROMOTE_TO_MULTI"));
    }

    #[test]
    fn test_csv_has_no_projection() {
        assert!(!loader("/tmp/bogus.csv").build_command(LoadMode::Import).contains("-t_srs"));
        assert!(!loader("/tmp/bogus.ods").build_command(LoadMode::Import).contains("-t_srs"));
        assert!(loader("/tmp/bogus.gpx").build_command(LoadMode::Import).contains("-t_srs"));
    }

    #[test]
    fn test_csv_guessing_options() {
        let mut loader = loader("/tmp/bogus.csv");
        assert!(!loader.build_command(LoadMode::Import).contains("AUTODETECT_TYPE"));

        loader.csv_guessing = true;
        assert!(loader
            .build_command(LoadMode::Import)
            .contains("-oo AUTODETECT_TYPE=YES -oo QUOTED_FIELDS_AS_STRING=NO"));

        loader.quoted_fields_guessing = false;
        assert!(loader
            .build_command(LoadMode::Import)
            .contains("QUOTED_FIELDS_AS_STRING=YES"));
    }

    #[test]
    fn test_guessing_ignored_for_non_csv() {
        let mut loader = loader("/tmp/bogus.xlsx");
        loader.csv_guessing = true;
        assert!(!loader.build_command(LoadMode::Import).contains("AUTODETECT_TYPE"));
    }

    #[test]
    fn test_shape_encoding_only_on_import() {
        let mut loader = loader("/tmp/bogus.shp");
        loader.shape_encoding = "LATIN1".to_string();
        loader.encoding = "LATIN1".to_string();
        assert!(loader.build_command(LoadMode::Import).starts_with(
            "OSM_USE_CUSTOM_INDEXING=NO PG_USE_COPY=YES PGCLIENTENCODING=LATIN1 SHAPE_ENCODING=LATIN1 "
        ));
        assert!(!loader.build_command(LoadMode::Append).contains("SHAPE_ENCODING"));
    }

    #[test]
    fn test_layer_follows_filepath() {
        let loader = BulkLoader::new(
            "t",
            "/tmp/multi.gpx",
            &database(),
            &Ogr2ogrConfig::default(),
            Some("tracks".to_string()),
        );
        let args = loader.arguments(LoadMode::Import);
        let at = args.iter().position(|a| a == "/tmp/multi.gpx").unwrap();
        assert_eq!(args[at + 1], "tracks");
        assert_eq!(args[at + 2], "-nln");
    }

    #[test]
    fn test_dedicated_csv_binary() {
        let config = Ogr2ogrConfig {
            csv_binary: Some("/opt/gdal/bin/ogr2ogr".to_string()),
            ..Ogr2ogrConfig::default()
        };
        let csv = BulkLoader::new("t", "/tmp/a.csv", &database(), &config, None);
        let geojson = BulkLoader::new("t", "/tmp/a.GeoJSON", &database(), &config, None);
        let shp = BulkLoader::new("t", "/tmp/a.shp", &database(), &config, None);
        assert_eq!(csv.executable(), "/opt/gdal/bin/ogr2ogr");
        assert_eq!(geojson.executable(), "/opt/gdal/bin/ogr2ogr");
        assert_eq!(shp.executable(), "ogr2ogr");
    }

    #[test]
    fn test_password_is_redacted_in_logs() {
        let loader = loader("/tmp/bogus.shp");
        let redacted = loader.redacted_command(LoadMode::Import);
        assert!(!redacted.contains("s3cret"));
        assert!(redacted.contains("password=[REDACTED]"));
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let config = Ogr2ogrConfig {
            binary: "definitely-not-ogr2ogr".to_string(),
            ..Ogr2ogrConfig::default()
        };
        let mut loader = BulkLoader::new("t", "/tmp/a.shp", &database(), &config, None);
        let err = loader.run(false).await.err().unwrap();
        assert!(matches!(err, ImportError::ToolNotInstalled { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_captures_output_and_exit_code() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let script = dir.path().join("fake-ogr2ogr");
        std::fs::write(
            &script,
            b"#!/bin/sh\necho \"loading $PGCLIENTENCODING\"\nprintf 'ERROR: \xff bad\\n' >&2\nexit 3\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let config = Ogr2ogrConfig {
            binary: script.display().to_string(),
            ..Ogr2ogrConfig::default()
        };
        let mut loader = BulkLoader::new("t", "/tmp/a.shp", &database(), &config, None);
        loader.run(false).await.unwrap();

        assert_eq!(loader.exit_code(), Some(3));
        assert!(loader.command_output().starts_with("loading UTF-8\n"));
        assert!(loader.command_output().contains("ERROR:"));
    }
}
