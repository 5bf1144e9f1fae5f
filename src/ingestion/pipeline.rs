//! Import pipeline - download, unpack, normalize and load one URL
//!
//! Progress is published through a `watch` channel owned by the pipeline, so
//! the supervising scheduler observes state without any process-wide map.

use crate::config::ImporterConfig;
use crate::error::{ErrorKind, ImportError, Result};
use crate::ingestion::bulk_loader::BulkLoader;
use crate::ingestion::csv_normalizer::CsvNormalizer;
use crate::ingestion::downloader::{Downloader, HttpOptions};
use crate::ingestion::source_file::SourceFile;
use crate::ingestion::unpacker::Unpacker;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportState {
    Enqueued,
    Pending,
    Unpacking,
    Importing,
    Complete,
    Failure,
    Stuck,
}

impl ImportState {
    pub fn is_finished(&self) -> bool {
        matches!(self, ImportState::Complete | ImportState::Failure | ImportState::Stuck)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportProgress {
    pub state: ImportState,
    /// Short user-facing message when the import did not complete
    pub error_message: Option<String>,
    #[serde(skip)]
    pub error_kind: Option<ErrorKind>,
    pub tables: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl Default for ImportProgress {
    fn default() -> Self {
        Self {
            state: ImportState::Enqueued,
            error_message: None,
            error_kind: None,
            tables: Vec::new(),
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ImportRequest {
    pub url: String,
    pub table_name: String,
    pub http: HttpOptions,
    pub available_quota: Option<u64>,
    pub append: bool,
    pub overwrite: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadedTable {
    pub table_name: String,
    pub source: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportOutcome {
    /// False when the remote resource was unchanged and nothing was loaded
    pub modified: bool,
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub tables: Vec<LoadedTable>,
}

pub struct ImportPipeline {
    config: ImporterConfig,
    cancel: CancellationToken,
    progress: watch::Sender<ImportProgress>,
}

impl ImportPipeline {
    pub fn new(config: ImporterConfig) -> Self {
        let (progress, _) = watch::channel(ImportProgress::default());
        Self {
            config,
            cancel: CancellationToken::new(),
            progress,
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ImportProgress> {
        self.progress.subscribe()
    }

    pub fn progress(&self) -> ImportProgress {
        self.progress.borrow().clone()
    }

    /// Run every step for `request`; scratch directories are removed on all paths
    pub async fn run(&self, request: &ImportRequest) -> Result<ImportOutcome> {
        let mut downloader = Downloader::new(&request.url, &self.config, request.http.clone())?
            .with_cancellation(self.cancel.clone());
        let mut unpacker =
            Unpacker::new(self.config.unp.clone()).with_cancellation(self.cancel.clone());

        let result = self.execute(request, &mut downloader, &mut unpacker).await;

        unpacker.clean_up();
        downloader.clean_up();

        match &result {
            Ok(outcome) => {
                let tables = outcome.tables.iter().map(|t| t.table_name.clone()).collect();
                self.update(|p| {
                    p.state = ImportState::Complete;
                    p.tables = tables;
                });
            }
            Err(err) => {
                error!("Import of {} failed: {}", request.url, err);
                let state = match err {
                    ImportError::Cancelled(_) => ImportState::Stuck,
                    _ => ImportState::Failure,
                };
                let kind = err.kind();
                let message = err.user_message().to_string();
                self.update(|p| {
                    p.state = state;
                    p.error_kind = Some(kind);
                    p.error_message = Some(message);
                });
            }
        }
        result
    }

    async fn execute(
        &self,
        request: &ImportRequest,
        downloader: &mut Downloader,
        unpacker: &mut Unpacker,
    ) -> Result<ImportOutcome> {
        self.transition(ImportState::Pending);
        let downloaded = downloader.run(request.available_quota).await?;

        let mut outcome = ImportOutcome {
            modified: downloaded.is_some(),
            etag: downloader.result().etag.clone(),
            last_modified: downloader.result().last_modified,
            tables: Vec::new(),
        };
        let Some(downloaded) = downloaded else {
            info!("{} unchanged, nothing to import", request.url);
            return Ok(outcome);
        };

        self.transition(ImportState::Unpacking);
        let source_files = unpacker.run(downloaded.fullpath()).await?.to_vec();
        for source_file in &source_files {
            self.normalize(source_file).await?;
        }

        self.transition(ImportState::Importing);
        for (index, source_file) in source_files.iter().enumerate() {
            self.check_cancelled()?;
            let table_name = if index == 0 {
                request.table_name.clone()
            } else {
                format!("{}_{}", request.table_name, index)
            };
            self.load(request, source_file, &table_name).await?;
            outcome.tables.push(LoadedTable {
                table_name,
                source: source_file.fullpath().to_path_buf(),
            });
        }
        Ok(outcome)
    }

    async fn normalize(&self, source_file: &SourceFile) -> Result<()> {
        let supported = source_file
            .extension()
            .map(|ext| CsvNormalizer::supported(&ext))
            .unwrap_or(false);
        if !supported {
            return Ok(());
        }
        self.check_cancelled()?;

        let source_file = source_file.clone();
        tokio::task::spawn_blocking(move || {
            CsvNormalizer::for_source_file(&source_file)
                .run()
                .map(|_| ())
        })
        .await
        .map_err(|e| ImportError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
    }

    async fn load(
        &self,
        request: &ImportRequest,
        source_file: &SourceFile,
        table_name: &str,
    ) -> Result<()> {
        let mut loader = BulkLoader::new(
            table_name,
            source_file.fullpath(),
            &self.config.database,
            &self.config.ogr2ogr,
            None,
        )
        .with_cancellation(self.cancel.clone());
        loader.overwrite = request.overwrite;
        if let Some(encoding) = source_file.encoding() {
            loader.encoding = encoding.to_string();
        }

        loader.run(request.append).await?;
        match loader.exit_code() {
            Some(0) => Ok(()),
            code => Err(ImportError::Load {
                exit_code: code.unwrap_or(-1),
                output: loader.command_output().trim().to_string(),
            }),
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(ImportError::Cancelled("import".to_string()));
        }
        Ok(())
    }

    fn transition(&self, state: ImportState) {
        info!("Import state -> {:?}", state);
        self.update(|p| p.state = state);
    }

    fn update<F: FnOnce(&mut ImportProgress)>(&self, change: F) {
        self.progress.send_modify(|progress| {
            change(progress);
            progress.updated_at = Utc::now();
        });
    }
}
