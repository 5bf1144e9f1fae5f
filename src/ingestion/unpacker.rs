//! Unpacker - hands archives to the external `unp` tool and collects the
//! loadable files it produced

use crate::config::UnpConfig;
use crate::error::{ImportError, Result};
use crate::ingestion::formats;
use crate::ingestion::source_file::SourceFile;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

const UNP_READ_ERROR: &str = "cannot read";

pub struct Unpacker {
    config: UnpConfig,
    cancel: CancellationToken,
    source_files: Vec<SourceFile>,
    temporary_directory: Option<PathBuf>,
}

impl Unpacker {
    pub fn new(config: UnpConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
            source_files: Vec::new(),
            temporary_directory: None,
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn source_files(&self) -> &[SourceFile] {
        &self.source_files
    }

    pub fn temporary_directory(&self) -> Option<&Path> {
        self.temporary_directory.as_deref()
    }

    /// Extract `path` if it is an archive, otherwise pass it through as-is
    pub async fn run(&mut self, path: &Path) -> Result<&[SourceFile]> {
        if !self.compressed(path) {
            self.without_unpacking(path)?;
            return Ok(&self.source_files);
        }

        let directory = self.extract(path).await?;
        for file in self.crawl(&directory)? {
            self.process(&file)?;
        }
        info!(
            "Unpacked {} into {} loadable file(s)",
            path.display(),
            self.source_files.len()
        );
        Ok(&self.source_files)
    }

    /// Single-file fast path
    pub fn without_unpacking(&mut self, path: &Path) -> Result<&[SourceFile]> {
        if !path.is_file() {
            return Err(ImportError::NotAFile(path.display().to_string()));
        }
        let normalized = self.normalize(path)?;
        self.source_files.push(self.source_file_for(&normalized));
        Ok(&self.source_files)
    }

    /// Add a source file for `path` when its format is supported
    pub fn process(&mut self, path: &Path) -> Result<()> {
        if !self.supported(path) {
            debug!("Skipping unsupported file {}", path.display());
            return Ok(());
        }
        let normalized = self.normalize(path)?;
        self.source_files.push(self.source_file_for(&normalized));
        Ok(())
    }

    pub fn source_file_for(&self, path: &Path) -> SourceFile {
        SourceFile::new(path)
    }

    /// Run the extraction tool inside a fresh temporary directory
    pub async fn extract(&mut self, path: &Path) -> Result<PathBuf> {
        let absolute = std::fs::canonicalize(path)
            .map_err(|e| ImportError::Extraction(format!("{}: {}", path.display(), e)))?;
        let directory = self.generate_temporary_directory()?;

        info!("Extracting {} with {}", absolute.display(), self.config.binary);
        let mut command = Command::new(&self.config.binary);
        command
            .arg(&absolute)
            .current_dir(&directory)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let timeout = Duration::from_secs(self.config.timeout_secs);
        let output = tokio::select! {
            _ = self.cancel.cancelled() => {
                return Err(ImportError::Cancelled(format!("extraction of {}", path.display())));
            }
            result = tokio::time::timeout(timeout, command.output()) => match result {
                Err(_) => return Err(ImportError::Cancelled(format!(
                    "extraction of {} exceeded {}s", path.display(), timeout.as_secs()
                ))),
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(ImportError::ToolNotInstalled { tool: self.config.binary.clone() });
                }
                Ok(Err(e)) => return Err(ImportError::Extraction(e.to_string())),
                Ok(Ok(output)) => output,
            },
        };

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        let exit_code = output.status.code().unwrap_or(-1);

        if self.extractor_failure(&text, exit_code) {
            warn!("Extraction of {} failed ({}): {}", path.display(), exit_code, text.trim());
            return Err(ImportError::Extraction(format!(
                "{} exited with {}: {}",
                self.config.binary,
                exit_code,
                text.trim()
            )));
        }
        Ok(directory)
    }

    pub fn extractor_failure(&self, output: &str, exit_code: i32) -> bool {
        output.to_lowercase().contains(UNP_READ_ERROR) || exit_code != 0
    }

    /// Every regular, non-hidden file below `directory`
    pub fn crawl(&self, directory: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut entries: Vec<_> = std::fs::read_dir(directory)?.collect::<std::io::Result<_>>()?;
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            let name = entry.file_name();
            if self.hidden(&name.to_string_lossy()) {
                continue;
            }
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                files.extend(self.crawl(&path)?);
            } else {
                files.push(path);
            }
        }
        Ok(files)
    }

    pub fn hidden(&self, name: &str) -> bool {
        name.starts_with('.') || name.starts_with("__")
    }

    pub fn compressed(&self, path: &Path) -> bool {
        formats::is_compressed(&path.to_string_lossy())
    }

    pub fn supported(&self, path: &Path) -> bool {
        path.file_name()
            .map(|n| formats::is_supported(&n.to_string_lossy()))
            .unwrap_or(false)
    }

    /// Underscore and lowercase the file name, renaming the file on disk
    pub fn normalize(&self, path: &Path) -> Result<PathBuf> {
        let mut normalized = self.underscore(path);
        if normalized != path && normalized.exists() {
            let free = free_name(&normalized);
            warn!(
                "{} already exists, renaming {} to {}",
                normalized.display(),
                path.display(),
                free.display()
            );
            normalized = free;
        }
        self.rename(path, &normalized)?;
        Ok(normalized)
    }

    pub fn underscore(&self, path: &Path) -> PathBuf {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let normalized: String = name
            .chars()
            .map(|c| if c.is_whitespace() { '_' } else { c })
            .collect::<String>()
            .to_lowercase();
        path.with_file_name(normalized)
    }

    pub fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        if from == to {
            return Ok(());
        }
        if to.exists() {
            return Err(ImportError::Extraction(format!(
                "cannot rename {} to existing {}",
                from.display(),
                to.display()
            )));
        }
        std::fs::rename(from, to)?;
        Ok(())
    }

    pub fn generate_temporary_directory(&mut self) -> Result<PathBuf> {
        let directory = self
            .config
            .temporary_directory
            .join(format!("unp_{}", Uuid::new_v4().simple()));
        std::fs::create_dir_all(&directory)?;
        self.temporary_directory = Some(directory.clone());
        Ok(directory)
    }

    /// Remove the extraction directory, if any
    pub fn clean_up(&mut self) {
        if let Some(directory) = self.temporary_directory.take() {
            if let Err(e) = std::fs::remove_dir_all(&directory) {
                warn!("Could not remove {}: {}", directory.display(), e);
            }
        }
    }
}

/// `<stem>_<n>.<ext>` with the lowest `n` not taken yet
fn free_name(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    (1..)
        .map(|n| path.with_file_name(format!("{}_{}{}", stem, n, extension)))
        .find(|candidate| !candidate.exists())
        .unwrap_or_else(|| path.to_path_buf())
}
