//! Handle to one acquired, on-disk artifact waiting to be loaded

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    fullpath: PathBuf,
    filename: String,
    encoding: Option<String>,
}

impl SourceFile {
    pub fn new(fullpath: impl Into<PathBuf>) -> Self {
        let fullpath = fullpath.into();
        let filename = fullpath
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            fullpath,
            filename,
            encoding: None,
        }
    }

    /// Source file whose logical name differs from its on-disk name
    pub fn with_filename(fullpath: impl Into<PathBuf>, filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            ..Self::new(fullpath)
        }
    }

    pub fn with_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = Some(encoding.into());
        self
    }

    pub fn fullpath(&self) -> &Path {
        &self.fullpath
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// File name without its last extension
    pub fn name(&self) -> &str {
        match self.filename.rfind('.') {
            Some(idx) if idx > 0 => &self.filename[..idx],
            _ => &self.filename,
        }
    }

    /// Lowercased last extension, including the leading dot
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.filename)
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
    }

    pub fn encoding(&self) -> Option<&str> {
        self.encoding.as_deref()
    }

    pub fn set_encoding(&mut self, encoding: Option<String>) {
        self.encoding = encoding;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_and_extension() {
        let sf = SourceFile::new("/tmp/imports/abc/Stations.CSV");
        assert_eq!(sf.filename(), "Stations.CSV");
        assert_eq!(sf.name(), "Stations");
        assert_eq!(sf.extension().as_deref(), Some(".csv"));
        assert!(sf.encoding().is_none());
    }

    #[test]
    fn test_custom_filename() {
        let sf = SourceFile::with_filename("/tmp/importer_123", "export.osm");
        assert_eq!(sf.fullpath(), Path::new("/tmp/importer_123"));
        assert_eq!(sf.extension().as_deref(), Some(".osm"));
    }
}
