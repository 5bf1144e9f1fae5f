use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("Download timed out: {0}")]
    DownloadTimeout(String),

    #[error("Couldn't resolve host: {0}")]
    CouldntResolveHost(String),

    #[error("Unauthorized download: {0}")]
    Unauthorized(String),

    #[error("Download not found: {0}")]
    NotFound(String),

    #[error("Partial transfer: {0}")]
    PartialTransfer(String),

    #[error("Too many nodes: {0}")]
    TooManyNodes(String),

    #[error("Download error: {0}")]
    Download(String),

    #[error("Download file too big (> {limit} bytes)")]
    TransferTooLarge { limit: u64 },

    #[error("Storage quota exceeded: requested {requested} bytes, {available} available")]
    QuotaExceeded { requested: u64, available: u64 },

    #[error("Encoding detection error: {0}")]
    EncodingDetection(String),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Not a file: {0}")]
    NotAFile(String),

    #[error("{tool} is not installed or not executable")]
    ToolNotInstalled { tool: String },

    #[error("Loader exited with {exit_code}: {output}")]
    Load { exit_code: i32, output: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid connector configuration: {0}")]
    ConnectorConfigInvalid(String),

    #[error("Connector infrastructure error: {0}")]
    ConnectorInfrastructure(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Fieldless discriminant of [`ImportError`], for callers that branch on
/// the failure kind rather than its message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    DownloadTimeout,
    CouldntResolveHost,
    Unauthorized,
    NotFound,
    PartialTransfer,
    TooManyNodes,
    GenericDownload,
    TransferTooLarge,
    QuotaExceeded,
    EncodingDetection,
    Extraction,
    NotAFile,
    ToolNotInstalled,
    Load,
    InvalidUrl,
    ConnectorConfigInvalid,
    ConnectorInfrastructure,
    Cancelled,
    Config,
    Database,
    Io,
    Json,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl ImportError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ImportError::DownloadTimeout(_) => ErrorKind::DownloadTimeout,
            ImportError::CouldntResolveHost(_) => ErrorKind::CouldntResolveHost,
            ImportError::Unauthorized(_) => ErrorKind::Unauthorized,
            ImportError::NotFound(_) => ErrorKind::NotFound,
            ImportError::PartialTransfer(_) => ErrorKind::PartialTransfer,
            ImportError::TooManyNodes(_) => ErrorKind::TooManyNodes,
            ImportError::Download(_) => ErrorKind::GenericDownload,
            ImportError::TransferTooLarge { .. } => ErrorKind::TransferTooLarge,
            ImportError::QuotaExceeded { .. } => ErrorKind::QuotaExceeded,
            ImportError::EncodingDetection(_) => ErrorKind::EncodingDetection,
            ImportError::Extraction(_) => ErrorKind::Extraction,
            ImportError::NotAFile(_) => ErrorKind::NotAFile,
            ImportError::ToolNotInstalled { .. } => ErrorKind::ToolNotInstalled,
            ImportError::Load { .. } => ErrorKind::Load,
            ImportError::InvalidUrl(_) => ErrorKind::InvalidUrl,
            ImportError::ConnectorConfigInvalid(_) => ErrorKind::ConnectorConfigInvalid,
            ImportError::ConnectorInfrastructure(_) => ErrorKind::ConnectorInfrastructure,
            ImportError::Cancelled(_) => ErrorKind::Cancelled,
            ImportError::Config(_) => ErrorKind::Config,
            ImportError::Database(_) => ErrorKind::Database,
            ImportError::Io(_) => ErrorKind::Io,
            ImportError::Json(_) => ErrorKind::Json,
        }
    }

    /// Short message meant for end users; never includes internal detail.
    pub fn user_message(&self) -> &'static str {
        match self.kind() {
            ErrorKind::DownloadTimeout => "the download timed out",
            ErrorKind::CouldntResolveHost => "could not resolve host",
            ErrorKind::Unauthorized => "the remote server denied access to the file",
            ErrorKind::NotFound => "the remote file was not found",
            ErrorKind::PartialTransfer => "the file transfer was interrupted",
            ErrorKind::TooManyNodes => "too many nodes requested",
            ErrorKind::GenericDownload => "the file could not be downloaded",
            ErrorKind::TransferTooLarge => "file too large",
            ErrorKind::QuotaExceeded => "not enough storage quota for this file",
            ErrorKind::EncodingDetection => "could not detect the file encoding",
            ErrorKind::Extraction => "the archive could not be extracted",
            ErrorKind::NotAFile => "the path is not a file",
            ErrorKind::ToolNotInstalled => "a required import tool is not available",
            ErrorKind::Load => "the file could not be loaded into the database",
            ErrorKind::InvalidUrl => "the URL is not valid",
            ErrorKind::ConnectorConfigInvalid => "invalid connector parameters",
            ErrorKind::ConnectorInfrastructure => "the remote data source could not be read",
            ErrorKind::Cancelled => "the import was cancelled",
            ErrorKind::Config | ErrorKind::Database | ErrorKind::Io | ErrorKind::Json => "unknown import error",
        }
    }
}

impl From<sqlx::Error> for ImportError {
    fn from(err: sqlx::Error) -> Self {
        ImportError::Database(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ImportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_variant() {
        let err = ImportError::TransferTooLarge { limit: 10 };
        assert_eq!(err.kind(), ErrorKind::TransferTooLarge);
        assert_eq!(err.user_message(), "file too large");
    }

    #[test]
    fn test_io_error_converts() {
        let err: ImportError = std::io::Error::new(std::io::ErrorKind::Other, "boom").into();
        assert_eq!(err.kind(), ErrorKind::Io);
    }
}
