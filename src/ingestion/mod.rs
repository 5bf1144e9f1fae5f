//! File ingestion: acquire a remote or local file, unpack it, normalize
//! delimited text and bulk-load the result into PostgreSQL

pub mod bulk_loader;
pub mod csv_normalizer;
pub mod downloader;
pub mod formats;
pub mod pipeline;
pub mod source_file;
pub mod unpacker;
pub mod url_translator;

pub use bulk_loader::{BulkLoader, LoadMode};
pub use csv_normalizer::CsvNormalizer;
pub use downloader::{DownloadResult, Downloader, HttpOptions};
pub use pipeline::{ImportOutcome, ImportPipeline, ImportProgress, ImportRequest, ImportState};
pub use source_file::SourceFile;
pub use unpacker::Unpacker;
pub use url_translator::{Translation, UrlTranslator};
