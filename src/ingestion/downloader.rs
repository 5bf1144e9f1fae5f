//! Downloader - resolves a user-supplied URL into a local `SourceFile`
//!
//! Flow: translate the URL, HEAD for change detection and the quota check,
//! then a streaming GET bounded by a hard byte ceiling.

use crate::config::{HttpConfig, ImporterConfig};
use crate::error::{ImportError, Result};
use crate::ingestion::formats;
use crate::ingestion::source_file::SourceFile;
use crate::ingestion::url_translator;
use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, CONTROLS};
use rand::Rng;
use regex::Regex;
use reqwest::header::{HeaderMap, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, ETAG, LAST_MODIFIED};
use reqwest::{Client, Response, StatusCode};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

const FILENAME_PREFIX: &str = "importer_";
const ERROR_BODY_LIMIT: usize = 4096;

/// Per-request options supplied by the caller (usually a synchronization record)
#[derive(Debug, Clone, Default)]
pub struct HttpOptions {
    /// ETag stored by a previous run
    pub etag: Option<String>,
    /// Last-Modified stored by a previous run
    pub last_modified: Option<DateTime<Utc>>,
    pub verify_ssl_cert: Option<bool>,
    pub http_timeout: Option<Duration>,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DownloadResult {
    pub status: Option<u16>,
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    /// Candidate extensions from Content-Type, Content-Disposition and URL, in that order
    pub extensions: Vec<String>,
    pub bytes_transferred: u64,
}

pub struct Downloader {
    url: String,
    custom_filename: Option<String>,
    http: HttpConfig,
    options: HttpOptions,
    temporary_base: PathBuf,
    cancel: CancellationToken,
    result: DownloadResult,
    source_file: Option<SourceFile>,
}

impl Downloader {
    pub fn new(url: &str, config: &ImporterConfig, options: HttpOptions) -> Result<Self> {
        let trimmed = url.trim();
        if trimmed.is_empty() {
            return Err(ImportError::InvalidUrl("empty URL".to_string()));
        }

        let translation = url_translator::translate(trimmed);
        if translation.url != trimmed {
            debug!("Translated {} into {}", trimmed, translation.url);
        }

        let target = translation.url.trim();
        let url = if is_remote(target) {
            let escaped = utf8_percent_encode(target, CONTROLS).to_string();
            let parsed =
                Url::parse(&escaped).map_err(|e| ImportError::InvalidUrl(format!("{}: {}", escaped, e)))?;
            validate_scheme(&parsed)?;
            escaped
        } else {
            target.to_string()
        };

        Ok(Self {
            url,
            custom_filename: translation.filename,
            http: config.http.clone(),
            options,
            temporary_base: config.unp.temporary_directory.clone(),
            cancel: CancellationToken::new(),
            result: DownloadResult::default(),
            source_file: None,
        })
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// The URL actually requested, after translation and escaping
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn result(&self) -> &DownloadResult {
        &self.result
    }

    pub fn source_file(&self) -> Option<&SourceFile> {
        self.source_file.as_ref()
    }

    pub fn checksum(&self) -> Option<&str> {
        self.result.etag.as_deref()
    }

    /// Remove the scratch directory holding a downloaded file; local paths are left alone
    pub fn clean_up(&mut self) {
        if !is_remote(&self.url) {
            return;
        }
        if let Some(source_file) = self.source_file.take() {
            remove_download(source_file.fullpath());
        }
    }

    /// Whether the remote resource changed since the values stored in [`HttpOptions`]
    pub fn modified(&self) -> bool {
        let previous_etag = self.options.etag.as_deref();
        let previous_last_modified = self.options.last_modified;

        if previous_etag.is_none() && previous_last_modified.is_none() {
            return true;
        }
        if let (Some(previous), Some(current)) = (previous_etag, self.result.etag.as_deref()) {
            if previous != current {
                return true;
            }
        }
        if let (Some(previous), Some(current)) = (previous_last_modified, self.result.last_modified) {
            if previous < current {
                return true;
            }
        }
        false
    }

    /// Fetch the resource. Returns `None` when the remote side reports no change.
    pub async fn run(&mut self, available_quota: Option<u64>) -> Result<Option<SourceFile>> {
        if !is_remote(&self.url) {
            let source_file = SourceFile::new(&self.url);
            self.source_file = Some(source_file.clone());
            return Ok(Some(source_file));
        }

        let client = self.http_client()?;

        info!("HEAD {}", self.url);
        let headers = self.cancellable(client.head(&self.url).send()).await?;
        let headers = headers.headers().clone();

        if let Some(available) = available_quota {
            if let Some(requested) = content_length(&headers) {
                if requested > available {
                    warn!(
                        user_id = self.options.user_id.as_deref().unwrap_or("-"),
                        "Download of {} bytes exceeds available quota of {} bytes", requested, available
                    );
                    return Err(ImportError::QuotaExceeded { requested, available });
                }
            }
        }

        self.result.etag = etag_from(&headers);
        self.result.last_modified = last_modified_from(&headers);
        if !self.modified() {
            info!("{} not modified since last import", self.url);
            return Ok(None);
        }

        let source_file = self.download_and_store(&client).await?;

        if !self.modified() {
            remove_download(source_file.fullpath());
            return Ok(None);
        }

        self.source_file = Some(source_file.clone());
        Ok(Some(source_file))
    }

    fn http_client(&self) -> Result<Client> {
        let verify = self.options.verify_ssl_cert.unwrap_or(self.http.verify_ssl_cert);
        let timeout = self.options.http_timeout.unwrap_or_else(|| self.http.request_timeout());

        Client::builder()
            .connect_timeout(self.http.connect_timeout())
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(self.http.max_redirects))
            .cookie_store(true)
            .danger_accept_invalid_certs(!verify)
            .pool_max_idle_per_host(0)
            .build()
            .map_err(|e| ImportError::Download(e.to_string()))
    }

    async fn cancellable<F>(&self, request: F) -> Result<Response>
    where
        F: std::future::Future<Output = reqwest::Result<Response>>,
    {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(ImportError::Cancelled(format!("download of {}", self.url))),
            response = request => response.map_err(|e| classify_transport_error(&self.url, e)),
        }
    }

    async fn download_and_store(&mut self, client: &Client) -> Result<SourceFile> {
        let directory = self
            .temporary_base
            .join(format!("{}{}", FILENAME_PREFIX, Uuid::new_v4().simple()));
        tokio::fs::create_dir_all(&directory).await?;
        let temporary_path = directory.join(format!("{}{}", FILENAME_PREFIX, Uuid::new_v4().simple()));

        match self.stream_to(client, &temporary_path).await {
            Ok(filename) => {
                let final_path = directory.join(&filename);
                tokio::fs::rename(&temporary_path, &final_path).await?;
                info!(
                    "Downloaded {} bytes from {} into {}",
                    self.result.bytes_transferred,
                    self.url,
                    final_path.display()
                );
                Ok(SourceFile::with_filename(final_path, filename))
            }
            Err(err) => {
                let _ = tokio::fs::remove_dir_all(&directory).await;
                Err(err)
            }
        }
    }

    /// Streams the GET body into `path`, returning the filename to store it under
    async fn stream_to(&mut self, client: &Client, path: &Path) -> Result<String> {
        info!("GET {}", self.url);
        let mut response = self.cancellable(client.get(&self.url).send()).await?;

        if !response.status().is_success() {
            let status = response.status();
            let headers = response.headers().clone();
            let body = read_error_body(response).await;
            return Err(error_for_response(&self.url, status, &headers, &body));
        }

        validate_scheme(response.url())?;
        self.result.status = Some(response.status().as_u16());

        let headers = response.headers().clone();
        let expected = content_length(&headers);
        let limit = self.http.max_download_size;
        let mut file = File::create(path).await?;
        self.result.bytes_transferred = 0;

        loop {
            let chunk = tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Err(ImportError::Cancelled(format!("download of {}", self.url)));
                }
                chunk = response.chunk() => chunk.map_err(|e| classify_transport_error(&self.url, e))?,
            };
            let Some(chunk) = chunk else { break };

            self.result.bytes_transferred += chunk.len() as u64;
            if self.result.bytes_transferred > limit {
                warn!("Download of {} aborted after {} bytes", self.url, self.result.bytes_transferred);
                return Err(ImportError::TransferTooLarge { limit });
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        if let Some(expected) = expected {
            if expected != self.result.bytes_transferred {
                return Err(ImportError::PartialTransfer(format!(
                    "expected {} bytes, received {}",
                    expected, self.result.bytes_transferred
                )));
            }
        }

        let disposition_name = filename_from_headers(&headers);
        let url_name = formats::url_filename(&self.url);
        let content_type = content_type(&headers);

        self.result.extensions = candidate_extensions(
            content_type.as_deref(),
            disposition_name.as_deref(),
            url_name.as_deref(),
        );
        self.result.etag = etag_from(&headers);
        self.result.last_modified = last_modified_from(&headers);

        let basename = self
            .custom_filename
            .clone()
            .or(disposition_name)
            .or(url_name)
            .unwrap_or_else(random_name);

        Ok(name_with_extension(&basename, content_type.as_deref()))
    }
}

fn is_remote(url: &str) -> bool {
    url.contains("://")
}

fn remove_download(path: &Path) {
    if let Some(directory) = path.parent() {
        if let Err(e) = std::fs::remove_dir_all(directory) {
            warn!("Could not remove {}: {}", directory.display(), e);
        }
    }
}

/// Only http and https are fetched, before and after redirects
fn validate_scheme(url: &Url) -> Result<()> {
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ImportError::InvalidUrl(format!("unsupported scheme {} in {}", other, url))),
    }
}

fn is_dns_failure(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        let message = e.to_string().to_lowercase();
        if message.contains("dns error")
            || message.contains("failed to lookup address")
            || message.contains("name or service not known")
            || message.contains("no such host")
        {
            return true;
        }
        current = e.source();
    }
    false
}

fn classify_transport_error(url: &str, err: reqwest::Error) -> ImportError {
    if err.is_timeout() {
        ImportError::DownloadTimeout(format!("{}: {}", url, err))
    } else if is_dns_failure(&err) {
        ImportError::CouldntResolveHost(format!("Couldn't resolve {}", url))
    } else if err.is_body() || err.is_decode() {
        ImportError::PartialTransfer(format!(
            "A file transfer was shorter or larger than expected: {}",
            err
        ))
    } else {
        ImportError::Download(err.to_string())
    }
}

fn too_many_nodes_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)too many nodes").expect("static pattern is valid"))
}

fn error_for_response(url: &str, status: StatusCode, headers: &HeaderMap, body: &str) -> ImportError {
    warn!("Download of {} failed with status {}", url, status);

    if let Some(error) = headers.get("Error").and_then(|v| v.to_str().ok()) {
        if too_many_nodes_regex().is_match(error) {
            return ImportError::TooManyNodes(error.to_string());
        }
    }
    match status {
        StatusCode::UNAUTHORIZED => ImportError::Unauthorized(body.to_string()),
        StatusCode::NOT_FOUND => ImportError::NotFound(body.to_string()),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            ImportError::DownloadTimeout(format!("Code:{} Body:{}", status.as_u16(), body))
        }
        _ => ImportError::Download(format!("Code:{} Body:{}", status.as_u16(), body)),
    }
}

async fn read_error_body(mut response: Response) -> String {
    let mut body = Vec::new();
    while let Ok(Some(chunk)) = response.chunk().await {
        body.extend_from_slice(&chunk);
        if body.len() >= ERROR_BODY_LIMIT {
            body.truncate(ERROR_BODY_LIMIT);
            break;
        }
    }
    String::from_utf8_lossy(&body).into_owned()
}

fn header_str<'a>(headers: &'a HeaderMap, name: reqwest::header::HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn strip_quotes(value: &str) -> String {
    value.replace(['"', '\''], "")
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    header_str(headers, CONTENT_LENGTH).and_then(|v| v.trim().parse().ok())
}

fn content_type(headers: &HeaderMap) -> Option<String> {
    header_str(headers, CONTENT_TYPE)
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty())
}

fn etag_from(headers: &HeaderMap) -> Option<String> {
    header_str(headers, ETAG).map(strip_quotes)
}

fn last_modified_from(headers: &HeaderMap) -> Option<DateTime<Utc>> {
    let raw = strip_quotes(header_str(headers, LAST_MODIFIED)?);
    DateTime::parse_from_rfc2822(raw.trim())
        .map(|d| d.with_timezone(&Utc))
        .ok()
}

fn content_disposition_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r";\s*filename=(.*;|.*)").expect("static pattern is valid"))
}

fn filename_from_headers(headers: &HeaderMap) -> Option<String> {
    let disposition = header_str(headers, CONTENT_DISPOSITION)?;
    let raw = content_disposition_regex().captures(disposition)?.get(1)?.as_str();
    let name = strip_quotes(raw);
    let name = name.split(';').next()?.trim();
    // Never let a header choose a directory
    let name = Path::new(name).file_name()?.to_string_lossy().into_owned();
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

fn random_name() -> String {
    let mut rng = rand::thread_rng();
    (0..10).map(|_| char::from(b'0' + rng.gen_range(0..10u8))).collect()
}

fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(idx) if idx > 0 && idx + 1 < name.len() => (&name[..idx], Some(&name[idx + 1..])),
        Some(idx) if idx > 0 => (&name[..idx], None),
        _ => (name, None),
    }
}

/// Ensure the name carries an extension compatible with the declared content type
pub fn name_with_extension(name: &str, content_type: Option<&str>) -> String {
    let Some(content_type) = content_type else {
        return name.to_string();
    };
    let extensions = formats::extensions_for_content_type(content_type);
    if extensions.is_empty() {
        return name.to_string();
    }

    let (stem, extension) = split_extension(name);
    let compatible = extension
        .map(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
        .unwrap_or(false);
    if compatible {
        name.to_string()
    } else {
        format!("{}.{}", stem, extensions[0])
    }
}

fn candidate_extensions(
    content_type: Option<&str>,
    disposition_name: Option<&str>,
    url_name: Option<&str>,
) -> Vec<String> {
    let mut candidates: Vec<String> = content_type
        .map(formats::extensions_for_content_type)
        .unwrap_or(&[])
        .iter()
        .map(|e| e.to_string())
        .collect();

    for name in [disposition_name, url_name].into_iter().flatten() {
        if let (_, Some(ext)) = split_extension(name) {
            let ext = ext.to_lowercase();
            if !candidates.contains(&ext) {
                candidates.push(ext);
            }
        }
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_name_with_extension() {
        assert_eq!(name_with_extension("export", Some("text/csv")), "export.csv");
        assert_eq!(name_with_extension("data.csv", Some("text/csv")), "data.csv");
        assert_eq!(name_with_extension("data.tmp", Some("text/csv")), "data.csv");
        assert_eq!(name_with_extension("points.kml", Some("text/plain")), "points.kml");
        assert_eq!(name_with_extension("data.bin", Some("image/png")), "data.bin");
        assert_eq!(name_with_extension("data.bin", None), "data.bin");
    }

    #[test]
    fn test_filename_from_disposition() {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_DISPOSITION,
            HeaderValue::from_static("attachment; filename=\"stations.csv\"; size=120"),
        );
        assert_eq!(filename_from_headers(&headers).as_deref(), Some("stations.csv"));

        headers.insert(
            CONTENT_DISPOSITION,
            HeaderValue::from_static("attachment; filename=../../etc/passwd"),
        );
        assert_eq!(filename_from_headers(&headers).as_deref(), Some("passwd"));
    }

    #[test]
    fn test_etag_and_last_modified_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert(ETAG, HeaderValue::from_static("\"abc123\""));
        headers.insert(LAST_MODIFIED, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(etag_from(&headers).as_deref(), Some("abc123"));
        let date = last_modified_from(&headers).unwrap();
        assert_eq!(date.to_rfc3339(), "2015-10-21T07:28:00+00:00");

        headers.insert(LAST_MODIFIED, HeaderValue::from_static("yesterday"));
        assert!(last_modified_from(&headers).is_none());
    }

    #[test]
    fn test_random_name_is_ten_digits() {
        let name = random_name();
        assert_eq!(name.len(), 10);
        assert!(name.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_candidate_extensions_are_ordered_and_unique() {
        let candidates = candidate_extensions(Some("text/plain"), Some("a.CSV"), Some("b.kml"));
        assert_eq!(candidates, vec!["txt", "kml", "geojson", "csv"]);
    }

    #[test]
    fn test_too_many_nodes_header() {
        let mut headers = HeaderMap::new();
        headers.insert("error", HeaderValue::from_static("You requested too many nodes (limit is 50000)"));
        let err = error_for_response("http://x", StatusCode::BAD_REQUEST, &headers, "");
        assert!(matches!(err, ImportError::TooManyNodes(_)));
    }

    #[test]
    fn test_status_mapping() {
        let headers = HeaderMap::new();
        assert!(matches!(
            error_for_response("http://x", StatusCode::UNAUTHORIZED, &headers, ""),
            ImportError::Unauthorized(_)
        ));
        assert!(matches!(
            error_for_response("http://x", StatusCode::NOT_FOUND, &headers, ""),
            ImportError::NotFound(_)
        ));
        assert!(matches!(
            error_for_response("http://x", StatusCode::INTERNAL_SERVER_ERROR, &headers, "oops"),
            ImportError::Download(_)
        ));
    }

    #[test]
    fn test_share_url_translated_before_request() {
        let config = ImporterConfig::default();
        let downloader = Downloader::new(
            "https://github.com/acme/maps/blob/main/stations.csv",
            &config,
            HttpOptions::default(),
        )
        .unwrap();
        assert_eq!(
            downloader.url(),
            "https://raw.githubusercontent.com/acme/maps/main/stations.csv"
        );
    }

    #[test]
    fn test_non_ascii_is_escaped() {
        let config = ImporterConfig::default();
        let downloader =
            Downloader::new(" http://example.com/año.csv ", &config, HttpOptions::default()).unwrap();
        assert_eq!(downloader.url(), "http://example.com/a%C3%B1o.csv");
    }

    #[test]
    fn test_empty_url_rejected() {
        let config = ImporterConfig::default();
        let err = Downloader::new("  ", &config, HttpOptions::default()).err().unwrap();
        assert!(matches!(err, ImportError::InvalidUrl(_)));
    }

    #[test]
    fn test_unsupported_scheme_rejected() {
        let config = ImporterConfig::default();
        let err = Downloader::new("ftp://example.com/data.csv", &config, HttpOptions::default())
            .err()
            .unwrap();
        assert!(matches!(err, ImportError::InvalidUrl(_)));
    }

    #[test]
    fn test_modified_rules() {
        let config = ImporterConfig::default();
        let mut downloader = Downloader::new("http://x/a.csv", &config, HttpOptions::default()).unwrap();
        assert!(downloader.modified());

        downloader.options.etag = Some("v1".to_string());
        downloader.result.etag = Some("v1".to_string());
        assert!(!downloader.modified());

        downloader.result.etag = Some("v2".to_string());
        assert!(downloader.modified());

        let earlier = DateTime::parse_from_rfc3339("2020-01-01T00:00:00Z").unwrap().with_timezone(&Utc);
        let later = DateTime::parse_from_rfc3339("2021-01-01T00:00:00Z").unwrap().with_timezone(&Utc);
        downloader.options.etag = None;
        downloader.result.etag = None;
        downloader.options.last_modified = Some(earlier);
        downloader.result.last_modified = Some(earlier);
        assert!(!downloader.modified());
        downloader.result.last_modified = Some(later);
        assert!(downloader.modified());
    }

    #[tokio::test]
    async fn test_local_path_passthrough() {
        let config = ImporterConfig::default();
        let mut downloader =
            Downloader::new("/var/tmp/local_file.csv", &config, HttpOptions::default()).unwrap();
        let source_file = downloader.run(None).await.unwrap().unwrap();
        assert_eq!(source_file.fullpath(), Path::new("/var/tmp/local_file.csv"));
    }

    #[tokio::test]
    async fn test_local_path_keeps_non_ascii_name() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("año.csv");
        std::fs::write(&path, "a,b\n").unwrap();

        let config = ImporterConfig::default();
        let mut downloader =
            Downloader::new(&path.display().to_string(), &config, HttpOptions::default()).unwrap();
        let source_file = downloader.run(None).await.unwrap().unwrap();
        assert_eq!(source_file.fullpath(), path.as_path());
        assert!(source_file.fullpath().exists());
    }
}
