//! Registry of recognized tabular/geo formats and archive extensions
//!
//! Consulted by the downloader when it has to guess a filename and by the
//! unpacker when it decides whether to extract or pass a file through.

use regex::Regex;
use std::sync::OnceLock;

pub const SUPPORTED_FORMATS: &[&str] = &[
    ".csv", ".tsv", ".txt", ".geojson", ".json", ".kml", ".kmz", ".gpx", ".shp", ".tab", ".xls",
    ".xlsx", ".xlsb", ".ods", ".osm", ".sql", ".gpkg", ".fgdb", ".tif", ".tiff", ".carto",
];

pub const COMPRESSED_EXTENSIONS: &[&str] =
    &[".zip", ".gz", ".tgz", ".tar", ".bz2", ".kmz", ".rar", ".carto"];

const CONTENT_TYPES_MAPPING: &[(&[&str], &[&str])] = &[
    (&["text/plain"], &["txt", "kml", "geojson"]),
    (&["text/csv"], &["csv"]),
    (&["application/vnd.ms-excel"], &["xls"]),
    (&["application/vnd.ms-excel.sheet.binary.macroenabled.12"], &["xlsb"]),
    (
        &["application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"],
        &["xlsx"],
    ),
    (&["application/vnd.geo+json"], &["geojson"]),
    (&["application/vnd.google-earth.kml+xml"], &["kml"]),
    (&["application/vnd.google-earth.kmz"], &["kmz"]),
    (&["application/gpx+xml"], &["gpx"]),
    (&["application/zip"], &["zip", "carto"]),
    (&["application/x-gzip"], &["tgz", "gz"]),
    (
        &["application/json", "text/javascript", "application/javascript"],
        &["json"],
    ),
    (&["application/osm3s+xml"], &["osm"]),
];

fn has_suffix(name: &str, extensions: &[&str]) -> bool {
    let lowered = name.to_lowercase();
    extensions.iter().any(|ext| lowered.ends_with(ext))
}

pub fn is_supported(name: &str) -> bool {
    has_suffix(name, SUPPORTED_FORMATS)
}

pub fn is_compressed(name: &str) -> bool {
    has_suffix(name, COMPRESSED_EXTENSIONS)
}

/// Extensions registered for a media type, most specific first; empty if unknown
pub fn extensions_for_content_type(content_type: &str) -> &'static [&'static str] {
    let media_type = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase();
    CONTENT_TYPES_MAPPING
        .iter()
        .find(|(types, _)| types.contains(&media_type.as_str()))
        .map(|(_, extensions)| *extensions)
        .unwrap_or(&[])
}

/// Every known extension, longest first so alternations prefer `.geojson` over `.json`
fn all_extensions() -> Vec<&'static str> {
    let mut extensions: Vec<&str> = SUPPORTED_FORMATS
        .iter()
        .chain(COMPRESSED_EXTENSIONS.iter())
        .copied()
        .collect();
    extensions.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
    extensions.dedup();
    extensions
}

fn url_filename_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let alternation = all_extensions()
            .iter()
            .map(|ext| regex::escape(ext))
            .collect::<Vec<_>>()
            .join("|");
        let pattern = format!(r"(?i)([\w-]+(?:{})+)(?:$|[.?&])", alternation);
        Regex::new(&pattern).expect("static filename pattern is valid")
    })
}

/// Pull a plausible filename with a known extension out of a URL
pub fn url_filename(url: &str) -> Option<String> {
    url_filename_regex()
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}
