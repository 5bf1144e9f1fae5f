//! CSV Normalizer - rewrites delimited text into UTF-8, comma separated,
//! multi-column form before it is handed to the bulk loader

use crate::error::{ImportError, Result};
use crate::ingestion::source_file::SourceFile;
use chardetng::EncodingDetector;
use encoding_rs::{Encoding, ISO_8859_2, UTF_8, WINDOWS_1252};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const LINES_FOR_DETECTION: usize = 25;
pub const SAMPLE_READ_LIMIT: usize = 500_000;
pub const COMMON_DELIMITERS: [u8; 4] = [b',', b'\t', b' ', b';'];
pub const DEFAULT_DELIMITER: u8 = b',';
pub const OUTPUT_DELIMITER: u8 = b',';

/// ISO-8859-1 is decoded as windows-1252, per the WHATWG encoding standard
fn acceptable_encoding(encoding: &'static Encoding) -> bool {
    [UTF_8, WINDOWS_1252, ISO_8859_2].contains(&encoding)
}

pub struct CsvNormalizer {
    filepath: PathBuf,
    source_file: Option<SourceFile>,
    delimiter: Option<u8>,
    first_line: Option<Vec<u8>>,
}

impl CsvNormalizer {
    pub fn new(filepath: impl Into<PathBuf>) -> Self {
        Self {
            filepath: filepath.into(),
            source_file: None,
            delimiter: None,
            first_line: None,
        }
    }

    /// Normalizer for a source file whose encoding may already be known
    pub fn for_source_file(source_file: &SourceFile) -> Self {
        let mut normalizer = Self::new(source_file.fullpath());
        normalizer.source_file = Some(source_file.clone());
        normalizer
    }

    pub fn supported(extension: &str) -> bool {
        matches!(extension.to_lowercase().as_str(), ".csv" | ".tsv" | ".txt")
    }

    pub fn filepath(&self) -> &Path {
        &self.filepath
    }

    pub fn delimiter(&self) -> Option<u8> {
        self.delimiter
    }

    /// Detect the file shape and rewrite it in place when needed
    pub fn run(&mut self) -> Result<&mut Self> {
        if !self.filepath.is_file() {
            return Ok(self);
        }

        self.detect_delimiter()?;
        if !self.needs_normalization()? {
            debug!("{} is already normalized", self.filepath.display());
            return Ok(self);
        }

        let encoding = self.encoding()?;
        info!(
            "Normalizing {} (encoding {}, delimiter {:?})",
            self.filepath.display(),
            encoding.name(),
            self.delimiter.map(char::from)
        );

        let temporary = self.temporary_filepath();
        if let Err(e) = self.normalize(&temporary, encoding) {
            let _ = std::fs::remove_file(&temporary);
            return Err(e);
        }
        std::fs::rename(&temporary, &self.filepath)?;
        self.first_line = None;
        Ok(self)
    }

    /// Pick the candidate delimiter whose per-line count varies least over
    /// the first lines of the file
    pub fn detect_delimiter(&mut self) -> Result<u8> {
        let lines = self.sample_lines()?;
        let delimiter = choose_delimiter(&lines);
        self.delimiter = Some(delimiter);
        Ok(delimiter)
    }

    pub fn encoding(&self) -> Result<&'static Encoding> {
        if let Some(known) = self
            .source_file
            .as_ref()
            .and_then(|f| f.encoding())
            .and_then(|label| Encoding::for_label(label.as_bytes()))
        {
            return Ok(known);
        }
        let sample = self.read_sample()?;
        Ok(detect_encoding(&sample))
    }

    pub fn needs_normalization(&mut self) -> Result<bool> {
        let encoding = self.encoding()?;
        if !acceptable_encoding(encoding) {
            return Ok(true);
        }
        let delimiter = match self.delimiter {
            Some(d) => d,
            None => self.detect_delimiter()?,
        };
        if delimiter != DEFAULT_DELIMITER {
            return Ok(true);
        }
        self.single_column()
    }

    pub fn single_column(&mut self) -> Result<bool> {
        let delimiter = self.delimiter.unwrap_or(DEFAULT_DELIMITER);
        let first_line = self.first_line()?;
        Ok(count_fields(&first_line, delimiter) < 2)
    }

    /// Line terminator of the file: classic Mac files only carry `\r`
    pub fn line_delimiter(&mut self) -> Result<u8> {
        let first_line = self.first_line()?;
        if !first_line.contains(&b'\n') && first_line.contains(&b'\r') {
            Ok(b'\r')
        } else {
            Ok(b'\n')
        }
    }

    fn normalize(&mut self, temporary: &Path, encoding: &'static Encoding) -> Result<()> {
        let delimiter = self.delimiter.unwrap_or(DEFAULT_DELIMITER);
        let line_delimiter = self.line_delimiter()?;

        let raw = std::fs::read(&self.filepath)?;
        let (decoded, had_errors) = encoding.decode_without_bom_handling(&raw);
        if had_errors {
            return Err(ImportError::EncodingDetection(format!(
                "{} is not valid {}",
                self.filepath.display(),
                encoding.name()
            )));
        }

        let mut writer = csv::WriterBuilder::new()
            .delimiter(OUTPUT_DELIMITER)
            .flexible(true)
            .terminator(csv::Terminator::Any(b'\n'))
            .from_path(temporary)
            .map_err(|e| ImportError::EncodingDetection(e.to_string()))?;

        let mut dropped = 0usize;
        for line in decoded.split(char::from(line_delimiter)) {
            let line = line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                continue;
            }
            let Some(mut row) = parse_line(line.as_bytes(), delimiter) else {
                dropped += 1;
                continue;
            };
            if row.len() < 2 {
                row.push(String::new());
            }
            writer
                .write_record(&row)
                .map_err(|e| ImportError::EncodingDetection(e.to_string()))?;
        }
        writer.flush()?;

        if dropped > 0 {
            warn!("Dropped {} unparsable row(s) from {}", dropped, self.filepath.display());
        }
        self.delimiter = Some(OUTPUT_DELIMITER);
        Ok(())
    }

    fn temporary_filepath(&self) -> PathBuf {
        let name = self
            .filepath
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.filepath
            .with_file_name(format!(".{}.{}", Uuid::new_v4().simple(), name))
    }

    fn read_sample(&self) -> Result<Vec<u8>> {
        let mut sample = Vec::with_capacity(SAMPLE_READ_LIMIT.min(64 * 1024));
        File::open(&self.filepath)?
            .take(SAMPLE_READ_LIMIT as u64)
            .read_to_end(&mut sample)?;
        Ok(sample)
    }

    fn sample_lines(&self) -> Result<Vec<Vec<u8>>> {
        let sample = self.read_sample()?;
        Ok(sample
            .split_inclusive(|b| *b == b'\n')
            .take(LINES_FOR_DETECTION)
            .map(|line| line.to_vec())
            .collect())
    }

    fn first_line(&mut self) -> Result<Vec<u8>> {
        if let Some(line) = &self.first_line {
            return Ok(line.clone());
        }
        let line = self.sample_lines()?.into_iter().next().unwrap_or_default();
        self.first_line = Some(line.clone());
        Ok(line)
    }
}

fn choose_delimiter(lines: &[Vec<u8>]) -> u8 {
    let mut best: Option<(u8, f64)> = None;
    for candidate in COMMON_DELIMITERS {
        let counts: Vec<f64> = lines
            .iter()
            .map(|line| line.iter().filter(|b| **b == candidate).count() as f64)
            .collect();
        if counts.first().copied().unwrap_or(0.0) == 0.0 {
            continue;
        }
        let variance = sample_variance(&counts);
        match best {
            Some((_, lowest)) if variance >= lowest => {}
            _ => best = Some((candidate, variance)),
        }
    }
    best.map(|(d, _)| d).unwrap_or(DEFAULT_DELIMITER)
}

fn sample_variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64
}

fn detect_encoding(sample: &[u8]) -> &'static Encoding {
    match std::str::from_utf8(sample) {
        Ok(_) => return UTF_8,
        // a multi-byte sequence cut by the sample limit
        Err(e) if e.error_len().is_none() => return UTF_8,
        Err(_) => {}
    }

    let mut detector = EncodingDetector::new();
    detector.feed(sample, sample.len() < SAMPLE_READ_LIMIT);
    let guess = detector.guess(None, true);
    if guess
        .decode_without_bom_handling_and_without_replacement(sample)
        .is_some()
    {
        guess
    } else {
        UTF_8
    }
}

/// Field count of one raw line, whatever its encoding
fn count_fields(line: &[u8], delimiter: u8) -> usize {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(line);
    let mut record = csv::ByteRecord::new();
    match reader.read_byte_record(&mut record) {
        Ok(true) => record.len(),
        _ => 0,
    }
}

fn parse_line(line: &[u8], delimiter: u8) -> Option<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .delimiter(delimiter)
        .quote(b'"')
        .flexible(true)
        .from_reader(line);
    let mut record = csv::StringRecord::new();
    match reader.read_record(&mut record) {
        Ok(true) => Some(record.iter().map(str::to_string).collect()),
        _ => None,
    }
}
