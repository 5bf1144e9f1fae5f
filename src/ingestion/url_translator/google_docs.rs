use super::UrlTranslator;
use regex::Regex;
use std::sync::OnceLock;

/// Google Sheets share links → CSV export
pub struct GoogleDocs;

fn spreadsheet_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^https?://docs\.google\.com/spreadsheets/d/([\w-]+)")
            .expect("static spreadsheet pattern is valid")
    })
}

fn legacy_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^https?://docs\.google\.com/spreadsheet/\w+\?(?:.*&)?key=([\w-]+)")
            .expect("static legacy spreadsheet pattern is valid")
    })
}

impl UrlTranslator for GoogleDocs {
    fn supported(&self, url: &str) -> bool {
        let already_export = url.contains("/export?") || url.contains("output=csv");
        !already_export && (spreadsheet_regex().is_match(url) || legacy_regex().is_match(url))
    }

    fn translate(&self, url: &str) -> String {
        if let Some(caps) = spreadsheet_regex().captures(url) {
            return format!(
                "https://docs.google.com/spreadsheets/d/{}/export?format=csv",
                &caps[1]
            );
        }
        if let Some(caps) = legacy_regex().captures(url) {
            return format!(
                "https://docs.google.com/spreadsheet/pub?key={}&output=csv",
                &caps[1]
            );
        }
        url.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sheet_share_link() {
        let url = "https://docs.google.com/spreadsheets/d/1AbC-xyz_9/edit#gid=0";
        assert!(GoogleDocs.supported(url));
        assert_eq!(
            GoogleDocs.translate(url),
            "https://docs.google.com/spreadsheets/d/1AbC-xyz_9/export?format=csv"
        );
    }

    #[test]
    fn test_legacy_key_link() {
        let url = "https://docs.google.com/spreadsheet/ccc?key=0Aabc123&usp=sharing";
        assert!(GoogleDocs.supported(url));
        assert_eq!(
            GoogleDocs.translate(url),
            "https://docs.google.com/spreadsheet/pub?key=0Aabc123&output=csv"
        );
    }

    #[test]
    fn test_export_link_left_alone() {
        let url = "https://docs.google.com/spreadsheets/d/1AbC/export?format=csv";
        assert!(!GoogleDocs.supported(url));
    }
}
