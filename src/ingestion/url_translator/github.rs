use super::UrlTranslator;
use regex::Regex;
use std::sync::OnceLock;

/// `github.com/<owner>/<repo>/blob/<ref>/<path>` → raw file URL
pub struct GitHub;

fn blob_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^https?://(?:www\.)?github\.com/([^/]+)/([^/]+)/blob/(.+)$")
            .expect("static github pattern is valid")
    })
}

impl UrlTranslator for GitHub {
    fn supported(&self, url: &str) -> bool {
        blob_regex().is_match(url)
    }

    fn translate(&self, url: &str) -> String {
        match blob_regex().captures(url) {
            Some(caps) => format!(
                "https://raw.githubusercontent.com/{}/{}/{}",
                &caps[1], &caps[2], &caps[3]
            ),
            None => url.to_string(),
        }
    }
}
