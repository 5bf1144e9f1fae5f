//! URL translators for well-known hosting services
//!
//! A translator recognises a "share" or viewer URL and rewrites it into a
//! direct-download URL, optionally dictating the destination filename.

pub mod github;
pub mod google_docs;
pub mod google_maps;
pub mod osm;

pub use github::GitHub;
pub use google_docs::GoogleDocs;
pub use google_maps::GoogleMaps;
pub use osm::Osm;

pub trait UrlTranslator: Send + Sync {
    fn supported(&self, url: &str) -> bool;

    fn translate(&self, url: &str) -> String;

    /// Filename the download should be stored under, if the service dictates one
    fn rename_destination(&self, _url: &str) -> Option<String> {
        None
    }
}

/// Outcome of running a URL through the translator chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translation {
    pub url: String,
    pub filename: Option<String>,
}

/// Translators in priority order; the first one that supports a URL wins
pub fn default_translators() -> Vec<Box<dyn UrlTranslator>> {
    vec![
        Box::new(Osm),
        Box::new(GitHub),
        Box::new(GoogleMaps),
        Box::new(GoogleDocs),
    ]
}

pub fn translate(url: &str) -> Translation {
    translate_with(&default_translators(), url)
}

pub fn translate_with(translators: &[Box<dyn UrlTranslator>], url: &str) -> Translation {
    match translators.iter().find(|t| t.supported(url)) {
        Some(translator) => Translation {
            url: translator.translate(url),
            filename: translator.rename_destination(url),
        },
        None => Translation {
            url: url.to_string(),
            filename: None,
        },
    }
}
