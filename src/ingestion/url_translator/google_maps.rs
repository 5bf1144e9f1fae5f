use super::UrlTranslator;
use regex::Regex;
use std::sync::OnceLock;

/// Google "My Maps" viewer links → KML export
pub struct GoogleMaps;

fn viewer_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^https?://(?:www\.)?google\.com/maps/d/(?:u/\d+/)?(?:viewer|edit)\?(?:.*&)?mid=([\w-]+)")
            .expect("static maps pattern is valid")
    })
}

fn classic_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^https?://maps\.google\.[a-z.]+/maps/ms\?.*msid=")
            .expect("static classic maps pattern is valid")
    })
}

impl UrlTranslator for GoogleMaps {
    fn supported(&self, url: &str) -> bool {
        viewer_regex().is_match(url) || (classic_regex().is_match(url) && !url.contains("output=kml"))
    }

    fn translate(&self, url: &str) -> String {
        if let Some(caps) = viewer_regex().captures(url) {
            return format!(
                "https://www.google.com/maps/d/kml?mid={}&forcekml=1",
                &caps[1]
            );
        }
        format!("{}&output=kml", url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_viewer_link() {
        let url = "https://www.google.com/maps/d/viewer?mid=1xYz-AbC&ll=40.4,-3.7";
        assert!(GoogleMaps.supported(url));
        assert_eq!(
            GoogleMaps.translate(url),
            "https://www.google.com/maps/d/kml?mid=1xYz-AbC&forcekml=1"
        );
    }

    #[test]
    fn test_classic_link() {
        let url = "https://maps.google.com/maps/ms?ie=UTF8&msa=0&msid=2150.abc";
        assert!(GoogleMaps.supported(url));
        assert!(GoogleMaps.translate(url).ends_with("&output=kml"));
    }
}
