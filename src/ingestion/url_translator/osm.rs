use super::UrlTranslator;
use regex::Regex;
use std::sync::OnceLock;

/// OpenStreetMap map views → bounding-box export through the OSM API
pub struct Osm;

const API_URL: &str = "https://api.openstreetmap.org/api/0.6/map";
const EXPORT_FILENAME: &str = "osm_export.osm";
// Viewport assumed when turning a zoom level into a bounding box.
const VIEWPORT_WIDTH_PX: f64 = 1024.0;
const VIEWPORT_HEIGHT_PX: f64 = 768.0;
const TILE_SIZE_PX: f64 = 256.0;

fn hash_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"openstreetmap\.org/.*#map=(\d+)/(-?[\d.]+)/(-?[\d.]+)")
            .expect("static osm pattern is valid")
    })
}

fn query_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"openstreetmap\.org/.*[?&]lat=(-?[\d.]+)&lon=(-?[\d.]+)&zoom=(\d+)")
            .expect("static legacy osm pattern is valid")
    })
}

/// (zoom, lat, lon) from either URL flavour
fn view_from(url: &str) -> Option<(u32, f64, f64)> {
    if let Some(caps) = hash_regex().captures(url) {
        return Some((caps[1].parse().ok()?, caps[2].parse().ok()?, caps[3].parse().ok()?));
    }
    let caps = query_regex().captures(url)?;
    Some((caps[3].parse().ok()?, caps[1].parse().ok()?, caps[2].parse().ok()?))
}

/// west, south, east, north
pub fn bounding_box(zoom: u32, lat: f64, lon: f64) -> (f64, f64, f64, f64) {
    let degrees_per_px = 360.0 / (TILE_SIZE_PX * 2f64.powi(zoom.min(30) as i32));
    let half_width = degrees_per_px * VIEWPORT_WIDTH_PX / 2.0;
    let half_height = degrees_per_px * VIEWPORT_HEIGHT_PX / 2.0 * lat.to_radians().cos();
    let round = |v: f64| (v * 1e6).round() / 1e6;
    (
        round((lon - half_width).max(-180.0)),
        round((lat - half_height).max(-90.0)),
        round((lon + half_width).min(180.0)),
        round((lat + half_height).min(90.0)),
    )
}

impl UrlTranslator for Osm {
    fn supported(&self, url: &str) -> bool {
        view_from(url).is_some()
    }

    fn translate(&self, url: &str) -> String {
        match view_from(url) {
            Some((zoom, lat, lon)) => {
                let (west, south, east, north) = bounding_box(zoom, lat, lon);
                format!("{}?bbox={},{},{},{}", API_URL, west, south, east, north)
            }
            None => url.to_string(),
        }
    }

    fn rename_destination(&self, _url: &str) -> Option<String> {
        Some(EXPORT_FILENAME.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_view() {
        let url = "https://www.openstreetmap.org/#map=17/40.41680/-3.70380";
        assert!(Osm.supported(url));
        let translated = Osm.translate(url);
        assert!(translated.starts_with("https://api.openstreetmap.org/api/0.6/map?bbox="));
        assert_eq!(Osm.rename_destination(url).as_deref(), Some("osm_export.osm"));
    }

    #[test]
    fn test_bbox_contains_center() {
        let (west, south, east, north) = bounding_box(15, 51.5, -0.12);
        assert!(west < -0.12 && -0.12 < east);
        assert!(south < 51.5 && 51.5 < north);
    }

    #[test]
    fn test_legacy_query_view() {
        let url = "http://www.openstreetmap.org/index.html?lat=51.5&lon=-0.12&zoom=16";
        assert!(Osm.supported(url));
    }

    #[test]
    fn test_other_hosts_ignored() {
        assert!(!Osm.supported("http://example.com/#map=17/40.4/-3.7"));
    }
}
