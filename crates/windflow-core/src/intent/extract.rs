//! Typed parameter extractors
//!
//! Each extractor scans the whole query independently, so parameter order in
//! the text does not matter.

use lazy_static::lazy_static;
use regex::Regex;

use crate::types::Coordinates;

lazy_static! {
    static ref COORDINATE_PAIR: Regex =
        Regex::new(r"([-+]?\d{1,3}\.\d+)\s*,\s*([-+]?\d{1,3}\.\d+)").unwrap();
    static ref UNIT_SUFFIX: Regex =
        Regex::new(r"(?i)^\s*(?:gw|mw|kw|w|gigawatts?|megawatts?|kilowatts?|m|km|%|degrees?|°)\b").unwrap();
    static ref CAPACITY: Regex = Regex::new(
        r"(?i)(\d+(?:\.\d+)?)\s*(gw|mw|kw|gigawatts?|megawatts?|kilowatts?)\b"
    )
    .unwrap();
    static ref TURBINE_COUNT: Regex =
        Regex::new(r"(?i)\b(\d{1,4})\s*(?:x\s*)?(?:turbines?|wtgs?|units)\b").unwrap();
    static ref DIRECTION_DEGREES: Regex =
        Regex::new(r"(?i)(\d{1,3}(?:\.\d+)?)\s*(?:°|degrees?\b|deg\b)").unwrap();
    static ref DIRECTION_COMPASS: Regex = Regex::new(
        r"(?i)\bfrom\s+the\s+(north(?:east|west)?|south(?:east|west)?|east|west|nne|ene|ese|sse|ssw|wsw|wnw|nnw|ne|se|sw|nw|n|e|s|w)\b"
    )
    .unwrap();
    static ref QUOTED_NAME: Regex =
        Regex::new(r#"(?:^|[\s(:])["“'‘]([^"”'’]{2,80})["”'’]"#).unwrap();
    static ref PROJECT_KEYWORD: Regex =
        Regex::new(r"(?i)\bproject\s+(?:named\s+|called\s+)?([a-z0-9][a-z0-9_\-]*)").unwrap();
    static ref PREPOSITION_REF: Regex = Regex::new(
        r"(?i)\b(?:for|at)\s+([a-z][a-z0-9_\-]*(?:\s+[a-z0-9][a-z0-9_\-.]*){0,5})"
    )
    .unwrap();
}

/// Words that end a preposition-bound project reference
const REFERENCE_STOP_WORDS: &[&str] = &[
    "with", "using", "and", "to", "from", "at", "for", "in", "on", "of", "by", "near", "please",
    "then", "that", "which", "where", "including",
];

/// Leading words dropped from a preposition-bound reference
const ARTICLES: &[&str] = &["a", "an", "the"];

/// Measurement words that end a preposition-bound reference
const UNIT_WORDS: &[&str] = &[
    "mw", "gw", "kw", "w", "megawatt", "megawatts", "gigawatt", "gigawatts", "kilowatt",
    "kilowatts", "turbine", "turbines", "wtg", "wtgs", "units", "m", "km", "deg", "degree",
    "degrees", "percent",
];

/// References that point at context rather than naming a project
const NON_REFERENCES: &[&str] = &[
    "it", "this", "that", "this-project", "that-project", "my-project", "the-project", "project",
    "site", "this-site", "the-site", "my-site", "current-project", "all", "all-projects",
    "every-project", "projects", "turbines", "layout", "terrain", "report", "simulation",
    "wake-simulation", "area", "location", "coordinates", "me", "us", "now", "here", "there",
    "details", "status", "summary", "info", "list", "farm", "wind-farm", "new-project",
    "new-site",
];

/// Two comma-separated decimal numbers, each containing a decimal point.
///
/// A number directly followed by a unit is never read as half of a pair.
pub fn coordinates(query: &str) -> Option<Coordinates> {
    for caps in COORDINATE_PAIR.captures_iter(query) {
        let whole = caps.get(0)?;

        let before = query[..whole.start()].chars().next_back();
        if matches!(before, Some(c) if c.is_ascii_digit() || c == '.') {
            continue;
        }
        let after = &query[whole.end()..];
        if after.starts_with(|c: char| c.is_ascii_digit() || c == '.') {
            continue;
        }
        if UNIT_SUFFIX.is_match(after) {
            continue;
        }

        let lat = caps.get(1)?.as_str().parse::<f64>().ok();
        let lon = caps.get(2)?.as_str().parse::<f64>().ok();
        if let (Some(lat), Some(lon)) = (lat, lon) {
            if let Some(coords) = Coordinates::new(lat, lon) {
                return Some(coords);
            }
        }
    }
    None
}

/// Capacity normalized to megawatts
pub fn capacity_mw(query: &str) -> Option<f64> {
    let caps = CAPACITY.captures(query)?;
    let value: f64 = caps.get(1)?.as_str().parse().ok()?;
    let unit = caps.get(2)?.as_str().to_lowercase();
    let mw = if unit.starts_with('g') {
        value * 1000.0
    } else if unit.starts_with('k') {
        value / 1000.0
    } else {
        value
    };
    (mw > 0.0).then_some(mw)
}

/// Number of turbines
pub fn turbine_count(query: &str) -> Option<u32> {
    let caps = TURBINE_COUNT.captures(query)?;
    caps.get(1)?.as_str().parse().ok().filter(|n| *n > 0)
}

/// Prevailing wind direction in degrees clockwise from north
pub fn wind_direction_deg(query: &str) -> Option<f64> {
    if let Some(caps) = DIRECTION_DEGREES.captures(query) {
        let value: f64 = caps.get(1)?.as_str().parse().ok()?;
        if (0.0..=360.0).contains(&value) {
            return Some(value % 360.0);
        }
    }

    let caps = DIRECTION_COMPASS.captures(query)?;
    compass_degrees(&caps.get(1)?.as_str().to_lowercase())
}

fn compass_degrees(point: &str) -> Option<f64> {
    let degrees = match point {
        "n" | "north" => 0.0,
        "nne" => 22.5,
        "ne" | "northeast" => 45.0,
        "ene" => 67.5,
        "e" | "east" => 90.0,
        "ese" => 112.5,
        "se" | "southeast" => 135.0,
        "sse" => 157.5,
        "s" | "south" => 180.0,
        "ssw" => 202.5,
        "sw" | "southwest" => 225.0,
        "wsw" => 247.5,
        "w" | "west" => 270.0,
        "wnw" => 292.5,
        "nw" | "northwest" => 315.0,
        "nnw" => 337.5,
        _ => return None,
    };
    Some(degrees)
}

/// Explicit project reference, in order of precedence: a quoted name, the
/// word after "project", or the words bound by a preposition.
pub fn project_reference(query: &str) -> Option<String> {
    if let Some(caps) = QUOTED_NAME.captures(query) {
        let name = caps.get(1)?.as_str().trim();
        if is_reference(name) {
            return Some(name.to_string());
        }
    }

    for caps in PROJECT_KEYWORD.captures_iter(query) {
        let name = caps.get(1)?.as_str();
        if is_reference(name) {
            return Some(name.to_string());
        }
    }

    for caps in PREPOSITION_REF.captures_iter(query) {
        let words: Vec<&str> = caps
            .get(1)?
            .as_str()
            .split_whitespace()
            .skip_while(|word| ARTICLES.contains(&word.to_lowercase().as_str()))
            .take_while(|word| !ends_reference(word))
            .collect();
        if words.is_empty() {
            continue;
        }
        let name = words.join(" ");
        if is_reference(&name) {
            return Some(name);
        }
    }

    None
}

/// Stop words, numbers and measurement units never belong to a name
fn ends_reference(word: &str) -> bool {
    let lower = word.to_lowercase();
    REFERENCE_STOP_WORDS.contains(&lower.as_str())
        || UNIT_WORDS.contains(&lower.as_str())
        || lower.starts_with(|c: char| c.is_ascii_digit())
}

fn is_reference(candidate: &str) -> bool {
    let normalized = crate::project::normalize_name(candidate);
    if normalized.is_empty() || NON_REFERENCES.contains(&normalized.as_str()) {
        return false;
    }
    if normalized.parse::<f64>().is_ok() || coordinates(candidate).is_some() {
        return false;
    }
    // "my-projects", "the-layout" and similar context phrases
    let stripped = normalized
        .trim_start_matches("the-")
        .trim_start_matches("my-")
        .trim_start_matches("this-");
    !NON_REFERENCES.contains(&stripped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinates_extracted() {
        let coords = coordinates("analyze terrain at 35.5, -101.4").unwrap();
        assert_eq!(coords.lat, 35.5);
        assert_eq!(coords.lon, -101.4);

        let coords = coordinates("site (32.7767,-96.7970) please").unwrap();
        assert_eq!(coords.lat, 32.7767);
    }

    #[test]
    fn test_capacity_is_not_a_coordinate() {
        assert!(coordinates("optimize layout with 2.5 MW turbines").is_none());
        assert!(coordinates("use 2.5 MW, 3.5 MW options").is_none());
        assert!(coordinates("analyze 35, -101").is_none());
        assert!(coordinates("bad pair 95.0, 10.0").is_none());
    }

    #[test]
    fn test_capacity() {
        assert_eq!(capacity_mw("a 150 MW farm"), Some(150.0));
        assert_eq!(capacity_mw("1.2 GW total"), Some(1200.0));
        assert_eq!(capacity_mw("2500 kW turbines"), Some(2.5));
        assert_eq!(capacity_mw("no capacity here"), None);
    }

    #[test]
    fn test_turbine_count() {
        assert_eq!(turbine_count("place 40 turbines"), Some(40));
        assert_eq!(turbine_count("with 12x WTGs"), Some(12));
        assert_eq!(turbine_count("turbines everywhere"), None);
    }

    #[test]
    fn test_wind_direction() {
        assert_eq!(wind_direction_deg("prevailing wind 225 degrees"), Some(225.0));
        assert_eq!(wind_direction_deg("wind from the northwest"), Some(315.0));
        assert_eq!(wind_direction_deg("wind from the SSW"), Some(202.5));
        assert_eq!(wind_direction_deg("calm day"), None);
    }

    #[test]
    fn test_project_reference() {
        assert_eq!(project_reference("optimize layout for texas").as_deref(), Some("texas"));
        assert_eq!(project_reference("generate report for site-9").as_deref(), Some("site-9"));
        assert_eq!(
            project_reference("run wake simulation for West Texas Wind Farm with 50 turbines")
                .as_deref(),
            Some("West Texas Wind Farm")
        );
        assert_eq!(
            project_reference("show details of project amarillo-ridge").as_deref(),
            Some("amarillo-ridge")
        );
        assert_eq!(
            project_reference("generate a report for \"Panhandle North\"").as_deref(),
            Some("Panhandle North")
        );
    }

    #[test]
    fn test_context_phrases_are_not_references() {
        assert!(project_reference("analyze terrain at 35.5, -101.4").is_none());
        assert!(project_reference("generate report for this project").is_none());
        assert!(project_reference("optimize layout for 40 turbines").is_none());
        assert!(project_reference("run the simulation for it").is_none());
    }

    #[test]
    fn test_in_and_on_phrases_are_not_references() {
        assert!(project_reference("run wake simulation on the optimized layout").is_none());
        assert!(project_reference("optimize turbines in the northern area").is_none());
    }

    #[test]
    fn test_numeric_phrase_is_not_a_reference() {
        assert!(project_reference("analyze terrain at 35.5, -101.4 for a 150 MW farm").is_none());
        assert!(project_reference("optimize layout for a 2.5 MW turbine model").is_none());
        assert_eq!(
            project_reference("generate report for the Panhandle site with 40 turbines").as_deref(),
            Some("Panhandle site")
        );
        assert_eq!(
            project_reference("run wake simulation for amarillo 150 MW").as_deref(),
            Some("amarillo")
        );
    }
}
