// Listing card parsing: raw card text in, phone-keyed BusinessRecord out.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use leadwatch_common::types::{BusinessRecord, Location};

static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(?\d{3}\)?[\s-]?\d{3}[\s-]?\d{4}").unwrap());
static RATING_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d\.\d)").unwrap());
static COORDS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@(-?\d+\.\d+),(-?\d+\.\d+)").unwrap());

/// Reduce a phone string to bare digits. Only exactly-10-digit numbers
/// are usable as record keys; anything else is rejected.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() == 10 {
        Some(digits)
    } else {
        None
    }
}

/// Pull a lat/lng pair out of a maps search URL, if it has one.
pub fn coords_from_url(url: &str) -> Option<(f64, f64)> {
    let caps = COORDS_RE.captures(url)?;
    let lat = caps.get(1)?.as_str().parse().ok()?;
    let lng = caps.get(2)?.as_str().parse().ok()?;
    Some((lat, lng))
}

/// Parse one listing card. Returns None when the card has no usable
/// phone number or too few lines to be a real listing.
///
/// Card layout, after dropping blank lines and any `website:` side
/// lines the fetcher appended:
///   line 0  business name
///   line 1  reviews blurb, e.g. "4.8 (212)" or "No reviews"
///   line 2  category, possibly "Category · hours" style
/// The phone number may sit on any line.
pub fn parse(
    raw_text: &str,
    source_url: &str,
    location: Option<&Location>,
    scraped_at: DateTime<Utc>,
) -> Option<BusinessRecord> {
    let phone = normalize_phone(PHONE_RE.find(raw_text)?.as_str())?;

    let mut lines = Vec::new();
    let mut website = None;
    for line in raw_text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(rest) = strip_website_prefix(line) {
            if website.is_none() && !rest.is_empty() {
                website = Some(rest.to_string());
            }
            continue;
        }
        lines.push(line);
    }
    if lines.len() < 3 {
        return None;
    }

    let name = lines[0].to_string();
    let reviews = lines[1].to_string();
    let category = lines[2]
        .split('·')
        .next()
        .unwrap_or(lines[2])
        .trim()
        .to_string();
    let rating = RATING_RE
        .captures(&reviews)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok());

    let (city, state, zip_code, latitude, longitude) = match location {
        Some(loc) => (
            loc.city.clone(),
            loc.state.clone(),
            loc.zip.clone(),
            loc.lat,
            loc.lng,
        ),
        None => {
            let (lat, lng) = coords_from_url(source_url).unwrap_or((0.0, 0.0));
            (String::new(), String::new(), String::new(), lat, lng)
        }
    };

    let mut metadata = BTreeMap::new();
    metadata.insert("scraped_at".to_string(), scraped_at.to_rfc3339());

    Some(BusinessRecord {
        name,
        phone,
        category,
        city,
        state,
        zip_code,
        latitude,
        longitude,
        website,
        reviews,
        rating,
        source_url: source_url.to_string(),
        metadata,
    })
}

fn strip_website_prefix(line: &str) -> Option<&str> {
    let (prefix, rest) = line.split_once(':')?;
    if prefix.trim().eq_ignore_ascii_case("website") {
        Some(rest.trim())
    } else {
        None
    }
}
