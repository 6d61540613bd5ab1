// Location dataset loading and filtering.

use std::io::Read;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;
use tracing::{info, warn};

use leadwatch_common::types::{Location, LocationFilter};

use crate::error::ScanError;

/// One row of the simplemaps US cities dataset. Columns we don't use
/// are ignored by the CSV reader.
#[derive(Debug, Deserialize)]
struct CityRow {
    city: String,
    state_id: String,
    #[serde(default)]
    zips: String,
    lat: f64,
    lng: f64,
    #[serde(default)]
    population: Option<u64>,
}

impl CityRow {
    fn into_location(self) -> Location {
        let zip = self
            .zips
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_string();
        Location {
            city: self.city,
            state: self.state_id,
            zip,
            lat: self.lat,
            lng: self.lng,
            population: self.population.unwrap_or(0),
        }
    }
}

/// Load every location in the dataset. Malformed rows are skipped with
/// a warning rather than failing the whole load.
pub fn load_locations(path: impl AsRef<Path>) -> Result<Vec<Location>, ScanError> {
    let path = path.as_ref();
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open location dataset {}", path.display()))?;
    let locations = read_locations(file)?;
    info!(path = %path.display(), count = locations.len(), "Loaded location dataset");
    Ok(locations)
}

fn read_locations(reader: impl Read) -> Result<Vec<Location>, ScanError> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let mut locations = Vec::new();
    for result in rdr.deserialize::<CityRow>() {
        match result {
            Ok(row) => locations.push(row.into_location()),
            Err(e) => warn!(error = %e, "Skipping malformed location row"),
        }
    }
    Ok(locations)
}

/// Apply the configured filter and order by population, biggest first.
/// State and city matching is case-insensitive; empty allow-lists mean
/// no restriction.
pub fn filter_locations(locations: &[Location], filter: &LocationFilter) -> Vec<Location> {
    let mut selected: Vec<Location> = locations
        .iter()
        .filter(|loc| {
            if loc.population < filter.min_population {
                return false;
            }
            if let Some(states) = &filter.states {
                if !states.iter().any(|s| s.eq_ignore_ascii_case(&loc.state)) {
                    return false;
                }
            }
            if let Some(cities) = &filter.cities {
                if !cities.iter().any(|c| c.eq_ignore_ascii_case(&loc.city)) {
                    return false;
                }
            }
            true
        })
        .cloned()
        .collect();

    selected.sort_by(|a, b| b.population.cmp(&a.population));
    selected
}
