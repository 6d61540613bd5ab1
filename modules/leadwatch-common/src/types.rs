use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// --- Geo Types ---

/// One scannable place: a city center with enough metadata to build a
/// map search URL and fill in the geographic columns of a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub city: String,
    pub state: String,
    pub zip: String,
    pub lat: f64,
    pub lng: f64,
    pub population: u64,
}

impl Location {
    /// Human-readable "City, ST" label used in progress reports.
    pub fn label(&self) -> String {
        format!("{}, {}", self.city, self.state)
    }
}

/// Declarative selection over the location dataset. All criteria are
/// conjunctive; empty allow-lists mean "any".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationFilter {
    #[serde(default)]
    pub states: Option<Vec<String>>,
    #[serde(default)]
    pub cities: Option<Vec<String>>,
    #[serde(default)]
    pub min_population: u64,
}

impl LocationFilter {
    /// Compact description persisted alongside each scan cycle.
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if let Some(states) = &self.states {
            parts.push(format!("states={}", states.join(",")));
        }
        if let Some(cities) = &self.cities {
            parts.push(format!("cities={}", cities.join(",")));
        }
        if self.min_population > 0 {
            parts.push(format!("population>={}", self.min_population));
        }
        if parts.is_empty() {
            "all locations".to_string()
        } else {
            parts.join(" ")
        }
    }
}

// --- Business Records ---

/// A parsed business listing, keyed by its 10-digit phone number.
/// Geographic fields come from the Location that produced the search URL,
/// or from coordinates recovered out of the URL itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessRecord {
    pub name: String,
    pub phone: String,
    pub category: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    pub latitude: f64,
    pub longitude: f64,
    pub website: Option<String>,
    pub reviews: String,
    pub rating: Option<f64>,
    pub source_url: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl BusinessRecord {
    /// Whether the listing carries a real review blurb rather than a
    /// "No reviews" placeholder or nothing at all.
    pub fn has_reviews(&self) -> bool {
        let reviews = self.reviews.trim();
        !reviews.is_empty() && !reviews.eq_ignore_ascii_case("no reviews")
    }
}

/// Per-cycle summary appended to scan history after each full pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanCycleRecord {
    pub category: String,
    pub location_filter: String,
    pub businesses_found: u32,
    pub new_businesses: u32,
    pub duration_seconds: f64,
    pub started_at: DateTime<Utc>,
}

// --- Notification Policy ---

/// Which newly discovered businesses are worth telling anyone about.
/// All filters default to off, which notifies on every new record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationFilters {
    #[serde(default)]
    pub only_with_website: bool,
    #[serde(default)]
    pub only_with_reviews: bool,
    #[serde(default)]
    pub only_without_reviews: bool,
    #[serde(default)]
    pub min_rating: Option<f64>,
}

impl NotificationFilters {
    /// True when the record passes every configured filter. The rating
    /// floor only applies to records that actually carry a rating.
    pub fn matches(&self, record: &BusinessRecord) -> bool {
        if self.only_with_website && record.website.as_deref().unwrap_or("").trim().is_empty() {
            return false;
        }
        if self.only_with_reviews && !record.has_reviews() {
            return false;
        }
        if self.only_without_reviews && record.has_reviews() {
            return false;
        }
        if let (Some(floor), Some(rating)) = (self.min_rating, record.rating) {
            if rating < floor {
                return false;
            }
        }
        true
    }
}

// --- Progress & Stats ---

/// A single scan worker's running counters, republished after each
/// location it finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerState {
    pub instance_id: usize,
    pub current_location: String,
    pub urls_processed: u32,
    pub businesses_found: u32,
    pub new_businesses: u32,
    pub existing_businesses: u32,
    pub locations_failed: u32,
}

impl WorkerState {
    pub const READY: &'static str = "Ready";
    pub const COMPLETED: &'static str = "Completed";

    pub fn new(instance_id: usize) -> Self {
        Self {
            instance_id,
            current_location: Self::READY.to_string(),
            urls_processed: 0,
            businesses_found: 0,
            new_businesses: 0,
            existing_businesses: 0,
            locations_failed: 0,
        }
    }
}

/// Whole-run totals returned when a scan run finishes or is stopped.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScanStats {
    pub cycles_completed: u32,
    pub urls_processed: u32,
    pub businesses_found: u32,
    pub new_businesses: u32,
    pub existing_businesses: u32,
    pub locations_failed: u32,
    pub notifications_sent: u32,
    pub notifications_suppressed: u32,
}

impl std::fmt::Display for ScanStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "\n=== Scan Run Complete ===\n\
             Cycles completed:         {}\n\
             URLs processed:           {}\n\
             Businesses found:         {}\n\
             New businesses:           {}\n\
             Existing (re-seen):       {}\n\
             Locations failed:         {}\n\
             Notifications sent:       {}\n\
             Notifications suppressed: {}",
            self.cycles_completed,
            self.urls_processed,
            self.businesses_found,
            self.new_businesses,
            self.existing_businesses,
            self.locations_failed,
            self.notifications_sent,
            self.notifications_suppressed,
        )
    }
}
