// Test doubles for the scan engine.
//
// Three mocks matching the three trait boundaries:
// - MockFetcher (PageFetcher): serves registered cards per URL
// - CaptureNotifier (Notifier): records delivered payloads
// - TestClock (Clock): virtual time, sleeps return instantly
//
// Plus helpers for building Locations, card texts and BusinessRecords.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use leadwatch_common::types::{BusinessRecord, Location};

use crate::clock::Clock;
use crate::fetcher::{FetchError, PageFetcher};
use crate::notify::Notifier;

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

/// HashMap-based page fetcher. Returns `Err` for unregistered URLs.
/// Builder pattern: `.on()` registers cards, `.failing_on()` injects a
/// server error for one URL.
pub struct MockFetcher {
    cards: HashMap<String, Vec<String>>,
    failures: HashSet<String>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self {
            cards: HashMap::new(),
            failures: HashSet::new(),
        }
    }

    pub fn on(mut self, url: &str, cards: &[&str]) -> Self {
        self.cards
            .insert(url.to_string(), cards.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn failing_on(mut self, url: &str) -> Self {
        self.failures.insert(url.to_string());
        self
    }
}

#[async_trait]
impl PageFetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<String>, FetchError> {
        if self.failures.contains(url) {
            return Err(FetchError::Status {
                status: 503,
                message: "MockFetcher: forced failure".to_string(),
            });
        }
        self.cards
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::Payload(format!("MockFetcher: no cards registered for {url}")))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

// ---------------------------------------------------------------------------
// CaptureNotifier
// ---------------------------------------------------------------------------

/// Notifier that records everything delivered to it. `failing()` makes
/// every delivery return an error instead.
pub struct CaptureNotifier {
    delivered: Mutex<Vec<BusinessRecord>>,
    fail: bool,
}

impl CaptureNotifier {
    pub fn new() -> Self {
        Self {
            delivered: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            delivered: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn delivered(&self) -> Vec<BusinessRecord> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn delivered_phones(&self) -> Vec<String> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.phone.clone())
            .collect()
    }
}

#[async_trait]
impl Notifier for CaptureNotifier {
    async fn notify(&self, record: &BusinessRecord) -> anyhow::Result<()> {
        if self.fail {
            bail!("CaptureNotifier: forced delivery failure");
        }
        self.delivered.lock().unwrap().push(record.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "capture"
    }
}

// ---------------------------------------------------------------------------
// TestClock
// ---------------------------------------------------------------------------

/// Virtual clock. `sleep` returns immediately, records the requested
/// duration, and advances `now` by it, so pacing and inter-cycle pauses
/// keep multi-cycle timestamp ordering without real waiting.
pub struct TestClock {
    now: Mutex<DateTime<Utc>>,
    slept: Mutex<Vec<Duration>>,
}

impl TestClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
            slept: Mutex::new(Vec::new()),
        }
    }

    pub fn advance(&self, duration: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += chrono::Duration::from_std(duration).expect("duration fits");
    }

    /// Every duration passed to `sleep`, in call order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.slept.lock().unwrap().clone()
    }
}

#[async_trait]
impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }

    async fn sleep(&self, duration: Duration) {
        self.slept.lock().unwrap().push(duration);
        self.advance(duration);
    }
}

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

pub fn austin() -> Location {
    Location {
        city: "Austin".to_string(),
        state: "TX".to_string(),
        zip: "78701".to_string(),
        lat: 30.2672,
        lng: -97.7431,
        population: 961_855,
    }
}

pub fn dallas() -> Location {
    Location {
        city: "Dallas".to_string(),
        state: "TX".to_string(),
        zip: "75201".to_string(),
        lat: 32.7767,
        lng: -96.7970,
        population: 1_304_379,
    }
}

pub fn tulsa() -> Location {
    Location {
        city: "Tulsa".to_string(),
        state: "OK".to_string(),
        zip: "74103".to_string(),
        lat: 36.1540,
        lng: -95.9928,
        population: 411_401,
    }
}

/// A well-formed listing card: name, reviews, category, phone.
pub fn card(name: &str, phone: &str) -> String {
    format!("{name}\n4.8 (212)\nPlumber \u{b7} Open 24 hours\n{phone}")
}

/// A card that fails parsing: no phone number anywhere.
pub fn phoneless_card(name: &str) -> String {
    format!("{name}\n4.1 (9)\nPlumber")
}

/// A BusinessRecord as the card parser would produce it for Austin.
pub fn sample_record(phone: &str) -> BusinessRecord {
    let mut metadata = BTreeMap::new();
    metadata.insert(
        "scraped_at".to_string(),
        "2026-08-01T12:00:00+00:00".to_string(),
    );
    BusinessRecord {
        name: format!("Business {phone}"),
        phone: phone.to_string(),
        category: "Plumber".to_string(),
        city: "Austin".to_string(),
        state: "TX".to_string(),
        zip_code: "78701".to_string(),
        latitude: 30.2672,
        longitude: -97.7431,
        website: Some("https://example.com".to_string()),
        reviews: "4.8 (212)".to_string(),
        rating: Some(4.8),
        source_url: "https://www.google.com/maps/search/plumber/@30.2672,-97.7431,13z".to_string(),
        metadata,
    }
}

// ---------------------------------------------------------------------------
// Mock self-tests
// ---------------------------------------------------------------------------
