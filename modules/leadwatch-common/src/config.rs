use std::env;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

use crate::error::ConfigError;
use crate::types::{LocationFilter, NotificationFilters};

/// Workers outside this range either waste a browser endpoint or overwhelm it.
pub const MIN_WORKERS: usize = 1;
pub const MAX_WORKERS: usize = 5;

/// Application configuration, loaded from a JSON file with a couple of
/// environment overrides for values that tend to differ per deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Business category to search for, e.g. "plumber".
    pub category: String,

    /// Which locations from the dataset to scan.
    #[serde(default)]
    pub locations: LocationFilter,

    /// Cap on how many filtered locations a run will cover.
    #[serde(default = "default_max_locations")]
    pub max_locations: usize,

    /// Concurrent scan workers, clamped to 1..=5.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// SQLite database path. `LEADWATCH_DB` overrides.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// CSV dataset of US cities (simplemaps column layout).
    #[serde(default = "default_locations_csv")]
    pub locations_csv: String,

    #[serde(default)]
    pub fetcher: FetcherConfig,

    /// Pause between full scan cycles in continuous mode.
    #[serde(default = "default_cycle_pause_secs")]
    pub cycle_pause_secs: u64,

    /// Randomize location order between cycles so the same cities are
    /// not always hit first.
    #[serde(default)]
    pub shuffle_cycles: bool,

    #[serde(default)]
    pub notifications: NotificationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetcherConfig {
    /// Render endpoint that turns a maps search URL into listing card text.
    pub endpoint: String,

    #[serde(default = "default_fetch_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:3000/render".to_string(),
            timeout_secs: default_fetch_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default)]
    pub webhook: WebhookConfig,

    #[serde(default)]
    pub filters: NotificationFilters,

    /// Mute notifications for the first cycle of a run so a fresh
    /// database does not flood the webhook with the existing world.
    #[serde(default)]
    pub suppress_baseline: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Target URL. `LEADWATCH_WEBHOOK_URL` overrides and implies enabled.
    #[serde(default)]
    pub url: String,
}

fn default_max_locations() -> usize {
    20
}

fn default_workers() -> usize {
    3
}

fn default_database_path() -> String {
    "leadwatch.db".to_string()
}

fn default_locations_csv() -> String {
    "data/uscities.csv".to_string()
}

fn default_cycle_pause_secs() -> u64 {
    60
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

impl AppConfig {
    /// Load, apply environment overrides, and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let mut config = Self::parse(&raw)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn parse(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Write the config back out as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(path, raw)?;
        Ok(())
    }

    /// Starter config written by `leadwatch init`.
    pub fn default_template() -> Self {
        Self {
            category: "plumber".to_string(),
            locations: LocationFilter {
                states: Some(vec!["TX".to_string()]),
                cities: None,
                min_population: 50_000,
            },
            max_locations: default_max_locations(),
            workers: default_workers(),
            database_path: default_database_path(),
            locations_csv: default_locations_csv(),
            fetcher: FetcherConfig::default(),
            cycle_pause_secs: default_cycle_pause_secs(),
            shuffle_cycles: false,
            notifications: NotificationConfig::default(),
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(db) = env::var("LEADWATCH_DB") {
            if !db.trim().is_empty() {
                self.database_path = db;
            }
        }
        if let Ok(url) = env::var("LEADWATCH_WEBHOOK_URL") {
            if !url.trim().is_empty() {
                self.notifications.webhook.url = url;
                self.notifications.webhook.enabled = true;
            }
        }
    }

    /// Check invariants and clamp what can be clamped rather than
    /// refusing to start over a recoverable value.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if self.category.trim().is_empty() {
            return Err(ConfigError::Invalid("category must not be empty".to_string()));
        }
        if !(MIN_WORKERS..=MAX_WORKERS).contains(&self.workers) {
            let clamped = self.workers.clamp(MIN_WORKERS, MAX_WORKERS);
            warn!(
                requested = self.workers,
                clamped, "Worker count outside 1-5, clamping"
            );
            self.workers = clamped;
        }
        if self.max_locations == 0 {
            return Err(ConfigError::Invalid(
                "max_locations must be at least 1".to_string(),
            ));
        }
        if self.cycle_pause_secs == 0 {
            return Err(ConfigError::Invalid(
                "cycle_pause_secs must be at least 1".to_string(),
            ));
        }
        if Url::parse(&self.fetcher.endpoint).is_err() {
            return Err(ConfigError::Invalid(format!(
                "fetcher.endpoint is not a valid URL: {}",
                self.fetcher.endpoint
            )));
        }
        if self.notifications.webhook.enabled && Url::parse(&self.notifications.webhook.url).is_err()
        {
            return Err(ConfigError::Invalid(format!(
                "webhook is enabled but its URL is not valid: {:?}",
                self.notifications.webhook.url
            )));
        }
        if let Some(floor) = self.notifications.filters.min_rating {
            if !(0.0..=5.0).contains(&floor) {
                return Err(ConfigError::Invalid(format!(
                    "min_rating must be between 0 and 5, got {floor}"
                )));
            }
        }
        Ok(())
    }

    pub fn cycle_pause(&self) -> Duration {
        Duration::from_secs(self.cycle_pause_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetcher.timeout_secs)
    }
}
