// Page fetching: turning a maps search URL into listing card texts.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::{info, warn};

/// Max retry attempts for transient fetch failures.
const FETCH_MAX_ATTEMPTS: u32 = 3;
/// Base backoff duration for fetch retries. Actual delay is base * 3^attempt + jitter.
const FETCH_RETRY_BASE: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Render endpoint returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Bad render payload: {0}")]
    Payload(String),
}

impl FetchError {
    /// Worth retrying: network faults, server-side errors, throttling.
    /// Client errors and malformed payloads will not get better.
    fn is_transient(&self) -> bool {
        match self {
            FetchError::Http(_) => true,
            FetchError::Status { status, .. } => *status >= 500 || *status == 429,
            FetchError::Payload(_) => false,
        }
    }
}

/// One fetcher instance per scan worker. Implementations carry whatever
/// session state the rendering backend needs.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch a search results page and return one string per listing card.
    async fn fetch(&self, url: &str) -> Result<Vec<String>, FetchError>;
    fn name(&self) -> &str;
}

/// Fetcher backed by a render endpoint that drives a real browser and
/// replies with a JSON array of card texts.
pub struct RemoteFetcher {
    client: reqwest::Client,
    endpoint: String,
    instance: usize,
}

impl RemoteFetcher {
    pub fn new(endpoint: &str, timeout: Duration, instance: usize) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to build HTTP client");

        info!(endpoint, instance, "Using RemoteFetcher");
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            instance,
        }
    }

    async fn fetch_once(&self, url: &str) -> Result<Vec<String>, FetchError> {
        let body = serde_json::json!({ "url": url });

        let resp = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let payload = resp.text().await?;
        parse_cards(&payload)
    }
}

#[async_trait]
impl PageFetcher for RemoteFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<String>, FetchError> {
        let mut attempt = 0;
        loop {
            match self.fetch_once(url).await {
                Ok(cards) => {
                    info!(
                        url,
                        fetcher = self.name(),
                        instance = self.instance,
                        cards = cards.len(),
                        "Fetched listing page"
                    );
                    return Ok(cards);
                }
                Err(e) if e.is_transient() && attempt + 1 < FETCH_MAX_ATTEMPTS => {
                    let backoff = FETCH_RETRY_BASE * 3u32.pow(attempt);
                    let jitter = Duration::from_millis(rand::rng().random_range(0..1000));
                    warn!(
                        url,
                        attempt = attempt + 1,
                        backoff_secs = backoff.as_secs(),
                        error = %e,
                        "Fetch failed, retrying after backoff"
                    );
                    tokio::time::sleep(backoff + jitter).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn name(&self) -> &str {
        "remote"
    }
}

/// Decode the render endpoint's reply: a JSON array of card strings.
fn parse_cards(payload: &str) -> Result<Vec<String>, FetchError> {
    serde_json::from_str::<Vec<String>>(payload)
        .map_err(|e| FetchError::Payload(format!("expected a JSON array of card texts: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_card_array() {
        let cards = parse_cards(r#"["Joe's\n4.5 (10)\nPlumber", "Second card"]"#).unwrap();
        assert_eq!(cards.len(), 2);
        assert!(cards[0].starts_with("Joe's"));
    }

    #[test]
    fn empty_array_is_fine() {
        assert!(parse_cards("[]").unwrap().is_empty());
    }

    #[test]
    fn rejects_non_array_payloads() {
        for bad in ["{\"cards\": []}", "\"text\"", "not json at all"] {
            let err = parse_cards(bad).unwrap_err();
            assert!(matches!(err, FetchError::Payload(_)), "payload {bad:?} gave {err:?}");
        }
    }

    #[test]
    fn transient_classification() {
        assert!(FetchError::Status { status: 503, message: String::new() }.is_transient());
        assert!(FetchError::Status { status: 429, message: String::new() }.is_transient());
        assert!(!FetchError::Status { status: 404, message: String::new() }.is_transient());
        assert!(!FetchError::Payload("nope".to_string()).is_transient());
    }
}
