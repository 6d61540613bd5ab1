use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::warn;

use leadwatch_common::types::BusinessRecord;

use super::Notifier;

/// Generic webhook notification backend. POSTs one JSON payload per
/// new business to whatever endpoint the operator configured.
pub struct WebhookNotifier {
    url: String,
    http: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Self {
        Self {
            url,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, record: &BusinessRecord) -> anyhow::Result<()> {
        let payload = json!({
            "timestamp": Utc::now().to_rfc3339(),
            "count": 1,
            "businesses": [record],
        });

        let resp = self.http.post(&self.url).json(&payload).send().await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "Webhook returned non-success");
            anyhow::bail!("Webhook returned {status}");
        }

        Ok(())
    }

    fn name(&self) -> &str {
        "webhook"
    }
}
