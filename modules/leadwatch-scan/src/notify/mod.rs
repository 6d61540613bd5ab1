pub mod noop;
pub mod webhook;

use async_trait::async_trait;

use leadwatch_common::types::BusinessRecord;

pub use noop::NoopNotifier;
pub use webhook::WebhookNotifier;

/// Pluggable delivery backend for new-business notifications. Called
/// once per newly inserted record, never for re-sightings.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, record: &BusinessRecord) -> anyhow::Result<()>;
    fn name(&self) -> &str;
}
