use async_trait::async_trait;
use tracing::debug;

use leadwatch_common::types::BusinessRecord;

use super::Notifier;

/// Backend used when no webhook is configured. Discoveries still land
/// in the store; this just logs instead of delivering.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, record: &BusinessRecord) -> anyhow::Result<()> {
        debug!(phone = %record.phone, name = %record.name, "No notification backend configured");
        Ok(())
    }

    fn name(&self) -> &str {
        "noop"
    }
}
