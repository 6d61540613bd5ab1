// Dedup gate: the single point where workers hand parsed records to
// the store. Serializes check-then-insert so no two workers can race
// the same phone number into duplicate rows or duplicate notifications.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use leadwatch_common::types::{BusinessRecord, NotificationFilters};
use leadwatch_store::{RecordStore, StoreError};

use crate::clock::Clock;
use crate::notify::Notifier;

/// Outcome of submitting one parsed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// First sighting; the record now exists under this id.
    Inserted { id: i64 },
    /// Already known; last_seen was advanced.
    Touched,
}

pub struct DedupGate {
    store: Arc<RecordStore>,
    notifier: Arc<dyn Notifier>,
    filters: NotificationFilters,
    clock: Arc<dyn Clock>,
    lock: Mutex<()>,
    notifications_enabled: AtomicBool,
    notifications_sent: AtomicU32,
    notifications_suppressed: AtomicU32,
}

impl DedupGate {
    pub fn new(
        store: Arc<RecordStore>,
        notifier: Arc<dyn Notifier>,
        filters: NotificationFilters,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            notifier,
            filters,
            clock,
            lock: Mutex::new(()),
            notifications_enabled: AtomicBool::new(true),
            notifications_sent: AtomicU32::new(0),
            notifications_suppressed: AtomicU32::new(0),
        }
    }

    /// Toggle delivery without touching dedup behavior. Used to mute
    /// the baseline cycle on a fresh database.
    pub fn set_notifications_enabled(&self, enabled: bool) {
        self.notifications_enabled.store(enabled, Ordering::Relaxed);
    }

    /// (sent, suppressed) so far.
    pub fn notification_counts(&self) -> (u32, u32) {
        (
            self.notifications_sent.load(Ordering::Relaxed),
            self.notifications_suppressed.load(Ordering::Relaxed),
        )
    }

    /// Check-and-insert one record. The lock spans the existence check
    /// and the write; notification happens after release so a slow
    /// webhook never blocks other workers.
    pub async fn submit(&self, record: &BusinessRecord) -> Result<Submission, StoreError> {
        let outcome = {
            let _guard = self.lock.lock().await;
            let now = self.clock.now();
            if self.store.exists(&record.phone).await? {
                self.store.touch_last_seen(&record.phone, now).await?;
                Submission::Touched
            } else {
                let id = self.store.insert(record, now).await?;
                Submission::Inserted { id }
            }
        };

        if let Submission::Inserted { id } = outcome {
            info!(
                id,
                phone = %record.phone,
                name = %record.name,
                city = %record.city,
                "New business discovered"
            );
            self.deliver(record).await;
        } else {
            debug!(phone = %record.phone, "Known business re-seen");
        }

        Ok(outcome)
    }

    /// Delivery failures are logged, never propagated: losing a webhook
    /// call must not lose the stored record.
    async fn deliver(&self, record: &BusinessRecord) {
        if !self.notifications_enabled.load(Ordering::Relaxed) {
            self.notifications_suppressed.fetch_add(1, Ordering::Relaxed);
            debug!(phone = %record.phone, "Notification suppressed (deliveries disabled)");
            return;
        }
        if !self.filters.matches(record) {
            self.notifications_suppressed.fetch_add(1, Ordering::Relaxed);
            debug!(phone = %record.phone, "Notification suppressed (filtered out)");
            return;
        }

        match self.notifier.notify(record).await {
            Ok(()) => {
                self.notifications_sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                warn!(
                    notifier = self.notifier.name(),
                    phone = %record.phone,
                    error = %e,
                    "Notification failed"
                );
            }
        }
    }
}
