// Progress aggregation. Workers never share mutable state: they send
// owned WorkerState snapshots over a channel, and one fold per cycle
// publishes the combined picture to a watch for whoever is looking.

use std::collections::BTreeMap;

use serde::Serialize;
use tokio::sync::{mpsc, watch};

use leadwatch_common::types::WorkerState;

/// Cycle-level totals folded from the latest snapshot of each worker.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProgressTotals {
    pub urls_processed: u32,
    pub businesses_found: u32,
    pub new_businesses: u32,
    pub existing_businesses: u32,
    pub locations_failed: u32,
}

/// What an observer sees: per-worker states (ordered by instance id)
/// plus their totals, for the cycle currently running.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProgressSnapshot {
    pub cycle: u32,
    pub workers: Vec<WorkerState>,
    pub totals: ProgressTotals,
}

/// Drain worker updates until every sender is gone, republishing a
/// fresh snapshot after each one. Later updates from a worker replace
/// its earlier entry.
pub(crate) async fn aggregate(
    mut updates: mpsc::UnboundedReceiver<WorkerState>,
    snapshots: &watch::Sender<ProgressSnapshot>,
    cycle: u32,
) {
    let mut by_worker: BTreeMap<usize, WorkerState> = BTreeMap::new();

    while let Some(update) = updates.recv().await {
        by_worker.insert(update.instance_id, update);

        let mut totals = ProgressTotals::default();
        for state in by_worker.values() {
            totals.urls_processed += state.urls_processed;
            totals.businesses_found += state.businesses_found;
            totals.new_businesses += state.new_businesses;
            totals.existing_businesses += state.existing_businesses;
            totals.locations_failed += state.locations_failed;
        }

        let _ = snapshots.send(ProgressSnapshot {
            cycle,
            workers: by_worker.values().cloned().collect(),
            totals,
        });
    }
}
