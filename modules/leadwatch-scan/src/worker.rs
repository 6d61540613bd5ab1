// One scan worker: walks its location chunk, fetches the search page
// for each, parses listing cards and pushes records through the gate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use leadwatch_common::types::{Location, WorkerState};

use crate::card;
use crate::clock::Clock;
use crate::error::ScanError;
use crate::fetcher::PageFetcher;
use crate::gate::{DedupGate, Submission};

/// Pacing window between locations, matching human-ish browsing speed.
const PACING_MIN_MS: u64 = 1_000;
const PACING_MAX_MS: u64 = 3_000;

/// Everything one worker needs for one cycle.
pub struct WorkerCtx {
    pub instance_id: usize,
    pub locations: Vec<Location>,
    pub category: String,
    pub fetcher: Arc<dyn PageFetcher>,
    pub gate: Arc<DedupGate>,
    pub progress: mpsc::UnboundedSender<WorkerState>,
    pub stop: watch::Receiver<bool>,
    pub abort: Arc<AtomicBool>,
    pub clock: Arc<dyn Clock>,
}

/// Build the maps search URL for a category around a map center.
pub fn search_url(category: &str, lat: f64, lng: f64) -> String {
    let category = category.trim().replace(' ', "+");
    format!("https://www.google.com/maps/search/{category}/@{lat},{lng},13z")
}

/// Run one worker over its chunk. Fetch failures are isolated to their
/// location; a store failure aborts the whole run, so the worker flags
/// its siblings down before returning the error.
pub async fn run_worker(ctx: WorkerCtx) -> Result<WorkerState, ScanError> {
    let mut state = WorkerState::new(ctx.instance_id);
    let _ = ctx.progress.send(state.clone());

    info!(
        worker = ctx.instance_id,
        locations = ctx.locations.len(),
        fetcher = ctx.fetcher.name(),
        "Scan worker starting"
    );

    let total = ctx.locations.len();
    for (idx, location) in ctx.locations.iter().enumerate() {
        if *ctx.stop.borrow() || ctx.abort.load(Ordering::Relaxed) {
            info!(
                worker = ctx.instance_id,
                remaining = total - idx,
                "Stop observed, leaving remaining locations"
            );
            break;
        }

        state.current_location = location.label();
        let url = search_url(&ctx.category, location.lat, location.lng);

        match ctx.fetcher.fetch(&url).await {
            Ok(cards) => {
                state.urls_processed += 1;
                let scraped_at = ctx.clock.now();
                let mut parsed = 0u32;
                for raw in &cards {
                    let Some(record) = card::parse(raw, &url, Some(location), scraped_at) else {
                        continue;
                    };
                    parsed += 1;
                    match ctx.gate.submit(&record).await {
                        Ok(Submission::Inserted { .. }) => state.new_businesses += 1,
                        Ok(Submission::Touched) => state.existing_businesses += 1,
                        Err(e) => {
                            error!(
                                worker = ctx.instance_id,
                                error = %e,
                                "Record store unavailable, aborting run"
                            );
                            ctx.abort.store(true, Ordering::Relaxed);
                            return Err(e.into());
                        }
                    }
                }
                state.businesses_found += parsed;
                debug!(
                    worker = ctx.instance_id,
                    location = %location.label(),
                    cards = cards.len(),
                    parsed,
                    "Location scanned"
                );
            }
            Err(e) => {
                state.locations_failed += 1;
                warn!(
                    worker = ctx.instance_id,
                    location = %location.label(),
                    error = %e,
                    "Location fetch failed, continuing"
                );
            }
        }

        let _ = ctx.progress.send(state.clone());

        if idx + 1 < total {
            let pause = Duration::from_millis(rand::rng().random_range(PACING_MIN_MS..PACING_MAX_MS));
            ctx.clock.sleep(pause).await;
        }
    }

    state.current_location = WorkerState::COMPLETED.to_string();
    let _ = ctx.progress.send(state.clone());

    info!(
        worker = ctx.instance_id,
        urls = state.urls_processed,
        new = state.new_businesses,
        existing = state.existing_businesses,
        failed = state.locations_failed,
        "Scan worker finished"
    );
    Ok(state)
}
