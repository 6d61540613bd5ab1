// Scan run coordinator. Owns the cycle loop: partition locations,
// fan out workers, fold their counters, record the cycle, pause,
// repeat until a stop request or the cycle limit.

use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use leadwatch_common::config::{MAX_WORKERS, MIN_WORKERS};
use leadwatch_common::types::{Location, NotificationFilters, ScanCycleRecord, ScanStats};
use leadwatch_store::RecordStore;

use crate::clock::Clock;
use crate::error::ScanError;
use crate::fetcher::PageFetcher;
use crate::gate::DedupGate;
use crate::notify::Notifier;
use crate::partition::partition;
use crate::progress::{self, ProgressSnapshot};
use crate::worker::{run_worker, WorkerCtx};

/// Lifecycle of a scan run, published through the handle's state channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EngineState::Idle => "idle",
            EngineState::Running => "running",
            EngineState::Stopping => "stopping",
            EngineState::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

/// Per-run knobs, resolved from the app config before `start`.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub category: String,
    /// Human-readable description of the location filter, stored with
    /// each cycle record.
    pub location_filter: String,
    pub workers: usize,
    pub cycle_pause: Duration,
    /// `None` runs until stopped.
    pub max_cycles: Option<u32>,
    pub shuffle_cycles: bool,
    /// Treat the first cycle as a baseline: store everything, notify
    /// for nothing, then enable notifications from cycle two.
    pub suppress_baseline: bool,
}

/// Collaborators injected into a run. One fetcher per worker slot.
#[derive(Clone, TypedBuilder)]
pub struct ScanDeps {
    pub store: Arc<RecordStore>,
    pub notifier: Arc<dyn Notifier>,
    pub fetchers: Vec<Arc<dyn PageFetcher>>,
    pub clock: Arc<dyn Clock>,
    #[builder(default)]
    pub filters: NotificationFilters,
}

/// Live handle to a running scan.
#[derive(Debug)]
pub struct ScanHandle {
    stop: Arc<watch::Sender<bool>>,
    state_rx: watch::Receiver<EngineState>,
    progress_rx: watch::Receiver<ProgressSnapshot>,
    run: JoinHandle<Result<ScanStats, ScanError>>,
}

impl ScanHandle {
    /// Ask the run to wind down. Workers finish their current location,
    /// the partial cycle is recorded, then the run task exits.
    pub fn request_stop(&self) {
        let _ = self.stop.send(true);
    }

    /// Detached stop trigger for signal handlers.
    pub fn stopper(&self) -> ScanStopper {
        ScanStopper {
            stop: self.stop.clone(),
        }
    }

    pub fn state(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    pub fn progress(&self) -> watch::Receiver<ProgressSnapshot> {
        self.progress_rx.clone()
    }

    /// Wait for the run to finish and return its stats.
    pub async fn wait(&mut self) -> Result<ScanStats, ScanError> {
        match (&mut self.run).await {
            Ok(result) => result,
            Err(e) => Err(ScanError::Other(anyhow::anyhow!(
                "scan task panicked: {e}"
            ))),
        }
    }
}

/// Clonable stop trigger, detached from the handle's lifetime.
#[derive(Clone)]
pub struct ScanStopper {
    stop: Arc<watch::Sender<bool>>,
}

impl ScanStopper {
    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }
}

/// Validate the run parameters and spawn the scan task.
pub fn start(
    cfg: ScanConfig,
    locations: Vec<Location>,
    deps: ScanDeps,
) -> Result<ScanHandle, ScanError> {
    if cfg.category.trim().is_empty() {
        return Err(ScanError::Config("scan category is empty".to_string()));
    }
    if locations.is_empty() {
        return Err(ScanError::Config(
            "no locations matched the filter".to_string(),
        ));
    }
    let workers = cfg.workers.clamp(MIN_WORKERS, MAX_WORKERS);
    if workers != cfg.workers {
        warn!(
            requested = cfg.workers,
            clamped = workers,
            "Worker count outside 1-5, clamping"
        );
    }
    if deps.fetchers.len() < workers {
        return Err(ScanError::Config(format!(
            "{} fetchers for {workers} workers",
            deps.fetchers.len()
        )));
    }

    let (stop_tx, stop_rx) = watch::channel(false);
    let (state_tx, state_rx) = watch::channel(EngineState::Idle);
    let (progress_tx, progress_rx) = watch::channel(ProgressSnapshot::default());

    let run = tokio::spawn(run_scan(
        cfg,
        workers,
        locations,
        deps,
        stop_rx,
        state_tx,
        progress_tx,
    ));

    Ok(ScanHandle {
        stop: Arc::new(stop_tx),
        state_rx,
        progress_rx,
        run,
    })
}

async fn run_scan(
    cfg: ScanConfig,
    workers: usize,
    locations: Vec<Location>,
    deps: ScanDeps,
    mut stop_rx: watch::Receiver<bool>,
    state_tx: watch::Sender<EngineState>,
    progress_tx: watch::Sender<ProgressSnapshot>,
) -> Result<ScanStats, ScanError> {
    let run_id = Uuid::new_v4();
    let _ = state_tx.send(EngineState::Running);
    info!(
        %run_id,
        category = %cfg.category,
        locations = locations.len(),
        workers,
        "Scan run starting"
    );

    let gate = Arc::new(DedupGate::new(
        deps.store.clone(),
        deps.notifier.clone(),
        deps.filters.clone(),
        deps.clock.clone(),
    ));
    if cfg.suppress_baseline {
        gate.set_notifications_enabled(false);
        info!(%run_id, "Baseline cycle, notifications suppressed until it completes");
    }

    let abort = Arc::new(AtomicBool::new(false));
    let mut stats = ScanStats::default();
    let mut cycle: u32 = 0;

    loop {
        if *stop_rx.borrow() {
            let _ = state_tx.send(EngineState::Stopping);
            break;
        }
        cycle += 1;
        let started_at = deps.clock.now();

        let mut ordered = locations.clone();
        if cfg.shuffle_cycles && cycle > 1 {
            ordered.shuffle(&mut rand::rng());
        }
        let chunks = partition(&ordered, workers);

        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let mut handles = Vec::with_capacity(workers);
        for (instance_id, chunk) in chunks.into_iter().enumerate() {
            let ctx = WorkerCtx {
                instance_id,
                locations: chunk,
                category: cfg.category.clone(),
                fetcher: deps.fetchers[instance_id].clone(),
                gate: gate.clone(),
                progress: update_tx.clone(),
                stop: stop_rx.clone(),
                abort: abort.clone(),
                clock: deps.clock.clone(),
            };
            handles.push(tokio::spawn(run_worker(ctx)));
        }
        drop(update_tx);

        let (worker_results, ()) = tokio::join!(
            join_all(handles),
            progress::aggregate(update_rx, &progress_tx, cycle),
        );

        let mut cycle_urls = 0u32;
        let mut cycle_found = 0u32;
        let mut cycle_new = 0u32;
        for result in worker_results {
            let state = match result {
                Ok(Ok(state)) => state,
                Ok(Err(e)) => {
                    error!(%run_id, error = %e, "Worker failed, stopping run");
                    let _ = state_tx.send(EngineState::Stopped);
                    return Err(e);
                }
                Err(e) => {
                    error!(%run_id, error = %e, "Worker task panicked, stopping run");
                    let _ = state_tx.send(EngineState::Stopped);
                    return Err(ScanError::Other(anyhow::anyhow!(
                        "worker task panicked: {e}"
                    )));
                }
            };
            cycle_urls += state.urls_processed;
            cycle_found += state.businesses_found;
            cycle_new += state.new_businesses;
            stats.urls_processed += state.urls_processed;
            stats.businesses_found += state.businesses_found;
            stats.new_businesses += state.new_businesses;
            stats.existing_businesses += state.existing_businesses;
            stats.locations_failed += state.locations_failed;
        }

        let duration_seconds =
            (deps.clock.now() - started_at).num_milliseconds() as f64 / 1000.0;
        let record = ScanCycleRecord {
            category: cfg.category.clone(),
            location_filter: cfg.location_filter.clone(),
            businesses_found: cycle_found,
            new_businesses: cycle_new,
            duration_seconds,
            started_at,
        };

        if *stop_rx.borrow() {
            let _ = state_tx.send(EngineState::Stopping);
            if cycle_urls > 0 {
                if let Err(e) = deps.store.record_cycle(&record).await {
                    warn!(%run_id, error = %e, "Failed to persist partial cycle record");
                }
            }
            info!(%run_id, cycle, "Stop requested, ending run mid-cycle");
            break;
        }

        stats.cycles_completed += 1;
        if let Err(e) = deps.store.record_cycle(&record).await {
            error!(%run_id, error = %e, "Failed to persist cycle record, stopping run");
            let _ = state_tx.send(EngineState::Stopped);
            return Err(e.into());
        }
        info!(
            %run_id,
            cycle,
            found = cycle_found,
            new = cycle_new,
            duration_seconds,
            "Cycle complete"
        );

        if cfg.suppress_baseline && cycle == 1 {
            gate.set_notifications_enabled(true);
            info!(%run_id, "Baseline recorded, notifications enabled");
        }

        if let Some(max) = cfg.max_cycles {
            if cycle >= max {
                info!(%run_id, cycles = cycle, "Cycle limit reached");
                break;
            }
        }

        tokio::select! {
            _ = deps.clock.sleep(cfg.cycle_pause) => {}
            changed = stop_rx.changed() => {
                if changed.is_err() {
                    info!(%run_id, "Stop channel closed, ending run");
                    break;
                }
            }
        }
    }

    let (sent, suppressed) = gate.notification_counts();
    stats.notifications_sent = sent;
    stats.notifications_suppressed = suppressed;
    let _ = state_tx.send(EngineState::Stopped);
    info!(%run_id, "{stats}");
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{austin, CaptureNotifier, MockFetcher, TestClock};
    use chrono::{TimeZone, Utc};

    fn config(category: &str, workers: usize) -> ScanConfig {
        ScanConfig {
            category: category.to_string(),
            location_filter: "all locations".to_string(),
            workers,
            cycle_pause: Duration::from_secs(60),
            max_cycles: Some(1),
            shuffle_cycles: false,
            suppress_baseline: false,
        }
    }

    async fn deps(fetchers: usize) -> ScanDeps {
        let store = Arc::new(RecordStore::open_memory().await.unwrap());
        store.migrate().await.unwrap();
        ScanDeps::builder()
            .store(store)
            .notifier(Arc::new(CaptureNotifier::new()) as Arc<dyn Notifier>)
            .fetchers(
                (0..fetchers)
                    .map(|_| Arc::new(MockFetcher::new()) as Arc<dyn PageFetcher>)
                    .collect(),
            )
            .clock(Arc::new(TestClock::new(
                Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap(),
            )) as Arc<dyn Clock>)
            .build()
    }

    #[tokio::test]
    async fn blank_category_is_rejected() {
        let err = start(config("  ", 1), vec![austin()], deps(1).await).unwrap_err();
        assert!(matches!(err, ScanError::Config(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn empty_location_list_is_rejected() {
        let err = start(config("plumber", 1), Vec::new(), deps(1).await).unwrap_err();
        assert!(matches!(err, ScanError::Config(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn missing_fetchers_are_rejected() {
        let err = start(config("plumber", 2), vec![austin()], deps(1).await).unwrap_err();
        match err {
            ScanError::Config(msg) => assert!(msg.contains("fetchers"), "got {msg}"),
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn engine_state_displays_lowercase() {
        assert_eq!(EngineState::Idle.to_string(), "idle");
        assert_eq!(EngineState::Stopping.to_string(), "stopping");
    }
}
