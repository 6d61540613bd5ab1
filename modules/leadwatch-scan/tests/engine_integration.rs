//! End-to-end engine runs: scripted fetchers, an in-memory store, a
//! virtual clock, and a capturing notifier, driven through `start`.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use leadwatch_common::types::{Location, WorkerState};
use leadwatch_scan::clock::Clock;
use leadwatch_scan::fetcher::{FetchError, PageFetcher};
use leadwatch_scan::notify::Notifier;
use leadwatch_scan::testing::{
    austin, card, dallas, phoneless_card, tulsa, CaptureNotifier, MockFetcher, TestClock,
};
use leadwatch_scan::worker::search_url;
use leadwatch_scan::{start, EngineState, ScanConfig, ScanDeps, ScanError, ScanStopper};
use leadwatch_store::RecordStore;

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

fn test_clock() -> Arc<TestClock> {
    Arc::new(TestClock::new(
        Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap(),
    ))
}

async fn fresh_store() -> Arc<RecordStore> {
    let store = Arc::new(RecordStore::open_memory().await.unwrap());
    store.migrate().await.unwrap();
    store
}

fn scan_config(max_cycles: Option<u32>) -> ScanConfig {
    ScanConfig {
        category: "plumber".to_string(),
        location_filter: "states=TX".to_string(),
        workers: 1,
        cycle_pause: Duration::from_secs(60),
        max_cycles,
        shuffle_cycles: false,
        suppress_baseline: false,
    }
}

fn deps_with(
    store: Arc<RecordStore>,
    notifier: Arc<CaptureNotifier>,
    clock: Arc<TestClock>,
    fetchers: Vec<Arc<dyn PageFetcher>>,
) -> ScanDeps {
    ScanDeps::builder()
        .store(store)
        .notifier(notifier as Arc<dyn Notifier>)
        .fetchers(fetchers)
        .clock(clock as Arc<dyn Clock>)
        .build()
}

fn plumber_url(location: &Location) -> String {
    search_url("plumber", location.lat, location.lng)
}

/// Serves a scripted page per fetch call, regardless of URL.
struct SequencedFetcher {
    pages: Mutex<VecDeque<Vec<String>>>,
}

impl SequencedFetcher {
    fn with_pages(pages: Vec<Vec<String>>) -> Self {
        Self {
            pages: Mutex::new(pages.into_iter().collect()),
        }
    }
}

#[async_trait]
impl PageFetcher for SequencedFetcher {
    async fn fetch(&self, _url: &str) -> Result<Vec<String>, FetchError> {
        let page = self.pages.lock().unwrap().pop_front();
        page.ok_or_else(|| FetchError::Payload("SequencedFetcher: script exhausted".to_string()))
    }

    fn name(&self) -> &str {
        "sequenced"
    }
}

/// `now` is fixed and `sleep` never resolves, parking the engine in the
/// inter-cycle pause until something else wakes it.
struct StuckClock;

#[async_trait]
impl Clock for StuckClock {
    fn now(&self) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap()
    }

    async fn sleep(&self, _duration: Duration) {
        std::future::pending::<()>().await;
    }
}

/// Fires the armed stopper on its first fetch, then serves normally.
struct StopOnFirstFetch {
    stopper: Mutex<Option<ScanStopper>>,
    cards: Vec<String>,
}

#[async_trait]
impl PageFetcher for StopOnFirstFetch {
    async fn fetch(&self, _url: &str) -> Result<Vec<String>, FetchError> {
        if let Some(stopper) = self.stopper.lock().unwrap().take() {
            stopper.stop();
        }
        Ok(self.cards.clone())
    }

    fn name(&self) -> &str {
        "stop-on-first-fetch"
    }
}

// ---------------------------------------------------------------------------
// Scenario: first cycle discovers, stores, and notifies
// ---------------------------------------------------------------------------

#[tokio::test]
async fn first_cycle_stores_and_notifies_new_businesses() {
    let store = fresh_store().await;
    let notifier = Arc::new(CaptureNotifier::new());
    let clock = test_clock();
    let fetcher = Arc::new(MockFetcher::new().on(
        &plumber_url(&austin()),
        &[
            &card("Hill Country Plumbing", "(512) 555-0100"),
            &phoneless_card("No Phone Outfit"),
        ],
    ));

    let mut handle = start(
        scan_config(Some(1)),
        vec![austin()],
        deps_with(store.clone(), notifier.clone(), clock, vec![fetcher]),
    )
    .unwrap();
    let stats = handle.wait().await.unwrap();

    assert_eq!(stats.cycles_completed, 1);
    assert_eq!(stats.urls_processed, 1);
    assert_eq!(stats.businesses_found, 1, "phoneless card is dropped");
    assert_eq!(stats.new_businesses, 1);
    assert_eq!(stats.existing_businesses, 0);
    assert_eq!(stats.notifications_sent, 1);
    assert_eq!(notifier.delivered_phones(), vec!["5125550100"]);

    let stored = store.get("5125550100").await.unwrap().unwrap();
    assert_eq!(stored.name, "Hill Country Plumbing");
    assert_eq!(stored.city, "Austin");
    assert_eq!(stored.first_seen, stored.last_seen);

    let cycle = store.latest_cycle().await.unwrap().unwrap();
    assert_eq!(cycle.businesses_found, 1);
    assert_eq!(cycle.new_businesses, 1);
    assert_eq!(cycle.category, "plumber");

    assert_eq!(*handle.state().borrow(), EngineState::Stopped);
}

// ---------------------------------------------------------------------------
// Scenario: revisits touch instead of re-inserting
// ---------------------------------------------------------------------------

#[tokio::test]
async fn second_run_touches_known_businesses_without_renotifying() {
    let store = fresh_store().await;
    let clock = test_clock();
    let url = plumber_url(&austin());

    let first_notifier = Arc::new(CaptureNotifier::new());
    let fetcher = Arc::new(
        MockFetcher::new().on(&url, &[&card("Hill Country Plumbing", "(512) 555-0100")]),
    );
    let mut handle = start(
        scan_config(Some(1)),
        vec![austin()],
        deps_with(store.clone(), first_notifier, clock.clone(), vec![fetcher]),
    )
    .unwrap();
    handle.wait().await.unwrap();

    let before = store.get("5125550100").await.unwrap().unwrap();
    clock.advance(Duration::from_secs(3600));

    let second_notifier = Arc::new(CaptureNotifier::new());
    let fetcher = Arc::new(
        MockFetcher::new().on(&url, &[&card("Hill Country Plumbing", "(512) 555-0100")]),
    );
    let mut handle = start(
        scan_config(Some(1)),
        vec![austin()],
        deps_with(store.clone(), second_notifier.clone(), clock, vec![fetcher]),
    )
    .unwrap();
    let stats = handle.wait().await.unwrap();

    assert_eq!(stats.new_businesses, 0);
    assert_eq!(stats.existing_businesses, 1);
    assert_eq!(stats.notifications_sent, 0);
    assert!(second_notifier.delivered().is_empty());

    let after = store.get("5125550100").await.unwrap().unwrap();
    assert_eq!(after.first_seen, before.first_seen);
    assert!(
        after.last_seen > before.last_seen,
        "revisit advances last_seen"
    );
}

// ---------------------------------------------------------------------------
// Scenario: continuous cycles pause between passes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn continuous_cycles_pause_and_revisit() {
    let store = fresh_store().await;
    let notifier = Arc::new(CaptureNotifier::new());
    let clock = test_clock();
    let fetcher = Arc::new(MockFetcher::new().on(
        &plumber_url(&austin()),
        &[&card("Hill Country Plumbing", "(512) 555-0100")],
    ));

    let mut cfg = scan_config(Some(2));
    cfg.cycle_pause = Duration::from_secs(90);
    let mut handle = start(
        cfg,
        vec![austin()],
        deps_with(store.clone(), notifier, clock.clone(), vec![fetcher]),
    )
    .unwrap();
    let stats = handle.wait().await.unwrap();

    assert_eq!(stats.cycles_completed, 2);
    assert_eq!(stats.urls_processed, 2);
    assert_eq!(stats.new_businesses, 1);
    assert_eq!(stats.existing_businesses, 1);
    assert!(
        clock.sleeps().contains(&Duration::from_secs(90)),
        "inter-cycle pause ran on the clock: {:?}",
        clock.sleeps()
    );

    // The pause advanced the clock, so the second pass moved last_seen.
    let stored = store.get("5125550100").await.unwrap().unwrap();
    assert!(stored.last_seen > stored.first_seen);

    // Two cycle rows, each counting only its own pass.
    let cycle = store.latest_cycle().await.unwrap().unwrap();
    assert_eq!(cycle.businesses_found, 1);
    assert_eq!(cycle.new_businesses, 0);
}

// ---------------------------------------------------------------------------
// Scenario: baseline cycle suppresses notifications
// ---------------------------------------------------------------------------

#[tokio::test]
async fn baseline_cycle_suppresses_notifications_until_cycle_two() {
    let store = fresh_store().await;
    let notifier = Arc::new(CaptureNotifier::new());
    let clock = test_clock();
    let fetcher = Arc::new(SequencedFetcher::with_pages(vec![
        vec![card("Hill Country Plumbing", "(512) 555-0100")],
        vec![
            card("Hill Country Plumbing", "(512) 555-0100"),
            card("Trinity Drains", "(214) 555-0200"),
        ],
    ]));

    let mut cfg = scan_config(Some(2));
    cfg.suppress_baseline = true;
    let mut handle = start(
        cfg,
        vec![austin()],
        deps_with(store.clone(), notifier.clone(), clock, vec![fetcher]),
    )
    .unwrap();
    let stats = handle.wait().await.unwrap();

    assert_eq!(stats.new_businesses, 2);
    assert_eq!(stats.existing_businesses, 1);
    assert_eq!(stats.notifications_sent, 1, "only the cycle-two discovery");
    assert_eq!(stats.notifications_suppressed, 1, "the baseline discovery");
    assert_eq!(notifier.delivered_phones(), vec!["2145550200"]);
}

// ---------------------------------------------------------------------------
// Scenario: a failing location does not sink the cycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fetch_failure_skips_the_location_and_continues() {
    let store = fresh_store().await;
    let notifier = Arc::new(CaptureNotifier::new());
    let clock = test_clock();
    let fetcher = Arc::new(
        MockFetcher::new()
            .failing_on(&plumber_url(&austin()))
            .on(
                &plumber_url(&dallas()),
                &[&card("Trinity Drains", "(214) 555-0200")],
            ),
    );

    let mut handle = start(
        scan_config(Some(1)),
        vec![austin(), dallas()],
        deps_with(store.clone(), notifier.clone(), clock, vec![fetcher]),
    )
    .unwrap();
    let stats = handle.wait().await.unwrap();

    assert_eq!(stats.cycles_completed, 1);
    assert_eq!(stats.locations_failed, 1);
    assert_eq!(stats.urls_processed, 1, "only the successful fetch counts");
    assert_eq!(stats.new_businesses, 1);
    assert_eq!(notifier.delivered_phones(), vec!["2145550200"]);
}

// ---------------------------------------------------------------------------
// Scenario: two workers split the map round-robin
// ---------------------------------------------------------------------------

#[tokio::test]
async fn two_workers_split_the_locations_round_robin() {
    let store = fresh_store().await;
    let notifier = Arc::new(CaptureNotifier::new());
    let clock = test_clock();

    // Round-robin assignment: worker 0 gets austin and tulsa, worker 1
    // gets dallas.
    let fetcher0 = Arc::new(
        MockFetcher::new()
            .on(
                &plumber_url(&austin()),
                &[&card("Hill Country Plumbing", "(512) 555-0100")],
            )
            .on(
                &plumber_url(&tulsa()),
                &[&card("Green Country Drains", "(918) 555-0300")],
            ),
    );
    let fetcher1 = Arc::new(MockFetcher::new().on(
        &plumber_url(&dallas()),
        &[&card("Trinity Drains", "(214) 555-0200")],
    ));

    let mut cfg = scan_config(Some(1));
    cfg.workers = 2;
    let mut handle = start(
        cfg,
        vec![austin(), dallas(), tulsa()],
        deps_with(
            store.clone(),
            notifier.clone(),
            clock,
            vec![fetcher0, fetcher1],
        ),
    )
    .unwrap();
    let stats = handle.wait().await.unwrap();

    assert_eq!(stats.urls_processed, 3);
    assert_eq!(stats.new_businesses, 3);
    assert_eq!(stats.locations_failed, 0);

    let progress = handle.progress();
    let snapshot = progress.borrow();
    assert_eq!(snapshot.workers.len(), 2);
    assert_eq!(snapshot.totals.urls_processed, 3);
}

// ---------------------------------------------------------------------------
// Scenario: stop lands after the in-flight location
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stop_request_ends_the_run_after_the_current_location() {
    let store = fresh_store().await;
    let notifier = Arc::new(CaptureNotifier::new());
    let clock = test_clock();
    let fetcher = Arc::new(StopOnFirstFetch {
        stopper: Mutex::new(None),
        cards: vec![card("Hill Country Plumbing", "(512) 555-0100")],
    });

    let mut handle = start(
        scan_config(None),
        vec![austin(), dallas()],
        deps_with(store.clone(), notifier, clock, vec![fetcher.clone()]),
    )
    .unwrap();
    *fetcher.stopper.lock().unwrap() = Some(handle.stopper());
    let stats = handle.wait().await.unwrap();

    assert_eq!(stats.cycles_completed, 0, "the cycle was interrupted");
    assert_eq!(stats.urls_processed, 1, "the in-flight location finished");
    assert_eq!(stats.new_businesses, 1);

    let cycle = store
        .latest_cycle()
        .await
        .unwrap()
        .expect("partial cycle recorded");
    assert_eq!(cycle.businesses_found, 1);
    assert_eq!(*handle.state().borrow(), EngineState::Stopped);
}

// ---------------------------------------------------------------------------
// Scenario: stop during the inter-cycle pause
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stop_during_the_pause_skips_the_next_cycle() {
    let store = fresh_store().await;
    let notifier = Arc::new(CaptureNotifier::new());
    let fetcher = Arc::new(MockFetcher::new().on(
        &plumber_url(&austin()),
        &[&card("Hill Country Plumbing", "(512) 555-0100")],
    ));
    let deps = ScanDeps::builder()
        .store(store.clone())
        .notifier(notifier as Arc<dyn Notifier>)
        .fetchers(vec![fetcher as Arc<dyn PageFetcher>])
        .clock(Arc::new(StuckClock) as Arc<dyn Clock>)
        .build();

    let mut handle = start(scan_config(None), vec![austin()], deps).unwrap();

    // Wait until the first cycle's worker reports completion, which parks
    // the engine in the pause on the stuck clock.
    let mut progress = handle.progress();
    loop {
        progress.changed().await.unwrap();
        let cycle_done = {
            let snapshot = progress.borrow();
            snapshot.cycle == 1
                && !snapshot.workers.is_empty()
                && snapshot
                    .workers
                    .iter()
                    .all(|w| w.current_location == WorkerState::COMPLETED)
        };
        if cycle_done {
            break;
        }
    }
    handle.request_stop();
    let stats = handle.wait().await.unwrap();

    assert_eq!(stats.cycles_completed, 1, "no second cycle started");
    assert_eq!(stats.urls_processed, 1);
    assert_eq!(*handle.state().borrow(), EngineState::Stopped);
}

// ---------------------------------------------------------------------------
// Scenario: a dead store fails the run
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_schema_fails_the_run() {
    // No migrate call, so the first insert hits a missing table.
    let store = Arc::new(RecordStore::open_memory().await.unwrap());
    let notifier = Arc::new(CaptureNotifier::new());
    let clock = test_clock();
    let fetcher = Arc::new(MockFetcher::new().on(
        &plumber_url(&austin()),
        &[&card("Hill Country Plumbing", "(512) 555-0100")],
    ));

    let mut handle = start(
        scan_config(Some(1)),
        vec![austin()],
        deps_with(store, notifier, clock, vec![fetcher]),
    )
    .unwrap();
    let err = handle.wait().await.unwrap_err();

    assert!(matches!(err, ScanError::Store(_)), "got {err:?}");
    assert_eq!(*handle.state().borrow(), EngineState::Stopped);
}
