use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use leadwatch_common::config::{MAX_WORKERS, MIN_WORKERS};
use leadwatch_common::AppConfig;
use leadwatch_scan::card;
use leadwatch_scan::clock::{Clock, SystemClock};
use leadwatch_scan::fetcher::{PageFetcher, RemoteFetcher};
use leadwatch_scan::locations::{filter_locations, load_locations};
use leadwatch_scan::notify::{NoopNotifier, Notifier, WebhookNotifier};
use leadwatch_scan::worker::search_url;
use leadwatch_scan::{start, ScanConfig, ScanDeps};
use leadwatch_store::RecordStore;

mod export;

#[derive(Parser)]
#[command(name = "leadwatch")]
#[command(about = "Continuous discovery of newly listed local businesses")]
#[command(version)]
struct Cli {
    /// Path to the config file
    #[arg(short, long, global = true, default_value = "leadwatch.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter config file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Run the scan engine until interrupted
    Run {
        /// Run a single cycle and exit
        #[arg(long)]
        once: bool,

        /// Override the configured worker count
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Show store totals and recent discoveries
    Status,

    /// Export stored businesses to a file
    Export {
        /// Output format
        #[arg(long, value_enum, default_value_t = ExportFormat::Csv)]
        format: ExportFormat,

        /// Only businesses first seen in the last N days
        #[arg(long)]
        days: Option<i64>,

        /// Output path (defaults to a timestamped file)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Fetch and parse one location without touching the store
    Probe {
        /// City name as it appears in the dataset
        city: String,

        /// Two-letter state code
        state: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ExportFormat {
    Csv,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("leadwatch=info".parse()?))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Init { force } => cmd_init(&cli.config, force),
        Commands::Run { once, workers } => cmd_run(&cli.config, once, workers).await,
        Commands::Status => cmd_status(&cli.config).await,
        Commands::Export {
            format,
            days,
            output,
        } => cmd_export(&cli.config, format, days, output).await,
        Commands::Probe { city, state } => cmd_probe(&cli.config, &city, &state).await,
    }
}

fn cmd_init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists, pass --force to overwrite",
            path.display()
        );
    }
    AppConfig::default_template().save(path)?;
    println!("Wrote starter config to {}", path.display());
    println!("Edit the category and location filter, then run `leadwatch run`.");
    Ok(())
}

async fn cmd_run(config_path: &Path, once: bool, workers: Option<usize>) -> Result<()> {
    let mut cfg = load_config(config_path)?;
    if let Some(workers) = workers {
        cfg.workers = workers.clamp(MIN_WORKERS, MAX_WORKERS);
    }

    let dataset = load_locations(&cfg.locations_csv)?;
    let mut selected = filter_locations(&dataset, &cfg.locations);
    if selected.len() > cfg.max_locations {
        selected.truncate(cfg.max_locations);
    }
    info!(
        selected = selected.len(),
        filter = %cfg.locations.describe(),
        "Locations selected"
    );

    let store = Arc::new(RecordStore::open(&cfg.database_path).await?);
    store.migrate().await?;

    let notifier: Arc<dyn Notifier> = if cfg.notifications.webhook.enabled {
        info!(url = %cfg.notifications.webhook.url, "Webhook notifications enabled");
        Arc::new(WebhookNotifier::new(cfg.notifications.webhook.url.clone()))
    } else {
        info!("No notification backend configured, discoveries are log-only");
        Arc::new(NoopNotifier)
    };

    let fetchers = (0..cfg.workers)
        .map(|instance| {
            Arc::new(RemoteFetcher::new(
                &cfg.fetcher.endpoint,
                cfg.fetch_timeout(),
                instance,
            )) as Arc<dyn PageFetcher>
        })
        .collect();

    let deps = ScanDeps::builder()
        .store(store)
        .notifier(notifier)
        .fetchers(fetchers)
        .clock(Arc::new(SystemClock) as Arc<dyn Clock>)
        .filters(cfg.notifications.filters.clone())
        .build();

    let scan_cfg = ScanConfig {
        category: cfg.category.clone(),
        location_filter: cfg.locations.describe(),
        workers: cfg.workers,
        cycle_pause: cfg.cycle_pause(),
        max_cycles: once.then_some(1),
        shuffle_cycles: cfg.shuffle_cycles,
        suppress_baseline: cfg.notifications.suppress_baseline,
    };

    let mut handle = start(scan_cfg, selected, deps)?;

    let stopper = handle.stopper();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, finishing the current location");
            stopper.stop();
        }
    });

    let stats = handle.wait().await?;
    println!("{stats}");
    Ok(())
}

async fn cmd_status(config_path: &Path) -> Result<()> {
    let cfg = load_config(config_path)?;
    let store = RecordStore::open(&cfg.database_path).await?;
    store.migrate().await?;

    let snapshot = store.stats_snapshot(Utc::now()).await?;
    println!("Database: {}", cfg.database_path);
    println!("  Total businesses: {}", snapshot.total_businesses);
    println!("  New this week:    {}", snapshot.new_this_week);
    println!("  New this month:   {}", snapshot.new_this_month);
    println!("  Categories:       {}", snapshot.categories);
    println!();

    match store.latest_cycle().await? {
        Some(cycle) => {
            println!(
                "Last cycle: {} ({}) started {}",
                cycle.category,
                cycle.location_filter,
                cycle.started_at.format("%Y-%m-%d %H:%M UTC")
            );
            println!(
                "  Found {} businesses, {} new, in {:.1}s",
                cycle.businesses_found, cycle.new_businesses, cycle.duration_seconds
            );
        }
        None => println!("No scan cycles recorded yet"),
    }

    let recent = store.recent(10, 0).await?;
    if !recent.is_empty() {
        println!();
        println!("Recent discoveries:");
        for business in &recent {
            println!(
                "  {}  {}  {}, {}  (first seen {})",
                business.phone,
                business.name,
                business.city,
                business.state,
                business.first_seen.format("%Y-%m-%d")
            );
        }
    }
    Ok(())
}

async fn cmd_export(
    config_path: &Path,
    format: ExportFormat,
    days: Option<i64>,
    output: Option<PathBuf>,
) -> Result<()> {
    let cfg = load_config(config_path)?;
    let store = RecordStore::open(&cfg.database_path).await?;
    store.migrate().await?;

    let rows = match days {
        Some(days) => store.since_days(days, Utc::now()).await?,
        None => store.all().await?,
    };
    if rows.is_empty() {
        println!("Nothing to export");
        return Ok(());
    }

    let path = output.unwrap_or_else(|| default_output(format));
    match format {
        ExportFormat::Csv => export::write_csv(&rows, &path)?,
        ExportFormat::Json => export::write_json(&rows, &path)?,
    }
    println!("Exported {} businesses to {}", rows.len(), path.display());
    Ok(())
}

async fn cmd_probe(config_path: &Path, city: &str, state: &str) -> Result<()> {
    let cfg = load_config(config_path)?;
    let dataset = load_locations(&cfg.locations_csv)?;
    let location = dataset
        .iter()
        .find(|l| l.city.eq_ignore_ascii_case(city) && l.state.eq_ignore_ascii_case(state))
        .cloned()
        .with_context(|| format!("{city}, {state} not found in {}", cfg.locations_csv))?;

    let url = search_url(&cfg.category, location.lat, location.lng);
    println!("Probing {} for \"{}\"", location.label(), cfg.category);

    let fetcher = RemoteFetcher::new(&cfg.fetcher.endpoint, cfg.fetch_timeout(), 0);
    let cards = fetcher.fetch(&url).await?;
    let scraped_at = Utc::now();
    let mut parsed = 0;
    for raw in &cards {
        if let Some(record) = card::parse(raw, &url, Some(&location), scraped_at) {
            parsed += 1;
            println!("  {}  {}  {}", record.phone, record.name, record.category);
        }
    }
    println!("{} cards fetched, {} parsed", cards.len(), parsed);
    Ok(())
}

fn load_config(path: &Path) -> Result<AppConfig> {
    AppConfig::load(path).with_context(|| {
        format!(
            "Failed to load config from {} (run `leadwatch init` to create one)",
            path.display()
        )
    })
}

fn default_output(format: ExportFormat) -> PathBuf {
    let ext = match format {
        ExportFormat::Csv => "csv",
        ExportFormat::Json => "json",
    };
    PathBuf::from(format!("leads_{}.{ext}", Utc::now().format("%Y%m%d_%H%M%S")))
}
