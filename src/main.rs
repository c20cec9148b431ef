//! market-ledger — command-line entry point.
//!
//! Loads configuration, initialises structured logging, and dispatches
//! one operator action: sync new trades, rebuild down to a date, reset
//! the stored history, or show the profit report for what is cached.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use market_ledger::config::AppConfig;
use market_ledger::engine::ingest::{load_history, IngestionEngine};
use market_ledger::engine::profit::ProfitAggregator;
use market_ledger::extract::listing::ListingExtractor;
use market_ledger::fetch::http::HttpFetcher;
use market_ledger::fetch::rate_limit::RateLimitedFetcher;
use market_ledger::storage::{HistoryStore, JsonFileStore};
use market_ledger::types::SyncMode;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "LEDGER_CONFIG", default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch new trades, stopping at already-ingested history
    Sync,
    /// Rebuild the trade list from scratch down to a date
    SyncTo {
        /// Text of the acted-on date to stop at, e.g. "1 Jan"
        date: String,
    },
    /// Delete the stored history
    Reset,
    /// Print the profit report for the stored history without fetching
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let args = Args::parse();
    init_logging();

    let cfg = if Path::new(&args.config).exists() {
        AppConfig::load(&args.config)?
    } else {
        warn!(path = %args.config, "Config file not found, using defaults");
        AppConfig::default()
    };

    let store: Arc<dyn HistoryStore> = Arc::new(JsonFileStore::new(&cfg.storage.history_file));

    match args.command {
        Command::Sync => sync(&cfg, store, SyncMode::FullSync).await,
        Command::SyncTo { date } => sync(&cfg, store, SyncMode::cutoff(&date)?).await,
        Command::Reset => {
            store.clear()?;
            info!(path = %cfg.storage.history_file, "History cleared.");
            Ok(())
        }
        Command::Show => {
            let history = load_history(store.as_ref());
            print!("{}", ProfitAggregator::summarize(&history.trades));
            info!(records = history.trades.len(), "Showing cached records.");
            Ok(())
        }
    }
}

/// Build the fetch pipeline, run one ingestion pass, and print the report.
async fn sync(cfg: &AppConfig, store: Arc<dyn HistoryStore>, mode: SyncMode) -> Result<()> {
    let cookie = cfg.session_cookie();
    if cookie.is_none() {
        warn!(
            env = %cfg.market.session_cookie_env,
            "No session cookie set, the remote will likely reject every page"
        );
    }

    let http = HttpFetcher::new(
        &cfg.market.endpoint,
        &cfg.market.search_query,
        cookie,
        cfg.request_timeout(),
    )?;
    let fetcher = RateLimitedFetcher::new(Box::new(http), cfg.throttle_policy());
    let extractor = ListingExtractor::new()?;
    let mut engine = IngestionEngine::new(fetcher, Box::new(extractor), store, cfg.engine_config());

    let cancel = engine.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received, saving progress. Press Ctrl+C again to abort.");
            cancel.cancel();
        }
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Second shutdown signal, aborting without saving.");
            std::process::exit(130);
        }
    });

    let report = engine.run(mode).await?;

    print!("{}", ProfitAggregator::summarize(&report.trades));
    info!(
        outcome = %report.outcome,
        pages = report.pages_examined,
        throttled = report.throttle_events,
        "{}",
        report.status_message()
    );

    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("market_ledger=info"));

    let json_logging = std::env::var("LEDGER_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
