//! Ingestion engine — incremental pagination and reconciliation.
//!
//! Drives page-by-page retrieval of the trade history, newest first, and
//! folds each record into the working history until a boundary is hit:
//! - FullSync stops at the first record whose ID is already known
//! - CutoffSync stops after the first record whose acted-on date contains
//!   the cutoff substring
//!
//! Pages are strictly sequential: whether page N+1 is needed at all depends
//! on what page N contained. Whatever the outcome, the merged history is
//! persisted before the run returns.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::extract::PageExtractor;
use crate::fetch::rate_limit::RateLimitedFetcher;
use crate::fetch::PageResult;
use crate::storage::HistoryStore;
use crate::types::{History, RawRecord, RecordId, SyncMode, Trade};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Pagination and pacing settings for a run.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Records requested per page.
    pub page_size: u32,
    /// Polite delay between successful pages.
    pub inter_page_delay: Duration,
    /// Back-to-back malformed pages tolerated before aborting. `None` = unlimited.
    pub max_consecutive_skips: Option<u32>,
    /// Wall-clock ceiling for a whole run. `None` = unlimited.
    pub max_run_duration: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            inter_page_delay: Duration::from_millis(1500),
            max_consecutive_skips: None,
            max_run_duration: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Run state & report
// ---------------------------------------------------------------------------

/// Where a run is, or how it ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Running,
    /// Reached a known record (FullSync) or the cutoff date (CutoffSync).
    StoppedByBoundary,
    /// Aborted by a transport failure or a configured ceiling.
    StoppedByError(String),
    /// The remote ran out of history before any boundary.
    Done,
    /// The operator asked the run to stop.
    Cancelled,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Running => write!(f, "running"),
            RunState::StoppedByBoundary => write!(f, "stopped at boundary"),
            RunState::StoppedByError(reason) => write!(f, "stopped by error: {reason}"),
            RunState::Done => write!(f, "done"),
            RunState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Summary of a completed run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub mode: SyncMode,
    pub outcome: RunState,
    /// Pages successfully fetched and walked.
    pub pages_examined: u64,
    /// Pages skipped as malformed.
    pub pages_skipped: u64,
    pub throttle_events: u64,
    /// Records looked at, including the boundary record.
    pub records_seen: u64,
    /// Trades added by this run.
    pub new_trades: usize,
    /// The full trade list as persisted.
    pub trades: Vec<Trade>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    /// One-line operator status.
    pub fn status_message(&self) -> String {
        match &self.outcome {
            RunState::StoppedByError(reason) => format!(
                "Error: {reason}. Kept {} records ({} new).",
                self.trades.len(),
                self.new_trades
            ),
            RunState::Cancelled => format!(
                "Cancelled. Kept {} records ({} new).",
                self.trades.len(),
                self.new_trades
            ),
            _ => format!(
                "Processed {} records ({} new).",
                self.trades.len(),
                self.new_trades
            ),
        }
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Run {} [{}]: {} | pages={} skipped={} throttled={} seen={} new={} total={}",
            self.run_id,
            self.mode,
            self.outcome,
            self.pages_examined,
            self.pages_skipped,
            self.throttle_events,
            self.records_seen,
            self.new_trades,
            self.trades.len(),
        )
    }
}

// ---------------------------------------------------------------------------
// Per-record folding
// ---------------------------------------------------------------------------

/// Whether to keep walking after a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Continue,
    Boundary,
}

/// Working history for one run.
struct Ledger {
    mode: SyncMode,
    trades: Vec<Trade>,
    processed_ids: BTreeSet<RecordId>,
    new_trades: usize,
    records_seen: u64,
}

impl Ledger {
    /// FullSync continues the stored history; CutoffSync starts empty and
    /// only remembers the IDs it gathers itself.
    fn start(mode: SyncMode, history: History) -> Self {
        let (trades, processed_ids) = match mode {
            SyncMode::FullSync => (history.trades, history.processed_ids),
            SyncMode::CutoffSync(_) => (Vec::new(), BTreeSet::new()),
        };
        Self {
            mode,
            trades,
            processed_ids,
            new_trades: 0,
            records_seen: 0,
        }
    }

    fn fold(&mut self, record: &RawRecord) -> Step {
        self.records_seen += 1;
        let id = record.record_id();

        match &self.mode {
            SyncMode::FullSync => {
                if self.processed_ids.contains(&id) {
                    debug!(id = %id, "Reached previously ingested record");
                    return Step::Boundary;
                }
                // Marked before validation so invalid rows are not revisited.
                self.processed_ids.insert(id);
                self.push(record);
                Step::Continue
            }
            SyncMode::CutoffSync(cutoff) => {
                let is_boundary = record.acted_on.contains(cutoff.as_str());
                if is_boundary {
                    debug!(acted_on = %record.acted_on, cutoff = %cutoff, "Reached cutoff date");
                }
                // Pages can shift while we walk; never fold the same listing twice.
                if self.processed_ids.insert(id) {
                    self.push(record);
                }
                if is_boundary {
                    Step::Boundary
                } else {
                    Step::Continue
                }
            }
        }
    }

    fn push(&mut self, record: &RawRecord) {
        if let Some(trade) = record.to_trade() {
            self.trades.push(trade);
            self.new_trades += 1;
        }
    }

    fn into_history(self) -> History {
        History {
            trades: self.trades,
            processed_ids: self.processed_ids,
        }
    }
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Clonable handle that stops a run at its next suspension point.
///
/// In-flight requests, throttle cooldowns and pacing delays are all raced
/// against it, so a cancel takes effect without waiting them out.
#[derive(Clone)]
pub struct CancelHandle(Arc<watch::Sender<bool>>);

impl CancelHandle {
    fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self(Arc::new(tx))
    }

    pub fn cancel(&self) {
        self.0.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once `cancel` has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.0.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

// ---------------------------------------------------------------------------
// Store policy
// ---------------------------------------------------------------------------

/// Load the stored history, substituting the empty history when the blob
/// is corrupt. The corruption is logged, never surfaced.
pub fn load_history(store: &dyn HistoryStore) -> History {
    match store.load() {
        Ok(history) => history,
        Err(e) => {
            warn!(error = %e, "Stored history unreadable, starting from empty");
            History::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Sequential pagination over the trade history.
///
/// `run` takes `&mut self`: one engine drives one run at a time. Callers
/// sharing a store between engines must serialize runs themselves.
pub struct IngestionEngine {
    fetcher: RateLimitedFetcher,
    extractor: Box<dyn PageExtractor>,
    store: Arc<dyn HistoryStore>,
    config: EngineConfig,
    cancel: CancelHandle,
}

impl IngestionEngine {
    pub fn new(
        fetcher: RateLimitedFetcher,
        extractor: Box<dyn PageExtractor>,
        store: Arc<dyn HistoryStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            fetcher,
            extractor,
            store,
            config,
            cancel: CancelHandle::new(),
        }
    }

    /// Flag that, once set, stops the current run at its next suspension
    /// point. Partial progress is still persisted.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Throttle signals observed across all runs of this engine.
    pub fn throttle_events(&self) -> u64 {
        self.fetcher.throttle_events()
    }

    /// Time spent waiting out throttle cooldowns across all runs.
    pub fn total_cooldown(&self) -> Duration {
        self.fetcher.total_cooldown()
    }

    /// Run one ingestion pass, persist the merged history, and report.
    ///
    /// Only a failure to persist is returned as an error; fetch problems
    /// end the run and are described by `RunReport::outcome`.
    pub async fn run(&mut self, mode: SyncMode) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let clock = Instant::now();
        let throttles_before = self.fetcher.throttle_events();

        let history = load_history(self.store.as_ref());
        info!(
            run_id = %run_id,
            mode = %mode,
            stored_trades = history.trades.len(),
            stored_ids = history.processed_ids.len(),
            "Starting ingestion run"
        );

        let mut ledger = Ledger::start(mode.clone(), history);
        let page_size = self.config.page_size;
        let mut page: u64 = 0;
        let mut pages_examined: u64 = 0;
        let mut pages_skipped: u64 = 0;
        let mut consecutive_skips: u32 = 0;

        let outcome = loop {
            if self.cancel.is_cancelled() {
                warn!(run_id = %run_id, page = page + 1, "Run cancelled");
                break RunState::Cancelled;
            }
            if let Some(limit) = self.config.max_run_duration {
                if clock.elapsed() >= limit {
                    break RunState::StoppedByError(format!(
                        "run exceeded {}s ceiling",
                        limit.as_secs()
                    ));
                }
            }

            let start = page * u64::from(page_size);
            info!(
                run_id = %run_id,
                page = page + 1,
                start,
                throttled = self.fetcher.throttle_events() - throttles_before,
                "Fetching page"
            );

            let fetched = tokio::select! {
                result = self.fetcher.fetch_page(start, page_size) => result,
                _ = self.cancel.cancelled() => {
                    warn!(run_id = %run_id, page = page + 1, start, "Run cancelled mid-request");
                    break RunState::Cancelled;
                }
            };

            let markup = match fetched {
                PageResult::Ok(markup) => markup,
                PageResult::Throttled => continue,
                PageResult::Malformed => {
                    warn!(run_id = %run_id, page = page + 1, start, "Unsuccessful page response, skipping");
                    page += 1;
                    pages_skipped += 1;
                    consecutive_skips += 1;
                    if let Some(max) = self.config.max_consecutive_skips {
                        if consecutive_skips > max {
                            break RunState::StoppedByError(format!(
                                "{consecutive_skips} consecutive malformed pages"
                            ));
                        }
                    }
                    continue;
                }
                PageResult::TransportError(reason) => {
                    error!(run_id = %run_id, page = page + 1, start, error = %reason, "Page request failed, aborting run");
                    break RunState::StoppedByError(reason);
                }
            };

            consecutive_skips = 0;
            pages_examined += 1;

            let mut rows = 0usize;
            let mut step = Step::Continue;
            for record in self.extractor.extract(&markup) {
                rows += 1;
                step = ledger.fold(&record);
                if step == Step::Boundary {
                    break;
                }
            }

            debug!(
                run_id = %run_id,
                page = page + 1,
                rows,
                total_trades = ledger.trades.len(),
                "Page processed"
            );

            if step == Step::Boundary {
                break RunState::StoppedByBoundary;
            }
            if rows == 0 {
                info!(run_id = %run_id, page = page + 1, "Empty page, history exhausted");
                break RunState::Done;
            }

            page += 1;
            tokio::select! {
                _ = tokio::time::sleep(self.config.inter_page_delay) => {}
                _ = self.cancel.cancelled() => {}
            }
        };

        let new_trades = ledger.new_trades;
        let records_seen = ledger.records_seen;
        let history = ledger.into_history();
        self.store
            .save(&history)
            .context("Failed to persist merged history")?;

        let report = RunReport {
            run_id,
            mode,
            outcome,
            pages_examined,
            pages_skipped,
            throttle_events: self.fetcher.throttle_events() - throttles_before,
            records_seen,
            new_trades,
            trades: history.trades,
            started_at,
            finished_at: Utc::now(),
        };

        info!(
            run_id = %run_id,
            outcome = %report.outcome,
            pages = report.pages_examined,
            skipped = report.pages_skipped,
            throttled = report.throttle_events,
            new = report.new_trades,
            total = report.trades.len(),
            "Ingestion run finished"
        );

        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
