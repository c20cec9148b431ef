//! Ingestion runs driven through the real extractor and rate limiter.

use rust_decimal_macros::dec;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use market_ledger::engine::ingest::{EngineConfig, IngestionEngine, RunState};
use market_ledger::engine::profit::ProfitAggregator;
use market_ledger::extract::listing::ListingExtractor;
use market_ledger::fetch::rate_limit::{RateLimitedFetcher, ThrottlePolicy};
use market_ledger::storage::{HistoryStore, JsonFileStore, MemoryStore};
use market_ledger::types::{Action, History, RecordId, SyncMode, Trade};

use crate::mock_market::{Listing, MockMarket};

const PAGE: u32 = 3;

fn engine(market: &MockMarket, store: Arc<dyn HistoryStore>) -> IngestionEngine {
    engine_with_cooldown(market, store, Duration::ZERO)
}

fn engine_with_cooldown(
    market: &MockMarket,
    store: Arc<dyn HistoryStore>,
    cooldown: Duration,
) -> IngestionEngine {
    let policy = ThrottlePolicy {
        cooldown,
        multiplier: 1.0,
        max_cooldown: cooldown,
        max_retries: None,
    };
    let config = EngineConfig {
        page_size: PAGE,
        inter_page_delay: Duration::ZERO,
        max_consecutive_skips: None,
        max_run_duration: None,
    };
    IngestionEngine::new(
        RateLimitedFetcher::new(Box::new(market.clone()), policy),
        Box::new(ListingExtractor::new().unwrap()),
        store,
        config,
    )
}

/// Seven listings, newest first, spread over three pages of three.
fn seven_listings() -> Vec<Listing> {
    vec![
        Listing::new(107, "7 Jan", "Glove Case", "4,20₴", "-"),
        Listing::new(106, "6 Jan", "Glove Case", "3,10₴", "+"),
        Listing::new(105, "5 Jan", "Glove Case", "2,90₴", "+"),
        Listing::new(104, "4 Jan", "AK-47 | Redline", "1 234,56₴", "+"),
        Listing::new(103, "3 Jan", "Sticker", "0,50₴", "\u{2212}"),
        Listing::new(102, "2 Jan", "Sticker", "0,30₴", "+"),
        Listing::new(101, "1 Jan", "Key", "60,00₴", "+"),
    ]
}

// ---------------------------------------------------------------------------
// FullSync
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_first_full_sync_walks_until_exhausted() {
    let market = MockMarket::with_listings(seven_listings());
    let store = Arc::new(MemoryStore::new());
    let mut engine = engine(&market, store.clone());

    let report = engine.run(SyncMode::FullSync).await.unwrap();

    assert_eq!(report.outcome, RunState::Done);
    assert_eq!(report.new_trades, 7);
    // pages at 0, 3, 6 hold rows; 9 is empty
    assert_eq!(
        market.requests(),
        vec![(0, PAGE), (3, PAGE), (6, PAGE), (9, PAGE)]
    );
    assert_eq!(report.pages_examined, 4);

    // Newest-first order is preserved in the stored list.
    let history = store.load().unwrap();
    assert_eq!(history.trades[0], Trade::new("Glove Case", Action::Sold, dec!(4.20)));
    assert_eq!(history.trades[6], Trade::new("Key", Action::Bought, dec!(60)));
    assert_eq!(history.processed_ids.len(), 7);
}

#[tokio::test]
async fn test_full_sync_is_idempotent() {
    let market = MockMarket::with_listings(seven_listings());
    let store = Arc::new(MemoryStore::new());
    let mut engine = engine(&market, store.clone());

    engine.run(SyncMode::FullSync).await.unwrap();
    let after_first = store.load().unwrap();
    market.clear_requests();

    let report = engine.run(SyncMode::FullSync).await.unwrap();

    assert_eq!(report.outcome, RunState::StoppedByBoundary);
    assert_eq!(report.pages_examined, 1);
    assert_eq!(report.new_trades, 0);
    assert_eq!(report.records_seen, 1);
    assert_eq!(market.requests(), vec![(0, PAGE)]);
    assert_eq!(store.load().unwrap(), after_first);
}

#[tokio::test]
async fn test_full_sync_appends_only_new_records() {
    let market = MockMarket::with_listings(seven_listings());
    let store = Arc::new(MemoryStore::new());
    let mut engine = engine(&market, store.clone());
    engine.run(SyncMode::FullSync).await.unwrap();

    market.push_newest(Listing::new(108, "8 Jan", "Key", "61,00₴", "-"));
    market.push_newest(Listing::new(109, "9 Jan", "Sticker", "0,40₴", "+"));

    let report = engine.run(SyncMode::FullSync).await.unwrap();
    assert_eq!(report.outcome, RunState::StoppedByBoundary);
    assert_eq!(report.new_trades, 2);

    let history = store.load().unwrap();
    assert_eq!(history.trades.len(), 9);
    assert_eq!(history.processed_ids.len(), 9);
    // One trade per listing: IDs and trades stay in lockstep.
    let ids: HashSet<_> = history.processed_ids.iter().collect();
    assert_eq!(ids.len(), history.trades.len());
}

#[tokio::test]
async fn test_full_sync_stops_at_known_id() {
    let mut seeded = History::default();
    seeded.trades.push(Trade::new("Old", Action::Bought, dec!(1)));
    seeded.processed_ids.insert(RecordId::from("5_10_2"));
    let store = Arc::new(MemoryStore::with_history(&seeded).unwrap());

    let market = MockMarket::with_listings(vec![
        Listing::new(7, "3 Jan", "New A", "2,00", "+"),
        Listing::new(6, "2 Jan", "New B", "3,00", "-"),
        Listing::new(5, "1 Jan", "Known", "4,00", "+"),
    ]);
    let mut engine = engine(&market, store.clone());

    let report = engine.run(SyncMode::FullSync).await.unwrap();

    assert_eq!(report.outcome, RunState::StoppedByBoundary);
    assert_eq!(report.records_seen, 3);
    assert_eq!(report.new_trades, 2);
    assert_eq!(
        report.trades,
        vec![
            Trade::new("Old", Action::Bought, dec!(1)),
            Trade::new("New A", Action::Bought, dec!(2)),
            Trade::new("New B", Action::Sold, dec!(3)),
        ]
    );
    assert_eq!(store.load().unwrap().processed_ids.len(), 3);
}

#[tokio::test]
async fn test_invalid_records_are_dropped_but_remembered() {
    let market = MockMarket::with_listings(vec![
        Listing::new(3, "3 Jan", "Case", "1,00", "?"),
        Listing::new(2, "2 Jan", "", "1,00", "+"),
        Listing::new(1, "1 Jan", "Case", "–", "+"),
    ]);
    let store = Arc::new(MemoryStore::new());
    let mut engine = engine(&market, store.clone());

    let report = engine.run(SyncMode::FullSync).await.unwrap();
    assert_eq!(report.new_trades, 0);
    assert_eq!(store.load().unwrap().processed_ids.len(), 3);

    let again = engine.run(SyncMode::FullSync).await.unwrap();
    assert_eq!(again.outcome, RunState::StoppedByBoundary);
    assert_eq!(again.records_seen, 1);
}

// ---------------------------------------------------------------------------
// CutoffSync
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_cutoff_sync_includes_boundary_and_stops() {
    let mut seeded = History::default();
    seeded.trades.push(Trade::new("Discarded", Action::Bought, dec!(9)));
    seeded.processed_ids.insert(RecordId::from("999_10_2"));
    let store = Arc::new(MemoryStore::with_history(&seeded).unwrap());

    let market = MockMarket::with_listings(vec![
        Listing::new(4, "3 Jan", "One", "1,00", "+"),
        Listing::new(3, "2 Jan", "Two", "2,00", "+"),
        Listing::new(2, "1 Jan", "Three", "3,00", "-"),
        Listing::new(1, "31 Dec", "Four", "4,00", "+"),
    ]);
    let mut engine = engine(&market, store.clone());

    let report = engine
        .run(SyncMode::cutoff("1 Jan").unwrap())
        .await
        .unwrap();

    assert_eq!(report.outcome, RunState::StoppedByBoundary);
    let names: Vec<_> = report.trades.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["One", "Two", "Three"]);
    assert_eq!(market.requests(), vec![(0, PAGE)]);

    // Only IDs gathered in this run survive.
    let history = store.load().unwrap();
    let ids: Vec<_> = history.processed_ids.iter().map(RecordId::as_str).collect();
    assert_eq!(ids, vec!["2_10_2", "3_10_2", "4_10_2"]);
}

#[tokio::test]
async fn test_cutoff_ignores_known_ids() {
    let market = MockMarket::with_listings(seven_listings());
    let store = Arc::new(MemoryStore::new());
    let mut engine = engine(&market, store.clone());
    engine.run(SyncMode::FullSync).await.unwrap();

    let report = engine
        .run(SyncMode::cutoff("2 Jan").unwrap())
        .await
        .unwrap();

    assert_eq!(report.outcome, RunState::StoppedByBoundary);
    assert_eq!(report.trades.len(), 6);
    assert_eq!(report.pages_examined, 2);
}

#[tokio::test]
async fn test_full_sync_after_cutoff_resumes_from_window() {
    let market = MockMarket::with_listings(seven_listings());
    let store = Arc::new(MemoryStore::new());
    let mut engine = engine(&market, store.clone());
    engine
        .run(SyncMode::cutoff("5 Jan").unwrap())
        .await
        .unwrap();
    assert_eq!(store.load().unwrap().trades.len(), 3);

    market.push_newest(Listing::new(108, "8 Jan", "Key", "61,00₴", "-"));
    market.clear_requests();

    let report = engine.run(SyncMode::FullSync).await.unwrap();
    assert_eq!(report.outcome, RunState::StoppedByBoundary);
    assert_eq!(report.new_trades, 1);
    assert_eq!(report.trades.len(), 4);
    assert_eq!(market.requests(), vec![(0, PAGE)]);
}

// ---------------------------------------------------------------------------
// Failure handling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_throttled_page_is_retried_at_same_offset() {
    let market = MockMarket::with_listings(seven_listings());
    market.throttle(0, 2);
    let store = Arc::new(MemoryStore::new());
    let cooldown = Duration::from_millis(20);
    let mut engine = engine_with_cooldown(&market, store, cooldown);

    let report = engine.run(SyncMode::FullSync).await.unwrap();

    assert_eq!(report.throttle_events, 2);
    assert_eq!(engine.throttle_events(), 2);
    assert_eq!(engine.total_cooldown(), cooldown * 2);
    let at_zero = market.requests().iter().filter(|(start, _)| *start == 0).count();
    assert_eq!(at_zero, 3);
    assert_eq!(report.new_trades, 7);
}

#[tokio::test]
async fn test_malformed_page_skips_its_records() {
    let market = MockMarket::with_listings(seven_listings());
    market.malformed_at(3);
    let store = Arc::new(MemoryStore::new());
    let mut engine = engine(&market, store);

    let report = engine.run(SyncMode::FullSync).await.unwrap();

    assert_eq!(report.outcome, RunState::Done);
    assert_eq!(report.pages_skipped, 1);
    // listings 104..102 lived on the skipped page
    assert_eq!(report.new_trades, 4);
}

#[tokio::test]
async fn test_transport_error_persists_partial_progress_to_disk() {
    let mut path = std::env::temp_dir();
    path.push(format!("market_ledger_it_{}.json", uuid::Uuid::new_v4()));
    let store = Arc::new(JsonFileStore::new(&path));

    let market = MockMarket::with_listings(seven_listings());
    market.fail_at(3, "connection reset by peer");
    let mut engine = engine(&market, store.clone());

    let report = engine.run(SyncMode::FullSync).await.unwrap();

    assert!(matches!(report.outcome, RunState::StoppedByError(_)));
    let history = store.load().unwrap();
    assert_eq!(history.trades.len(), 3);
    assert_eq!(history.processed_ids.len(), 3);

    store.clear().unwrap();
}

// ---------------------------------------------------------------------------
// Reporting
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_profit_report_over_synced_history() {
    let market = MockMarket::with_listings(seven_listings());
    let store = Arc::new(MemoryStore::new());
    let mut engine = engine(&market, store);

    let report = engine.run(SyncMode::FullSync).await.unwrap();
    let summary = ProfitAggregator::summarize(&report.trades);

    let glove = summary.row("Glove Case").unwrap();
    assert_eq!(glove.bought_count, 2);
    assert_eq!(glove.sold_count, 1);
    // cheapest buy 2.90 against the only sell 4.20
    assert_eq!(glove.realized_profit, dec!(1.30));

    let sticker = summary.row("Sticker").unwrap();
    assert_eq!(sticker.realized_profit, dec!(0.20));

    assert_eq!(summary.total_spent, dec!(3.10) + dec!(2.90) + dec!(1234.56) + dec!(0.30) + dec!(60));
    assert_eq!(summary.total_earned, dec!(4.20) + dec!(0.50));
}
