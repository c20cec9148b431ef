//! Mock marketplace for integration testing.
//!
//! Serves a deterministic, newest-first trade history as HTML listing
//! pages, exactly like the real endpoint paginates it. Throttling,
//! malformed pages and transport failures can be injected per offset,
//! and every request is recorded for assertions.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use market_ledger::fetch::{PageFetcher, PageResult};

/// One completed transaction as the remote displays it.
#[derive(Debug, Clone)]
pub struct Listing {
    pub listing_id: u64,
    pub class_id: u64,
    pub instance_id: u64,
    pub acted_on: String,
    pub name: String,
    pub price: String,
    pub symbol: String,
}

impl Listing {
    pub fn new(listing_id: u64, acted_on: &str, name: &str, price: &str, symbol: &str) -> Self {
        Self {
            listing_id,
            class_id: 10,
            instance_id: 2,
            acted_on: acted_on.to_string(),
            name: name.to_string(),
            price: price.to_string(),
            symbol: symbol.to_string(),
        }
    }

    fn to_html(&self) -> String {
        format!(
            r#"<div class="market_listing_row market_recent_listing_row" id="history_row_listing_{id}_event_1" data-classid="{class}" data-instanceid="{instance}">
  <div class="market_listing_left_cell market_listing_gainorloss">{symbol}</div>
  <div class="market_listing_right_cell market_listing_their_price"><span class="market_table_value"><span class="market_listing_price">{price}</span></span></div>
  <div class="market_listing_right_cell market_listing_listed_date can_combine">{date}</div>
  <div class="market_listing_item_name_block"><span class="market_listing_item_name">{name}</span></div>
</div>
"#,
            id = self.listing_id,
            class = self.class_id,
            instance = self.instance_id,
            symbol = self.symbol,
            price = self.price,
            date = self.acted_on,
            name = self.name,
        )
    }
}

#[derive(Default)]
struct MarketState {
    /// Newest first.
    listings: Vec<Listing>,
    throttles: HashMap<u64, u32>,
    malformed: HashSet<u64>,
    failures: HashMap<u64, String>,
    requests: Vec<(u64, u32)>,
}

/// A mock history endpoint. Clones share state, so tests keep a handle
/// while the engine owns another.
#[derive(Clone, Default)]
pub struct MockMarket {
    state: Arc<Mutex<MarketState>>,
}

impl MockMarket {
    /// Create a market whose history is `listings`, newest first.
    pub fn with_listings(listings: Vec<Listing>) -> Self {
        let market = Self::default();
        market.state.lock().unwrap().listings = listings;
        market
    }

    /// New activity: the listing appears at the top of page one.
    pub fn push_newest(&self, listing: Listing) {
        self.state.lock().unwrap().listings.insert(0, listing);
    }

    /// Answer the next `times` requests at `offset` with a throttle signal.
    pub fn throttle(&self, offset: u64, times: u32) {
        self.state.lock().unwrap().throttles.insert(offset, times);
    }

    /// Answer every request at `offset` without the success flag.
    pub fn malformed_at(&self, offset: u64) {
        self.state.lock().unwrap().malformed.insert(offset);
    }

    /// Fail every request at `offset` at the transport level.
    pub fn fail_at(&self, offset: u64, reason: &str) {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert(offset, reason.to_string());
    }

    /// Every `(start, count)` requested so far.
    pub fn requests(&self) -> Vec<(u64, u32)> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn clear_requests(&self) {
        self.state.lock().unwrap().requests.clear();
    }
}

#[async_trait]
impl PageFetcher for MockMarket {
    async fn fetch_page(&self, start: u64, count: u32) -> PageResult {
        let mut state = self.state.lock().unwrap();
        state.requests.push((start, count));

        if let Some(reason) = state.failures.get(&start) {
            return PageResult::TransportError(reason.clone());
        }
        if let Some(remaining) = state.throttles.get_mut(&start) {
            if *remaining > 0 {
                *remaining -= 1;
                return PageResult::Throttled;
            }
        }
        if state.malformed.contains(&start) {
            return PageResult::Malformed;
        }

        let html: String = state
            .listings
            .iter()
            .skip(start as usize)
            .take(count as usize)
            .map(Listing::to_html)
            .collect();
        PageResult::Ok(html)
    }
}
