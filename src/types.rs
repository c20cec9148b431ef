//! Shared types for the trade ledger.
//!
//! These types form the data model used across all modules: extracted
//! listing records, validated trades, the persisted history blob, and
//! the sync modes the operator can request.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::price::parse_price;

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// Direction of a completed marketplace transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Bought,
    Sold,
}

impl Action {
    /// Map the gain/loss column symbol to an action.
    ///
    /// `+` is a purchase; ASCII hyphen or U+2212 minus is a sale. Anything
    /// else is unknown and yields `None`.
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol.trim() {
            "+" => Some(Action::Bought),
            "-" | "\u{2212}" => Some(Action::Sold),
            _ => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Bought => write!(f, "bought"),
            Action::Sold => write!(f, "sold"),
        }
    }
}

// ---------------------------------------------------------------------------
// Trade
// ---------------------------------------------------------------------------

/// A validated, completed transaction. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub name: String,
    #[serde(rename = "acted")]
    pub action: Action,
    pub price: Decimal,
}

impl Trade {
    pub fn new(name: impl Into<String>, action: Action, price: Decimal) -> Self {
        Self {
            name: name.into(),
            action,
            price,
        }
    }
}

impl fmt::Display for Trade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} @ {:.2}", self.action, self.name, self.price)
    }
}

// ---------------------------------------------------------------------------
// RecordId
// ---------------------------------------------------------------------------

/// Opaque identifier of one listing instance: `{listing}_{classid}_{instanceid}`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(listing_id: &str, class_id: &str, instance_id: &str) -> Self {
        Self(format!("{listing_id}_{class_id}_{instance_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RecordId {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// RawRecord
// ---------------------------------------------------------------------------

/// One listing row as produced by a `PageExtractor`, before validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRecord {
    pub listing_id: String,
    pub class_id: String,
    pub instance_id: String,
    /// Displayed "acted on" date, e.g. `"1 Jan"`.
    pub acted_on: String,
    pub name: Option<String>,
    pub price: Option<String>,
    pub symbol: Option<String>,
}

impl RawRecord {
    pub fn record_id(&self) -> RecordId {
        RecordId::new(&self.listing_id, &self.class_id, &self.instance_id)
    }

    /// Validate into a `Trade`. Records with an empty name, an unknown
    /// gain/loss symbol, or a non-positive price are dropped.
    pub fn to_trade(&self) -> Option<Trade> {
        let name = self.name.as_deref().map(str::trim).filter(|n| !n.is_empty())?;
        let action = self.symbol.as_deref().and_then(Action::from_symbol)?;
        let price = parse_price(self.price.as_deref().unwrap_or_default());
        if price <= Decimal::ZERO {
            return None;
        }
        Some(Trade::new(name, action, price))
    }
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

/// Persisted ingestion state: every trade folded in so far plus the IDs
/// of the records that produced them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    #[serde(default)]
    pub trades: Vec<Trade>,
    #[serde(default, rename = "processed_items")]
    pub processed_ids: BTreeSet<RecordId>,
}

impl History {
    pub fn is_empty(&self) -> bool {
        self.trades.is_empty() && self.processed_ids.is_empty()
    }
}

impl fmt::Display for History {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "History: {} trades, {} processed records",
            self.trades.len(),
            self.processed_ids.len()
        )
    }
}

// ---------------------------------------------------------------------------
// Sync mode
// ---------------------------------------------------------------------------

/// What kind of ingestion run to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncMode {
    /// Continue from the stored history, stopping at the first known record.
    FullSync,
    /// Rebuild from scratch down to (and including) the first record whose
    /// acted-on date contains this substring.
    CutoffSync(String),
}

impl SyncMode {
    /// Build a cutoff mode, rejecting blank dates (they would match nothing
    /// and the run would never reach a boundary).
    pub fn cutoff(date: &str) -> Result<Self, LedgerError> {
        let date = date.trim();
        if date.is_empty() {
            return Err(LedgerError::InvalidCutoff(
                "cutoff date must not be empty".to_string(),
            ));
        }
        Ok(SyncMode::CutoffSync(date.to_string()))
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::FullSync => write!(f, "full-sync"),
            SyncMode::CutoffSync(date) => write!(f, "cutoff-sync({date})"),
        }
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for the ledger.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Persisted history is corrupt ({path}): {message}")]
    PersistenceCorruption { path: String, message: String },

    #[error("Invalid cutoff date: {0}")]
    InvalidCutoff(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
