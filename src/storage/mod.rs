//! Persistence layer.
//!
//! The ingestion history is one JSON blob shaped as
//! `{ "trades": [...], "processed_items": [...] }`. `HistoryStore` is the
//! capability the engine is handed; its contract:
//! - `load` on an absent blob yields the empty history
//! - `load` on an unreadable or unparsable blob yields `PersistenceCorruption`
//! - `save` replaces the blob atomically (readers see old or new, never a mix)
//!
//! Callers decide what to do with corruption; the store never guesses.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

use crate::types::{History, LedgerError};

/// Default history file path.
pub const DEFAULT_HISTORY_FILE: &str = "market_history.json";

/// Get/set access to the persisted history blob.
pub trait HistoryStore: Send + Sync {
    fn load(&self) -> Result<History, LedgerError>;

    fn save(&self, history: &History) -> Result<()>;

    /// Delete the persisted blob. Clearing an absent blob is not an error.
    fn clear(&self) -> Result<()>;
}

fn parse_blob(raw: &str, origin: &str) -> Result<History, LedgerError> {
    serde_json::from_str::<Option<History>>(raw)
        .map(Option::unwrap_or_default)
        .map_err(|e| LedgerError::PersistenceCorruption {
            path: origin.to_string(),
            message: e.to_string(),
        })
}

// ---------------------------------------------------------------------------
// JSON file store
// ---------------------------------------------------------------------------

/// Stores the history as a pretty-printed JSON file.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }
}

impl Default for JsonFileStore {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_FILE)
    }
}

impl HistoryStore for JsonFileStore {
    fn load(&self) -> Result<History, LedgerError> {
        let shown = self.path.display().to_string();

        if !self.path.exists() {
            info!(path = %shown, "No saved history found, starting fresh");
            return Ok(History::default());
        }

        let json = std::fs::read_to_string(&self.path).map_err(|e| {
            LedgerError::PersistenceCorruption {
                path: shown.clone(),
                message: e.to_string(),
            }
        })?;

        let history = parse_blob(&json, &shown)?;
        info!(
            path = %shown,
            trades = history.trades.len(),
            processed = history.processed_ids.len(),
            "History loaded from disk"
        );
        Ok(history)
    }

    fn save(&self, history: &History) -> Result<()> {
        let json =
            serde_json::to_string_pretty(history).context("Failed to serialise history")?;

        // Write-then-rename so a crash mid-write leaves the old blob intact.
        let tmp = self.temp_path();
        std::fs::write(&tmp, &json)
            .with_context(|| format!("Failed to write history to {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path).with_context(|| {
            format!("Failed to move history into place at {}", self.path.display())
        })?;

        debug!(
            path = %self.path.display(),
            trades = history.trades.len(),
            processed = history.processed_ids.len(),
            "History saved"
        );
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path).with_context(|| {
                format!("Failed to delete history file {}", self.path.display())
            })?;
            info!(path = %self.path.display(), "History cleared");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Keeps the serialized blob in memory. Useful for dry runs and tests.
#[derive(Default)]
pub struct MemoryStore {
    blob: Mutex<Option<String>>,
    saves: Mutex<u64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with an already-serialized (possibly corrupt) blob.
    pub fn with_raw(raw: impl Into<String>) -> Self {
        Self {
            blob: Mutex::new(Some(raw.into())),
            saves: Mutex::new(0),
        }
    }

    /// Seed the store with a history value.
    pub fn with_history(history: &History) -> Result<Self> {
        let raw = serde_json::to_string(history).context("Failed to serialise history")?;
        Ok(Self::with_raw(raw))
    }

    /// Number of successful `save` calls.
    pub fn save_count(&self) -> u64 {
        *self.saves.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl HistoryStore for MemoryStore {
    fn load(&self) -> Result<History, LedgerError> {
        let blob = self.blob.lock().unwrap_or_else(|e| e.into_inner());
        match blob.as_deref() {
            Some(raw) => parse_blob(raw, "memory"),
            None => Ok(History::default()),
        }
    }

    fn save(&self, history: &History) -> Result<()> {
        let raw = serde_json::to_string(history).context("Failed to serialise history")?;
        *self.blob.lock().unwrap_or_else(|e| e.into_inner()) = Some(raw);
        *self.saves.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.blob.lock().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
