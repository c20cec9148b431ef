//! Page-to-records extraction.
//!
//! Defines the `PageExtractor` trait: given one page's raw markup, yield
//! the listing rows it contains in the order the remote returned them
//! (newest first). The ingestion engine never looks at markup directly.

pub mod listing;

use crate::types::RawRecord;

/// Turns a page of raw markup into candidate trade records.
pub trait PageExtractor: Send + Sync {
    /// Lazily yield records in document order.
    fn extract<'a>(&'a self, markup: &'a str) -> Box<dyn Iterator<Item = RawRecord> + 'a>;
}
