//! Page retrieval.
//!
//! Defines the `PageFetcher` trait and the classified `PageResult` every
//! fetch produces, and provides:
//! - `HttpFetcher` — the real history endpoint over reqwest
//! - `RateLimitedFetcher` — throttle cooldown/backoff around any fetcher

pub mod http;
pub mod rate_limit;

use async_trait::async_trait;
use std::fmt;

/// Outcome of a single page request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageResult {
    /// The request succeeded; carries the page's raw listing markup.
    Ok(String),
    /// The remote asked us to slow down. Retry the same offset.
    Throttled,
    /// The response lacked the success indicator. Skip this offset.
    Malformed,
    /// The request could not be completed. Abort the run.
    TransportError(String),
}

impl fmt::Display for PageResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageResult::Ok(markup) => write!(f, "OK ({} bytes)", markup.len()),
            PageResult::Throttled => write!(f, "THROTTLED"),
            PageResult::Malformed => write!(f, "MALFORMED"),
            PageResult::TransportError(reason) => write!(f, "TRANSPORT ERROR: {reason}"),
        }
    }
}

/// Abstraction over the paginated history source.
///
/// Implementors perform exactly one request per call and classify the
/// response; they never retry or sleep on their own.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Request `count` records starting at zero-based offset `start`.
    async fn fetch_page(&self, start: u64, count: u32) -> PageResult;
}
