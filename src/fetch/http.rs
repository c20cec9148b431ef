//! Market history endpoint over HTTP.
//!
//! Endpoint: `GET {endpoint}?query=&start={start}&count={count}`
//! Response: `{ "success": true, "results_html": "<div ...>", "total_count": N, ... }`
//! Auth: an already-authenticated session cookie supplied by the operator.
//! Throttling: HTTP 429 with no Retry-After; the remote only wants us to
//! back off for a while.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::{PageFetcher, PageResult};

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

/// The JSON envelope around one page of history. We only deserialize the
/// fields we need.
#[derive(Debug, Deserialize)]
struct HistoryPageResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    results_html: Option<String>,
    #[serde(default)]
    total_count: Option<u64>,
}

/// Classify a raw HTTP response into a `PageResult`.
fn classify_response(status: StatusCode, body: &str) -> PageResult {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return PageResult::Throttled;
    }

    if !status.is_success() {
        return PageResult::TransportError(format!("HTTP {status}"));
    }

    // The endpoint answers `null` (or an HTML error page) when it has
    // nothing sensible to say; both count as a missing success flag.
    let parsed: Option<HistoryPageResponse> = match serde_json::from_str(body) {
        Ok(parsed) => parsed,
        Err(e) => {
            debug!(error = %e, "History page body is not JSON");
            None
        }
    };

    match parsed {
        Some(HistoryPageResponse {
            success: true,
            results_html: Some(html),
            total_count,
        }) => {
            debug!(total_count = ?total_count, bytes = html.len(), "History page received");
            PageResult::Ok(html)
        }
        _ => PageResult::Malformed,
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// History endpoint client.
pub struct HttpFetcher {
    http: Client,
    endpoint: String,
    search_query: String,
    /// Raw `Cookie` header value for the authenticated session.
    session_cookie: Option<SecretString>,
}

impl HttpFetcher {
    /// Create a new fetcher.
    ///
    /// Without a session cookie the remote will answer with
    /// `success: false`, so every page will be classified as malformed.
    pub fn new(
        endpoint: impl Into<String>,
        search_query: impl Into<String>,
        session_cookie: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent("market-ledger/0.1.0")
            .build()
            .context("Failed to build HTTP client for market history")?;

        Ok(Self {
            http,
            endpoint: endpoint.into(),
            search_query: search_query.into(),
            session_cookie,
        })
    }

    fn page_url(&self, start: u64, count: u32) -> String {
        format!(
            "{}?query={}&start={start}&count={count}",
            self.endpoint,
            urlencoding::encode(&self.search_query),
        )
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch_page(&self, start: u64, count: u32) -> PageResult {
        let url = self.page_url(start, count);
        debug!(url = %url, "Fetching history page");

        let mut request = self
            .http
            .get(&url)
            .header(header::ACCEPT, "application/json");
        if let Some(cookie) = &self.session_cookie {
            request = request.header(header::COOKIE, cookie.expose_secret().as_str());
        }

        let resp = match request.send().await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(start, error = %e, "History request failed");
                return PageResult::TransportError(e.to_string());
            }
        };

        let status = resp.status();
        let body = match resp.text().await {
            Ok(body) => body,
            Err(e) => {
                warn!(start, status = %status, error = %e, "Failed to read history response body");
                return PageResult::TransportError(format!("reading body: {e}"));
            }
        };

        classify_response(status, &body)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
