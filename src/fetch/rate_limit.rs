//! Throttle handling around a `PageFetcher`.
//!
//! When the remote signals throttling we sleep for a cooldown before
//! handing `Throttled` back, so the caller can immediately retry the same
//! offset. Consecutive throttles may lengthen the cooldown and, if a retry
//! ceiling is configured, eventually escalate to a transport error.

use std::time::Duration;
use tracing::{debug, warn};

use super::{PageFetcher, PageResult};

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// How long to back off after throttling, and when to give up.
#[derive(Debug, Clone, PartialEq)]
pub struct ThrottlePolicy {
    /// Wait after the first throttle in a streak.
    pub cooldown: Duration,
    /// Growth factor per additional consecutive throttle (1.0 = fixed).
    pub multiplier: f64,
    /// Upper bound on any single wait.
    pub max_cooldown: Duration,
    /// Consecutive throttles tolerated before escalating. `None` retries forever.
    pub max_retries: Option<u32>,
}

impl Default for ThrottlePolicy {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(30),
            multiplier: 1.0,
            max_cooldown: Duration::from_secs(300),
            max_retries: None,
        }
    }
}

impl ThrottlePolicy {
    /// Cooldown for the `streak`-th consecutive throttle (1-based).
    pub fn cooldown_for(&self, streak: u32) -> Duration {
        if streak <= 1 || self.multiplier <= 1.0 {
            return self.cooldown.min(self.max_cooldown);
        }
        let exponent = streak.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        let secs = (self.cooldown.as_secs_f64() * factor).min(self.max_cooldown.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

/// Wraps a fetcher with throttle cooldowns and observability counters.
pub struct RateLimitedFetcher {
    inner: Box<dyn PageFetcher>,
    policy: ThrottlePolicy,
    /// Throttle signals seen over this fetcher's lifetime.
    throttle_events: u64,
    /// Consecutive throttles without an intervening non-throttled response.
    streak: u32,
    total_cooldown: Duration,
}

impl RateLimitedFetcher {
    pub fn new(inner: Box<dyn PageFetcher>, policy: ThrottlePolicy) -> Self {
        Self {
            inner,
            policy,
            throttle_events: 0,
            streak: 0,
            total_cooldown: Duration::ZERO,
        }
    }

    /// Perform one request. On `Throttled` the cooldown has already elapsed
    /// when this returns.
    pub async fn fetch_page(&mut self, start: u64, count: u32) -> PageResult {
        let result = self.inner.fetch_page(start, count).await;

        if result != PageResult::Throttled {
            self.streak = 0;
            return result;
        }

        self.throttle_events += 1;
        self.streak += 1;

        if let Some(max) = self.policy.max_retries {
            if self.streak > max {
                let streak = self.streak;
                self.streak = 0;
                warn!(start, streak, max_retries = max, "Throttle retry ceiling reached");
                return PageResult::TransportError(format!(
                    "throttled {streak} times in a row at offset {start}"
                ));
            }
        }

        let wait = self.policy.cooldown_for(self.streak);
        warn!(
            start,
            streak = self.streak,
            total = self.throttle_events,
            cooldown_secs = wait.as_secs_f64(),
            "Throttled by remote, cooling down"
        );
        tokio::time::sleep(wait).await;
        self.total_cooldown += wait;
        debug!(start, "Cooldown complete");

        PageResult::Throttled
    }

    /// Throttle signals observed so far.
    pub fn throttle_events(&self) -> u64 {
        self.throttle_events
    }

    /// Total time spent in throttle cooldowns.
    pub fn total_cooldown(&self) -> Duration {
        self.total_cooldown
    }

    pub fn policy(&self) -> &ThrottlePolicy {
        &self.policy
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
