//! Subscription tiers, per-tier rate limits and daily generation caps,
//! and the fixed-window counter used by the rate gate.

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use chrono::{Local, TimeZone};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::Timestamp;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Length of the fixed rate-limit window.
pub const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Provider family with its own, tighter daily caps.
pub const FAMILY_REPLICATE: &str = "replicate";

// ---------------------------------------------------------------------------
// Tiers
// ---------------------------------------------------------------------------

/// Subscription tier carried in the access token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTier {
    #[default]
    Free,
    Premium,
    Pro,
}

impl SubscriptionTier {
    pub fn as_str(self) -> &'static str {
        match self {
            SubscriptionTier::Free => "free",
            SubscriptionTier::Premium => "premium",
            SubscriptionTier::Pro => "pro",
        }
    }

    /// Requests admitted per [`RATE_WINDOW`].
    pub fn rate_limit(self) -> u32 {
        match self {
            SubscriptionTier::Free => 30,
            SubscriptionTier::Premium => 120,
            SubscriptionTier::Pro => 300,
        }
    }

    /// Generations per local day across all providers.
    pub fn daily_cap(self) -> i64 {
        match self {
            SubscriptionTier::Free => 10,
            SubscriptionTier::Premium => 100,
            SubscriptionTier::Pro => 500,
        }
    }

    /// Generations per local day on a single provider family, when that
    /// family is capped separately.
    pub fn family_daily_cap(self, family: &str) -> Option<i64> {
        if family != FAMILY_REPLICATE {
            return None;
        }
        Some(match self {
            SubscriptionTier::Free => 5,
            SubscriptionTier::Premium => 50,
            SubscriptionTier::Pro => 200,
        })
    }
}

impl fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionTier {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(SubscriptionTier::Free),
            "premium" => Ok(SubscriptionTier::Premium),
            "pro" => Ok(SubscriptionTier::Pro),
            other => Err(CoreError::Validation(format!(
                "Unknown subscription tier '{other}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Quota scope
// ---------------------------------------------------------------------------

/// Which daily cap a rejection refers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "provider", rename_all = "snake_case")]
pub enum QuotaScope {
    /// All generations of the user.
    Daily,
    /// Generations routed to one provider family.
    Provider(String),
}

impl fmt::Display for QuotaScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuotaScope::Daily => f.write_str("all providers"),
            QuotaScope::Provider(name) => write!(f, "provider {name}"),
        }
    }
}

/// Compare an admitted-today count against a cap.
pub fn check_daily_cap(used: i64, cap: i64, scope: QuotaScope) -> Result<(), CoreError> {
    if used >= cap {
        Err(CoreError::QuotaExceeded { cap, scope })
    } else {
        Ok(())
    }
}

/// Start of the current local calendar day, in UTC.
pub fn start_of_local_day(now: Timestamp) -> Timestamp {
    let local = now.with_timezone(&Local);
    let midnight = local.date_naive().and_hms_opt(0, 0, 0).unwrap_or(local.naive_local());
    Local
        .from_local_datetime(&midnight)
        .earliest()
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .unwrap_or(now)
}

// ---------------------------------------------------------------------------
// Fixed window
// ---------------------------------------------------------------------------

/// A fixed-window request counter for one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedWindow {
    pub started_at: Instant,
    pub count: u32,
}

impl FixedWindow {
    pub fn new(now: Instant) -> Self {
        Self {
            started_at: now,
            count: 0,
        }
    }

    pub fn is_expired(&self, now: Instant, window: Duration) -> bool {
        now.saturating_duration_since(self.started_at) >= window
    }

    /// Count one request, resetting the window first if it has elapsed.
    ///
    /// A rejected request does not consume a slot.
    pub fn try_acquire(&mut self, now: Instant, limit: u32, window: Duration) -> Result<u32, CoreError> {
        if self.is_expired(now, window) {
            *self = FixedWindow::new(now);
        }
        if self.count >= limit {
            return Err(CoreError::RateLimitExceeded {
                limit,
                window_secs: window.as_secs(),
            });
        }
        self.count += 1;
        Ok(limit - self.count)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn tiers_scale_limits() {
        assert!(SubscriptionTier::Free.rate_limit() < SubscriptionTier::Premium.rate_limit());
        assert!(SubscriptionTier::Premium.rate_limit() < SubscriptionTier::Pro.rate_limit());
        assert_eq!(SubscriptionTier::Free.daily_cap(), 10);
        assert_eq!(SubscriptionTier::Premium.daily_cap(), 100);
        assert_eq!(SubscriptionTier::Pro.daily_cap(), 500);
    }

    #[test]
    fn only_replicate_has_family_cap() {
        assert_eq!(SubscriptionTier::Free.family_daily_cap("replicate"), Some(5));
        assert_eq!(SubscriptionTier::Pro.family_daily_cap("replicate"), Some(200));
        assert_eq!(SubscriptionTier::Free.family_daily_cap("siliconflow"), None);
    }

    #[test]
    fn tier_parses() {
        assert_eq!("pro".parse::<SubscriptionTier>().unwrap(), SubscriptionTier::Pro);
        assert!("gold".parse::<SubscriptionTier>().is_err());
    }

    #[test]
    fn eleventh_free_generation_exceeds_cap() {
        let cap = SubscriptionTier::Free.daily_cap();
        assert!(check_daily_cap(9, cap, QuotaScope::Daily).is_ok());
        assert_matches!(
            check_daily_cap(10, cap, QuotaScope::Daily),
            Err(CoreError::QuotaExceeded { cap: 10, scope: QuotaScope::Daily })
        );
    }

    #[test]
    fn window_rejects_request_over_limit() {
        let start = Instant::now();
        let mut window = FixedWindow::new(start);
        for _ in 0..3 {
            window.try_acquire(start, 3, RATE_WINDOW).unwrap();
        }
        assert_matches!(
            window.try_acquire(start, 3, RATE_WINDOW),
            Err(CoreError::RateLimitExceeded { limit: 3, window_secs: 60 })
        );
        // The rejection did not consume a slot.
        assert_eq!(window.count, 3);
    }

    #[test]
    fn window_resets_after_elapsing() {
        let start = Instant::now();
        let mut window = FixedWindow::new(start);
        window.try_acquire(start, 1, RATE_WINDOW).unwrap();
        assert!(window.try_acquire(start, 1, RATE_WINDOW).is_err());

        let later = start + RATE_WINDOW;
        assert_eq!(window.try_acquire(later, 1, RATE_WINDOW).unwrap(), 0);
        assert_eq!(window.started_at, later);
    }

    #[test]
    fn start_of_day_is_not_after_now() {
        let now = chrono::Utc::now();
        let start = start_of_local_day(now);
        assert!(start <= now);
        assert!(now - start < chrono::Duration::hours(25));
    }
}
