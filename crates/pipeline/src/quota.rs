//! Admission control: a fixed-window rate limit per user followed by
//! daily generation caps.
//!
//! Rate windows live behind [`RateLimitStore`] so they can move to a shared
//! store; each acquire is atomic per key. Daily usage is not stored at all:
//! it is counted from tasks that were actually admitted to a provider.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use imagegen_core::error::CoreError;
use imagegen_core::quota::{
    check_daily_cap, start_of_local_day, FixedWindow, QuotaScope, SubscriptionTier, RATE_WINDOW,
};
use imagegen_core::types::DbId;
use imagegen_db::TaskStore;

use crate::error::GenerationError;

// ---------------------------------------------------------------------------
// Rate windows
// ---------------------------------------------------------------------------

pub trait RateLimitStore: Send + Sync {
    /// Take one slot from `user_id`'s current window. A rejected call does
    /// not consume a slot. Returns the slots left on success.
    fn try_acquire(&self, user_id: DbId, limit: u32, window: Duration) -> Result<u32, CoreError>;

    /// Drop windows older than `window`. Returns how many were removed.
    fn purge_expired(&self, window: Duration) -> usize;
}

/// Process-local [`RateLimitStore`].
#[derive(Default)]
pub struct InMemoryRateLimitStore {
    windows: Mutex<HashMap<DbId, FixedWindow>>,
}

impl InMemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.windows.lock().map(|w| w.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn try_acquire_at(
        &self,
        user_id: DbId,
        limit: u32,
        window: Duration,
        now: Instant,
    ) -> Result<u32, CoreError> {
        let mut windows = self
            .windows
            .lock()
            .map_err(|_| CoreError::Internal("rate limit store poisoned".into()))?;
        windows
            .entry(user_id)
            .or_insert_with(|| FixedWindow::new(now))
            .try_acquire(now, limit, window)
    }
}

impl RateLimitStore for InMemoryRateLimitStore {
    fn try_acquire(&self, user_id: DbId, limit: u32, window: Duration) -> Result<u32, CoreError> {
        self.try_acquire_at(user_id, limit, window, Instant::now())
    }

    fn purge_expired(&self, window: Duration) -> usize {
        let now = Instant::now();
        let Ok(mut windows) = self.windows.lock() else {
            return 0;
        };
        let before = windows.len();
        windows.retain(|_, w| !w.is_expired(now, window));
        before - windows.len()
    }
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

pub struct QuotaGate {
    rate: Arc<dyn RateLimitStore>,
    store: Arc<dyn TaskStore>,
    window: Duration,
}

impl QuotaGate {
    pub fn new(rate: Arc<dyn RateLimitStore>, store: Arc<dyn TaskStore>) -> Self {
        Self {
            rate,
            store,
            window: RATE_WINDOW,
        }
    }

    /// Override the rate window length.
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn rate_store(&self) -> &Arc<dyn RateLimitStore> {
        &self.rate
    }

    /// Admit or reject one request from `user_id`.
    ///
    /// `family` is the provider the request is bound to, when known; it
    /// enables the per-provider cap.
    pub async fn check(
        &self,
        user_id: DbId,
        tier: SubscriptionTier,
        family: Option<&str>,
    ) -> Result<(), GenerationError> {
        let limit = tier.rate_limit();
        if let Err(e) = self.rate.try_acquire(user_id, limit, self.window) {
            tracing::info!(user_id, tier = %tier, limit, "Rate limit exceeded");
            return Err(e.into());
        }

        let since = start_of_local_day(Utc::now());
        let used = self.store.count_admitted_since(user_id, since, None).await?;
        if let Err(e) = check_daily_cap(used, tier.daily_cap(), QuotaScope::Daily) {
            tracing::info!(user_id, tier = %tier, used, "Daily quota exceeded");
            return Err(e.into());
        }

        if let Some(family) = family {
            if let Some(cap) = tier.family_daily_cap(family) {
                let used = self
                    .store
                    .count_admitted_since(user_id, since, Some(family))
                    .await?;
                if let Err(e) = check_daily_cap(used, cap, QuotaScope::Provider(family.to_string())) {
                    tracing::info!(user_id, tier = %tier, provider = family, used, "Provider quota exceeded");
                    return Err(e.into());
                }
            }
        }

        Ok(())
    }
}
