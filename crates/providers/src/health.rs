//! Per-provider health tracking.
//!
//! Each provider has a [`ProviderRecord`] with rolling counters. A provider
//! is *eligible* for selection when it is enabled and not `unhealthy`;
//! providers that were never probed (`unknown`) are eligible.
//!
//! State sits behind the [`ProviderHealthStore`] trait so it can be moved
//! out of process. Updates go through a closure so each one is applied
//! atomically per key.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use imagegen_core::types::Timestamp;
use serde::Serialize;

use crate::client::ProviderClient;
use crate::config::DEFAULT_ERROR_THRESHOLD;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Unknown,
}

/// Run-time state of one configured provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderRecord {
    pub name: String,
    pub enabled: bool,
    pub priority: u32,
    pub status: HealthStatus,
    pub last_check: Option<Timestamp>,
    /// Successful calls and probes since start.
    pub success_count: u64,
    /// Consecutive failures; reset on any success.
    pub error_count: u32,
    /// Latency of the most recent call or probe.
    pub response_time_ms: Option<u64>,
    pub last_error: Option<String>,
}

impl ProviderRecord {
    pub fn new(name: &str, priority: u32, enabled: bool) -> Self {
        Self {
            name: name.to_string(),
            enabled,
            priority,
            status: HealthStatus::Unknown,
            last_check: None,
            success_count: 0,
            error_count: 0,
            response_time_ms: None,
            last_error: None,
        }
    }

    /// Enabled and not known to be unhealthy.
    pub fn is_eligible(&self) -> bool {
        self.enabled && self.status != HealthStatus::Unhealthy
    }

    /// Sort key for selection: priority, then latency (unknown last).
    pub fn rank(&self) -> (u32, u64) {
        (self.priority, self.response_time_ms.unwrap_or(u64::MAX))
    }
}

/// Result of one probe, as reported to admin callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthResult {
    pub provider: String,
    pub healthy: bool,
    pub response_time_ms: u64,
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Storage for provider records with atomic per-key updates.
pub trait ProviderHealthStore: Send + Sync {
    /// Insert or replace a record.
    fn insert(&self, record: ProviderRecord);

    fn get(&self, name: &str) -> Option<ProviderRecord>;

    fn all(&self) -> Vec<ProviderRecord>;

    /// Apply `f` to the record under the store's lock. Returns the updated
    /// record, or `None` for an unknown provider.
    fn update(&self, name: &str, f: &mut dyn FnMut(&mut ProviderRecord)) -> Option<ProviderRecord>;
}

/// Process-local [`ProviderHealthStore`].
#[derive(Default)]
pub struct InMemoryHealthStore {
    records: RwLock<HashMap<String, ProviderRecord>>,
}

impl ProviderHealthStore for InMemoryHealthStore {
    fn insert(&self, record: ProviderRecord) {
        if let Ok(mut records) = self.records.write() {
            records.insert(record.name.clone(), record);
        }
    }

    fn get(&self, name: &str) -> Option<ProviderRecord> {
        self.records.read().ok()?.get(name).cloned()
    }

    fn all(&self) -> Vec<ProviderRecord> {
        let mut all: Vec<ProviderRecord> = self
            .records
            .read()
            .map(|r| r.values().cloned().collect())
            .unwrap_or_default();
        all.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
        all
    }

    fn update(&self, name: &str, f: &mut dyn FnMut(&mut ProviderRecord)) -> Option<ProviderRecord> {
        let mut records = self.records.write().ok()?;
        let record = records.get_mut(name)?;
        f(record);
        Some(record.clone())
    }
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

/// Outcome of one provider call.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success,
    Failure(String),
}

pub struct HealthTracker {
    store: Arc<dyn ProviderHealthStore>,
    error_threshold: u32,
}

impl HealthTracker {
    pub fn new(store: Arc<dyn ProviderHealthStore>, error_threshold: u32) -> Self {
        Self {
            store,
            error_threshold: error_threshold.max(1),
        }
    }

    /// In-memory tracker with the default threshold.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryHealthStore::default()), DEFAULT_ERROR_THRESHOLD)
    }

    pub fn error_threshold(&self) -> u32 {
        self.error_threshold
    }

    /// Register a provider if it is not tracked yet.
    pub fn register(&self, name: &str, priority: u32, enabled: bool) {
        if self.store.get(name).is_none() {
            self.store.insert(ProviderRecord::new(name, priority, enabled));
        }
    }

    pub fn get(&self, name: &str) -> Option<ProviderRecord> {
        self.store.get(name)
    }

    /// All records ordered by priority.
    pub fn snapshot(&self) -> Vec<ProviderRecord> {
        self.store.all()
    }

    pub fn is_healthy(&self, name: &str) -> bool {
        self.store.get(name).is_some_and(|r| r.is_eligible())
    }

    /// Eligible providers ordered by (priority, latency).
    pub fn healthy_providers(&self) -> Vec<ProviderRecord> {
        let mut eligible: Vec<ProviderRecord> =
            self.store.all().into_iter().filter(ProviderRecord::is_eligible).collect();
        eligible.sort_by_key(ProviderRecord::rank);
        eligible
    }

    pub fn set_enabled(&self, name: &str, enabled: bool) -> Option<ProviderRecord> {
        let record = self.store.update(name, &mut |r| r.enabled = enabled)?;
        tracing::info!(provider = name, enabled, "Provider availability changed");
        Some(record)
    }

    /// Fold the outcome of a generation call into the counters.
    ///
    /// A success heals the provider immediately. A failure marks it
    /// unhealthy once consecutive failures reach the threshold.
    pub fn record_outcome(&self, name: &str, outcome: &Outcome, latency: Duration) {
        let threshold = self.error_threshold;
        let latency_ms = latency.as_millis() as u64;
        let updated = self.store.update(name, &mut |r| {
            r.response_time_ms = Some(latency_ms);
            match outcome {
                Outcome::Success => {
                    r.success_count += 1;
                    r.error_count = 0;
                    r.last_error = None;
                    r.status = HealthStatus::Healthy;
                }
                Outcome::Failure(message) => {
                    r.error_count += 1;
                    r.last_error = Some(message.clone());
                    if r.error_count >= threshold {
                        r.status = HealthStatus::Unhealthy;
                    }
                }
            }
        });

        match updated {
            Some(r) if r.status == HealthStatus::Unhealthy && matches!(outcome, Outcome::Failure(_)) => {
                tracing::warn!(
                    provider = name,
                    error_count = r.error_count,
                    "Provider marked unhealthy",
                );
            }
            Some(_) => {}
            None => tracing::warn!(provider = name, "Outcome recorded for unknown provider"),
        }
    }

    /// Probe one provider and record the result. A failed probe marks the
    /// provider unhealthy at once.
    pub async fn probe(&self, client: &dyn ProviderClient) -> HealthResult {
        let name = client.name().to_string();
        let started = Instant::now();
        let result = client.probe().await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let error = result.err().map(|e| e.message);
        self.store.update(&name, &mut |r| {
            r.last_check = Some(Utc::now());
            r.response_time_ms = Some(latency_ms);
            match &error {
                None => {
                    r.status = HealthStatus::Healthy;
                    r.success_count += 1;
                    r.error_count = 0;
                    r.last_error = None;
                }
                Some(message) => {
                    r.status = HealthStatus::Unhealthy;
                    r.error_count += 1;
                    r.last_error = Some(message.clone());
                }
            }
        });

        match &error {
            None => tracing::debug!(provider = %name, latency_ms, "Provider probe succeeded"),
            Some(e) => tracing::warn!(provider = %name, latency_ms, error = %e, "Provider probe failed"),
        }

        HealthResult {
            provider: name,
            healthy: error.is_none(),
            response_time_ms: latency_ms,
            error,
        }
    }
}
