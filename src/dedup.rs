// Duplicate-save guard
// Collapses near-identical "save analysis" submissions (double-click,
// re-render, resumed flow) into a single backend call, without relying on
// server-side idempotency keys.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::error::ApiError;
use crate::models::{AnalysisResult, SaveOutcome};

/// How long a committed save blocks identical submissions.
const COMMITTED_TTL_MS: i64 = 5 * 60 * 1000;

/// How long an unresolved pending save blocks identical submissions. A save
/// stuck longer than this is treated as failed and a retry is allowed.
const PENDING_TTL_MS: i64 = 60 * 1000;

/// Width of the timestamp bucket folded into the fingerprint.
const FINGERPRINT_WINDOW_MS: i64 = 30 * 1000;

/// A set whose members quietly expire.
///
/// Entries record their insertion time against the injected clock and are
/// swept lazily, so eviction is testable without waiting on real timers.
struct ExpiringSet {
    entries: DashMap<String, i64>,
    ttl_ms: i64,
    clock: Arc<dyn Clock>,
}

impl ExpiringSet {
    fn new(ttl_ms: i64, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            ttl_ms,
            clock,
        }
    }

    fn insert(&self, key: &str) {
        self.sweep();
        self.entries.insert(key.to_string(), self.clock.now_ms());
    }

    /// Insert unless the key is already live. Returns whether this call
    /// claimed the key, so check-and-claim is a single atomic step.
    fn insert_if_absent(&self, key: &str) -> bool {
        self.sweep();
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(self.clock.now_ms());
                true
            }
        }
    }

    fn contains(&self, key: &str) -> bool {
        let inserted_at = match self.entries.get(key) {
            Some(entry) => *entry.value(),
            None => return false,
        };
        if self.clock.now_ms() - inserted_at < self.ttl_ms {
            true
        } else {
            self.entries.remove(key);
            false
        }
    }

    fn remove(&self, key: &str) {
        self.entries.remove(key);
    }

    fn sweep(&self) {
        let now = self.clock.now_ms();
        self.entries.retain(|_, inserted_at| now - *inserted_at < self.ttl_ms);
    }
}

/// Tracks save attempts in two disjoint phases: *pending* (call in flight)
/// and *committed* (succeeded within the retention window). A fingerprint in
/// either set suppresses an identical save.
pub struct SaveGuard {
    pending: ExpiringSet,
    committed: ExpiringSet,
    clock: Arc<dyn Clock>,
}

impl Default for SaveGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl SaveGuard {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            pending: ExpiringSet::new(PENDING_TTL_MS, clock.clone()),
            committed: ExpiringSet::new(COMMITTED_TTL_MS, clock.clone()),
            clock,
        }
    }

    /// Derive the dedup key: emotion label, confidence rounded to two
    /// decimals, and a 30-second timestamp bucket.
    pub fn fingerprint(result: &AnalysisResult) -> String {
        let rounded = (result.confidence * 100.0).round() / 100.0;
        let window = result.timestamp.div_euclid(FINGERPRINT_WINDOW_MS);
        format!("{}_{}_{}", result.emotion, rounded, window)
    }

    /// Whether an identical result was recently saved or is being saved.
    pub fn is_already_saved(&self, result: &AnalysisResult) -> bool {
        let fingerprint = Self::fingerprint(result);
        self.committed.contains(&fingerprint) || self.pending.contains(&fingerprint)
    }

    /// Record a result as successfully saved, ending its pending phase.
    pub fn mark_as_saved(&self, result: &AnalysisResult) {
        let fingerprint = Self::fingerprint(result);
        self.committed.insert(&fingerprint);
        self.pending.remove(&fingerprint);
    }

    /// Record a result as being saved right now.
    pub fn mark_as_pending(&self, result: &AnalysisResult) {
        let fingerprint = Self::fingerprint(result);
        self.pending.insert(&fingerprint);
    }

    /// Run `save_fn` unless an identical result was already saved or is in
    /// flight, in which case the call is skipped and a successful
    /// "already saved" outcome is returned.
    ///
    /// The result is stamped with the current time before fingerprinting.
    /// A failing `save_fn` has its error re-raised unchanged, and the
    /// fingerprint is released so an identical retry can proceed.
    pub async fn save_analysis_safe<F, Fut>(
        &self,
        mut result: AnalysisResult,
        save_fn: F,
    ) -> Result<SaveOutcome, ApiError>
    where
        F: FnOnce(AnalysisResult) -> Fut,
        Fut: Future<Output = Result<SaveOutcome, ApiError>>,
    {
        result.timestamp = self.clock.now_ms();
        let fingerprint = Self::fingerprint(&result);

        // Claiming the pending slot doubles as the duplicate check, so two
        // simultaneous submissions can never both reach `save_fn`
        if self.committed.contains(&fingerprint) || !self.pending.insert_if_absent(&fingerprint) {
            tracing::debug!(%fingerprint, "analysis already saved or in flight, skipping");
            return Ok(SaveOutcome {
                success: true,
                message: "Analysis already saved".to_string(),
            });
        }

        match save_fn(result).await {
            Ok(outcome) => {
                self.committed.insert(&fingerprint);
                self.pending.remove(&fingerprint);
                tracing::debug!(%fingerprint, "analysis saved");
                Ok(outcome)
            }
            Err(e) => {
                // Allow an identical retry after a failure
                self.pending.remove(&fingerprint);
                Err(e)
            }
        }
    }
}
