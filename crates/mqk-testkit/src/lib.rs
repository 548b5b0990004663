//! In-memory fixtures for the property and scenario tests in §6.d/§8:
//! [`FakeScheduleStore`] stands in for the Postgres schedule table,
//! [`FakePubSub`] for the broker, so claim contention and stale-recovery
//! scenarios can run many simulated workers without a real database.

use chrono::{DateTime, Duration, Utc};
use mqk_schemas::ScheduleRow;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

/// Mirrors `mqk_db::schedule_claim_batch`/`schedule_release`/
/// `schedule_release_stale` against an in-memory map instead of Postgres,
/// so property tests can spin up many simulated workers against one store
/// without a real database (§8 invariants 1 and 2).
pub struct FakeScheduleStore {
    rows: Mutex<HashMap<i64, ScheduleRow>>,
}

impl FakeScheduleStore {
    pub fn new() -> Self {
        Self { rows: Mutex::new(HashMap::new()) }
    }

    /// Seed `n` active, immediately-due rows with sequential monitor ids
    /// starting at `start_id`, all under `tenant_id`.
    pub fn seed_due(&self, start_id: i64, n: i64, tenant_id: Uuid) {
        let now = Utc::now();
        let mut rows = self.rows.lock().expect("fake schedule store mutex poisoned");
        for offset in 0..n {
            let id = start_id + offset;
            rows.insert(
                id,
                ScheduleRow {
                    id,
                    monitor_id: id,
                    tenant_id,
                    active: true,
                    next_check_at: now,
                    claimed_by: None,
                    claimed_at: None,
                    last_check_at: None,
                    last_status: None,
                    last_ping: None,
                    retry_count: 0,
                    consecutive_failures: 0,
                    created_at: now,
                    updated_at: now,
                },
            );
        }
    }

    /// Claims up to `batch_size` due rows for `worker_id`. A row counts as
    /// due per [`ScheduleRow::is_due`] — unclaimed, or claimed longer ago
    /// than `claim_timeout`. Mirrors the `FOR UPDATE SKIP LOCKED` CTE: each
    /// claimed row is marked owned before the next worker's call can see it,
    /// since the whole scan+mark happens under one lock acquisition here.
    pub fn claim_batch(&self, worker_id: &str, batch_size: usize, claim_timeout: Duration) -> Vec<ScheduleRow> {
        let now = Utc::now();
        let mut rows = self.rows.lock().expect("fake schedule store mutex poisoned");
        let mut claimed = Vec::with_capacity(batch_size);
        let mut ids: Vec<i64> = rows
            .values()
            .filter(|r| r.is_due(now, claim_timeout))
            .map(|r| r.id)
            .collect();
        ids.sort_unstable();
        for id in ids.into_iter().take(batch_size) {
            if let Some(row) = rows.get_mut(&id) {
                row.claimed_by = Some(worker_id.to_string());
                row.claimed_at = Some(now);
                row.updated_at = now;
                claimed.push(row.clone());
            }
        }
        claimed
    }

    /// Releases a claim and schedules the next run. Only takes effect if
    /// `worker_id` still owns the row, matching `mqk_db::schedule_release`'s
    /// "still owns the row" guard against a sweeper having reclaimed it.
    pub fn release(&self, schedule_id: i64, worker_id: &str, next_interval_seconds: i64, last_status: i16, last_ping: Option<f64>, was_failure: bool) -> bool {
        let now = Utc::now();
        let mut rows = self.rows.lock().expect("fake schedule store mutex poisoned");
        let Some(row) = rows.get_mut(&schedule_id) else { return false };
        if row.claimed_by.as_deref() != Some(worker_id) {
            return false;
        }
        row.claimed_by = None;
        row.claimed_at = None;
        row.last_check_at = Some(now);
        row.last_status = Some(last_status);
        row.last_ping = last_ping;
        row.next_check_at = now + Duration::seconds(next_interval_seconds);
        row.consecutive_failures = if was_failure { row.consecutive_failures + 1 } else { 0 };
        row.updated_at = now;
        true
    }

    /// Releases every claim older than `older_than`, regardless of owner.
    /// Mirrors the sweeper's `schedule_release_stale`.
    pub fn release_stale(&self, older_than: Duration) -> u64 {
        let now = Utc::now();
        let mut rows = self.rows.lock().expect("fake schedule store mutex poisoned");
        let mut released = 0;
        for row in rows.values_mut() {
            let is_stale = row.claimed_at.map(|at| at < now - older_than).unwrap_or(false);
            if is_stale {
                row.claimed_by = None;
                row.claimed_at = None;
                row.updated_at = now;
                released += 1;
            }
        }
        released
    }

    pub fn snapshot(&self) -> Vec<ScheduleRow> {
        let rows = self.rows.lock().expect("fake schedule store mutex poisoned");
        let mut out: Vec<_> = rows.values().cloned().collect();
        out.sort_by_key(|r| r.id);
        out
    }

    pub fn get(&self, id: i64) -> Option<ScheduleRow> {
        self.rows.lock().expect("fake schedule store mutex poisoned").get(&id).cloned()
    }
}

impl Default for FakeScheduleStore {
    fn default() -> Self {
        Self::new()
    }
}

/// In-memory broker recording every publish, for assertions that don't need
/// real fan-out (tests wanting delivery should use `mqk_pubsub::InProcessPubSub`
/// directly instead).
pub struct FakePubSub {
    published: Mutex<Vec<(String, serde_json::Value)>>,
    healthy: std::sync::atomic::AtomicBool,
}

impl FakePubSub {
    pub fn new() -> Self {
        Self {
            published: Mutex::new(Vec::new()),
            healthy: std::sync::atomic::AtomicBool::new(true),
        }
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, std::sync::atomic::Ordering::Relaxed);
    }

    pub fn published(&self) -> Vec<(String, serde_json::Value)> {
        self.published.lock().expect("fake pubsub mutex poisoned").clone()
    }

    pub fn count_on(&self, channel: &str) -> usize {
        self.published.lock().expect("fake pubsub mutex poisoned").iter().filter(|(c, _)| c == channel).count()
    }
}

impl Default for FakePubSub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl mqk_pubsub::PubSub for FakePubSub {
    async fn publish_json(&self, channel: &str, payload: serde_json::Value) -> anyhow::Result<()> {
        if !self.healthy.load(std::sync::atomic::Ordering::Relaxed) {
            anyhow::bail!("fake pubsub is unhealthy");
        }
        self.published.lock().expect("fake pubsub mutex poisoned").push((channel.to_string(), payload));
        Ok(())
    }

    async fn subscribe_raw(
        &self,
        _channel: &str,
        _handler: std::sync::Arc<dyn Fn(serde_json::Value) + Send + Sync>,
    ) -> anyhow::Result<()> {
        // Nothing subscribes through the fake today; tests that need real
        // delivery use `InProcessPubSub` directly.
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(std::sync::atomic::Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_batch_does_not_hand_out_a_row_twice_without_release() {
        let store = FakeScheduleStore::new();
        store.seed_due(1, 3, Uuid::nil());

        let first = store.claim_batch("w1", 10, Duration::seconds(60));
        assert_eq!(first.len(), 3);

        let second = store.claim_batch("w2", 10, Duration::seconds(60));
        assert!(second.is_empty(), "freshly claimed rows must not be due again");
    }

    #[test]
    fn release_only_succeeds_for_the_current_owner() {
        let store = FakeScheduleStore::new();
        store.seed_due(1, 1, Uuid::nil());
        store.claim_batch("w1", 10, Duration::seconds(60));

        assert!(!store.release(1, "w2", 60, 1, None, false));
        assert!(store.release(1, "w1", 60, 1, None, false));
        assert!(store.get(1).unwrap().claimed_by.is_none());
    }
}
