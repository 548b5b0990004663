//! Rolling-window uptime calculator (SPEC_FULL.md §4.d).
//!
//! Each monitor gets an in-memory ring of per-minute buckets. `update`
//! increments the current bucket's up/down counters and ping accumulator;
//! `get_24h`/`get_30d` aggregate buckets within the window into a fraction
//! and an average ping. The calculator is per-process; cross-process
//! coherency comes from [`UptimeCache::remove`] being called by the relay on
//! every received heartbeat (§4.h), forcing a later query to rebuild from
//! the durable store instead of stale in-memory state.

use chrono::{DateTime, Utc};
use mqk_schemas::{Heartbeat, MonitorStatus};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

const MINUTES_PER_DAY: i64 = 24 * 60;
const WINDOW_30D_MINUTES: i64 = 30 * MINUTES_PER_DAY;
const WINDOW_24H_MINUTES: i64 = MINUTES_PER_DAY;

/// Upper bound on rows replayed when rebuilding a window after a cache miss.
/// Generous relative to a 30-day window of per-minute buckets; a monitor
/// checked more often than this in 30 days still gets a usable (if slightly
/// truncated) rebuild rather than an unbounded query.
const REHYDRATE_LOOKBACK_ROWS: i64 = 50_000;

#[derive(Clone, Copy, Default)]
struct Bucket {
    up: u32,
    down: u32,
    ping_sum_ms: f64,
    ping_count: u32,
}

/// Aggregate uptime and average ping for a window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UptimeStats {
    /// Fraction of checks that were `UP`, in `[0, 1]`. `1.0` when the window
    /// has no data yet (nothing observed down).
    pub uptime: f64,
    pub avg_ping_ms: Option<f64>,
}

/// Per-minute bucket ring for one monitor.
pub struct UptimeCalculator {
    buckets: BTreeMap<i64, Bucket>,
}

impl UptimeCalculator {
    pub fn new() -> Self {
        Self {
            buckets: BTreeMap::new(),
        }
    }

    fn minute_index(at: DateTime<Utc>) -> i64 {
        at.timestamp() / 60
    }

    /// Record a check result at `now`. Returns the instant the current
    /// bucket ends, for callers that stamp `heartbeat.end_time` with it.
    pub fn update(&mut self, is_up: bool, ping_ms: Option<f64>, now: DateTime<Utc>) -> DateTime<Utc> {
        let idx = Self::minute_index(now);
        let bucket = self.buckets.entry(idx).or_default();
        if is_up {
            bucket.up += 1;
        } else {
            bucket.down += 1;
        }
        if let Some(ping) = ping_ms {
            bucket.ping_sum_ms += ping;
            bucket.ping_count += 1;
        }

        self.prune_older_than(idx - WINDOW_30D_MINUTES);

        let end_minute = idx + 1;
        DateTime::from_timestamp(end_minute * 60, 0).unwrap_or(now)
    }

    fn prune_older_than(&mut self, cutoff_minute: i64) {
        self.buckets = self.buckets.split_off(&cutoff_minute);
    }

    fn aggregate(&self, now: DateTime<Utc>, window_minutes: i64) -> UptimeStats {
        let idx = Self::minute_index(now);
        let cutoff = idx - window_minutes;

        let mut up = 0u64;
        let mut down = 0u64;
        let mut ping_sum = 0.0f64;
        let mut ping_count = 0u64;

        for (minute, bucket) in self.buckets.range((cutoff + 1)..=idx) {
            let _ = minute;
            up += bucket.up as u64;
            down += bucket.down as u64;
            ping_sum += bucket.ping_sum_ms;
            ping_count += bucket.ping_count as u64;
        }

        let total = up + down;
        let uptime = if total == 0 { 1.0 } else { up as f64 / total as f64 };
        let avg_ping_ms = if ping_count == 0 {
            None
        } else {
            Some(ping_sum / ping_count as f64)
        };

        UptimeStats { uptime, avg_ping_ms }
    }

    pub fn get_24h(&self, now: DateTime<Utc>) -> UptimeStats {
        self.aggregate(now, WINDOW_24H_MINUTES)
    }

    pub fn get_30d(&self, now: DateTime<Utc>) -> UptimeStats {
        self.aggregate(now, WINDOW_30D_MINUTES)
    }

    pub fn get_last_hour_avg_ping(&self, now: DateTime<Utc>) -> Option<f64> {
        self.aggregate(now, 60).avg_ping_ms
    }
}

impl Default for UptimeCalculator {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-monitor cache of [`UptimeCalculator`]s, keyed by monitor id. Mirrors
/// the upstream in-memory worker registry: a mutex-guarded map with
/// insert-on-first-use and explicit removal, rather than a TTL cache.
pub struct UptimeCache {
    calculators: Mutex<HashMap<i64, UptimeCalculator>>,
}

impl UptimeCache {
    pub fn new() -> Self {
        Self {
            calculators: Mutex::new(HashMap::new()),
        }
    }

    /// Record a check result for `monitor_id`, creating its calculator on
    /// first use. Returns the bucket end instant.
    pub fn update(
        &self,
        monitor_id: i64,
        is_up: bool,
        ping_ms: Option<f64>,
        now: DateTime<Utc>,
    ) -> DateTime<Utc> {
        let mut calculators = self.calculators.lock().expect("uptime cache mutex poisoned");
        calculators
            .entry(monitor_id)
            .or_insert_with(UptimeCalculator::new)
            .update(is_up, ping_ms, now)
    }

    pub fn get_24h(&self, monitor_id: i64, now: DateTime<Utc>) -> UptimeStats {
        let calculators = self.calculators.lock().expect("uptime cache mutex poisoned");
        calculators
            .get(&monitor_id)
            .map(|c| c.get_24h(now))
            .unwrap_or(UptimeStats { uptime: 1.0, avg_ping_ms: None })
    }

    pub fn get_30d(&self, monitor_id: i64, now: DateTime<Utc>) -> UptimeStats {
        let calculators = self.calculators.lock().expect("uptime cache mutex poisoned");
        calculators
            .get(&monitor_id)
            .map(|c| c.get_30d(now))
            .unwrap_or(UptimeStats { uptime: 1.0, avg_ping_ms: None })
    }

    pub fn get_last_hour_avg_ping(&self, monitor_id: i64, now: DateTime<Utc>) -> Option<f64> {
        let calculators = self.calculators.lock().expect("uptime cache mutex poisoned");
        calculators.get(&monitor_id).and_then(|c| c.get_last_hour_avg_ping(now))
    }

    /// Drop a monitor's calculator, forcing the next query to rebuild from
    /// the durable store. Called by the relay on every received heartbeat.
    pub fn remove(&self, monitor_id: i64) {
        let mut calculators = self.calculators.lock().expect("uptime cache mutex poisoned");
        calculators.remove(&monitor_id);
    }

    /// Rebuilds `monitor_id`'s calculator from the heartbeat store, replacing
    /// whatever is cached for it. Callers invoke this after [`remove`] so the
    /// next `get_24h`/`get_30d` reflects durable state instead of the
    /// "no observations yet" default a bare cache miss would report (§4.d,
    /// §8 invariant 5). The heartbeat append that triggered the `remove` is
    /// already durable by the time this runs (§4.f's append-before-publish
    /// ordering invariant).
    ///
    /// [`remove`]: UptimeCache::remove
    pub async fn rehydrate(&self, pool: &sqlx::PgPool, monitor_id: i64) -> anyhow::Result<()> {
        let recent = mqk_db::heartbeat_recent(pool, monitor_id, REHYDRATE_LOOKBACK_ROWS, false).await?;
        let calculator = calculator_from_heartbeats(&recent);
        let mut calculators = self.calculators.lock().expect("uptime cache mutex poisoned");
        calculators.insert(monitor_id, calculator);
        Ok(())
    }
}

/// Replays heartbeats (most-recent-first, as `heartbeat_recent` returns them)
/// into a fresh calculator, oldest first so bucket ordering matches live use.
fn calculator_from_heartbeats(recent: &[Heartbeat]) -> UptimeCalculator {
    let mut calculator = UptimeCalculator::new();
    for beat in recent.iter().rev() {
        let is_up = MonitorStatus::from_i16(beat.status) == Some(MonitorStatus::Up);
        calculator.update(is_up, beat.ping, beat.time);
    }
    calculator
}

impl Default for UptimeCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(minute_offset: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + minute_offset * 60, 0).unwrap()
    }

    #[test]
    fn empty_calculator_reports_full_uptime() {
        let calc = UptimeCalculator::new();
        let stats = calc.get_24h(at(0));
        assert_eq!(stats.uptime, 1.0);
        assert_eq!(stats.avg_ping_ms, None);
    }

    #[test]
    fn update_returns_bucket_end_one_minute_after_start() {
        let mut calc = UptimeCalculator::new();
        let start = at(0);
        let end = calc.update(true, Some(10.0), start);
        assert_eq!((end - start).num_seconds(), 60 - (start.timestamp() % 60));
    }

    #[test]
    fn mixed_up_down_checks_compute_fractional_uptime() {
        let mut calc = UptimeCalculator::new();
        for m in 0..10 {
            calc.update(true, Some(5.0), at(m));
        }
        for m in 10..12 {
            calc.update(false, None, at(m));
        }
        let stats = calc.get_24h(at(11));
        assert!((stats.uptime - (10.0 / 12.0)).abs() < 1e-9);
    }

    #[test]
    fn checks_outside_window_are_excluded() {
        let mut calc = UptimeCalculator::new();
        calc.update(false, None, at(0));
        let now = at(WINDOW_24H_MINUTES + 5);
        let stats = calc.get_24h(now);
        assert_eq!(stats.uptime, 1.0);
    }

    #[test]
    fn avg_ping_averages_only_recorded_pings() {
        let mut calc = UptimeCalculator::new();
        calc.update(true, Some(10.0), at(0));
        calc.update(true, Some(30.0), at(1));
        calc.update(true, None, at(2));
        let stats = calc.get_24h(at(2));
        assert_eq!(stats.avg_ping_ms, Some(20.0));
    }

    #[test]
    fn cache_remove_forces_recompute_from_scratch() {
        let cache = UptimeCache::new();
        cache.update(1, false, None, at(0));
        assert_eq!(cache.get_24h(1, at(0)).uptime, 0.0);
        cache.remove(1);
        assert_eq!(cache.get_24h(1, at(0)).uptime, 1.0);
    }

    #[test]
    fn cache_tracks_monitors_independently() {
        let cache = UptimeCache::new();
        cache.update(1, true, Some(5.0), at(0));
        cache.update(2, false, None, at(0));
        assert_eq!(cache.get_24h(1, at(0)).uptime, 1.0);
        assert_eq!(cache.get_24h(2, at(0)).uptime, 0.0);
    }

    fn heartbeat_at(minute_offset: i64, status: MonitorStatus, ping: Option<f64>) -> Heartbeat {
        Heartbeat {
            id: minute_offset,
            monitor_id: 1,
            tenant_id: uuid::Uuid::nil(),
            time: at(minute_offset),
            status: status as i16,
            msg: String::new(),
            ping,
            important: false,
            duration: 0.0,
            down_count: 0,
            retries: 0,
            end_time: None,
        }
    }

    #[test]
    fn calculator_from_heartbeats_replays_most_recent_first_rows_in_order() {
        // `heartbeat_recent` returns newest-first; the replay must still
        // produce the same aggregate a live calculator would have.
        let recent = vec![
            heartbeat_at(2, MonitorStatus::Down, None),
            heartbeat_at(1, MonitorStatus::Up, Some(20.0)),
            heartbeat_at(0, MonitorStatus::Up, Some(10.0)),
        ];
        let calculator = calculator_from_heartbeats(&recent);
        let stats = calculator.get_24h(at(2));
        assert!((stats.uptime - (2.0 / 3.0)).abs() < 1e-9);
        assert_eq!(stats.avg_ping_ms, Some(15.0));
    }
}
