//! Shared domain types for the monitor-check scheduler: the row shapes the
//! schedule store and heartbeat store persist, and the event envelope carried
//! over the pub/sub transport.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status values a heartbeat (and a schedule row's `last_status`) can hold.
///
/// Numeric values match the upstream system's wire encoding so handlers that
/// serialise status as an integer stay compatible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i16)]
pub enum MonitorStatus {
    Down = 0,
    Up = 1,
    Pending = 2,
    Maintenance = 3,
}

impl MonitorStatus {
    pub fn from_i16(v: i16) -> Option<Self> {
        match v {
            0 => Some(Self::Down),
            1 => Some(Self::Up),
            2 => Some(Self::Pending),
            3 => Some(Self::Maintenance),
            _ => None,
        }
    }
}

/// The monitor types `mqk-checks` dispatches on. Read-only to the core;
/// type-specific configuration lives in `Monitor::config`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorType {
    Http,
    Tcp,
    Dns,
    Push,
    Tls,
    Database,
    Grpc,
}

/// Read-only monitor configuration, owned by the external management layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Monitor {
    pub id: i64,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub r#type: MonitorType,
    pub interval_seconds: i32,
    pub retry_interval_seconds: i32,
    pub max_retries: i32,
    pub timeout_seconds: i32,
    pub resend_interval: i32,
    pub upside_down: bool,
    /// Type-specific fields (URL, host/port, accepted status codes, ...).
    pub config: serde_json::Value,
}

impl Monitor {
    pub fn effective_timeout_seconds(&self) -> f64 {
        if self.timeout_seconds > 0 {
            self.timeout_seconds as f64
        } else {
            0.8 * self.interval_seconds as f64
        }
    }
}

/// One row per monitor in the `monitor_schedule` table. Unique on `monitor_id`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ScheduleRow {
    pub id: i64,
    pub monitor_id: i64,
    pub tenant_id: Uuid,
    pub active: bool,
    pub next_check_at: DateTime<Utc>,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub last_check_at: Option<DateTime<Utc>>,
    pub last_status: Option<i16>,
    pub last_ping: Option<f64>,
    pub retry_count: i32,
    pub consecutive_failures: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduleRow {
    /// A row is due iff active, its next check time has passed, and it is
    /// either unclaimed or its claim has aged past `claim_timeout`.
    pub fn is_due(&self, now: DateTime<Utc>, claim_timeout: chrono::Duration) -> bool {
        if !self.active || self.next_check_at > now {
            return false;
        }
        match self.claimed_at {
            None => true,
            Some(claimed_at) => claimed_at < now - claim_timeout,
        }
    }
}

/// Append-only heartbeat row, one per executed check.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Heartbeat {
    pub id: i64,
    pub monitor_id: i64,
    pub tenant_id: Uuid,
    pub time: DateTime<Utc>,
    pub status: i16,
    pub msg: String,
    pub ping: Option<f64>,
    pub important: bool,
    pub duration: f64,
    pub down_count: i32,
    pub retries: i32,
    pub end_time: Option<DateTime<Utc>>,
}

/// Ephemeral pub/sub state for one worker process. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Running,
    Stopping,
    Stopped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerLiveness {
    pub worker_id: String,
    pub state: WorkerState,
    pub checks_processed: u64,
    pub last_check_at: Option<DateTime<Utc>>,
}

/// Commands delivered on the `worker.command` channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerCommand {
    Shutdown,
    CheckNow { monitor_id: i64 },
    StartMonitor { monitor_id: i64, interval_seconds: i32 },
    StopMonitor { monitor_id: i64 },
    RestartMonitor { monitor_id: i64, interval_seconds: i32 },
}

/// Stable pub/sub channel names (§6).
pub mod channel {
    pub const HEARTBEAT: &str = "heartbeat";
    pub const HEARTBEAT_IMPORTANT: &str = "heartbeat.important";
    pub const MONITOR_STATUS: &str = "monitor.status";
    pub const MONITOR_STATS: &str = "monitor.stats";
    pub const CERT_INFO: &str = "cert.info";
    pub const WORKER_HEARTBEAT: &str = "worker.heartbeat";
    pub const WORKER_COMMAND: &str = "worker.command";
    pub const MAINTENANCE: &str = "maintenance";
}

/// Envelope carried by every event published over the pub/sub transport.
///
/// Field shape mirrors the upstream workspace's `EventEnvelope<T>`, renamed to
/// the spec's tenant/monitor/user scoping triple instead of a trading run id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope<T> {
    pub tenant_id: Uuid,
    pub monitor_id: i64,
    pub user_id: Uuid,
    pub payload: T,
    pub timestamp: DateTime<Utc>,
}

impl<T> EventEnvelope<T> {
    pub fn new(tenant_id: Uuid, monitor_id: i64, user_id: Uuid, payload: T) -> Self {
        Self {
            tenant_id,
            monitor_id,
            user_id,
            payload,
            timestamp: Utc::now(),
        }
    }
}

/// Payload for the `monitor.stats` channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorStats {
    pub uptime_24h: f64,
    pub uptime_30d: f64,
    pub avg_ping_last_hour: Option<f64>,
}

/// Payload for the `cert.info` channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertInfo {
    pub valid: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub days_remaining: Option<i64>,
    pub issuer: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(active: bool, next_check_at: DateTime<Utc>, claimed_at: Option<DateTime<Utc>>) -> ScheduleRow {
        ScheduleRow {
            id: 1,
            monitor_id: 1,
            tenant_id: Uuid::nil(),
            active,
            next_check_at,
            claimed_by: claimed_at.map(|_| "w1".to_string()),
            claimed_at,
            last_check_at: None,
            last_status: None,
            last_ping: None,
            retry_count: 0,
            consecutive_failures: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn due_requires_active_and_past_next_check() {
        let now = Utc::now();
        assert!(row(true, now - chrono::Duration::seconds(1), None).is_due(now, chrono::Duration::seconds(60)));
        assert!(!row(false, now - chrono::Duration::seconds(1), None).is_due(now, chrono::Duration::seconds(60)));
        assert!(!row(true, now + chrono::Duration::seconds(60), None).is_due(now, chrono::Duration::seconds(60)));
    }

    #[test]
    fn due_treats_stale_claim_as_reclaimable() {
        let now = Utc::now();
        let fresh_claim = row(true, now - chrono::Duration::seconds(1), Some(now - chrono::Duration::seconds(5)));
        assert!(!fresh_claim.is_due(now, chrono::Duration::seconds(60)));

        let stale_claim = row(true, now - chrono::Duration::seconds(1), Some(now - chrono::Duration::seconds(90)));
        assert!(stale_claim.is_due(now, chrono::Duration::seconds(60)));
    }
}
