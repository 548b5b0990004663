use crate::handler::{CheckError, CheckHandler};
use crate::handlers::{DatabaseHandler, DnsHandler, GrpcHandler, HttpHandler, PushHandler, TcpHandler, TlsHandler};
use crate::maintenance::{MaintenanceWindowProvider, NoMaintenanceWindows};
use chrono::{DateTime, Utc};
use mqk_schemas::{CertInfo, Heartbeat, Monitor, MonitorStatus, MonitorType};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Result of running one monitor through the executor, ready for the
/// heartbeat processor to act on.
#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub status: MonitorStatus,
    pub msg: String,
    pub ping_ms: Option<f64>,
    pub time: DateTime<Utc>,
    pub duration_seconds: f64,
    pub down_count: i32,
    pub retries: i32,
    pub cert_info: Option<CertInfo>,
    pub first_beat: bool,
    pub important: bool,
    pub should_notify: bool,
    pub should_resend_notification: bool,
    pub next_interval_seconds: i64,
}

fn default_handlers() -> Vec<Arc<dyn CheckHandler>> {
    vec![
        Arc::new(HttpHandler::new()),
        Arc::new(TcpHandler),
        Arc::new(DnsHandler),
        Arc::new(PushHandler),
        Arc::new(TlsHandler),
        Arc::new(DatabaseHandler),
        Arc::new(GrpcHandler),
    ]
}

/// Stateless dispatcher: no instance variables carry check-to-check state.
/// Safe to call from any worker for any monitor.
pub struct Executor {
    handlers: HashMap<MonitorType, Arc<dyn CheckHandler>>,
    maintenance: Arc<dyn MaintenanceWindowProvider>,
}

impl Executor {
    pub fn new(maintenance: Arc<dyn MaintenanceWindowProvider>) -> Self {
        Self::with_handlers(default_handlers(), maintenance)
    }

    pub fn with_handlers(handlers: Vec<Arc<dyn CheckHandler>>, maintenance: Arc<dyn MaintenanceWindowProvider>) -> Self {
        Self {
            handlers: handlers.into_iter().map(|h| (h.monitor_type(), h)).collect(),
            maintenance,
        }
    }

    async fn dispatch(
        &self,
        monitor: &Monitor,
        previous: Option<&Heartbeat>,
        timeout: Duration,
    ) -> Result<crate::handler::CheckSuccess, CheckError> {
        let handler = self.handlers.get(&monitor.r#type).ok_or_else(|| {
            CheckError::Other(anyhow::anyhow!("no handler registered for monitor type {:?}", monitor.r#type))
        })?;
        handler.check(monitor, previous, timeout).await
    }

    pub async fn execute(&self, monitor: &Monitor, previous: Option<&Heartbeat>, retries: i32) -> CheckOutcome {
        let start = Instant::now();
        let now = Utc::now();
        let first_beat = previous.is_none();
        let previous_status = previous.and_then(|p| MonitorStatus::from_i16(p.status));
        let previous_down_count = previous.map(|p| p.down_count).unwrap_or(0);
        let timeout = Duration::from_secs_f64(monitor.effective_timeout_seconds().max(0.01));

        let under_maintenance = self.maintenance.is_under_maintenance(monitor.id, monitor.tenant_id).await;

        let (mut status, msg, mut ping_ms, cert_info) = if under_maintenance {
            (MonitorStatus::Maintenance, "under maintenance".to_string(), None, None)
        } else {
            match self.dispatch(monitor, previous, timeout).await {
                Ok(success) => (MonitorStatus::Up, String::new(), success.ping_ms, success.cert_info),
                Err(CheckError::Timeout(seconds)) => (MonitorStatus::Down, format!("timeout ({seconds}s)"), None, None),
                Err(CheckError::Other(e)) => (MonitorStatus::Down, e.to_string(), None, None),
            }
        };

        // Upside-down monitors invert the plain UP/DOWN reading: an answering
        // target is the unwanted state and vice versa. Maintenance overrides
        // this, since it isn't a real measurement either way.
        if monitor.upside_down && status != MonitorStatus::Maintenance {
            status = match status {
                MonitorStatus::Up => MonitorStatus::Down,
                MonitorStatus::Down => MonitorStatus::Up,
                other => other,
            };
        }

        let mut retries = retries;
        if status != MonitorStatus::Maintenance {
            if status == MonitorStatus::Up {
                retries = 0;
            } else if status == MonitorStatus::Down {
                retries += 1;
                if retries <= monitor.max_retries {
                    status = MonitorStatus::Pending;
                }
            }
        }

        let important = first_beat || previous_status != Some(status);

        let mut down_count = previous_down_count;
        if important {
            down_count = 0;
        } else if status == MonitorStatus::Down && monitor.resend_interval > 0 {
            down_count += 1;
        }

        let next_interval_seconds = if status == MonitorStatus::Pending && monitor.retry_interval_seconds > 0 {
            monitor.retry_interval_seconds as i64
        } else {
            monitor.interval_seconds as i64
        };

        if ping_ms.is_none() {
            ping_ms = Some(start.elapsed().as_secs_f64() * 1000.0);
        }

        let should_notify = important && notification_policy(first_beat, previous_status, status);
        let should_resend_notification = !important
            && status == MonitorStatus::Down
            && monitor.resend_interval > 0
            && down_count >= monitor.resend_interval;

        CheckOutcome {
            status,
            msg,
            ping_ms,
            time: now,
            duration_seconds: start.elapsed().as_secs_f64(),
            down_count,
            retries,
            cert_info,
            first_beat,
            important,
            should_notify,
            should_resend_notification,
            next_interval_seconds,
        }
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new(Arc::new(NoMaintenanceWindows))
    }
}

/// Suppresses the one notification nobody wants: "your brand-new monitor is
/// healthy". Every other important (status-changed) beat notifies.
fn notification_policy(first_beat: bool, _previous: Option<MonitorStatus>, new_status: MonitorStatus) -> bool {
    if first_beat {
        new_status == MonitorStatus::Down
    } else {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::CheckSuccess;
    use async_trait::async_trait;
    use uuid::Uuid;

    struct AlwaysUp;
    #[async_trait]
    impl CheckHandler for AlwaysUp {
        fn monitor_type(&self) -> MonitorType {
            MonitorType::Http
        }
        async fn check(&self, _m: &Monitor, _p: Option<&Heartbeat>, _t: Duration) -> Result<CheckSuccess, CheckError> {
            Ok(CheckSuccess { ping_ms: Some(12.0), cert_info: None })
        }
    }

    struct AlwaysDown;
    #[async_trait]
    impl CheckHandler for AlwaysDown {
        fn monitor_type(&self) -> MonitorType {
            MonitorType::Http
        }
        async fn check(&self, _m: &Monitor, _p: Option<&Heartbeat>, _t: Duration) -> Result<CheckSuccess, CheckError> {
            Err(CheckError::Other(anyhow::anyhow!("connection refused")))
        }
    }

    fn monitor(max_retries: i32, resend_interval: i32, upside_down: bool) -> Monitor {
        Monitor {
            id: 42,
            tenant_id: Uuid::nil(),
            user_id: Uuid::nil(),
            r#type: MonitorType::Http,
            interval_seconds: 60,
            retry_interval_seconds: 20,
            max_retries,
            timeout_seconds: 30,
            resend_interval,
            upside_down,
            config: serde_json::json!({"url": "http://example.invalid"}),
        }
    }

    fn executor_with(handler: Arc<dyn CheckHandler>) -> Executor {
        Executor::with_handlers(vec![handler], Arc::new(NoMaintenanceWindows))
    }

    #[tokio::test]
    async fn first_beat_happy_path_is_up_and_important() {
        let exec = executor_with(Arc::new(AlwaysUp));
        let outcome = exec.execute(&monitor(0, 0, false), None, 0).await;
        assert_eq!(outcome.status, MonitorStatus::Up);
        assert!(outcome.first_beat);
        assert!(outcome.important);
        // first-beat UP is suppressed; nobody wants "new monitor is healthy".
        assert!(!outcome.should_notify);
        assert_eq!(outcome.next_interval_seconds, 60);
    }

    #[tokio::test]
    async fn down_within_retry_budget_becomes_pending() {
        let exec = executor_with(Arc::new(AlwaysDown));
        let outcome = exec.execute(&monitor(2, 0, false), None, 0).await;
        assert_eq!(outcome.status, MonitorStatus::Pending);
        assert_eq!(outcome.retries, 1);
        assert_eq!(outcome.next_interval_seconds, 20);
    }

    #[tokio::test]
    async fn recovery_resets_retries_to_zero() {
        let exec = executor_with(Arc::new(AlwaysUp));
        let previous = Heartbeat {
            id: 1,
            monitor_id: 42,
            tenant_id: Uuid::nil(),
            time: Utc::now(),
            status: MonitorStatus::Pending as i16,
            msg: String::new(),
            ping: None,
            important: false,
            duration: 0.0,
            down_count: 0,
            retries: 2,
            end_time: None,
        };
        let outcome = exec.execute(&monitor(2, 0, false), Some(&previous), 2).await;
        assert_eq!(outcome.status, MonitorStatus::Up);
        assert_eq!(outcome.retries, 0);
        assert_eq!(outcome.next_interval_seconds, 60);
        assert!(outcome.important);
    }

    #[tokio::test]
    async fn down_past_retry_budget_stays_down() {
        let exec = executor_with(Arc::new(AlwaysDown));
        let previous = Heartbeat {
            id: 1,
            monitor_id: 42,
            tenant_id: Uuid::nil(),
            time: Utc::now(),
            status: MonitorStatus::Pending as i16,
            msg: String::new(),
            ping: None,
            important: false,
            duration: 0.0,
            down_count: 0,
            retries: 2,
            end_time: None,
        };
        let outcome = exec.execute(&monitor(2, 0, false), Some(&previous), 2).await;
        assert_eq!(outcome.status, MonitorStatus::Down);
        assert_eq!(outcome.retries, 3);
    }

    #[tokio::test]
    async fn upside_down_inverts_a_successful_probe_to_down() {
        let exec = executor_with(Arc::new(AlwaysUp));
        let outcome = exec.execute(&monitor(0, 0, true), None, 0).await;
        assert_eq!(outcome.status, MonitorStatus::Down);
    }

    #[tokio::test]
    async fn first_beat_down_still_notifies() {
        let exec = executor_with(Arc::new(AlwaysDown));
        let outcome = exec.execute(&monitor(0, 0, false), None, 0).await;
        assert!(outcome.should_notify);
    }

    #[tokio::test]
    async fn non_important_down_increments_down_count_and_resends_at_threshold() {
        let exec = executor_with(Arc::new(AlwaysDown));
        let previous = Heartbeat {
            id: 1,
            monitor_id: 42,
            tenant_id: Uuid::nil(),
            time: Utc::now(),
            status: MonitorStatus::Down as i16,
            msg: String::new(),
            ping: None,
            important: false,
            duration: 0.0,
            down_count: 2,
            retries: 5,
            end_time: None,
        };
        let outcome = exec.execute(&monitor(0, 3, false), Some(&previous), 5).await;
        assert!(!outcome.important);
        assert_eq!(outcome.down_count, 3);
        assert!(outcome.should_resend_notification);
    }
}
