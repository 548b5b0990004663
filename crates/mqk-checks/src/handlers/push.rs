use crate::handler::{CheckError, CheckHandler, CheckSuccess};
use async_trait::async_trait;
use chrono::Utc;
use mqk_schemas::{Heartbeat, Monitor, MonitorType};
use std::time::Duration;

/// Push monitors are fed by an external agent posting heartbeats directly
/// (the ingestion endpoint is out of scope — §1). This handler never dials
/// anything; it judges whether the last received push is still within the
/// monitor's interval, with one grace period added so a push landing just
/// before the poll isn't flagged stale by scheduling jitter.
#[derive(Default)]
pub struct PushHandler;

#[async_trait]
impl CheckHandler for PushHandler {
    fn monitor_type(&self) -> MonitorType {
        MonitorType::Push
    }

    async fn check(
        &self,
        monitor: &Monitor,
        previous: Option<&Heartbeat>,
        _timeout: Duration,
    ) -> Result<CheckSuccess, CheckError> {
        let Some(previous) = previous else {
            return Err(CheckError::Other(anyhow::anyhow!("no push received yet")));
        };

        let grace = Duration::from_secs(monitor.interval_seconds.max(0) as u64);
        let elapsed = Utc::now().signed_duration_since(previous.time);
        if elapsed.to_std().unwrap_or(Duration::MAX) > grace {
            return Err(CheckError::Other(anyhow::anyhow!(
                "no push received within {}s",
                monitor.interval_seconds
            )));
        }

        Ok(CheckSuccess {
            ping_ms: previous.ping,
            cert_info: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mqk_schemas::MonitorType as MT;
    use uuid::Uuid;

    fn monitor() -> Monitor {
        Monitor {
            id: 1,
            tenant_id: Uuid::nil(),
            user_id: Uuid::nil(),
            r#type: MT::Push,
            interval_seconds: 60,
            retry_interval_seconds: 0,
            max_retries: 0,
            timeout_seconds: 0,
            resend_interval: 0,
            upside_down: false,
            config: serde_json::json!({}),
        }
    }

    fn beat_at(time: chrono::DateTime<Utc>) -> Heartbeat {
        Heartbeat {
            id: 1,
            monitor_id: 1,
            tenant_id: Uuid::nil(),
            time,
            status: 1,
            msg: String::new(),
            ping: Some(5.0),
            important: false,
            duration: 0.0,
            down_count: 0,
            retries: 0,
            end_time: None,
        }
    }

    #[tokio::test]
    async fn no_previous_beat_is_down() {
        let result = PushHandler.check(&monitor(), None, Duration::from_secs(1)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn recent_push_is_up() {
        let beat = beat_at(Utc::now());
        let result = PushHandler.check(&monitor(), Some(&beat), Duration::from_secs(1)).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn stale_push_is_down() {
        let beat = beat_at(Utc::now() - chrono::Duration::seconds(3600));
        let result = PushHandler.check(&monitor(), Some(&beat), Duration::from_secs(1)).await;
        assert!(result.is_err());
    }
}
