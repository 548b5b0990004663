use mqk_checks::CheckOutcome;
use mqk_db::NewHeartbeat;
use mqk_pubsub::{PubSub, PubSubExt};
use mqk_schemas::{channel, CertInfo, EventEnvelope, Monitor, MonitorStatus, MonitorStats};
use mqk_uptime::UptimeCache;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::warn;

use crate::notifier::Notifier;

/// Post-check pipeline (SPEC_FULL.md §4.f): notify, update the uptime
/// window, append the heartbeat, then publish. Database append must precede
/// publish so a subscriber that queries the store on receipt always finds
/// the row.
pub struct HeartbeatProcessor {
    pool: PgPool,
    uptime: Arc<UptimeCache>,
    pubsub: Arc<dyn PubSub>,
    notifier: Arc<dyn Notifier>,
}

impl HeartbeatProcessor {
    pub fn new(pool: PgPool, uptime: Arc<UptimeCache>, pubsub: Arc<dyn PubSub>, notifier: Arc<dyn Notifier>) -> Self {
        Self { pool, uptime, pubsub, notifier }
    }

    pub async fn process(&self, monitor: &Monitor, outcome: &CheckOutcome) -> anyhow::Result<i64> {
        let mut draft = self.draft_heartbeat(monitor, outcome, None);

        if outcome.should_notify || outcome.should_resend_notification {
            let placeholder = draft_as_heartbeat(0, &draft);
            if let Err(e) = self.notifier.notify(monitor, &placeholder).await {
                warn!(monitor_id = monitor.id, error = %e, "notifier failed; continuing");
            }
        }

        let is_up = outcome.status == MonitorStatus::Up;
        draft.end_time = Some(self.uptime.update(monitor.id, is_up, outcome.ping_ms, outcome.time));

        let heartbeat_id = mqk_db::heartbeat_append(&self.pool, &draft).await?;

        if self.pubsub.is_healthy() {
            let beat = draft_as_heartbeat(heartbeat_id, &draft);
            self.publish_all(monitor, outcome, &beat).await;
        }

        if !outcome.important && outcome.should_resend_notification {
            mqk_db::heartbeat_reset_down_count(&self.pool, heartbeat_id).await?;
        }

        Ok(heartbeat_id)
    }

    fn draft_heartbeat(&self, monitor: &Monitor, outcome: &CheckOutcome, end_time: Option<chrono::DateTime<chrono::Utc>>) -> NewHeartbeat {
        NewHeartbeat {
            monitor_id: monitor.id,
            tenant_id: monitor.tenant_id,
            time: outcome.time,
            status: outcome.status as i16,
            msg: outcome.msg.clone(),
            ping: outcome.ping_ms,
            important: outcome.important,
            duration: outcome.duration_seconds,
            down_count: outcome.down_count,
            retries: outcome.retries,
            end_time,
        }
    }

    async fn publish_all(&self, monitor: &Monitor, outcome: &CheckOutcome, beat: &mqk_schemas::Heartbeat) {
        if let Err(e) = self
            .pubsub
            .publish(
                channel::HEARTBEAT,
                &EventEnvelope::new(monitor.tenant_id, monitor.id, monitor.user_id, beat.clone()),
            )
            .await
        {
            warn!(monitor_id = monitor.id, error = %e, "failed to publish heartbeat");
        }

        if outcome.important {
            if let Err(e) = self
                .pubsub
                .publish(
                    channel::HEARTBEAT_IMPORTANT,
                    &EventEnvelope::new(monitor.tenant_id, monitor.id, monitor.user_id, beat.clone()),
                )
                .await
            {
                warn!(monitor_id = monitor.id, error = %e, "failed to publish important heartbeat");
            }
        }

        let now = outcome.time;
        let stats = MonitorStats {
            uptime_24h: self.uptime.get_24h(monitor.id, now).uptime,
            uptime_30d: self.uptime.get_30d(monitor.id, now).uptime,
            avg_ping_last_hour: self.uptime.get_last_hour_avg_ping(monitor.id, now),
        };
        if let Err(e) = self
            .pubsub
            .publish(
                channel::MONITOR_STATS,
                &EventEnvelope::new(monitor.tenant_id, monitor.id, monitor.user_id, stats),
            )
            .await
        {
            warn!(monitor_id = monitor.id, error = %e, "failed to publish monitor stats");
        }

        if let Some(cert_info) = outcome.cert_info.clone() {
            self.publish_cert_info(monitor, cert_info).await;
        }
    }

    async fn publish_cert_info(&self, monitor: &Monitor, cert_info: CertInfo) {
        if let Err(e) = self
            .pubsub
            .publish(
                channel::CERT_INFO,
                &EventEnvelope::new(monitor.tenant_id, monitor.id, monitor.user_id, cert_info),
            )
            .await
        {
            warn!(monitor_id = monitor.id, error = %e, "failed to publish cert info");
        }
    }
}

fn draft_as_heartbeat(id: i64, draft: &NewHeartbeat) -> mqk_schemas::Heartbeat {
    mqk_schemas::Heartbeat {
        id,
        monitor_id: draft.monitor_id,
        tenant_id: draft.tenant_id,
        time: draft.time,
        status: draft.status,
        msg: draft.msg.clone(),
        ping: draft.ping,
        important: draft.important,
        duration: draft.duration,
        down_count: draft.down_count,
        retries: draft.retries,
        end_time: draft.end_time,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draft_as_heartbeat_carries_the_assigned_id() {
        let draft = NewHeartbeat {
            monitor_id: 7,
            tenant_id: uuid::Uuid::nil(),
            time: chrono::Utc::now(),
            status: MonitorStatus::Up as i16,
            msg: String::new(),
            ping: Some(4.0),
            important: true,
            duration: 0.1,
            down_count: 0,
            retries: 0,
            end_time: None,
        };
        let beat = draft_as_heartbeat(99, &draft);
        assert_eq!(beat.id, 99);
        assert_eq!(beat.monitor_id, 7);
        assert_eq!(beat.status, MonitorStatus::Up as i16);
    }
}
