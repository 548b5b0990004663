use async_trait::async_trait;
use mqk_schemas::{Heartbeat, Monitor};
use tracing::info;

/// Narrow collaborator for the out-of-scope notification transport (email,
/// push, webhooks, ...). The processor only needs "tell someone"; errors are
/// logged and never fail the heartbeat pipeline.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, monitor: &Monitor, heartbeat: &Heartbeat) -> anyhow::Result<()>;
}

/// Default in-tree notifier: traces the call and does nothing else.
#[derive(Default)]
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn notify(&self, monitor: &Monitor, heartbeat: &Heartbeat) -> anyhow::Result<()> {
        info!(
            monitor_id = monitor.id,
            status = heartbeat.status,
            msg = %heartbeat.msg,
            "notification suppressed: no notification transport configured"
        );
        Ok(())
    }
}
