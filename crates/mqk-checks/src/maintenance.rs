use async_trait::async_trait;
use uuid::Uuid;

/// Delegated query for whether a monitor is currently inside an active
/// maintenance window (§4.e step 4). Maintenance-window scheduling itself
/// lives in the external management layer; the executor only needs a yes/no
/// answer, so this stays a narrow trait like `Notifier` and `RoomSink`.
#[async_trait]
pub trait MaintenanceWindowProvider: Send + Sync {
    async fn is_under_maintenance(&self, monitor_id: i64, tenant_id: Uuid) -> bool;
}

/// Default provider for deployments without a maintenance-window feature:
/// nothing is ever under maintenance.
#[derive(Default)]
pub struct NoMaintenanceWindows;

#[async_trait]
impl MaintenanceWindowProvider for NoMaintenanceWindows {
    async fn is_under_maintenance(&self, _monitor_id: i64, _tenant_id: Uuid) -> bool {
        false
    }
}
