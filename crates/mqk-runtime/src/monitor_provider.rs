use async_trait::async_trait;
use mqk_schemas::Monitor;
use sqlx::PgPool;

/// Read-only lookup of a monitor's configuration, owned by the external
/// management layer (§3). The worker loop never writes through this path.
#[async_trait]
pub trait MonitorProvider: Send + Sync {
    async fn get_monitor(&self, monitor_id: i64) -> anyhow::Result<Option<Monitor>>;
}

/// Default provider backed directly by the `monitors` table.
pub struct PgMonitorProvider {
    pool: PgPool,
}

impl PgMonitorProvider {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MonitorProvider for PgMonitorProvider {
    async fn get_monitor(&self, monitor_id: i64) -> anyhow::Result<Option<Monitor>> {
        mqk_db::monitor_fetch(&self.pool, monitor_id).await
    }
}
