use crate::config::require_str;
use crate::handler::{with_timeout, CheckError, CheckHandler, CheckSuccess};
use async_trait::async_trait;
use mqk_schemas::{Heartbeat, Monitor, MonitorType};
use sqlx::Connection;
use std::time::{Duration, Instant};

/// Round-trips `SELECT 1` against a monitor-supplied Postgres connection
/// string. Opens and drops a dedicated connection per check rather than
/// pooling, since most configured targets are checked at most once a minute.
#[derive(Default)]
pub struct DatabaseHandler;

#[async_trait]
impl CheckHandler for DatabaseHandler {
    fn monitor_type(&self) -> MonitorType {
        MonitorType::Database
    }

    async fn check(
        &self,
        monitor: &Monitor,
        _previous: Option<&Heartbeat>,
        timeout: Duration,
    ) -> Result<CheckSuccess, CheckError> {
        let connection_string = require_str(monitor, "connection_string")
            .map_err(CheckError::Other)?
            .to_string();

        with_timeout(timeout, async move {
            let start = Instant::now();
            let mut conn = sqlx::PgConnection::connect(&connection_string).await?;
            sqlx::query("select 1").execute(&mut conn).await?;
            let ping_ms = start.elapsed().as_secs_f64() * 1000.0;
            Ok(CheckSuccess {
                ping_ms: Some(ping_ms),
                cert_info: None,
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_reports_database_type() {
        assert_eq!(DatabaseHandler.monitor_type(), MonitorType::Database);
    }
}
