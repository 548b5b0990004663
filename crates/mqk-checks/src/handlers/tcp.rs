use crate::config::{require_i64, require_str};
use crate::handler::{with_timeout, CheckError, CheckHandler, CheckSuccess};
use async_trait::async_trait;
use mqk_schemas::{Heartbeat, Monitor, MonitorType};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;

#[derive(Default)]
pub struct TcpHandler;

#[async_trait]
impl CheckHandler for TcpHandler {
    fn monitor_type(&self) -> MonitorType {
        MonitorType::Tcp
    }

    async fn check(
        &self,
        monitor: &Monitor,
        _previous: Option<&Heartbeat>,
        timeout: Duration,
    ) -> Result<CheckSuccess, CheckError> {
        let host = require_str(monitor, "host").map_err(CheckError::Other)?.to_string();
        let port = require_i64(monitor, "port").map_err(CheckError::Other)?;

        with_timeout(timeout, async move {
            let start = Instant::now();
            TcpStream::connect((host.as_str(), port as u16)).await?;
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
    fn handler_reports_tcp_type() {
        assert_eq!(TcpHandler.monitor_type(), MonitorType::Tcp);
    }
}
