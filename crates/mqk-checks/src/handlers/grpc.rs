use crate::config::require_str;
use crate::handler::{with_timeout, CheckError, CheckHandler, CheckSuccess};
use async_trait::async_trait;
use mqk_schemas::{Heartbeat, Monitor, MonitorType};
use std::time::{Duration, Instant};
use tonic_health::pb::health_client::HealthClient;
use tonic_health::pb::HealthCheckRequest;

/// Calls the standard gRPC health-checking protocol (`grpc.health.v1.Health
/// /Check`). `service` in the monitor config selects the service name;
/// an empty string checks overall server health, per the protocol's own
/// convention.
#[derive(Default)]
pub struct GrpcHandler;

#[async_trait]
impl CheckHandler for GrpcHandler {
    fn monitor_type(&self) -> MonitorType {
        MonitorType::Grpc
    }

    async fn check(
        &self,
        monitor: &Monitor,
        _previous: Option<&Heartbeat>,
        timeout: Duration,
    ) -> Result<CheckSuccess, CheckError> {
        let endpoint = require_str(monitor, "endpoint").map_err(CheckError::Other)?.to_string();
        let service = monitor
            .config
            .get("service")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();

        with_timeout(timeout, async move {
            let start = Instant::now();
            let channel = tonic::transport::Endpoint::from_shared(endpoint)?.connect().await?;
            let mut client = HealthClient::new(channel);
            let resp = client
                .check(HealthCheckRequest { service })
                .await
                .map_err(|status| anyhow::anyhow!("grpc health check failed: {status}"))?;

            if resp.into_inner().status != tonic_health::pb::health_check_response::ServingStatus::Serving as i32 {
                anyhow::bail!("service not serving");
            }

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
    fn handler_reports_grpc_type() {
        assert_eq!(GrpcHandler.monitor_type(), MonitorType::Grpc);
    }
}
