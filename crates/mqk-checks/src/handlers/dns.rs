use crate::config::require_str;
use crate::handler::{with_timeout, CheckError, CheckHandler, CheckSuccess};
use async_trait::async_trait;
use mqk_schemas::{Heartbeat, Monitor, MonitorType};
use std::time::{Duration, Instant};
use tokio::net::lookup_host;

/// Resolves the monitor's configured `host` through the system resolver.
/// Succeeds iff at least one address is returned.
#[derive(Default)]
pub struct DnsHandler;

#[async_trait]
impl CheckHandler for DnsHandler {
    fn monitor_type(&self) -> MonitorType {
        MonitorType::Dns
    }

    async fn check(
        &self,
        monitor: &Monitor,
        _previous: Option<&Heartbeat>,
        timeout: Duration,
    ) -> Result<CheckSuccess, CheckError> {
        let host = require_str(monitor, "host").map_err(CheckError::Other)?.to_string();

        with_timeout(timeout, async move {
            let start = Instant::now();
            let mut addrs = lookup_host((host.as_str(), 0)).await?;
            if addrs.next().is_none() {
                anyhow::bail!("no records returned for {host}");
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
    fn handler_reports_dns_type() {
        assert_eq!(DnsHandler.monitor_type(), MonitorType::Dns);
    }
}
