use crate::config::{accepted_status_ranges, bool_or, require_str, status_in_ranges};
use crate::handler::{with_timeout, CheckError, CheckHandler, CheckSuccess};
use async_trait::async_trait;
use mqk_schemas::{Heartbeat, Monitor, MonitorType};
use std::time::{Duration, Instant};

pub struct HttpHandler {
    client: reqwest::Client,
}

impl HttpHandler {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .danger_accept_invalid_certs(false)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }
}

impl Default for HttpHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CheckHandler for HttpHandler {
    fn monitor_type(&self) -> MonitorType {
        MonitorType::Http
    }

    async fn check(
        &self,
        monitor: &Monitor,
        _previous: Option<&Heartbeat>,
        timeout: Duration,
    ) -> Result<CheckSuccess, CheckError> {
        let url = require_str(monitor, "url").map_err(CheckError::Other)?;
        let ignore_tls = bool_or(monitor, "ignore_tls", false);
        let ranges = accepted_status_ranges(monitor).map_err(CheckError::Other)?;

        let client = if ignore_tls {
            reqwest::Client::builder()
                .danger_accept_invalid_certs(true)
                .build()
                .map_err(|e| CheckError::Other(e.into()))?
        } else {
            self.client.clone()
        };

        let url = url.to_string();
        with_timeout(timeout, async move {
            let start = Instant::now();
            let resp = client.get(&url).send().await?;
            let ping_ms = start.elapsed().as_secs_f64() * 1000.0;
            let status = resp.status().as_u16();
            if !status_in_ranges(status, &ranges) {
                anyhow::bail!("unexpected status code {status}");
            }
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
    fn handler_reports_http_type() {
        assert_eq!(HttpHandler::new().monitor_type(), MonitorType::Http);
    }
}
