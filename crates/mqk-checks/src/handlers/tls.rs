use crate::config::{require_i64, require_str};
use crate::handler::{with_timeout, CheckError, CheckHandler, CheckSuccess};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mqk_schemas::{CertInfo, Heartbeat, Monitor, MonitorType};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;

/// Connects, completes a TLS handshake, and reports the peer certificate's
/// expiry. A handshake failure (expired, untrusted, wrong host) is a DOWN
/// result; a handshake that succeeds but is close to expiry still reports
/// `status = UP` — callers inspect `CertInfo::days_remaining` themselves,
/// matching the upstream cert-expiry monitor's "warn, don't fail early" model.
#[derive(Default)]
pub struct TlsHandler;

#[async_trait]
impl CheckHandler for TlsHandler {
    fn monitor_type(&self) -> MonitorType {
        MonitorType::Tls
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
            let tcp = TcpStream::connect((host.as_str(), port as u16)).await?;

            let connector = native_tls::TlsConnector::builder()
                .build()
                .context_err("build TLS connector")?;
            let connector = tokio_native_tls::TlsConnector::from(connector);
            let tls_stream = connector.connect(&host, tcp).await?;

            let der = tls_stream
                .get_ref()
                .peer_certificate()
                .context_err("read peer certificate")?
                .ok_or_else(|| anyhow::anyhow!("server presented no certificate"))?
                .to_der()
                .context_err("encode peer certificate")?;

            let (_, cert) = x509_parser::parse_x509_certificate(&der)
                .map_err(|e| anyhow::anyhow!("parse peer certificate: {e}"))?;

            let not_after = cert.validity().not_after;
            let expires_at: DateTime<Utc> = DateTime::from_timestamp(not_after.timestamp(), 0)
                .unwrap_or_else(Utc::now);
            let days_remaining = (expires_at - Utc::now()).num_days();
            let issuer = cert.issuer().to_string();

            let ping_ms = start.elapsed().as_secs_f64() * 1000.0;
            Ok(CheckSuccess {
                ping_ms: Some(ping_ms),
                cert_info: Some(CertInfo {
                    valid: days_remaining > 0,
                    expires_at: Some(expires_at),
                    days_remaining: Some(days_remaining),
                    issuer: Some(issuer),
                }),
            })
        })
        .await
    }
}

trait MapAnyhow<T> {
    fn context_err(self, msg: &str) -> anyhow::Result<T>;
}

impl<T, E: std::fmt::Display> MapAnyhow<T> for Result<T, E> {
    fn context_err(self, msg: &str) -> anyhow::Result<T> {
        self.map_err(|e| anyhow::anyhow!("{msg}: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_reports_tls_type() {
        assert_eq!(TlsHandler.monitor_type(), MonitorType::Tls);
    }
}
