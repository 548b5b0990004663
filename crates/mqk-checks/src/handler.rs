use async_trait::async_trait;
use mqk_schemas::{CertInfo, Heartbeat, Monitor};
use std::time::Duration;

/// What a successful check learned, beyond "it's up". The executor fills in
/// `ping_ms` from wall-clock elapsed time when a handler leaves it `None`.
#[derive(Debug, Default, Clone)]
pub struct CheckSuccess {
    pub ping_ms: Option<f64>,
    pub cert_info: Option<CertInfo>,
}

/// Classifies a handler failure so the executor can pick the right `msg`
/// (§4.e step 6) without string-matching errors.
#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    #[error("timeout ({0}s)")]
    Timeout(f64),
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// One handler per monitor type. Stateless: no instance variables, no
/// timers — everything needed to judge one check arrives in `monitor`.
/// Implementations set `CheckSuccess` on success and return `CheckError`
/// on failure; they never panic and never touch the schedule or heartbeat
/// stores directly.
#[async_trait]
pub trait CheckHandler: Send + Sync {
    fn monitor_type(&self) -> mqk_schemas::MonitorType;

    /// `previous` is the monitor's last persisted heartbeat, if any. Most
    /// handlers ignore it; the push handler uses it to judge staleness since
    /// it has nothing of its own to dial.
    async fn check(
        &self,
        monitor: &Monitor,
        previous: Option<&Heartbeat>,
        timeout: Duration,
    ) -> Result<CheckSuccess, CheckError>;
}

/// Runs `fut` under `timeout`, translating an elapsed deadline into
/// [`CheckError::Timeout`] the way every handler needs to.
pub async fn with_timeout<F, T>(timeout: Duration, fut: F) -> Result<T, CheckError>
where
    F: std::future::Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(CheckError::Other(e)),
        Err(_) => Err(CheckError::Timeout(timeout.as_secs_f64())),
    }
}
