//! Shared Axum health-endpoint builder (§4.i). Both `mqk-worker` and
//! `mqk-relay` expose `/health`, `/ready`, `/status`, `/metrics` from this one
//! router shape, each feeding it their own counters through `HealthProbe`.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};

/// Counters a process exposes on its health endpoint. Implemented once per
/// binary (`WorkerLoop` for `mqk-worker`, the relay state for `mqk-relay`).
pub trait HealthProbe: Send + Sync + 'static {
    /// `true` iff the process should receive new work (orchestrator readiness probe).
    fn ready(&self) -> bool;
    /// JSON dump of process state for `/status`.
    fn status_json(&self) -> serde_json::Value;
    /// Prometheus-style `name value` lines rendered verbatim under `/metrics`.
    fn metrics_lines(&self) -> Vec<(&'static str, String)>;
}

pub fn build_health_router<P: HealthProbe>(probe: Arc<P>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready::<P>))
        .route("/status", get(status::<P>))
        .route("/metrics", get(metrics::<P>))
        .with_state(probe)
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn ready<P: HealthProbe>(State(probe): State<Arc<P>>) -> StatusCode {
    if probe.ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn status<P: HealthProbe>(State(probe): State<Arc<P>>) -> Json<serde_json::Value> {
    Json(probe.status_json())
}

async fn metrics<P: HealthProbe>(State(probe): State<Arc<P>>) -> String {
    probe
        .metrics_lines()
        .into_iter()
        .map(|(name, value)| format!("{name} {value}"))
        .collect::<Vec<_>>()
        .join("\n")
        + "\n"
}

/// Monotonically increasing uptime since first call (process lifetime).
/// Shared by both binaries' `/status` responses.
pub fn process_uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START.get_or_init(std::time::Instant::now).elapsed().as_secs()
}

/// Waits for either SIGINT or SIGTERM, whichever arrives first. Shared by
/// both binaries so an orchestrator's SIGTERM drains the same as a local
/// ctrl-c (§6: "0 normal shutdown on SIGINT/SIGTERM").
pub async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
