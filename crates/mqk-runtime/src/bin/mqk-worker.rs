//! `mqk-worker` entry point.
//!
//! Thin bootstrap: load config, build the pool/pubsub/executor/processor,
//! spawn the worker loop and its health endpoint, wait for a shutdown signal.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use mqk_checks::{Executor, NoMaintenanceWindows};
use mqk_config::WorkerConfig as EnvConfig;
use mqk_pubsub::{InProcessPubSub, PubSub, RedisPubSub};
use mqk_runtime::{build_health_router, HeartbeatProcessor, LoggingNotifier, PgMonitorProvider, WorkerLoop};
use mqk_uptime::UptimeCache;
use tokio::sync::watch;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();

    let cfg = EnvConfig::from_env().context("loading worker config")?;
    info!(worker_id = %cfg.worker_id, "mqk-worker starting");

    let pool = mqk_db::connect_from_env().await.context("connecting to postgres")?;
    mqk_db::migrate(&pool).await.context("running migrations")?;

    let pubsub: Arc<dyn PubSub> = match &cfg.redis_url {
        Some(url) => Arc::new(RedisPubSub::connect(url).await.context("connecting to redis")?),
        None => {
            info!("no REDIS_URL configured, running in single-process pub/sub mode");
            Arc::new(InProcessPubSub::new())
        }
    };

    let uptime = Arc::new(UptimeCache::new());
    let executor = Arc::new(Executor::new(Arc::new(NoMaintenanceWindows)));
    let monitors = Arc::new(PgMonitorProvider::new(pool.clone()));
    let notifier = Arc::new(LoggingNotifier);
    let processor = Arc::new(HeartbeatProcessor::new(pool.clone(), uptime, pubsub.clone(), notifier));

    let worker = Arc::new(WorkerLoop::new(pool, monitors, executor, processor, pubsub, cfg.clone()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let worker_task = {
        let worker = worker.clone();
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move { worker.run(shutdown_tx, shutdown_rx).await })
    };

    let health_addr = SocketAddr::from(([0, 0, 0, 0], cfg.health_port));
    let health_router = build_health_router(worker.clone());
    info!("mqk-worker health endpoint listening on http://{}", health_addr);
    let health_listener = tokio::net::TcpListener::bind(health_addr).await?;
    let health_server = tokio::spawn(async move {
        axum::serve(health_listener, health_router)
            .with_graceful_shutdown(mqk_runtime::wait_for_shutdown_signal())
            .await
    });

    mqk_runtime::wait_for_shutdown_signal().await;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    worker_task.await.context("worker task panicked")?;
    let _ = health_server.await;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
}
