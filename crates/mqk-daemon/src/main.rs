//! `mqk-relay` entry point.
//!
//! Thin bootstrap: load config, build the pub/sub client and relay state,
//! spawn the subscription handlers and the shared health endpoint, wait for
//! a shutdown signal.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use mqk_config::RelayConfig as EnvConfig;
use mqk_daemon::{relay, state::RelayState};
use mqk_pubsub::{InProcessPubSub, PubSub, RedisPubSub};
use mqk_runtime::build_health_router;
use mqk_uptime::UptimeCache;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();

    let cfg = EnvConfig::from_env().context("loading relay config")?;
    info!("mqk-relay starting");

    let pubsub: Arc<dyn PubSub> = match &cfg.redis_url {
        Some(url) => Arc::new(RedisPubSub::connect(url).await.context("connecting to redis")?),
        None => {
            info!("no REDIS_URL configured, running in single-process pub/sub mode");
            Arc::new(InProcessPubSub::new())
        }
    };

    // Needed only to rehydrate the uptime cache from the heartbeat store
    // after a cache invalidation (§4.d); the relay never writes through it.
    let pool = mqk_db::connect_from_env().await.context("connecting to the heartbeat store")?;

    let uptime = Arc::new(UptimeCache::new());
    let state = Arc::new(RelayState::new(pubsub, uptime, pool));

    let relay_task = {
        let state = state.clone();
        tokio::spawn(async move { relay::start(state).await })
    };

    let health_addr = SocketAddr::from(([0, 0, 0, 0], cfg.health_port));
    let health_router = build_health_router(state.clone());
    info!("mqk-relay health endpoint listening on http://{}", health_addr);
    let health_listener = tokio::net::TcpListener::bind(health_addr).await?;
    let health_server = tokio::spawn(async move {
        axum::serve(health_listener, health_router)
            .with_graceful_shutdown(mqk_runtime::wait_for_shutdown_signal())
            .await
    });

    mqk_runtime::wait_for_shutdown_signal().await;
    info!("shutdown signal received");

    relay_task.abort();
    let _ = health_server.await;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
}
