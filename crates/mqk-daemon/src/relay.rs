//! Relay subscription handlers (SPEC_FULL.md §4.h).
//!
//! On start, subscribes to `heartbeat`, `heartbeat.important`, `monitor.stats`,
//! and `cert.info`. Malformed payloads are dropped by `subscribe_typed` itself
//! (deserialize failure) before these handlers ever see them.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use mqk_pubsub::subscribe_typed;
use mqk_schemas::{channel, CertInfo, EventEnvelope, Heartbeat, MonitorStats};
use tracing::warn;

use crate::state::{room_name, RelayState};

/// Subscribes this relay to every channel it cares about. Each subscription
/// runs for the life of the process; there is no unsubscribe path today, so
/// shutdown is handled by the binary dropping the whole process.
pub async fn start(state: Arc<RelayState>) {
    subscribe_heartbeat(state.clone()).await;
    subscribe_important_heartbeat(state.clone()).await;
    subscribe_monitor_stats(state.clone()).await;
    subscribe_cert_info(state).await;
}

async fn subscribe_heartbeat(state: Arc<RelayState>) {
    let result = subscribe_typed::<EventEnvelope<Heartbeat>, _>(state.pubsub.as_ref(), channel::HEARTBEAT, move |envelope| {
        state.counters.heartbeats.fetch_add(1, Ordering::Relaxed);
        // Per §5: cross-process cache coherency is "remove on every heartbeat",
        // not per-bucket invalidation — the next stats query recomputes from
        // the heartbeat store.
        state.uptime.remove(envelope.monitor_id);

        let monitor_id = envelope.monitor_id;
        let rehydrate_state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = rehydrate_state.uptime.rehydrate(&rehydrate_state.pool, monitor_id).await {
                warn!(monitor_id, error = %e, "failed to rehydrate uptime cache from heartbeat store");
            }
        });

        let room = room_name(envelope.tenant_id, envelope.user_id);
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = deliver_event(&state, &room, "heartbeat", &envelope).await {
                warn!(monitor_id = envelope.monitor_id, error = %e, "failed to deliver heartbeat to room");
            }
        });
    })
    .await;
    warn_if_unavailable(channel::HEARTBEAT, result);
}

async fn subscribe_important_heartbeat(state: Arc<RelayState>) {
    let result = subscribe_typed::<EventEnvelope<Heartbeat>, _>(state.pubsub.as_ref(), channel::HEARTBEAT_IMPORTANT, move |envelope| {
        state.counters.important_heartbeats.fetch_add(1, Ordering::Relaxed);
        state.cache.invalidate(envelope.tenant_id, envelope.monitor_id);

        let room = room_name(envelope.tenant_id, envelope.user_id);
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = deliver_event(&state, &room, "heartbeat.important", &envelope).await {
                warn!(monitor_id = envelope.monitor_id, error = %e, "failed to deliver important heartbeat to room");
            }
        });
    })
    .await;
    warn_if_unavailable(channel::HEARTBEAT_IMPORTANT, result);
}

async fn subscribe_monitor_stats(state: Arc<RelayState>) {
    let result = subscribe_typed::<EventEnvelope<MonitorStats>, _>(state.pubsub.as_ref(), channel::MONITOR_STATS, move |envelope| {
        state.counters.stats_updates.fetch_add(1, Ordering::Relaxed);

        let room = room_name(envelope.tenant_id, envelope.user_id);
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = deliver_event(&state, &room, "monitor.stats", &envelope).await {
                warn!(monitor_id = envelope.monitor_id, error = %e, "failed to deliver monitor stats to room");
            }
        });
    })
    .await;
    warn_if_unavailable(channel::MONITOR_STATS, result);
}

async fn subscribe_cert_info(state: Arc<RelayState>) {
    let result = subscribe_typed::<EventEnvelope<CertInfo>, _>(state.pubsub.as_ref(), channel::CERT_INFO, move |envelope| {
        state.counters.cert_info_updates.fetch_add(1, Ordering::Relaxed);

        let room = room_name(envelope.tenant_id, envelope.user_id);
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = deliver_event(&state, &room, "cert.info", &envelope).await {
                warn!(monitor_id = envelope.monitor_id, error = %e, "failed to deliver cert info to room");
            }
        });
    })
    .await;
    warn_if_unavailable(channel::CERT_INFO, result);
}

async fn deliver_event<T: serde::Serialize>(
    state: &RelayState,
    room: &str,
    event_name: &str,
    envelope: &EventEnvelope<T>,
) -> anyhow::Result<()> {
    let value = serde_json::json!({ "event": event_name, "envelope": envelope });
    if let Err(e) = state.rooms.deliver(room, value).await {
        state.counters.errors.fetch_add(1, Ordering::Relaxed);
        return Err(e);
    }
    Ok(())
}

fn warn_if_unavailable(channel: &str, result: anyhow::Result<()>) {
    if let Err(e) = result {
        warn!(channel, error = %e, "relay subscription unavailable");
    }
}
