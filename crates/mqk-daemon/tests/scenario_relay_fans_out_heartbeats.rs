//! Scenario: relay fans heartbeats out to the right room and invalidates
//! the uptime cache.
//!
//! # Invariant under test
//!
//! A heartbeat published on `heartbeat` is delivered to
//! `tenant:{T}:user:{U}` and removes that monitor from the uptime cache
//! (§4.h — "every heartbeat clears the cached window for its monitor").
//! An important heartbeat additionally invalidates the response cache.
//!
//! Room fan-out and counters are pure in-process. Rehydration of the uptime
//! cache touches the heartbeat store, so that assertion is DB-backed and
//! skipped if MQK_DATABASE_URL is not set (local + CI friendly).

use std::sync::Arc;
use std::time::Duration;

use mqk_daemon::relay;
use mqk_daemon::state::{room_name, BroadcastRoomSink, NoopResponseCache, RelayCounters, RelayState};
use mqk_pubsub::{InProcessPubSub, PubSubExt};
use mqk_schemas::{channel, EventEnvelope, Heartbeat, MonitorStatus};
use mqk_uptime::UptimeCache;
use uuid::Uuid;

fn test_state(pubsub: Arc<InProcessPubSub>, uptime: Arc<UptimeCache>, pool: sqlx::PgPool) -> (Arc<RelayState>, Arc<BroadcastRoomSink>) {
    let rooms = Arc::new(BroadcastRoomSink::new());
    let state = Arc::new(RelayState {
        pubsub,
        uptime,
        pool,
        rooms: rooms.clone(),
        cache: Arc::new(NoopResponseCache),
        counters: Arc::new(RelayCounters::default()),
    });
    (state, rooms)
}

fn sample_heartbeat(monitor_id: i64, tenant_id: Uuid) -> Heartbeat {
    Heartbeat {
        id: 1,
        monitor_id,
        tenant_id,
        time: chrono::Utc::now(),
        status: MonitorStatus::Up as i16,
        msg: "ok".to_string(),
        ping: Some(12.0),
        important: true,
        duration: 0.2,
        down_count: 0,
        retries: 0,
        end_time: None,
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test]
async fn heartbeat_reaches_the_tenant_user_room_and_rehydrates_uptime_from_the_store() {
    match std::env::var(mqk_db::ENV_DB_URL) {
        Ok(_) => {}
        Err(_) => {
            eprintln!("SKIP: MQK_DATABASE_URL not set");
            return;
        }
    };
    let pool = mqk_db::connect_from_env().await.unwrap();
    mqk_db::migrate(&pool).await.unwrap();

    let pubsub = Arc::new(InProcessPubSub::new());
    let uptime = Arc::new(UptimeCache::new());
    let tenant_id = Uuid::new_v4();
    let monitor_id: i64 = (Uuid::new_v4().as_u128() % 1_000_000_000) as i64;

    let now = chrono::Utc::now();
    uptime.update(monitor_id, false, Some(10.0), now);
    assert_eq!(uptime.get_24h(monitor_id, now).uptime, 0.0);

    // A down beat already on record: once the cache is dropped and
    // rehydrated, it must replay this instead of reporting a blank default.
    mqk_db::heartbeat_append(
        &pool,
        &mqk_db::NewHeartbeat {
            monitor_id,
            tenant_id,
            time: now - chrono::Duration::minutes(5),
            status: MonitorStatus::Down as i16,
            msg: "timeout".to_string(),
            ping: None,
            important: true,
            duration: 1.0,
            down_count: 1,
            retries: 0,
            end_time: None,
        },
    )
    .await
    .unwrap();

    let (state, rooms) = test_state(pubsub.clone(), uptime.clone(), pool);
    relay::start(state.clone()).await;
    settle().await;

    let user_id = Uuid::new_v4();
    let room = room_name(tenant_id, user_id);
    let mut room_rx = rooms.subscribe(&room).await;

    let envelope = EventEnvelope::new(tenant_id, monitor_id, user_id, sample_heartbeat(monitor_id, tenant_id));
    pubsub.publish(channel::HEARTBEAT, &envelope).await.unwrap();
    settle().await;
    settle().await;

    let delivered = room_rx.try_recv().expect("heartbeat delivered to room");
    assert_eq!(delivered["event"], "heartbeat");

    // Rehydrated from the heartbeat store, so the down beat inserted above
    // counts against uptime instead of the cache reporting a fresh 1.0.
    assert!(uptime.get_24h(monitor_id, now).uptime < 1.0);
    assert_eq!(state.counters.heartbeats.load(std::sync::atomic::Ordering::Relaxed), 1);
}

#[tokio::test]
async fn important_heartbeat_invalidates_the_response_cache_and_counts_separately() {
    match std::env::var(mqk_db::ENV_DB_URL) {
        Ok(_) => {}
        Err(_) => {
            eprintln!("SKIP: MQK_DATABASE_URL not set");
            return;
        }
    };
    let pool = mqk_db::connect_from_env().await.unwrap();
    mqk_db::migrate(&pool).await.unwrap();

    let pubsub = Arc::new(InProcessPubSub::new());
    let uptime = Arc::new(UptimeCache::new());
    let (state, _rooms) = test_state(pubsub.clone(), uptime, pool);
    relay::start(state.clone()).await;
    settle().await;

    let tenant_id = Uuid::new_v4();
    let user_id = Uuid::new_v4();
    let envelope = EventEnvelope::new(tenant_id, 7, user_id, sample_heartbeat(7, tenant_id));
    pubsub.publish(channel::HEARTBEAT_IMPORTANT, &envelope).await.unwrap();
    settle().await;

    assert_eq!(
        state.counters.important_heartbeats.load(std::sync::atomic::Ordering::Relaxed),
        1
    );
    assert_eq!(state.counters.heartbeats.load(std::sync::atomic::Ordering::Relaxed), 0);
}
