//! Shared runtime state for the relay process (SPEC_FULL.md §4.h).
//!
//! All types here are `Clone`-able (via `Arc`). The relay handlers receive
//! `Arc<RelayState>`; this module owns nothing async itself beyond the
//! broadcast channels backing `RoomSink`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use mqk_pubsub::PubSub;
use mqk_uptime::UptimeCache;
use serde_json::Value;
use tokio::sync::{broadcast, Mutex};
use tracing::debug;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// RoomSink — per-tenant/user delivery target
// ---------------------------------------------------------------------------

/// Delivers one event to a user-scoped room (`tenant:{T}:user:{U}`, §4.h).
/// The front-end fan-out itself (WebSocket/SSE to browsers) is out of scope;
/// this only needs to get the event as far as a process that could drain it.
#[async_trait]
pub trait RoomSink: Send + Sync {
    async fn deliver(&self, room: &str, event: Value) -> anyhow::Result<()>;
}

/// In-tree `RoomSink`: one `tokio::broadcast` channel per room, created lazily.
/// A front-end process in the same binary could `subscribe(room)` and drain it;
/// nothing in this crate does, since that delivery layer is out of scope.
pub struct BroadcastRoomSink {
    rooms: Mutex<HashMap<String, broadcast::Sender<Value>>>,
}

impl Default for BroadcastRoomSink {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastRoomSink {
    pub fn new() -> Self {
        Self { rooms: Mutex::new(HashMap::new()) }
    }

    pub async fn subscribe(&self, room: &str) -> broadcast::Receiver<Value> {
        self.sender_for(room).await.subscribe()
    }

    async fn sender_for(&self, room: &str) -> broadcast::Sender<Value> {
        let mut rooms = self.rooms.lock().await;
        rooms
            .entry(room.to_string())
            .or_insert_with(|| broadcast::channel(1024).0)
            .clone()
    }
}

#[async_trait]
impl RoomSink for BroadcastRoomSink {
    async fn deliver(&self, room: &str, event: Value) -> anyhow::Result<()> {
        let sender = self.sender_for(room).await;
        // No subscriber is the expected idle state, not an error.
        let _ = sender.send(event);
        Ok(())
    }
}

pub fn room_name(tenant_id: Uuid, user_id: Uuid) -> String {
    format!("tenant:{tenant_id}:user:{user_id}")
}

// ---------------------------------------------------------------------------
// ResponseCache — API response cache invalidation
// ---------------------------------------------------------------------------

/// Narrow collaborator for the API response cache (out of scope: the API
/// layer itself, §1). The relay only needs to tell it "this monitor
/// changed"; what it does with that is the API process's concern.
pub trait ResponseCache: Send + Sync {
    fn invalidate(&self, tenant_id: Uuid, monitor_id: i64);
}

/// Default for processes that run without a response cache: logs and does
/// nothing, i.e. every read is always a cache miss.
#[derive(Default)]
pub struct NoopResponseCache;

impl ResponseCache for NoopResponseCache {
    fn invalidate(&self, tenant_id: Uuid, monitor_id: i64) {
        debug!(%tenant_id, monitor_id, "response cache invalidation requested (no-op cache)");
    }
}

// ---------------------------------------------------------------------------
// RelayCounters
// ---------------------------------------------------------------------------

/// Counters exposed on the relay's health endpoint (§4.h, §4.i).
#[derive(Default)]
pub struct RelayCounters {
    pub heartbeats: AtomicU64,
    pub important_heartbeats: AtomicU64,
    pub stats_updates: AtomicU64,
    pub cert_info_updates: AtomicU64,
    pub errors: AtomicU64,
}

impl RelayCounters {
    pub fn snapshot(&self) -> [(&'static str, u64); 5] {
        [
            ("heartbeats", self.heartbeats.load(Ordering::Relaxed)),
            ("important_heartbeats", self.important_heartbeats.load(Ordering::Relaxed)),
            ("stats_updates", self.stats_updates.load(Ordering::Relaxed)),
            ("cert_info_updates", self.cert_info_updates.load(Ordering::Relaxed)),
            ("errors", self.errors.load(Ordering::Relaxed)),
        ]
    }
}

// ---------------------------------------------------------------------------
// RelayState
// ---------------------------------------------------------------------------

/// Cloneable (Arc) handle shared across the relay's subscription handlers and
/// its health endpoint.
pub struct RelayState {
    pub pubsub: Arc<dyn PubSub>,
    pub uptime: Arc<UptimeCache>,
    /// Used only to rehydrate the uptime cache from the heartbeat store after
    /// a `remove` (§4.d); the relay never writes through this pool.
    pub pool: sqlx::PgPool,
    pub rooms: Arc<dyn RoomSink>,
    pub cache: Arc<dyn ResponseCache>,
    pub counters: Arc<RelayCounters>,
}

impl RelayState {
    pub fn new(pubsub: Arc<dyn PubSub>, uptime: Arc<UptimeCache>, pool: sqlx::PgPool) -> Self {
        Self {
            pubsub,
            uptime,
            pool,
            rooms: Arc::new(BroadcastRoomSink::new()),
            cache: Arc::new(NoopResponseCache),
            counters: Arc::new(RelayCounters::default()),
        }
    }
}

impl mqk_runtime::HealthProbe for RelayState {
    fn ready(&self) -> bool {
        self.pubsub.is_healthy()
    }

    fn status_json(&self) -> Value {
        let [heartbeats, important_heartbeats, stats_updates, cert_info_updates, errors] = self.counters.snapshot();
        serde_json::json!({
            "pubsub_available": self.pubsub.is_healthy(),
            "uptime_secs": mqk_runtime::process_uptime_secs(),
            "heartbeats": heartbeats.1,
            "important_heartbeats": important_heartbeats.1,
            "stats_updates": stats_updates.1,
            "cert_info_updates": cert_info_updates.1,
            "errors": errors.1,
        })
    }

    fn metrics_lines(&self) -> Vec<(&'static str, String)> {
        self.counters
            .snapshot()
            .into_iter()
            .map(|(name, value)| (name, value.to_string()))
            .collect()
    }
}
