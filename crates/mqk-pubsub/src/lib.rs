//! Pub/Sub transport (SPEC_FULL.md §4.a).
//!
//! Two implementations share one [`PubSub`] trait: [`InProcessPubSub`], a
//! `tokio::sync::broadcast` bus for single-process/degraded-mode operation
//! (modelled on the upstream daemon's `broadcast::Sender<BusMsg>` +
//! `spawn_heartbeat` pattern), and [`RedisPubSub`], a two-connection
//! Redis-backed transport for the distributed case.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};

const RECONNECT_BASE: Duration = Duration::from_millis(100);
const RECONNECT_CAP: Duration = Duration::from_secs(3);
const RECONNECT_GIVE_UP_AFTER: u32 = 10;

/// Typed publish/subscribe over a broker. Implementations serialise messages
/// as JSON so `publish`/`subscribe` can be generic over any `Serialize` +
/// `DeserializeOwned` payload.
#[async_trait]
pub trait PubSub: Send + Sync {
    async fn publish_json(&self, channel: &str, payload: serde_json::Value) -> Result<()>;

    /// Subscribe to `channel`; `handler` is invoked for each message.
    /// Handler errors are caught, logged, and do not unsubscribe (§4.a).
    async fn subscribe_raw(
        &self,
        channel: &str,
        handler: Arc<dyn Fn(serde_json::Value) + Send + Sync>,
    ) -> Result<()>;

    /// Whether the transport is currently able to publish. The relay and
    /// health endpoint report this as `pubsub_available`.
    fn is_healthy(&self) -> bool;
}

#[async_trait]
pub trait PubSubExt: PubSub {
    async fn publish<T: Serialize + Send + Sync>(&self, channel: &str, payload: &T) -> Result<()> {
        let value = serde_json::to_value(payload).context("serialize pub/sub payload")?;
        self.publish_json(channel, value).await
    }
}
impl<P: PubSub + ?Sized> PubSubExt for P {}

/// Subscribe with a typed handler; malformed payloads are logged and dropped,
/// not propagated (handler exceptions must not unsubscribe — §4.a).
pub async fn subscribe_typed<T, F>(pubsub: &dyn PubSub, channel: &str, handler: F) -> Result<()>
where
    T: DeserializeOwned + Send + Sync + 'static,
    F: Fn(T) + Send + Sync + 'static,
{
    let channel_owned = channel.to_string();
    pubsub
        .subscribe_raw(
            channel,
            Arc::new(move |value| match serde_json::from_value::<T>(value) {
                Ok(typed) => handler(typed),
                Err(e) => warn!(channel = %channel_owned, error = %e, "dropping malformed pub/sub message"),
            }),
        )
        .await
}

// ---------------------------------------------------------------------------
// In-process transport (degraded / single-process mode)
// ---------------------------------------------------------------------------

/// A `tokio::sync::broadcast` channel per topic, keyed by channel name. Used
/// when no broker URL is configured; publishing never fails and the relay
/// still receives events published by workers in the same process.
pub struct InProcessPubSub {
    channels: Mutex<HashMap<String, broadcast::Sender<serde_json::Value>>>,
}

impl InProcessPubSub {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
        }
    }

    async fn sender_for(&self, channel: &str) -> broadcast::Sender<serde_json::Value> {
        let mut channels = self.channels.lock().await;
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(1024).0)
            .clone()
    }
}

impl Default for InProcessPubSub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PubSub for InProcessPubSub {
    async fn publish_json(&self, channel: &str, payload: serde_json::Value) -> Result<()> {
        let sender = self.sender_for(channel).await;
        // No active subscriber is not an error: broadcast::send fails only
        // when there are zero receivers, which is the expected idle state.
        let _ = sender.send(payload);
        Ok(())
    }

    async fn subscribe_raw(
        &self,
        channel: &str,
        handler: Arc<dyn Fn(serde_json::Value) + Send + Sync>,
    ) -> Result<()> {
        let sender = self.sender_for(channel).await;
        let mut rx = sender.subscribe();
        let channel_owned = channel.to_string();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(value) => handler(value),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(channel = %channel_owned, skipped = n, "pub/sub subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// Redis-backed transport (distributed mode)
// ---------------------------------------------------------------------------

/// Redis `PUBLISH`/`SUBSCRIBE` transport. Maintains one connection-managed
/// client for publishing and opens a dedicated connection per subscription,
/// since most brokers (Redis included) forbid issuing commands on a
/// connection already in subscriber mode.
pub struct RedisPubSub {
    client: redis::Client,
    publish_conn: Mutex<Option<redis::aio::ConnectionManager>>,
    healthy: Arc<std::sync::atomic::AtomicBool>,
}

impl RedisPubSub {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).context("invalid redis url")?;
        let this = Self {
            client,
            publish_conn: Mutex::new(None),
            healthy: Arc::new(std::sync::atomic::AtomicBool::new(true)),
        };
        // Establish the publish connection eagerly so misconfiguration is
        // caught at startup rather than on first publish.
        this.publish_connection().await?;
        Ok(this)
    }

    async fn publish_connection(&self) -> Result<redis::aio::ConnectionManager> {
        let mut guard = self.publish_conn.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }
        let conn = redis::aio::ConnectionManager::new(self.client.clone())
            .await
            .context("connect redis publish connection")?;
        *guard = Some(conn.clone());
        Ok(conn)
    }

    /// Capped exponential backoff: base 100ms, cap 3s, give up after 10
    /// consecutive failures and report unhealthy (§4.a).
    async fn reconnect_subscribe_loop(
        client: redis::Client,
        channel: String,
        handler: Arc<dyn Fn(serde_json::Value) + Send + Sync>,
        healthy: Arc<std::sync::atomic::AtomicBool>,
    ) {
        let mut attempt: u32 = 0;
        loop {
            match Self::run_subscription(&client, &channel, &handler).await {
                Ok(()) => {
                    // Clean exit only happens when the connection is closed
                    // by the peer; treat as a disconnect and retry.
                    attempt = 0;
                }
                Err(e) => {
                    warn!(channel = %channel, error = %e, attempt, "redis subscription failed");
                }
            }

            attempt += 1;
            if attempt >= RECONNECT_GIVE_UP_AFTER {
                warn!(channel = %channel, "giving up on redis subscription after {} attempts", attempt);
                healthy.store(false, std::sync::atomic::Ordering::SeqCst);
                return;
            }

            let backoff = std::cmp::min(RECONNECT_BASE * 2u32.pow(attempt.min(10)), RECONNECT_CAP);
            tokio::time::sleep(backoff).await;
        }
    }

    async fn run_subscription(
        client: &redis::Client,
        channel: &str,
        handler: &Arc<dyn Fn(serde_json::Value) + Send + Sync>,
    ) -> Result<()> {
        use futures_util::StreamExt;

        let conn = client.get_async_connection().await.context("connect redis subscriber")?;
        let mut pubsub = conn.into_pubsub();
        pubsub.subscribe(channel).await.context("subscribe to redis channel")?;

        let mut stream = pubsub.on_message();
        while let Some(msg) = stream.next().await {
            let payload: String = match msg.get_payload() {
                Ok(p) => p,
                Err(e) => {
                    warn!(channel = %channel, error = %e, "failed to read redis message payload");
                    continue;
                }
            };
            match serde_json::from_str::<serde_json::Value>(&payload) {
                Ok(value) => {
                    debug!(channel = %channel, "dispatching redis pub/sub message");
                    handler(value);
                }
                Err(e) => warn!(channel = %channel, error = %e, "malformed JSON on redis channel"),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PubSub for RedisPubSub {
    async fn publish_json(&self, channel: &str, payload: serde_json::Value) -> Result<()> {
        use redis::AsyncCommands;

        let mut conn = self.publish_connection().await?;
        let body = serde_json::to_string(&payload).context("serialize redis payload")?;
        let result: Result<i64, redis::RedisError> = conn.publish(channel, body).await;
        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(channel = %channel, error = %e, "redis publish failed");
                Err(e).context("redis publish failed")
            }
        }
    }

    async fn subscribe_raw(
        &self,
        channel: &str,
        handler: Arc<dyn Fn(serde_json::Value) + Send + Sync>,
    ) -> Result<()> {
        let client = self.client.clone();
        let channel = channel.to_string();
        let healthy = self.healthy.clone();
        tokio::spawn(Self::reconnect_subscribe_loop(client, channel, handler, healthy));
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn in_process_publish_without_subscribers_is_not_an_error() {
        let bus = InProcessPubSub::new();
        bus.publish("heartbeat", &serde_json::json!({"ok": true}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn in_process_subscriber_receives_published_messages() {
        let bus = InProcessPubSub::new();
        let received = Arc::new(AtomicUsize::new(0));
        let received_clone = received.clone();

        subscribe_typed::<serde_json::Value, _>(&bus, "heartbeat", move |_msg| {
            received_clone.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .unwrap();

        // Give the spawned subscriber task a chance to register.
        tokio::task::yield_now().await;

        bus.publish("heartbeat", &serde_json::json!({"status": "UP"}))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(received.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn in_process_reports_healthy() {
        let bus = InProcessPubSub::new();
        assert!(bus.is_healthy());
    }
}
