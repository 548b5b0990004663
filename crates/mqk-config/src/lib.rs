//! Environment-variable configuration for the worker and relay processes.
//!
//! Every option is read once, parsed with a documented default, and failures
//! to parse (not failures to be *present*) are surfaced via `.context(...)`
//! so a malformed value fails fast at startup rather than silently falling
//! back to the default.

use anyhow::{Context, Result};
use std::time::Duration;

fn env_string(name: &str, default: impl Into<String>) -> String {
    std::env::var(name).unwrap_or_else(|_| default.into())
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("invalid {name}={raw:?}: {e}")),
        Err(_) => Ok(default),
    }
}

fn random_suffix(len: usize) -> String {
    use rand::Rng;
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Configuration for a `mqk-worker` process (SPEC_FULL.md §6).
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub batch_size: i64,
    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
    pub stale_claim_age: Duration,
    pub health_port: u16,
    pub database_url: String,
    pub redis_url: Option<String>,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self> {
        let worker_id = match std::env::var("WORKER_ID") {
            Ok(id) if !id.is_empty() => id,
            _ => format!("worker-{}", random_suffix(8)),
        };

        let batch_size = env_parsed("WORKER_BATCH_SIZE", 10i64).context("WORKER_BATCH_SIZE")?;
        let poll_interval_ms =
            env_parsed("WORKER_POLL_INTERVAL", 1_000u64).context("WORKER_POLL_INTERVAL")?;
        let heartbeat_interval_ms = env_parsed("WORKER_HEARTBEAT_INTERVAL", 30_000u64)
            .context("WORKER_HEARTBEAT_INTERVAL")?;
        let stale_claim_minutes =
            env_parsed("WORKER_STALE_CLAIM_MINUTES", 2u64).context("WORKER_STALE_CLAIM_MINUTES")?;
        let health_port = env_parsed("WORKER_HEALTH_PORT", 3002u16).context("WORKER_HEALTH_PORT")?;

        let database_url =
            std::env::var("MQK_DATABASE_URL").context("missing env var MQK_DATABASE_URL")?;
        let redis_url = std::env::var("REDIS_URL").ok().filter(|s| !s.is_empty());

        Ok(Self {
            worker_id,
            batch_size,
            poll_interval: Duration::from_millis(poll_interval_ms),
            heartbeat_interval: Duration::from_millis(heartbeat_interval_ms),
            stale_claim_age: Duration::from_secs(stale_claim_minutes * 60),
            health_port,
            database_url,
            redis_url,
        })
    }
}

/// Configuration for the `mqk-relay` process. Unlike [`WorkerConfig`], this
/// carries no database URL: the relay only ever consumes pub/sub events.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub health_port: u16,
    pub redis_url: Option<String>,
    pub bind_addr: String,
}

impl RelayConfig {
    pub fn from_env() -> Result<Self> {
        let health_port = env_parsed("RELAY_HEALTH_PORT", 3003u16).context("RELAY_HEALTH_PORT")?;
        let redis_url = std::env::var("REDIS_URL").ok().filter(|s| !s.is_empty());
        let bind_addr = env_string("RELAY_BIND_ADDR", "127.0.0.1:3003");

        Ok(Self {
            health_port,
            redis_url,
            bind_addr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variable mutation is process-global; serialize tests that
    // touch it so they don't race each other under the test harness.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn worker_config_uses_documented_defaults() {
        let _guard = ENV_LOCK.lock().unwrap();
        for k in [
            "WORKER_ID",
            "WORKER_BATCH_SIZE",
            "WORKER_POLL_INTERVAL",
            "WORKER_HEARTBEAT_INTERVAL",
            "WORKER_STALE_CLAIM_MINUTES",
            "WORKER_HEALTH_PORT",
            "REDIS_URL",
        ] {
            std::env::remove_var(k);
        }
        std::env::set_var("MQK_DATABASE_URL", "postgres://localhost/test");

        let cfg = WorkerConfig::from_env().unwrap();
        assert_eq!(cfg.batch_size, 10);
        assert_eq!(cfg.poll_interval, Duration::from_secs(1));
        assert_eq!(cfg.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(cfg.stale_claim_age, Duration::from_secs(120));
        assert_eq!(cfg.health_port, 3002);
        assert!(cfg.worker_id.starts_with("worker-"));
        assert!(cfg.redis_url.is_none());

        std::env::remove_var("MQK_DATABASE_URL");
    }

    #[test]
    fn worker_config_rejects_malformed_values() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("MQK_DATABASE_URL", "postgres://localhost/test");
        std::env::set_var("WORKER_BATCH_SIZE", "not-a-number");

        let err = WorkerConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("WORKER_BATCH_SIZE"));

        std::env::remove_var("WORKER_BATCH_SIZE");
        std::env::remove_var("MQK_DATABASE_URL");
    }

    #[test]
    fn relay_config_uses_documented_defaults_and_needs_no_database_url() {
        let _guard = ENV_LOCK.lock().unwrap();
        for k in ["RELAY_HEALTH_PORT", "REDIS_URL", "RELAY_BIND_ADDR"] {
            std::env::remove_var(k);
        }

        let cfg = RelayConfig::from_env().unwrap();
        assert_eq!(cfg.health_port, 3003);
        assert_eq!(cfg.bind_addr, "127.0.0.1:3003");
        assert!(cfg.redis_url.is_none());
    }
}
