use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use mqk_checks::Executor;
use mqk_config::WorkerConfig;
use mqk_pubsub::{subscribe_typed, PubSub, PubSubExt};
use mqk_schemas::{channel, EventEnvelope, WorkerCommand, WorkerLiveness, WorkerState as LivenessState};
use sqlx::PgPool;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::health::HealthProbe;
use crate::monitor_provider::MonitorProvider;
use crate::processor::HeartbeatProcessor;

const CLAIM_TIMEOUT_SECONDS: i64 = 60;
const STALE_SWEEP_INTERVAL: StdDuration = StdDuration::from_secs(60);
const SHUTDOWN_DRAIN_TIMEOUT: StdDuration = StdDuration::from_secs(30);

/// Live counters surfaced on the worker heartbeat channel and the health
/// endpoint. Cheap to read from any task without locking.
#[derive(Default)]
struct WorkerCounters {
    in_flight: AtomicI64,
    checks_processed: AtomicU64,
    last_check_at: AtomicI64,
    shutting_down: std::sync::atomic::AtomicBool,
}

impl WorkerCounters {
    fn mark_check(&self) {
        self.checks_processed.fetch_add(1, Ordering::Relaxed);
        self.last_check_at.store(Utc::now().timestamp(), Ordering::Relaxed);
    }
}

/// Owns the claim -> execute -> heartbeat -> publish -> reschedule loop
/// described in SPEC_FULL.md §4.g, plus the three supporting tasks (worker
/// heartbeat, stale-claim sweep, command subscription) that run alongside it
/// under one shutdown signal.
pub struct WorkerLoop {
    pool: PgPool,
    monitors: Arc<dyn MonitorProvider>,
    executor: Arc<Executor>,
    processor: Arc<HeartbeatProcessor>,
    pubsub: Arc<dyn PubSub>,
    config: WorkerConfig,
    state: Arc<WorkerCounters>,
}

impl WorkerLoop {
    pub fn new(
        pool: PgPool,
        monitors: Arc<dyn MonitorProvider>,
        executor: Arc<Executor>,
        processor: Arc<HeartbeatProcessor>,
        pubsub: Arc<dyn PubSub>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            pool,
            monitors,
            executor,
            processor,
            pubsub,
            config,
            state: Arc::new(WorkerCounters::default()),
        }
    }

    /// Runs until `shutdown_rx` reports a shutdown request, then drains
    /// in-flight checks before returning. `shutdown_tx` is handed to the
    /// command loop so a published `SHUTDOWN` command can trigger the same
    /// path as SIGINT/SIGTERM.
    pub async fn run(self: Arc<Self>, shutdown_tx: watch::Sender<bool>, mut shutdown_rx: watch::Receiver<bool>) {
        info!(worker_id = %self.config.worker_id, "worker loop starting");

        let main_task = {
            let this = self.clone();
            let mut rx = shutdown_rx.clone();
            tokio::spawn(async move { this.main_loop(&mut rx).await })
        };
        let heartbeat_task = {
            let this = self.clone();
            let mut rx = shutdown_rx.clone();
            tokio::spawn(async move { this.heartbeat_loop(&mut rx).await })
        };
        let sweep_task = {
            let this = self.clone();
            let mut rx = shutdown_rx.clone();
            tokio::spawn(async move { this.sweep_loop(&mut rx).await })
        };
        let command_task = {
            let this = self.clone();
            let shutdown_tx = shutdown_tx.clone();
            tokio::spawn(async move { this.command_loop(shutdown_tx).await })
        };

        let _ = shutdown_rx.changed().await;
        self.state.shutting_down.store(true, Ordering::SeqCst);
        info!(worker_id = %self.config.worker_id, "shutdown requested, draining in-flight checks");

        let drain_start = tokio::time::Instant::now();
        while self.state.in_flight.load(Ordering::SeqCst) > 0 {
            if drain_start.elapsed() > SHUTDOWN_DRAIN_TIMEOUT {
                warn!(worker_id = %self.config.worker_id, "drain timed out with checks still in flight");
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(100)).await;
        }

        self.publish_worker_heartbeat(LivenessState::Stopped).await;

        for task in [main_task, heartbeat_task, sweep_task, command_task] {
            task.abort();
        }
        info!(worker_id = %self.config.worker_id, "worker loop stopped");
    }

    async fn main_loop(&self, shutdown_rx: &mut watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown_rx.changed() => break,
            }
            if self.state.shutting_down.load(Ordering::SeqCst) {
                break;
            }

            let claimed = match mqk_db::schedule_claim_batch(
                &self.pool,
                &self.config.worker_id,
                self.config.batch_size,
                chrono::Duration::seconds(CLAIM_TIMEOUT_SECONDS),
            )
            .await
            {
                Ok(rows) => rows,
                Err(e) => {
                    error!(worker_id = %self.config.worker_id, error = %e, "schedule_claim_batch failed");
                    continue;
                }
            };

            if claimed.is_empty() {
                continue;
            }

            let mut handles = Vec::with_capacity(claimed.len());
            for row in claimed {
                let ctx = self.task_ctx();
                handles.push(tokio::spawn(async move { ctx.process_monitor(row).await }));
            }
            for handle in handles {
                if let Err(e) = handle.await {
                    error!(worker_id = %self.config.worker_id, error = %e, "process_monitor task panicked");
                }
            }
        }
    }

    fn task_ctx(&self) -> ProcessMonitorCtx {
        ProcessMonitorCtx {
            pool: self.pool.clone(),
            monitors: self.monitors.clone(),
            executor: self.executor.clone(),
            processor: self.processor.clone(),
            worker_id: self.config.worker_id.clone(),
            state: self.state.clone(),
        }
    }

    async fn heartbeat_loop(&self, shutdown_rx: &mut watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.heartbeat_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown_rx.changed() => break,
            }
            if self.state.shutting_down.load(Ordering::SeqCst) {
                break;
            }
            self.publish_worker_heartbeat(LivenessState::Running).await;
        }
    }

    async fn publish_worker_heartbeat(&self, state: LivenessState) {
        let last_check_at = match self.state.last_check_at.load(Ordering::Relaxed) {
            0 => None,
            t => chrono::DateTime::from_timestamp(t, 0),
        };
        let payload = WorkerLiveness {
            worker_id: self.config.worker_id.clone(),
            state,
            checks_processed: self.state.checks_processed.load(Ordering::Relaxed),
            last_check_at,
        };
        if let Err(e) = self.pubsub.publish(channel::WORKER_HEARTBEAT, &payload).await {
            warn!(worker_id = %self.config.worker_id, error = %e, "failed to publish worker heartbeat");
        }
    }

    async fn sweep_loop(&self, shutdown_rx: &mut watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(STALE_SWEEP_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown_rx.changed() => break,
            }
            if self.state.shutting_down.load(Ordering::SeqCst) {
                break;
            }
            let threshold = chrono::Duration::from_std(self.config.stale_claim_age).unwrap_or(chrono::Duration::seconds(120));
            match mqk_db::schedule_release_stale(&self.pool, threshold).await {
                Ok(0) => {}
                Ok(n) => info!(worker_id = %self.config.worker_id, released = n, "swept stale claims"),
                Err(e) => error!(worker_id = %self.config.worker_id, error = %e, "schedule_release_stale failed"),
            }
        }
    }

    /// Subscribes for the life of the process; there is no clean way to
    /// unsubscribe a callback-based `PubSub::subscribe_raw`, so shutdown just
    /// aborts this task from `run`.
    async fn command_loop(&self, shutdown_tx: watch::Sender<bool>) {
        let pool = self.pool.clone();
        let worker_id = self.config.worker_id.clone();
        let result = subscribe_typed::<EventEnvelope<WorkerCommand>, _>(self.pubsub.as_ref(), channel::WORKER_COMMAND, move |envelope| {
            let pool = pool.clone();
            let worker_id = worker_id.clone();
            let shutdown_tx = shutdown_tx.clone();
            tokio::spawn(async move {
                handle_command(&pool, &worker_id, &shutdown_tx, envelope).await;
            });
        })
        .await;

        if let Err(e) = result {
            warn!(worker_id = %self.config.worker_id, error = %e, "worker command channel unavailable");
        }
    }
}

async fn handle_command(pool: &PgPool, worker_id: &str, shutdown_tx: &watch::Sender<bool>, envelope: EventEnvelope<WorkerCommand>) {
    match envelope.payload {
        WorkerCommand::Shutdown => {
            info!(worker_id, "received shutdown command, initiating graceful stop");
            let _ = shutdown_tx.send(true);
        }
        WorkerCommand::CheckNow { monitor_id } => {
            if let Err(e) = mqk_db::schedule_activate(pool, monitor_id, envelope.tenant_id, 0).await {
                warn!(monitor_id, error = %e, "CHECK_NOW activation failed");
            }
        }
        WorkerCommand::StartMonitor { monitor_id, interval_seconds } => {
            if let Err(e) = mqk_db::schedule_activate(pool, monitor_id, envelope.tenant_id, interval_seconds as i64).await {
                warn!(monitor_id, error = %e, "start_monitor activation failed");
            }
        }
        WorkerCommand::StopMonitor { monitor_id } => {
            if let Err(e) = mqk_db::schedule_deactivate(pool, monitor_id).await {
                warn!(monitor_id, error = %e, "stop_monitor deactivation failed");
            }
        }
        WorkerCommand::RestartMonitor { monitor_id, interval_seconds } => {
            if let Err(e) = mqk_db::schedule_activate(pool, monitor_id, envelope.tenant_id, interval_seconds as i64).await {
                warn!(monitor_id, error = %e, "restart_monitor activation failed");
            }
        }
    }
}

impl HealthProbe for WorkerLoop {
    fn ready(&self) -> bool {
        !self.state.shutting_down.load(Ordering::SeqCst)
    }

    fn status_json(&self) -> serde_json::Value {
        serde_json::json!({
            "worker_id": self.config.worker_id,
            "running": !self.state.shutting_down.load(Ordering::SeqCst),
            "in_flight": self.state.in_flight.load(Ordering::Relaxed),
            "checks_processed": self.state.checks_processed.load(Ordering::Relaxed),
            "pubsub_available": self.pubsub.is_healthy(),
            "process_uptime_secs": crate::health::process_uptime_secs(),
        })
    }

    fn metrics_lines(&self) -> Vec<(&'static str, String)> {
        vec![
            ("running", (!self.state.shutting_down.load(Ordering::SeqCst) as u8).to_string()),
            ("checks_processed", self.state.checks_processed.load(Ordering::Relaxed).to_string()),
            ("in_flight", self.state.in_flight.load(Ordering::Relaxed).to_string()),
            ("pubsub_available", (self.pubsub.is_healthy() as u8).to_string()),
        ]
    }
}

/// Owned copy of the bits `process_monitor` needs, so each claimed row can
/// run on its own spawned task without borrowing `WorkerLoop`.
struct ProcessMonitorCtx {
    pool: PgPool,
    monitors: Arc<dyn MonitorProvider>,
    executor: Arc<Executor>,
    processor: Arc<HeartbeatProcessor>,
    worker_id: String,
    state: Arc<WorkerCounters>,
}

impl ProcessMonitorCtx {
    async fn process_monitor(self, row: mqk_schemas::ScheduleRow) {
        self.state.in_flight.fetch_add(1, Ordering::SeqCst);

        if let Err(e) = self.try_process(&row).await {
            warn!(schedule_id = row.id, monitor_id = row.monitor_id, error = %e, "process_monitor failed, releasing with defaults");
            let _ = mqk_db::schedule_release(&self.pool, row.id, &self.worker_id, 60, row.last_status.unwrap_or(2), None, true).await;
        }

        self.state.mark_check();
        self.state.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    async fn try_process(&self, row: &mqk_schemas::ScheduleRow) -> anyhow::Result<()> {
        let monitor = self
            .monitors
            .get_monitor(row.monitor_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("monitor {} has no configuration", row.monitor_id))?;

        let previous = mqk_db::heartbeat_most_recent(&self.pool, row.monitor_id).await?;
        let retries = previous.as_ref().map(|p| p.retries).unwrap_or(0);

        let outcome = self.executor.execute(&monitor, previous.as_ref(), retries).await;

        self.processor.process(&monitor, &outcome).await?;

        mqk_db::schedule_release(
            &self.pool,
            row.id,
            &self.worker_id,
            outcome.next_interval_seconds,
            outcome.status as i16,
            outcome.ping_ms,
            outcome.status != mqk_schemas::MonitorStatus::Up,
        )
        .await?;

        Ok(())
    }
}
