//! Worker execution loop (SPEC_FULL.md §4.g): claims due schedule rows,
//! runs them through `mqk_checks::Executor`, hands the result to
//! `HeartbeatProcessor`, and releases the claim with the next due time.

pub mod health;
pub mod monitor_provider;
pub mod notifier;
pub mod processor;
pub mod worker;

pub use health::{build_health_router, process_uptime_secs, wait_for_shutdown_signal, HealthProbe};
pub use monitor_provider::{MonitorProvider, PgMonitorProvider};
pub use notifier::{LoggingNotifier, Notifier};
pub use processor::HeartbeatProcessor;
pub use worker::WorkerLoop;
