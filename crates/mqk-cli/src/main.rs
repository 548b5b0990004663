use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mqk_pubsub::{PubSubExt, RedisPubSub};
use mqk_schemas::{channel, EventEnvelope, WorkerCommand};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "mqk")]
#[command(about = "Monitor scheduler operational CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Schedule table commands
    Schedule {
        #[command(subcommand)]
        cmd: ScheduleCmd,
    },

    /// Publish a worker.command message over the pub/sub transport
    WorkerCommand {
        #[command(subcommand)]
        cmd: WorkerCommandCmd,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,
    Migrate,
}

#[derive(Subcommand)]
enum ScheduleCmd {
    /// Insert or reactivate a schedule row for a monitor
    Activate {
        #[arg(long)]
        monitor_id: i64,
        #[arg(long)]
        tenant_id: Uuid,
        #[arg(long, default_value_t = 60)]
        interval_seconds: i64,
    },
    /// Mark a schedule row inactive without deleting it
    Deactivate {
        #[arg(long)]
        monitor_id: i64,
    },
    /// Remove a schedule row entirely
    Delete {
        #[arg(long)]
        monitor_id: i64,
    },
    /// Print aggregate counts (total/active/claimed/due)
    Stats {
        #[arg(long)]
        tenant_id: Option<Uuid>,
    },
    /// Insert a schedule row for every active monitor that doesn't have one yet
    Sync,
}

#[derive(Subcommand)]
enum WorkerCommandCmd {
    /// Ask every worker to finish in-flight checks and stop
    Shutdown,
    /// Ask a worker to run one monitor's check immediately
    CheckNow { monitor_id: i64 },
    /// Start scheduling a monitor
    StartMonitor {
        monitor_id: i64,
        #[arg(long, default_value_t = 60)]
        interval_seconds: i32,
    },
    /// Stop scheduling a monitor
    StopMonitor { monitor_id: i64 },
    /// Restart a monitor with a new interval
    RestartMonitor {
        monitor_id: i64,
        #[arg(long, default_value_t = 60)]
        interval_seconds: i32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => {
            let pool = mqk_db::connect_from_env().await?;
            match cmd {
                DbCmd::Status => {
                    let s = mqk_db::status(&pool).await?;
                    println!("db_ok={} has_schedule_table={}", s.ok, s.has_schedule_table);
                }
                DbCmd::Migrate => {
                    mqk_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::Schedule { cmd } => {
            let pool = mqk_db::connect_from_env().await?;
            match cmd {
                ScheduleCmd::Activate { monitor_id, tenant_id, interval_seconds } => {
                    mqk_db::schedule_activate(&pool, monitor_id, tenant_id, interval_seconds).await?;
                    println!("activated monitor_id={monitor_id}");
                }
                ScheduleCmd::Deactivate { monitor_id } => {
                    mqk_db::schedule_deactivate(&pool, monitor_id).await?;
                    println!("deactivated monitor_id={monitor_id}");
                }
                ScheduleCmd::Delete { monitor_id } => {
                    mqk_db::schedule_delete(&pool, monitor_id).await?;
                    println!("deleted monitor_id={monitor_id}");
                }
                ScheduleCmd::Stats { tenant_id } => {
                    let stats = mqk_db::schedule_stats(&pool, tenant_id).await?;
                    println!(
                        "total={} active={} claimed={} due={}",
                        stats.total, stats.active, stats.claimed, stats.due
                    );
                }
                ScheduleCmd::Sync => {
                    let inserted = mqk_db::schedule_sync_all_monitors(&pool).await?;
                    println!("rows_inserted={inserted}");
                }
            }
        }

        Commands::WorkerCommand { cmd } => {
            let command = match cmd {
                WorkerCommandCmd::Shutdown => WorkerCommand::Shutdown,
                WorkerCommandCmd::CheckNow { monitor_id } => WorkerCommand::CheckNow { monitor_id },
                WorkerCommandCmd::StartMonitor { monitor_id, interval_seconds } => {
                    WorkerCommand::StartMonitor { monitor_id, interval_seconds }
                }
                WorkerCommandCmd::StopMonitor { monitor_id } => WorkerCommand::StopMonitor { monitor_id },
                WorkerCommandCmd::RestartMonitor { monitor_id, interval_seconds } => {
                    WorkerCommand::RestartMonitor { monitor_id, interval_seconds }
                }
            };
            publish_worker_command(command).await?;
        }
    }

    Ok(())
}

/// Commands only reach running workers over a real broker, so this always
/// dials Redis directly rather than reusing the in-process transport.
async fn publish_worker_command(command: WorkerCommand) -> Result<()> {
    let url = std::env::var("MQK_REDIS_URL").context("MQK_REDIS_URL must be set to publish worker commands")?;
    let pubsub = RedisPubSub::connect(&url).await.context("connecting to redis")?;

    let monitor_id = match &command {
        WorkerCommand::Shutdown => 0,
        WorkerCommand::CheckNow { monitor_id }
        | WorkerCommand::StartMonitor { monitor_id, .. }
        | WorkerCommand::StopMonitor { monitor_id }
        | WorkerCommand::RestartMonitor { monitor_id, .. } => *monitor_id,
    };

    let envelope = EventEnvelope::new(Uuid::nil(), monitor_id, Uuid::nil(), command);
    pubsub
        .publish(channel::WORKER_COMMAND, &envelope)
        .await
        .context("publishing worker command")?;

    println!("published worker.command");
    Ok(())
}
