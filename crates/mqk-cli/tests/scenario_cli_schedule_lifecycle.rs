//! Scenario: `mqk schedule activate/stats/deactivate/delete` round-trip.
//!
//! DB-backed test, skipped if MQK_DATABASE_URL is not set (local + CI friendly).

use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;
use uuid::Uuid;

#[tokio::test]
async fn schedule_activate_then_deactivate_then_delete() -> anyhow::Result<()> {
    let url = match std::env::var(mqk_db::ENV_DB_URL) {
        Ok(v) => v,
        Err(_) => {
            eprintln!("SKIP: MQK_DATABASE_URL not set");
            return Ok(());
        }
    };

    let pool = mqk_db::connect_from_env().await?;
    mqk_db::migrate(&pool).await?;

    let monitor_id: i64 = (Uuid::new_v4().as_u128() % 1_000_000_000) as i64;
    let tenant_id = Uuid::new_v4();

    Command::cargo_bin("mqk-cli")?
        .env(mqk_db::ENV_DB_URL, &url)
        .args([
            "schedule",
            "activate",
            "--monitor-id",
            &monitor_id.to_string(),
            "--tenant-id",
            &tenant_id.to_string(),
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("activated"));

    let stats = mqk_db::schedule_stats(&pool, Some(tenant_id)).await?;
    assert_eq!(stats.active, 1);

    Command::cargo_bin("mqk-cli")?
        .env(mqk_db::ENV_DB_URL, &url)
        .args(["schedule", "deactivate", "--monitor-id", &monitor_id.to_string()])
        .assert()
        .success()
        .stdout(predicate::str::contains("deactivated"));

    let stats = mqk_db::schedule_stats(&pool, Some(tenant_id)).await?;
    assert_eq!(stats.active, 0);
    assert_eq!(stats.total, 1);

    Command::cargo_bin("mqk-cli")?
        .env(mqk_db::ENV_DB_URL, &url)
        .args(["schedule", "delete", "--monitor-id", &monitor_id.to_string()])
        .assert()
        .success()
        .stdout(predicate::str::contains("deleted"));

    let stats = mqk_db::schedule_stats(&pool, Some(tenant_id)).await?;
    assert_eq!(stats.total, 0);

    Ok(())
}
