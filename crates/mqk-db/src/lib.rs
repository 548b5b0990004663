//! Schedule store and heartbeat store (SPEC_FULL.md §4.b, §4.c).
//!
//! `claim_due` uses the same `FOR UPDATE SKIP LOCKED` CTE shape as the
//! upstream workspace's outbox dispatcher: select candidate row ids under a
//! row lock that skips rows other transactions already hold, then update and
//! return them in one statement. No explicit application-level transaction is
//! needed since the whole claim is one round trip.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use mqk_schemas::{Heartbeat, Monitor, MonitorType, ScheduleRow};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use uuid::Uuid;

pub const ENV_DB_URL: &str = "MQK_DATABASE_URL";

/// Connect to Postgres using MQK_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .context("failed to connect to Postgres")?;

    Ok(pool)
}

/// Test helper: connect using MQK_DATABASE_URL and ensure migrations are applied.
pub async fn testkit_db_pool() -> Result<PgPool> {
    let pool = connect_from_env().await?;
    migrate(&pool).await?;
    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

/// Simple status query (connectivity + schema presence).
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;
    let ok = one == 1;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='monitor_schedule'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok,
        has_schedule_table: exists,
    })
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_schedule_table: bool,
}

// ---------------------------------------------------------------------------
// Schedule store (§4.b)
// ---------------------------------------------------------------------------

/// Idempotent upsert: create the row if absent (due immediately), otherwise
/// update tenant/active in place.
pub async fn schedule_initialize(
    pool: &PgPool,
    monitor_id: i64,
    tenant_id: Uuid,
    active: bool,
) -> Result<()> {
    sqlx::query(
        r#"
        insert into monitor_schedule (monitor_id, tenant_id, next_check_at, active)
        values ($1, $2, now(), $3)
        on conflict (monitor_id) do update
           set tenant_id = excluded.tenant_id,
               active    = excluded.active,
               updated_at = now()
        "#,
    )
    .bind(monitor_id)
    .bind(tenant_id)
    .bind(active)
    .execute(pool)
    .await
    .context("schedule_initialize failed")?;
    Ok(())
}

/// Atomically claim up to `batch_size` due rows, ordered by `next_check_at`
/// ascending (ties broken by id), marking them `claimed_by = worker_id,
/// claimed_at = now`.
///
/// Due = active, next_check_at <= now, and either unclaimed or claimed by a
/// worker whose claim is older than `claim_timeout`.
pub async fn schedule_claim_batch(
    pool: &PgPool,
    worker_id: &str,
    batch_size: i64,
    claim_timeout: chrono::Duration,
) -> Result<Vec<ScheduleRow>> {
    let stale_before = Utc::now() - claim_timeout;

    let rows = sqlx::query(
        r#"
        with to_claim as (
            select id
            from monitor_schedule
            where active = true
              and next_check_at <= now()
              and (claimed_by is null or claimed_at < $3)
            order by next_check_at asc, id asc
            limit $1
            for update skip locked
        )
        update monitor_schedule
           set claimed_by = $2,
               claimed_at = now(),
               updated_at = now()
         where id in (select id from to_claim)
        returning id, monitor_id, tenant_id, active, next_check_at, claimed_by,
                  claimed_at, last_check_at, last_status, last_ping,
                  retry_count, consecutive_failures, created_at, updated_at
        "#,
    )
    .bind(batch_size)
    .bind(worker_id)
    .bind(stale_before)
    .fetch_all(pool)
    .await
    .context("schedule_claim_batch failed")?;

    rows.into_iter().map(row_to_schedule_row).collect()
}

fn row_to_schedule_row(row: sqlx::postgres::PgRow) -> Result<ScheduleRow> {
    Ok(ScheduleRow {
        id: row.try_get("id")?,
        monitor_id: row.try_get("monitor_id")?,
        tenant_id: row.try_get("tenant_id")?,
        active: row.try_get("active")?,
        next_check_at: row.try_get("next_check_at")?,
        claimed_by: row.try_get("claimed_by")?,
        claimed_at: row.try_get("claimed_at")?,
        last_check_at: row.try_get("last_check_at")?,
        last_status: row.try_get("last_status")?,
        last_ping: row.try_get("last_ping")?,
        retry_count: row.try_get("retry_count")?,
        consecutive_failures: row.try_get("consecutive_failures")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Clear the claim, set `next_check_at = now + next_interval`, record the
/// outcome, and bump/reset `consecutive_failures`.
///
/// The update predicate includes `claimed_by = $worker_id`: if another worker
/// reclaimed this row (because this worker's check outran the claim
/// timeout), the release becomes a no-op rather than overwriting the
/// reclaiming worker's state. See DESIGN.md, Open Question 2.
pub async fn schedule_release(
    pool: &PgPool,
    schedule_id: i64,
    worker_id: &str,
    next_interval_seconds: i64,
    last_status: i16,
    last_ping: Option<f64>,
    was_failure: bool,
) -> Result<bool> {
    let row: Option<(i64,)> = sqlx::query_as(
        r#"
        update monitor_schedule
           set claimed_by = null,
               claimed_at = null,
               next_check_at = now() + make_interval(secs => $3),
               last_check_at = now(),
               last_status = $4,
               last_ping = $5,
               consecutive_failures = case when $6 then consecutive_failures + 1 else 0 end,
               updated_at = now()
         where id = $1
           and claimed_by = $2
        returning id
        "#,
    )
    .bind(schedule_id)
    .bind(worker_id)
    .bind(next_interval_seconds)
    .bind(last_status)
    .bind(last_ping)
    .bind(was_failure)
    .fetch_optional(pool)
    .await
    .context("schedule_release failed")?;

    Ok(row.is_some())
}

/// Keep the claim (used while a beat is PENDING and the caller wants to
/// retry without yielding ownership), set `next_check_at`, bump `retry_count`.
///
/// `processMonitor` does not call this — `schedule_release` is the single
/// source of truth for `next_check_at` per SPEC_FULL.md §9. Kept as a public
/// operation for callers that need the "do not yield claim between attempts"
/// optimisation.
pub async fn schedule_retry(
    pool: &PgPool,
    schedule_id: i64,
    worker_id: &str,
    retry_interval_seconds: i64,
) -> Result<bool> {
    let row: Option<(i64,)> = sqlx::query_as(
        r#"
        update monitor_schedule
           set next_check_at = now() + make_interval(secs => $3),
               retry_count = retry_count + 1,
               updated_at = now()
         where id = $1
           and claimed_by = $2
        returning id
        "#,
    )
    .bind(schedule_id)
    .bind(worker_id)
    .bind(retry_interval_seconds)
    .fetch_optional(pool)
    .await
    .context("schedule_retry failed")?;

    Ok(row.is_some())
}

/// Unconditionally clear `claimed_by`/`claimed_at` for rows whose claim is
/// older than `older_than`. Returns the number of rows released.
pub async fn schedule_release_stale(pool: &PgPool, older_than: chrono::Duration) -> Result<u64> {
    let cutoff = Utc::now() - older_than;
    let result = sqlx::query(
        r#"
        update monitor_schedule
           set claimed_by = null,
               claimed_at = null,
               updated_at = now()
         where claimed_at is not null
           and claimed_at < $1
        "#,
    )
    .bind(cutoff)
    .execute(pool)
    .await
    .context("schedule_release_stale failed")?;

    Ok(result.rows_affected())
}

/// Activate a monitor: create its row if missing (due immediately for
/// `interval_seconds = 0`, else `now + interval_seconds`), or reactivate it.
pub async fn schedule_activate(
    pool: &PgPool,
    monitor_id: i64,
    tenant_id: Uuid,
    interval_seconds: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        insert into monitor_schedule (monitor_id, tenant_id, next_check_at, active)
        values ($1, $2, now() + make_interval(secs => $3), true)
        on conflict (monitor_id) do update
           set active = true,
               next_check_at = now() + make_interval(secs => $3),
               updated_at = now()
        "#,
    )
    .bind(monitor_id)
    .bind(tenant_id)
    .bind(interval_seconds)
    .execute(pool)
    .await
    .context("schedule_activate failed")?;
    Ok(())
}

pub async fn schedule_deactivate(pool: &PgPool, monitor_id: i64) -> Result<()> {
    sqlx::query("update monitor_schedule set active = false, updated_at = now() where monitor_id = $1")
        .bind(monitor_id)
        .execute(pool)
        .await
        .context("schedule_deactivate failed")?;
    Ok(())
}

pub async fn schedule_delete(pool: &PgPool, monitor_id: i64) -> Result<()> {
    sqlx::query("delete from monitor_schedule where monitor_id = $1")
        .bind(monitor_id)
        .execute(pool)
        .await
        .context("schedule_delete failed")?;
    Ok(())
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ScheduleStats {
    pub total: i64,
    pub active: i64,
    pub claimed: i64,
    pub due: i64,
}

pub async fn schedule_stats(pool: &PgPool, tenant_id: Option<Uuid>) -> Result<ScheduleStats> {
    let row = sqlx::query(
        r#"
        select
            count(*) as total,
            count(*) filter (where active) as active,
            count(*) filter (where claimed_by is not null) as claimed,
            count(*) filter (where active and next_check_at <= now()) as due
        from monitor_schedule
        where $1::uuid is null or tenant_id = $1
        "#,
    )
    .bind(tenant_id)
    .fetch_one(pool)
    .await
    .context("schedule_stats failed")?;

    Ok(ScheduleStats {
        total: row.try_get("total")?,
        active: row.try_get("active")?,
        claimed: row.try_get("claimed")?,
        due: row.try_get("due")?,
    })
}

/// On startup, ensure every row in `monitors` with `active = true` has a
/// schedule row. `monitors` is owned by the external management layer; this
/// reads just enough of it to sync.
pub async fn schedule_sync_all_monitors(pool: &PgPool) -> Result<u64> {
    let result = sqlx::query(
        r#"
        insert into monitor_schedule (monitor_id, tenant_id, next_check_at, active)
        select m.id, m.tenant_id, now(), true
        from monitors m
        where m.active = true
        on conflict (monitor_id) do nothing
        "#,
    )
    .execute(pool)
    .await
    .context("schedule_sync_all_monitors failed")?;

    Ok(result.rows_affected())
}

/// Reads one monitor's read-only configuration from the external `monitors`
/// table. The executor never writes through this path.
pub async fn monitor_fetch(pool: &PgPool, monitor_id: i64) -> Result<Option<Monitor>> {
    let row = sqlx::query(
        r#"
        select id, tenant_id, user_id, type, interval_seconds, retry_interval_seconds,
               max_retries, timeout_seconds, resend_interval, upside_down, config
        from monitors
        where id = $1
        "#,
    )
    .bind(monitor_id)
    .fetch_optional(pool)
    .await
    .context("monitor_fetch failed")?;

    let Some(row) = row else { return Ok(None) };

    let type_str: String = row.try_get("type").context("monitor_fetch: type")?;
    let r#type = match type_str.as_str() {
        "http" => MonitorType::Http,
        "tcp" => MonitorType::Tcp,
        "dns" => MonitorType::Dns,
        "push" => MonitorType::Push,
        "tls" => MonitorType::Tls,
        "database" => MonitorType::Database,
        "grpc" => MonitorType::Grpc,
        other => anyhow::bail!("monitor {monitor_id} has unknown type `{other}`"),
    };

    Ok(Some(Monitor {
        id: row.try_get("id").context("monitor_fetch: id")?,
        tenant_id: row.try_get("tenant_id").context("monitor_fetch: tenant_id")?,
        user_id: row.try_get("user_id").context("monitor_fetch: user_id")?,
        r#type,
        interval_seconds: row.try_get("interval_seconds").context("monitor_fetch: interval_seconds")?,
        retry_interval_seconds: row
            .try_get("retry_interval_seconds")
            .context("monitor_fetch: retry_interval_seconds")?,
        max_retries: row.try_get("max_retries").context("monitor_fetch: max_retries")?,
        timeout_seconds: row.try_get("timeout_seconds").context("monitor_fetch: timeout_seconds")?,
        resend_interval: row.try_get("resend_interval").context("monitor_fetch: resend_interval")?,
        upside_down: row.try_get("upside_down").context("monitor_fetch: upside_down")?,
        config: row.try_get("config").context("monitor_fetch: config")?,
    }))
}

// ---------------------------------------------------------------------------
// Heartbeat store (§4.c)
// ---------------------------------------------------------------------------

pub struct NewHeartbeat {
    pub monitor_id: i64,
    pub tenant_id: Uuid,
    pub time: DateTime<Utc>,
    pub status: i16,
    pub msg: String,
    pub ping: Option<f64>,
    pub important: bool,
    pub duration: f64,
    pub down_count: i32,
    pub retries: i32,
    pub end_time: Option<DateTime<Utc>>,
}

pub async fn heartbeat_append(pool: &PgPool, hb: &NewHeartbeat) -> Result<i64> {
    let (id,): (i64,) = sqlx::query_as(
        r#"
        insert into heartbeat
            (monitor_id, tenant_id, time, status, msg, ping, important,
             duration, down_count, retries, end_time)
        values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        returning id
        "#,
    )
    .bind(hb.monitor_id)
    .bind(hb.tenant_id)
    .bind(hb.time)
    .bind(hb.status)
    .bind(&hb.msg)
    .bind(hb.ping)
    .bind(hb.important)
    .bind(hb.duration)
    .bind(hb.down_count)
    .bind(hb.retries)
    .bind(hb.end_time)
    .fetch_one(pool)
    .await
    .context("heartbeat_append failed")?;

    Ok(id)
}

/// Reset `down_count` to 0 after a resend notification fires.
pub async fn heartbeat_reset_down_count(pool: &PgPool, heartbeat_id: i64) -> Result<()> {
    sqlx::query("update heartbeat set down_count = 0 where id = $1")
        .bind(heartbeat_id)
        .execute(pool)
        .await
        .context("heartbeat_reset_down_count failed")?;
    Ok(())
}

pub async fn heartbeat_most_recent(pool: &PgPool, monitor_id: i64) -> Result<Option<Heartbeat>> {
    sqlx::query_as::<_, Heartbeat>(
        "select id, monitor_id, tenant_id, time, status, msg, ping, important, duration, \
         down_count, retries, end_time from heartbeat where monitor_id = $1 order by time desc limit 1",
    )
    .bind(monitor_id)
    .fetch_optional(pool)
    .await
    .context("heartbeat_most_recent failed")
}

pub async fn heartbeat_recent(
    pool: &PgPool,
    monitor_id: i64,
    limit: i64,
    important_only: bool,
) -> Result<Vec<Heartbeat>> {
    sqlx::query_as::<_, Heartbeat>(
        "select id, monitor_id, tenant_id, time, status, msg, ping, important, duration, \
         down_count, retries, end_time from heartbeat \
         where monitor_id = $1 and (not $3 or important) \
         order by time desc limit $2",
    )
    .bind(monitor_id)
    .bind(limit)
    .bind(important_only)
    .fetch_all(pool)
    .await
    .context("heartbeat_recent failed")
}
