//! hs-db
//!
//! PostgreSQL durable document store. One table, `durable_alerts`, with a
//! partial unique index on `origin_id` and a trigger that announces every
//! write on [`CHANGE_CHANNEL`].

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool};

mod store;

pub use store::{map_sqlx_error, PgDurableStore};

pub const ENV_DB_URL: &str = "HS_DATABASE_URL";

/// LISTEN/NOTIFY channel carrying the id of every written document.
pub const CHANGE_CHANNEL: &str = "durable_alerts_changed";

/// Connect to Postgres using HS_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    connect(&url).await
}

pub async fn connect(url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .context("failed to connect to Postgres")?;
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

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_alerts_table: bool,
    pub alert_count: i64,
    pub last_write_at: Option<DateTime<Utc>>,
}

/// Connectivity, schema presence, and a row count.
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='durable_alerts'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    if !exists {
        return Ok(DbStatus {
            ok: one == 1,
            has_alerts_table: false,
            alert_count: 0,
            last_write_at: None,
        });
    }

    let (alert_count, last_write_at): (i64, Option<DateTime<Utc>>) =
        sqlx::query_as("select count(*)::bigint, max(updated_at) from durable_alerts")
            .fetch_one(pool)
            .await
            .context("status count query failed")?;

    Ok(DbStatus {
        ok: one == 1,
        has_alerts_table: true,
        alert_count,
        last_write_at,
    })
}
