//! `DurableStore` over Postgres with a LISTEN/NOTIFY push feed.

use std::time::Duration;

use async_trait::async_trait;
use hs_ingest::{doc_fields, timestamp_of, DocFields};
use hs_schemas::fields;
use hs_store::{
    DurableDoc, DurableQuery, DurableStore, FeedSender, StoreError, Subscription,
    SubscriptionError,
};
use serde_json::Value;
use sqlx::postgres::{PgListener, PgPool};
use sqlx::Row;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::CHANGE_CHANNEL;

const INITIAL_RECONNECT_DELAY: Duration = Duration::from_secs(1);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(60);
/// Consecutive failed reconnects before the feed reports itself lost.
const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Map a driver error onto the store contract.
pub fn map_sqlx_error(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &e {
        if db.code().as_deref() == Some("23505") {
            return StoreError::Conflict(db.message().to_string());
        }
    }
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(e.to_string())
        }
        sqlx::Error::RowNotFound => StoreError::NotFound {
            id: "<row>".to_string(),
        },
        other => StoreError::Backend(other.to_string()),
    }
}

#[derive(Clone)]
pub struct PgDurableStore {
    pool: PgPool,
}

impl PgDurableStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn origin_of(doc: &DocFields) -> Option<String> {
    doc.get(fields::ORIGIN_ID)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn ts_of(doc: &DocFields) -> Option<i64> {
    timestamp_of(doc)
}

fn row_to_doc(row: &sqlx::postgres::PgRow) -> Result<Option<DurableDoc>, StoreError> {
    let id: String = row.try_get("id").map_err(map_sqlx_error)?;
    let body: Value = row.try_get("doc").map_err(map_sqlx_error)?;
    match doc_fields(&id, body) {
        Ok(fields) => Ok(Some(DurableDoc { id, fields })),
        Err(e) => {
            warn!(error = %e, "skipping malformed durable row");
            Ok(None)
        }
    }
}

async fn fetch_docs(pool: &PgPool, q: &DurableQuery) -> Result<Vec<DurableDoc>, StoreError> {
    let limit = i64::try_from(q.limit).unwrap_or(i64::MAX);
    let rows = sqlx::query(
        r#"
        select id, doc
        from durable_alerts
        where ($1::text is null or origin_id = $1)
        order by ts_millis desc nulls last, seq asc
        limit $2
        "#,
    )
    .bind(q.origin_id.as_deref())
    .bind(limit)
    .fetch_all(pool)
    .await
    .map_err(map_sqlx_error)?;

    let mut out = Vec::with_capacity(rows.len());
    for row in &rows {
        if let Some(doc) = row_to_doc(row)? {
            out.push(doc);
        }
    }
    Ok(out)
}

async fn write_doc<'e, E>(exec: E, id: &str, doc: DocFields) -> Result<(), StoreError>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    let origin = origin_of(&doc);
    let ts = ts_of(&doc);
    sqlx::query(
        r#"
        insert into durable_alerts (id, origin_id, ts_millis, doc)
        values ($1, $2, $3, $4)
        on conflict (id) do update
           set origin_id  = excluded.origin_id,
               ts_millis  = excluded.ts_millis,
               doc        = excluded.doc,
               updated_at = now()
        "#,
    )
    .bind(id)
    .bind(origin)
    .bind(ts)
    .bind(Value::Object(doc))
    .execute(exec)
    .await
    .map_err(map_sqlx_error)?;
    Ok(())
}

async fn connect_listener(pool: &PgPool) -> Result<PgListener, sqlx::Error> {
    let mut listener = PgListener::connect_with(pool).await?;
    listener.listen(CHANGE_CHANNEL).await?;
    Ok(listener)
}

#[async_trait]
impl DurableStore for PgDurableStore {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn query(&self, query: &DurableQuery) -> Result<Vec<DurableDoc>, StoreError> {
        fetch_docs(&self.pool, query).await
    }

    async fn get(&self, id: &str) -> Result<Option<DurableDoc>, StoreError> {
        let row = sqlx::query("select id, doc from durable_alerts where id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        match row {
            Some(r) => row_to_doc(&r),
            None => Ok(None),
        }
    }

    async fn set(&self, id: &str, fields: DocFields) -> Result<(), StoreError> {
        write_doc(&self.pool, id, fields).await
    }

    async fn update(&self, id: &str, fields: DocFields) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let current: Option<Value> =
            sqlx::query_scalar("select doc from durable_alerts where id = $1 for update")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;

        let Some(current) = current else {
            return Err(StoreError::NotFound { id: id.to_string() });
        };
        let mut merged = doc_fields(id, current).unwrap_or_default();
        merged.extend(fields);

        write_doc(&mut *tx, id, merged).await?;
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn subscribe(
        &self,
        query: DurableQuery,
        tx: FeedSender<Vec<DurableDoc>>,
    ) -> Result<Subscription, SubscriptionError> {
        // Listen before the first snapshot so no write falls between them.
        let listener = connect_listener(&self.pool)
            .await
            .map_err(|e| SubscriptionError::Rejected(e.to_string()))?;

        let initial = fetch_docs(&self.pool, &query)
            .await
            .map_err(|e| SubscriptionError::Rejected(e.to_string()))?;
        if tx.send(Ok(initial)).await.is_err() {
            return Ok(Subscription::detached("postgres-feed"));
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(run_feed(self.pool.clone(), query, tx, listener, shutdown_rx));

        info!(channel = CHANGE_CHANNEL, "durable feed subscribed");
        Ok(Subscription::new("postgres-feed", move || {
            let _ = shutdown_tx.send(true);
        }))
    }
}

/// Re-query and push one snapshot. `false` once the consumer is gone.
async fn push_snapshot(
    pool: &PgPool,
    query: &DurableQuery,
    tx: &FeedSender<Vec<DurableDoc>>,
) -> bool {
    match fetch_docs(pool, query).await {
        Ok(docs) => tx.send(Ok(docs)).await.is_ok(),
        Err(e) => {
            // Next notification re-queries.
            warn!(error = %e, "durable feed snapshot query failed");
            true
        }
    }
}

enum Wake {
    Notification(Result<sqlx::postgres::PgNotification, sqlx::Error>),
    Stop,
}

async fn run_feed(
    pool: PgPool,
    query: DurableQuery,
    tx: FeedSender<Vec<DurableDoc>>,
    listener: PgListener,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut listener_option = Some(listener);
    let mut reconnect_delay = INITIAL_RECONNECT_DELAY;
    let mut failed_reconnects = 0u32;

    loop {
        let listener = match listener_option {
            Some(ref mut l) => l,
            None => {
                match connect_listener(&pool).await {
                    Ok(l) => {
                        info!(channel = CHANGE_CHANNEL, "durable feed listener reconnected");
                        reconnect_delay = INITIAL_RECONNECT_DELAY;
                        failed_reconnects = 0;
                        listener_option = Some(l);
                        // Writes made while disconnected were not announced.
                        if !push_snapshot(&pool, &query, &tx).await {
                            return;
                        }
                    }
                    Err(e) => {
                        failed_reconnects += 1;
                        error!(
                            error = %e,
                            attempt = failed_reconnects,
                            "durable feed listener reconnect failed"
                        );
                        if failed_reconnects >= MAX_RECONNECT_ATTEMPTS {
                            let _ = tx
                                .send(Err(SubscriptionError::Disconnected(e.to_string())))
                                .await;
                            return;
                        }
                        tokio::select! {
                            _ = sleep(reconnect_delay) => {}
                            _ = shutdown_rx.changed() => return,
                        }
                        reconnect_delay = (reconnect_delay * 2).min(MAX_RECONNECT_DELAY);
                    }
                }
                continue;
            }
        };

        let wake = tokio::select! {
            result = listener.recv() => Wake::Notification(result),
            _ = shutdown_rx.changed() => Wake::Stop,
            _ = tx.closed() => Wake::Stop,
        };

        match wake {
            Wake::Stop => {
                debug!("durable feed stopped");
                return;
            }
            Wake::Notification(Ok(n)) => {
                debug!(id = n.payload(), "durable change notification");
                if !push_snapshot(&pool, &query, &tx).await {
                    return;
                }
            }
            Wake::Notification(Err(e)) => {
                warn!(error = %e, "durable feed listener error; reconnecting");
                listener_option = None;
            }
        }
    }
}
