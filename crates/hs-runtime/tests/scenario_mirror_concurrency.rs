//! Scenario: mirrors, acknowledgements and shutdown interleaving.
//!
//! # Invariants under test
//!
//! 1. An acknowledgement issued while a mirror of the same occurrence is
//!    between its lookup and its write is never reverted by that write.
//! 2. `stop` lets every queued mirror write complete before returning.
//! 3. `observe_alerts` yields the current view, then every recomputed view.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use hs_config::EngineConfig;
use hs_ingest::DocFields;
use hs_runtime::{Collaborators, ManualClock, ReconciliationService};
use hs_store::memory::{MemoryDurableStore, MemoryNotificationSink, MemoryPrimaryStore};
use hs_store::{
    DurableDoc, DurableQuery, DurableStore, FeedSender, StoreError, Subscription,
    SubscriptionError,
};
use serde_json::{json, Value};

const NOW: i64 = 1_760_000_000_000;

// ---------------------------------------------------------------------------
// SlowDurable: memory store with adjustable latency on query and set
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct SlowDurable {
    inner: MemoryDurableStore,
    query_delay_ms: Arc<AtomicU64>,
    set_delay_ms: Arc<AtomicU64>,
}

impl SlowDurable {
    fn slow_queries(&self, ms: u64) {
        self.query_delay_ms.store(ms, Ordering::SeqCst);
    }

    fn slow_sets(&self, ms: u64) {
        self.set_delay_ms.store(ms, Ordering::SeqCst);
    }
}

async fn pause(ms: &AtomicU64) {
    let ms = ms.load(Ordering::SeqCst);
    if ms > 0 {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}

#[async_trait]
impl DurableStore for SlowDurable {
    fn name(&self) -> &'static str {
        "slow-durable"
    }

    async fn query(&self, query: &DurableQuery) -> Result<Vec<DurableDoc>, StoreError> {
        pause(&self.query_delay_ms).await;
        self.inner.query(query).await
    }

    async fn get(&self, id: &str) -> Result<Option<DurableDoc>, StoreError> {
        self.inner.get(id).await
    }

    async fn set(&self, id: &str, fields: DocFields) -> Result<(), StoreError> {
        pause(&self.set_delay_ms).await;
        self.inner.set(id, fields).await
    }

    async fn update(&self, id: &str, fields: DocFields) -> Result<(), StoreError> {
        self.inner.update(id, fields).await
    }

    async fn subscribe(
        &self,
        query: DurableQuery,
        tx: FeedSender<Vec<DurableDoc>>,
    ) -> Result<Subscription, SubscriptionError> {
        self.inner.subscribe(query, tx).await
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Rig {
    primary: MemoryPrimaryStore,
    durable: SlowDurable,
    svc: ReconciliationService,
}

fn rig() -> Rig {
    let mut cfg = EngineConfig::default();
    cfg.mirror.retry_backoff_ms = 1;
    cfg.acknowledge.primary_backwrite_backoff_ms = 1;

    let primary = MemoryPrimaryStore::new();
    let durable = SlowDurable::default();
    let svc = ReconciliationService::new(
        cfg,
        Collaborators {
            primary: Arc::new(primary.clone()),
            durable: Arc::new(durable.clone()),
            sink: Arc::new(MemoryNotificationSink::new()),
            clock: Arc::new(ManualClock::new(NOW)),
        },
    );
    Rig {
        primary,
        durable,
        svc,
    }
}

fn node(category: &str, ts: i64) -> DocFields {
    match json!({
        "type": category,
        "message": format!("{category} detected"),
        "timestamp": ts,
        "sensorId": "hall",
        "isAcknowledged": false
    }) {
        Value::Object(m) => m,
        _ => unreachable!(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn acknowledge_during_mirror_of_same_occurrence_sticks() {
    let r = rig();
    r.primary.put_node("0", node("GAS_LEAK", NOW - 1_000)).await;
    r.svc.resync_all().await.unwrap();

    let docs = r.durable.inner.docs_with_origin("0");
    assert_eq!(docs.len(), 1);
    let id = docs[0].id.clone();

    // Second mirror of the same occurrence parks inside its origin lookup.
    r.durable.slow_queries(200);
    let svc = r.svc.clone();
    let resync = tokio::spawn(async move { svc.resync_all().await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    r.svc.acknowledge(&id).await.unwrap();
    let report = resync.await.unwrap().unwrap();
    assert_eq!(report.mirrored, 1);

    assert_eq!(
        r.durable.inner.doc(&id).unwrap()["isAcknowledged"],
        json!(true),
        "acknowledgement must survive the concurrent mirror"
    );
}

#[tokio::test]
async fn stop_waits_for_queued_mirror_writes() {
    let r = rig();
    r.svc.start().await.unwrap();

    r.durable.slow_sets(30);
    let keys = ["k1", "k2", "k3", "k4", "k5"];
    for (i, key) in keys.iter().enumerate() {
        r.primary
            .put_node(key, node("PROXIMITY", NOW - 10_000 + i as i64))
            .await;
    }
    // Let the listener hand every event to the worker; the first write is
    // still sleeping.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(r.durable.inner.len() < keys.len());

    r.svc.stop().await.unwrap();

    for key in keys {
        assert_eq!(
            r.durable.inner.docs_with_origin(key).len(),
            1,
            "queued key {key} was not mirrored before stop returned"
        );
    }
    assert_eq!(r.svc.sync_count(), keys.len() as u64);
}

#[tokio::test]
async fn observe_alerts_replays_each_recomputed_view() {
    let r = rig();
    let mut views = r.svc.observe_alerts();

    let initial = views.next().await.unwrap();
    assert!(initial.is_empty());

    r.svc.start().await.unwrap();

    r.primary.put_node("0", node("FIRE", NOW - 2_000)).await;
    let view = next_view_with(&mut views, 1).await;
    assert_eq!(view[0].logical_key.as_ref().unwrap().as_str(), "0");

    r.primary.put_node("door", node("DOOR_LEFT_OPEN", NOW - 1_000)).await;
    let view = next_view_with(&mut views, 2).await;
    let keys: Vec<&str> = view
        .iter()
        .map(|a| a.logical_key.as_ref().unwrap().as_str())
        .collect();
    assert_eq!(keys, vec!["door", "0"]);
    assert_eq!(view, r.svc.current_alerts());

    r.svc.stop().await.unwrap();
}

/// Pull views until one holds `n` alerts.
async fn next_view_with(
    views: &mut (impl futures_util::Stream<Item = Vec<hs_schemas::MergedAlert>> + Unpin),
    n: usize,
) -> Vec<hs_schemas::MergedAlert> {
    let pull = async {
        while let Some(view) = views.next().await {
            if view.len() == n {
                return view;
            }
        }
        panic!("alert stream ended");
    };
    tokio::time::timeout(Duration::from_secs(2), pull)
        .await
        .unwrap_or_else(|_| panic!("no view with {n} alerts within 2s"))
}
