//! In-process store and sink implementations.
//!
//! Used by the daemon when no database is configured, by the CLI replay
//! command, and by every scenario test. Each store supports fault injection
//! so failure paths can be driven deterministically.
//!
//! Locks are `std::sync::Mutex` and are never held across an `.await`:
//! deliveries are collected under the lock and sent after it is released.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use hs_ingest::{timestamp_of, DocFields};
use hs_schemas::{fields, MergedAlert};
use serde_json::Value;

use crate::{
    DurableDoc, DurableQuery, DurableStore, FeedSender, NotificationSink, PrimaryNode,
    PrimaryStore, SinkError, StoreError, Subscription, SubscriptionError,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panic while holding the lock cannot leave these maps half-updated in
    // a way later callers care about.
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn take_fault(counter: &mut u32) -> bool {
    if *counter > 0 {
        *counter -= 1;
        true
    } else {
        false
    }
}

// ---------------------------------------------------------------------------
// MemoryPrimaryStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct PrimaryInner {
    nodes: BTreeMap<String, DocFields>,
    subscribers: Vec<(u64, FeedSender<PrimaryNode>)>,
    next_sub: u64,
    fail_writes: u32,
    reject_subscribe: Option<SubscriptionError>,
}

/// In-memory primary store: `alerts/<key>` nodes with push delivery.
#[derive(Clone, Default)]
pub struct MemoryPrimaryStore {
    inner: Arc<Mutex<PrimaryInner>>,
}

impl MemoryPrimaryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Device write: replace node `key` and push it to every subscriber.
    pub async fn put_node(&self, key: &str, fields: DocFields) {
        let node = PrimaryNode {
            key: key.to_string(),
            fields: fields.clone(),
        };
        let targets = {
            let mut g = lock(&self.inner);
            g.nodes.insert(key.to_string(), fields);
            g.subscribers.clone()
        };
        self.deliver(targets, node).await;
    }

    pub fn node(&self, key: &str) -> Option<DocFields> {
        lock(&self.inner).nodes.get(key).cloned()
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner).subscribers.len()
    }

    /// The next `n` calls to `set_field` fail with `Unavailable`.
    pub fn fail_next_writes(&self, n: u32) {
        lock(&self.inner).fail_writes = n;
    }

    /// Refuse subscriptions with `err` until cleared with `None`.
    pub fn reject_subscriptions(&self, err: Option<SubscriptionError>) {
        lock(&self.inner).reject_subscribe = err;
    }

    /// Drop every subscriber after telling it why.
    pub async fn disconnect_all(&self, err: SubscriptionError) {
        let subs = std::mem::take(&mut lock(&self.inner).subscribers);
        for (_, tx) in subs {
            let _ = tx.send(Err(err.clone())).await;
        }
    }

    async fn deliver(&self, targets: Vec<(u64, FeedSender<PrimaryNode>)>, node: PrimaryNode) {
        let mut gone = Vec::new();
        for (id, tx) in targets {
            if tx.send(Ok(node.clone())).await.is_err() {
                gone.push(id);
            }
        }
        if !gone.is_empty() {
            lock(&self.inner)
                .subscribers
                .retain(|(id, _)| !gone.contains(id));
        }
    }
}

#[async_trait]
impl PrimaryStore for MemoryPrimaryStore {
    fn name(&self) -> &'static str {
        "memory-primary"
    }

    async fn subscribe(
        &self,
        tx: FeedSender<PrimaryNode>,
    ) -> Result<Subscription, SubscriptionError> {
        let (id, replay) = {
            let mut g = lock(&self.inner);
            if let Some(err) = g.reject_subscribe.clone() {
                return Err(err);
            }
            let id = g.next_sub;
            g.next_sub += 1;
            g.subscribers.push((id, tx.clone()));
            let replay: Vec<PrimaryNode> = g
                .nodes
                .iter()
                .map(|(k, f)| PrimaryNode {
                    key: k.clone(),
                    fields: f.clone(),
                })
                .collect();
            (id, replay)
        };

        for node in replay {
            if tx.send(Ok(node)).await.is_err() {
                break;
            }
        }

        let inner = Arc::clone(&self.inner);
        Ok(Subscription::new(
            format!("memory-primary#{id}"),
            move || {
                lock(&inner).subscribers.retain(|(sid, _)| *sid != id);
            },
        ))
    }

    async fn read_all(&self) -> Result<Vec<PrimaryNode>, StoreError> {
        Ok(lock(&self.inner)
            .nodes
            .iter()
            .map(|(k, f)| PrimaryNode {
                key: k.clone(),
                fields: f.clone(),
            })
            .collect())
    }

    async fn set_field(&self, key: &str, field: &str, value: Value) -> Result<(), StoreError> {
        let (targets, node) = {
            let mut g = lock(&self.inner);
            if take_fault(&mut g.fail_writes) {
                return Err(StoreError::Unavailable("injected primary write fault".into()));
            }
            let fields = g.nodes.get_mut(key).ok_or_else(|| StoreError::NotFound {
                id: key.to_string(),
            })?;
            fields.insert(field.to_string(), value);
            let node = PrimaryNode {
                key: key.to_string(),
                fields: fields.clone(),
            };
            (g.subscribers.clone(), node)
        };
        self.deliver(targets, node).await;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryDurableStore
// ---------------------------------------------------------------------------

struct DurableSub {
    id: u64,
    query: DurableQuery,
    tx: FeedSender<Vec<DurableDoc>>,
}

#[derive(Default)]
struct DurableInner {
    docs: HashMap<String, DocFields>,
    /// Insertion sequence per id; stable tie-break for equal timestamps.
    seq: HashMap<String, u64>,
    next_seq: u64,
    subscribers: Vec<DurableSub>,
    next_sub: u64,
    fail_writes: u32,
    fail_queries: u32,
    writes: u64,
    reject_subscribe: Option<SubscriptionError>,
}

impl DurableInner {
    fn run_query(&self, q: &DurableQuery) -> Vec<DurableDoc> {
        let mut rows: Vec<(&String, &DocFields)> = self
            .docs
            .iter()
            .filter(|(_, f)| match &q.origin_id {
                Some(origin) => f.get(fields::ORIGIN_ID).and_then(Value::as_str) == Some(origin),
                None => true,
            })
            .collect();
        rows.sort_by(|(a_id, a), (b_id, b)| {
            let ta = timestamp_of(a).unwrap_or(i64::MIN);
            let tb = timestamp_of(b).unwrap_or(i64::MIN);
            tb.cmp(&ta)
                .then_with(|| self.seq.get(*a_id).cmp(&self.seq.get(*b_id)))
        });
        rows.into_iter()
            .take(q.limit)
            .map(|(id, f)| DurableDoc {
                id: id.clone(),
                fields: f.clone(),
            })
            .collect()
    }

    fn write(&mut self, id: &str, fields: DocFields) -> Vec<Delivery> {
        if !self.seq.contains_key(id) {
            self.seq.insert(id.to_string(), self.next_seq);
            self.next_seq += 1;
        }
        self.docs.insert(id.to_string(), fields);
        self.writes += 1;
        self.subscribers
            .iter()
            .map(|s| Delivery {
                sub_id: s.id,
                tx: s.tx.clone(),
                snapshot: self.run_query(&s.query),
            })
            .collect()
    }
}

struct Delivery {
    sub_id: u64,
    tx: FeedSender<Vec<DurableDoc>>,
    snapshot: Vec<DurableDoc>,
}

/// In-memory durable document store with snapshot push.
#[derive(Clone, Default)]
pub struct MemoryDurableStore {
    inner: Arc<Mutex<DurableInner>>,
}

impl MemoryDurableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents.
    pub fn len(&self) -> usize {
        lock(&self.inner).docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Successful writes (`set` + `update`) since creation.
    pub fn write_count(&self) -> u64 {
        lock(&self.inner).writes
    }

    /// Every document whose `originalId` equals `origin`.
    pub fn docs_with_origin(&self, origin: &str) -> Vec<DurableDoc> {
        let g = lock(&self.inner);
        g.run_query(&DurableQuery {
            origin_id: Some(origin.to_string()),
            limit: usize::MAX,
        })
    }

    pub fn doc(&self, id: &str) -> Option<DocFields> {
        lock(&self.inner).docs.get(id).cloned()
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner).subscribers.len()
    }

    /// The next `n` calls to `set`/`update` fail with `Unavailable`.
    pub fn fail_next_writes(&self, n: u32) {
        lock(&self.inner).fail_writes = n;
    }

    /// The next `n` calls to `query` fail with `Unavailable`.
    pub fn fail_next_queries(&self, n: u32) {
        lock(&self.inner).fail_queries = n;
    }

    pub fn reject_subscriptions(&self, err: Option<SubscriptionError>) {
        lock(&self.inner).reject_subscribe = err;
    }

    pub async fn disconnect_all(&self, err: SubscriptionError) {
        let subs = std::mem::take(&mut lock(&self.inner).subscribers);
        for s in subs {
            let _ = s.tx.send(Err(err.clone())).await;
        }
    }

    async fn deliver(&self, deliveries: Vec<Delivery>) {
        let mut gone = Vec::new();
        for d in deliveries {
            if d.tx.send(Ok(d.snapshot)).await.is_err() {
                gone.push(d.sub_id);
            }
        }
        if !gone.is_empty() {
            lock(&self.inner)
                .subscribers
                .retain(|s| !gone.contains(&s.id));
        }
    }
}

#[async_trait]
impl DurableStore for MemoryDurableStore {
    fn name(&self) -> &'static str {
        "memory-durable"
    }

    async fn query(&self, query: &DurableQuery) -> Result<Vec<DurableDoc>, StoreError> {
        let mut g = lock(&self.inner);
        if take_fault(&mut g.fail_queries) {
            return Err(StoreError::Unavailable("injected durable query fault".into()));
        }
        Ok(g.run_query(query))
    }

    async fn get(&self, id: &str) -> Result<Option<DurableDoc>, StoreError> {
        Ok(lock(&self.inner).docs.get(id).map(|f| DurableDoc {
            id: id.to_string(),
            fields: f.clone(),
        }))
    }

    async fn set(&self, id: &str, fields: DocFields) -> Result<(), StoreError> {
        let deliveries = {
            let mut g = lock(&self.inner);
            if take_fault(&mut g.fail_writes) {
                return Err(StoreError::Unavailable("injected durable write fault".into()));
            }
            g.write(id, fields)
        };
        self.deliver(deliveries).await;
        Ok(())
    }

    async fn update(&self, id: &str, fields: DocFields) -> Result<(), StoreError> {
        let deliveries = {
            let mut g = lock(&self.inner);
            if take_fault(&mut g.fail_writes) {
                return Err(StoreError::Unavailable("injected durable write fault".into()));
            }
            let mut merged = g.docs.get(id).cloned().ok_or_else(|| StoreError::NotFound {
                id: id.to_string(),
            })?;
            merged.extend(fields);
            g.write(id, merged)
        };
        self.deliver(deliveries).await;
        Ok(())
    }

    async fn subscribe(
        &self,
        query: DurableQuery,
        tx: FeedSender<Vec<DurableDoc>>,
    ) -> Result<Subscription, SubscriptionError> {
        let (id, initial) = {
            let mut g = lock(&self.inner);
            if let Some(err) = g.reject_subscribe.clone() {
                return Err(err);
            }
            let id = g.next_sub;
            g.next_sub += 1;
            let initial = g.run_query(&query);
            g.subscribers.push(DurableSub {
                id,
                query,
                tx: tx.clone(),
            });
            (id, initial)
        };

        let _ = tx.send(Ok(initial)).await;

        let inner = Arc::clone(&self.inner);
        Ok(Subscription::new(
            format!("memory-durable#{id}"),
            move || {
                lock(&inner).subscribers.retain(|s| s.id != id);
            },
        ))
    }
}

// ---------------------------------------------------------------------------
// MemoryNotificationSink
// ---------------------------------------------------------------------------

#[derive(Default)]
struct SinkInner {
    notified: Vec<MergedAlert>,
    cleared: Vec<String>,
    clear_all_calls: usize,
    failing: bool,
}

/// Records every notification; optionally fails every call.
#[derive(Clone, Default)]
pub struct MemoryNotificationSink {
    inner: Arc<Mutex<SinkInner>>,
}

impl MemoryNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notified(&self) -> Vec<MergedAlert> {
        lock(&self.inner).notified.clone()
    }

    pub fn notified_ids(&self) -> Vec<String> {
        lock(&self.inner)
            .notified
            .iter()
            .map(|a| a.id.clone())
            .collect()
    }

    pub fn cleared(&self) -> Vec<String> {
        lock(&self.inner).cleared.clone()
    }

    pub fn clear_all_calls(&self) -> usize {
        lock(&self.inner).clear_all_calls
    }

    pub fn set_failing(&self, failing: bool) {
        lock(&self.inner).failing = failing;
    }
}

#[async_trait]
impl NotificationSink for MemoryNotificationSink {
    async fn notify(&self, alert: &MergedAlert) -> Result<(), SinkError> {
        let mut g = lock(&self.inner);
        if g.failing {
            return Err(SinkError("sink offline".into()));
        }
        g.notified.push(alert.clone());
        Ok(())
    }

    async fn clear(&self, alert_id: &str) -> Result<(), SinkError> {
        let mut g = lock(&self.inner);
        if g.failing {
            return Err(SinkError("sink offline".into()));
        }
        g.cleared.push(alert_id.to_string());
        Ok(())
    }

    async fn clear_all(&self) -> Result<(), SinkError> {
        let mut g = lock(&self.inner);
        if g.failing {
            return Err(SinkError("sink offline".into()));
        }
        g.clear_all_calls += 1;
        Ok(())
    }
}
