//! Idempotent upsert of primary-feed events into the durable store.
//!
//! The durable identity of a mirrored alert is looked up by its LogicalKey
//! (`originalId`), never derived from it: legacy documents created before
//! provenance was recorded keep their ids, and a repeated delivery of the
//! same key overwrites the one document already holding it.

use std::fmt;
use std::sync::Arc;

use hs_ingest::{record_fields, timestamp_of};
use hs_schemas::{fields, DurableRecord, Event, LogicalKey};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::{DurableQuery, DurableStore, StoreError};

/// What a successful mirror did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MirrorOutcome {
    Created { id: String, key: LogicalKey },
    Updated { id: String, key: LogicalKey },
}

impl MirrorOutcome {
    pub fn id(&self) -> &str {
        match self {
            MirrorOutcome::Created { id, .. } | MirrorOutcome::Updated { id, .. } => id,
        }
    }

    pub fn key(&self) -> &LogicalKey {
        match self {
            MirrorOutcome::Created { key, .. } | MirrorOutcome::Updated { key, .. } => key,
        }
    }
}

/// Which step of the upsert failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MirrorStage {
    Lookup,
    Write,
}

/// Mirror failed; retrying with the same event is safe.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MirrorError {
    pub key: LogicalKey,
    pub stage: MirrorStage,
    pub source: StoreError,
}

impl MirrorError {
    pub fn is_transient(&self) -> bool {
        self.source.is_transient()
    }
}

impl fmt::Display for MirrorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self.stage {
            MirrorStage::Lookup => "lookup",
            MirrorStage::Write => "write",
        };
        write!(f, "mirror of key '{}' failed at {stage}: {}", self.key, self.source)
    }
}

impl std::error::Error for MirrorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Upserts events into a durable store keyed by LogicalKey.
#[derive(Clone)]
pub struct IdempotentMirror {
    store: Arc<dyn DurableStore>,
}

impl IdempotentMirror {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self { store }
    }

    /// One lookup plus exactly one durable write. The event's timestamp is
    /// written as given; normalize before calling.
    pub async fn mirror(&self, event: &Event) -> Result<MirrorOutcome, MirrorError> {
        let key = event.logical_key();

        let existing = self
            .store
            .query(&DurableQuery::by_origin(&key))
            .await
            .map_err(|source| MirrorError {
                key: key.clone(),
                stage: MirrorStage::Lookup,
                source,
            })?;

        let (id, created, keep_ack) = match existing.into_iter().next() {
            Some(doc) => {
                let keep = stored_ack_survives(&doc.fields, event.timestamp_millis);
                (doc.id, false, keep)
            }
            None => (Uuid::new_v4().to_string(), true, false),
        };

        let mut record = DurableRecord::from_event(id.clone(), event, key.clone());
        record.acknowledged |= keep_ack;

        self.store
            .set(&id, record_fields(&record))
            .await
            .map_err(|source| MirrorError {
                key: key.clone(),
                stage: MirrorStage::Write,
                source,
            })?;

        debug!(
            key = %key,
            id = %id,
            created,
            ts = record.timestamp_millis,
            "mirrored alert into durable store"
        );

        Ok(if created {
            MirrorOutcome::Created { id, key }
        } else {
            MirrorOutcome::Updated { id, key }
        })
    }
}

/// A stored acknowledgement carries over unless the incoming occurrence is
/// strictly newer than the one acknowledged.
fn stored_ack_survives(stored: &hs_ingest::DocFields, incoming_ts: i64) -> bool {
    let acked = stored
        .get(fields::ACKNOWLEDGED)
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if !acked {
        return false;
    }
    match timestamp_of(stored) {
        Some(stored_ts) => incoming_ts <= stored_ts,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryDurableStore;
    use hs_schemas::AlertCategory;
    use serde_json::json;

    fn gas_event(source_id: Option<&str>, ts: i64) -> Event {
        Event {
            id: Uuid::new_v4(),
            source_id: source_id.map(str::to_string),
            category: AlertCategory::GasLeak,
            message: "High gas levels detected in Kitchen".to_string(),
            sensor_id: "gas1".to_string(),
            timestamp_millis: ts,
            acknowledged: false,
        }
    }

    fn mirror_over(store: &MemoryDurableStore) -> IdempotentMirror {
        IdempotentMirror::new(Arc::new(store.clone()))
    }

    #[tokio::test]
    async fn mirroring_twice_yields_one_record_and_updated() {
        let store = MemoryDurableStore::new();
        let m = mirror_over(&store);

        let first = m.mirror(&gas_event(Some("0"), 1_000)).await.unwrap();
        assert!(matches!(first, MirrorOutcome::Created { .. }));

        let second = m.mirror(&gas_event(Some("0"), 2_000)).await.unwrap();
        assert!(matches!(second, MirrorOutcome::Updated { .. }));
        assert_eq!(first.id(), second.id());

        let docs = store.docs_with_origin("0");
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].fields["timestamp"], json!(2_000));
        assert_eq!(docs[0].fields["originalId"], json!("0"));
        assert_eq!(store.write_count(), 2);
    }

    #[tokio::test]
    async fn distinct_keys_create_distinct_records() {
        let store = MemoryDurableStore::new();
        let m = mirror_over(&store);
        m.mirror(&gas_event(Some("0"), 1)).await.unwrap();
        m.mirror(&gas_event(Some("1"), 1)).await.unwrap();
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn keyless_event_uses_generated_id_as_key() {
        let store = MemoryDurableStore::new();
        let m = mirror_over(&store);
        let e = gas_event(None, 5);
        let out = m.mirror(&e).await.unwrap();
        assert_eq!(out.key().as_str(), e.id.to_string());
    }

    #[tokio::test]
    async fn acknowledgement_survives_redelivery_of_same_occurrence() {
        let store = MemoryDurableStore::new();
        let m = mirror_over(&store);
        let out = m.mirror(&gas_event(Some("0"), 1_000)).await.unwrap();

        let mut ack = hs_ingest::DocFields::new();
        ack.insert("isAcknowledged".into(), json!(true));
        store.update(out.id(), ack).await.unwrap();

        m.mirror(&gas_event(Some("0"), 1_000)).await.unwrap();
        assert_eq!(store.doc(out.id()).unwrap()["isAcknowledged"], json!(true));

        // A strictly newer occurrence starts unacknowledged.
        m.mirror(&gas_event(Some("0"), 1_001)).await.unwrap();
        assert_eq!(store.doc(out.id()).unwrap()["isAcknowledged"], json!(false));
    }

    #[tokio::test]
    async fn failures_report_stage_and_are_retry_safe() {
        let store = MemoryDurableStore::new();
        let m = mirror_over(&store);

        store.fail_next_queries(1);
        let err = m.mirror(&gas_event(Some("0"), 1)).await.unwrap_err();
        assert_eq!(err.stage, MirrorStage::Lookup);
        assert!(err.is_transient());
        assert!(store.is_empty());

        store.fail_next_writes(1);
        let err = m.mirror(&gas_event(Some("0"), 1)).await.unwrap_err();
        assert_eq!(err.stage, MirrorStage::Write);
        assert_eq!(err.key.as_str(), "0");

        m.mirror(&gas_event(Some("0"), 1)).await.unwrap();
        assert_eq!(store.len(), 1);
    }
}
