//! hs-store
//!
//! Boundary to the two external stores and the notification collaborator.
//!
//! - [`PrimaryStore`]: low-latency key/event store. Push feed of alert nodes.
//! - [`DurableStore`]: queryable document store. Push feed of bounded,
//!   timestamp-ordered snapshots.
//! - [`NotificationSink`]: user-visible notification surface.
//! - [`IdempotentMirror`]: the single upsert path from a primary-feed event
//!   into the durable store.
//!
//! Push feeds are modelled as bounded `tokio::sync::mpsc` channels: the
//! caller creates the channel, starts its consumer, then hands the sender to
//! `subscribe`. Each item is either data or a terminal [`SubscriptionError`].

pub mod error;
pub mod memory;
pub mod mirror;
pub mod subscription;

pub use error::{SinkError, StoreError, SubscriptionError};
pub use mirror::{IdempotentMirror, MirrorError, MirrorOutcome, MirrorStage};
pub use subscription::Subscription;

use async_trait::async_trait;
use hs_ingest::DocFields;
use hs_schemas::{LogicalKey, MergedAlert};
use serde_json::Value;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Feed payloads
// ---------------------------------------------------------------------------

/// One item on a push feed: data, or the error that ended the feed.
pub type FeedItem<T> = Result<T, SubscriptionError>;

/// Sending half handed to `subscribe`.
pub type FeedSender<T> = mpsc::Sender<FeedItem<T>>;

/// An alert node on the primary store (`alerts/<key>`).
#[derive(Clone, Debug, PartialEq)]
pub struct PrimaryNode {
    pub key: String,
    pub fields: DocFields,
}

/// A document in the durable store.
#[derive(Clone, Debug, PartialEq)]
pub struct DurableDoc {
    pub id: String,
    pub fields: DocFields,
}

/// Durable-store query. Results are always ordered by `timestamp`
/// descending; documents without a timestamp sort last.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DurableQuery {
    /// Equality filter on `originalId`.
    pub origin_id: Option<String>,
    pub limit: usize,
}

impl DurableQuery {
    /// The most recent `limit` documents.
    pub fn recent(limit: usize) -> Self {
        Self {
            origin_id: None,
            limit,
        }
    }

    /// At most one document mirrored from `key`.
    pub fn by_origin(key: &LogicalKey) -> Self {
        Self {
            origin_id: Some(key.as_str().to_string()),
            limit: 1,
        }
    }
}

// ---------------------------------------------------------------------------
// Collaborator contracts
// ---------------------------------------------------------------------------

/// Low-latency key/event store carrying live alerts from field devices.
///
/// Delivery is at-least-once with no ordering guarantee across keys. A new
/// subscriber first receives every current node, then one item per write.
#[async_trait]
pub trait PrimaryStore: Send + Sync {
    fn name(&self) -> &'static str;

    async fn subscribe(
        &self,
        tx: FeedSender<PrimaryNode>,
    ) -> Result<Subscription, SubscriptionError>;

    /// One-shot read of every alert node (manual resync).
    async fn read_all(&self) -> Result<Vec<PrimaryNode>, StoreError>;

    /// Write a single field of an existing node (`alerts/<key>/<field>`).
    async fn set_field(&self, key: &str, field: &str, value: Value) -> Result<(), StoreError>;
}

/// Durable, queryable document store.
#[async_trait]
pub trait DurableStore: Send + Sync {
    fn name(&self) -> &'static str;

    async fn query(&self, query: &DurableQuery) -> Result<Vec<DurableDoc>, StoreError>;

    async fn get(&self, id: &str) -> Result<Option<DurableDoc>, StoreError>;

    /// Create or fully overwrite document `id`.
    async fn set(&self, id: &str, fields: DocFields) -> Result<(), StoreError>;

    /// Merge `fields` into existing document `id`. `NotFound` if absent.
    async fn update(&self, id: &str, fields: DocFields) -> Result<(), StoreError>;

    /// Push a snapshot of `query` now and after every change.
    async fn subscribe(
        &self,
        query: DurableQuery,
        tx: FeedSender<Vec<DurableDoc>>,
    ) -> Result<Subscription, SubscriptionError>;
}

/// User-visible notification surface. Fire-and-forget.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, alert: &MergedAlert) -> Result<(), SinkError>;

    async fn clear(&self, alert_id: &str) -> Result<(), SinkError>;

    async fn clear_all(&self) -> Result<(), SinkError> {
        Ok(())
    }
}
