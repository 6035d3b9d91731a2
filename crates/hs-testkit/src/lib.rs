//! hs-testkit
//!
//! In-process harness: a [`ReconciliationService`] wired to in-memory stores,
//! a recording notification sink and a manual clock. Used by the scenario
//! tests and by `hs replay`.

use std::sync::Arc;
use std::time::Duration;

use hs_config::EngineConfig;
use hs_ingest::DocFields;
use hs_runtime::{Collaborators, ManualClock, ReconciliationService};
use hs_schemas::MergedAlert;
use hs_store::memory::{MemoryDurableStore, MemoryNotificationSink, MemoryPrimaryStore};
use serde_json::{json, Value};

mod replay;

pub use replay::{load_replay_jsonl, parse_replay_jsonl, run_replay, ReplayReport, ReplayStep};

/// 2025-10-09T08:53:20Z; far enough past 2020 that every heuristic branch is
/// distinguishable.
pub const DEFAULT_NOW: i64 = 1_760_000_000_000;

/// Default config with retry backoffs shrunk to keep tests fast.
pub fn fast_config() -> EngineConfig {
    let mut cfg = EngineConfig::default();
    cfg.mirror.retry_backoff_ms = 1;
    cfg.acknowledge.primary_backwrite_backoff_ms = 1;
    cfg
}

pub struct Harness {
    pub primary: MemoryPrimaryStore,
    pub durable: MemoryDurableStore,
    pub sink: MemoryNotificationSink,
    pub clock: Arc<ManualClock>,
    pub service: ReconciliationService,
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(fast_config())
    }

    pub fn with_config(cfg: EngineConfig) -> Self {
        Self::with_config_at(cfg, DEFAULT_NOW)
    }

    pub fn with_config_at(cfg: EngineConfig, now: i64) -> Self {
        let primary = MemoryPrimaryStore::new();
        let durable = MemoryDurableStore::new();
        let sink = MemoryNotificationSink::new();
        let clock = Arc::new(ManualClock::new(now));
        let service = ReconciliationService::new(
            cfg,
            Collaborators {
                primary: Arc::new(primary.clone()),
                durable: Arc::new(durable.clone()),
                sink: Arc::new(sink.clone()),
                clock: clock.clone(),
            },
        );
        Self {
            primary,
            durable,
            sink,
            clock,
            service,
        }
    }

    /// A field device writes `alerts/<key>`.
    pub async fn device_write(&self, key: &str, doc: Value) {
        let fields: DocFields = match doc {
            Value::Object(m) => m,
            other => panic!("device_write expects an object, got {other}"),
        };
        self.primary.put_node(key, fields).await;
    }

    /// The merged alert currently shown for `key`, if any.
    pub fn alert_for_key(&self, key: &str) -> Option<MergedAlert> {
        self.service
            .current_alerts()
            .into_iter()
            .find(|a| a.logical_key.as_ref().map(|k| k.as_str()) == Some(key))
    }

    /// Wait until the service has been quiet for a few polls: no new
    /// mirrors, durable writes, notifications or view changes.
    pub async fn settle(&self) {
        let mut last = self.fingerprint();
        let mut stable = 0;
        for _ in 0..400 {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let now = self.fingerprint();
            if now == last {
                stable += 1;
                if stable >= 4 {
                    return;
                }
            } else {
                stable = 0;
                last = now;
            }
        }
    }

    fn fingerprint(&self) -> (u64, u64, usize, usize, Vec<MergedAlert>) {
        (
            self.service.sync_count(),
            self.durable.write_count(),
            self.sink.notified().len(),
            self.sink.cleared().len(),
            self.service.current_alerts(),
        )
    }
}

/// Poll `cond` every 10ms until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// The document the gas sensor firmware writes to `alerts/0`.
pub fn gas_leak_doc(sensor_id: &str, timestamp: i64) -> Value {
    json!({
        "type": "GAS_LEAK",
        "message": format!("High gas levels detected by {sensor_id}"),
        "timestamp": timestamp,
        "sensorId": sensor_id,
        "isAcknowledged": false
    })
}

pub fn alert_doc(category: &str, sensor_id: &str, timestamp: i64) -> Value {
    json!({
        "type": category,
        "message": format!("{category} from {sensor_id}"),
        "timestamp": timestamp,
        "sensorId": sensor_id,
        "isAcknowledged": false
    })
}
