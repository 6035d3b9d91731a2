//! Shared runtime state for hs-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. The reconciliation
//! service owns its own tasks; this module only wires it to the SSE bus.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use hs_config::EngineConfig;
use hs_runtime::{Collaborators, ReconciliationService, SystemClock};
use hs_schemas::MergedAlert;
use hs_store::memory::{MemoryDurableStore, MemoryPrimaryStore};
use hs_store::DurableStore;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::api_types::StatusResponse;
use crate::sink::BusNotificationSink;

// ---------------------------------------------------------------------------
// BusMsg: SSE event bus payload
// ---------------------------------------------------------------------------

/// Messages broadcast over the internal event bus and surfaced as SSE events.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMsg {
    Heartbeat { ts_millis: i64 },
    /// Every new merged view.
    Alerts { alerts: Vec<MergedAlert> },
    Notify { alert: MergedAlert },
    Clear { id: String },
    ClearAll,
    Status(StatusResponse),
    LogLine { level: String, msg: String },
}

impl BusMsg {
    /// SSE `event:` name.
    pub fn event_name(&self) -> &'static str {
        match self {
            BusMsg::Heartbeat { .. } => "heartbeat",
            BusMsg::Alerts { .. } => "alerts",
            BusMsg::Notify { .. } => "notify",
            BusMsg::Clear { .. } | BusMsg::ClearAll => "clear",
            BusMsg::Status(_) => "status",
            BusMsg::LogLine { .. } => "log",
        }
    }
}

// ---------------------------------------------------------------------------
// BuildInfo
// ---------------------------------------------------------------------------

/// Static build metadata included in health / status responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

/// Cloneable (Arc) handle shared across all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Broadcast bus for SSE.
    pub bus: broadcast::Sender<BusMsg>,
    /// Static build metadata.
    pub build: BuildInfo,
    pub service: ReconciliationService,
    /// Device-facing primary store. `PUT /v1/primary/alerts/:key` writes here.
    pub primary: MemoryPrimaryStore,
    /// `memory-durable` or `postgres`.
    pub durable_store: &'static str,
    pub config_hash: String,
}

impl AppState {
    pub fn new(cfg: EngineConfig, config_hash: String, durable: Arc<dyn DurableStore>) -> Self {
        let (bus, _rx) = broadcast::channel::<BusMsg>(1024);
        let primary = MemoryPrimaryStore::new();
        let durable_store = durable.name();

        let service = ReconciliationService::new(
            cfg,
            Collaborators {
                primary: Arc::new(primary.clone()),
                durable,
                sink: Arc::new(BusNotificationSink::new(bus.clone())),
                clock: Arc::new(SystemClock),
            },
        );

        Self {
            bus,
            build: BuildInfo {
                service: "hs-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            service,
            primary,
            durable_store,
            config_hash,
        }
    }

    /// Both stores in memory. Used when no database is configured and by
    /// the route tests.
    pub fn in_memory(cfg: EngineConfig, config_hash: String) -> Self {
        Self::new(cfg, config_hash, Arc::new(MemoryDurableStore::new()))
    }

    pub fn status_snapshot(&self) -> StatusResponse {
        let s = self.service.status();
        StatusResponse {
            daemon_uptime_secs: uptime_secs(),
            state: s.state.to_string(),
            sync_count: s.sync_count,
            notifications_enabled: s.notifications_enabled,
            alert_count: s.alert_count,
            shown_count: s.shown_count,
            config_hash: self.config_hash.clone(),
            durable_store: self.durable_store.to_string(),
            last_error: s.last_error,
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Monotonically increasing uptime since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START
        .get_or_init(std::time::Instant::now)
        .elapsed()
        .as_secs()
}

/// Spawn a background task that emits a heartbeat SSE every `interval`.
pub fn spawn_heartbeat(bus: broadcast::Sender<BusMsg>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let ts = chrono::Utc::now().timestamp_millis();
            let _ = bus.send(BusMsg::Heartbeat { ts_millis: ts });
        }
    });
}

/// Forward every merged view published by the service onto the bus.
pub fn spawn_alert_forwarder(service: ReconciliationService, bus: broadcast::Sender<BusMsg>) {
    tokio::spawn(async move {
        let mut views = service.observe_alerts();
        while let Some(alerts) = views.next().await {
            let _ = bus.send(BusMsg::Alerts { alerts });
        }
    });
}
