//! ReconciliationService: lifecycle, feed listeners, mirror worker.
//!
//! Lifecycle: `Stopped -> Starting -> Running -> Stopped`. A feed error while
//! running is terminal: the service records it, tears both feeds down and
//! stays `Stopped` until an operator starts it again.
//!
//! Locking:
//! - `notify` (std mutex) guards throttle, evaluated set and the enabled
//!   flag. Never held across an `.await`.
//! - `run` (tokio mutex) serialises start/stop/teardown and owns the task
//!   handles. Held across awaits by those operations only.
//! - `mirror_gate` (tokio mutex) makes every mirror call exclusive, so a
//!   manual resync cannot race the worker on the same key. The durable
//!   acknowledgement write takes it too.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use hs_config::EngineConfig;
use hs_ingest::{
    classify_timestamp, local_alert_fields, normalize_timestamp, parse_durable_doc,
    parse_primary_node, DocFields, TimestampClass,
};
use hs_reconcile::{AlertDeduplicator, NotificationThrottle, ThrottleDecision};
use hs_schemas::{fields, Event, MergedAlert, NewLocalAlert};
use hs_store::{
    DurableDoc, DurableQuery, DurableStore, FeedItem, IdempotentMirror, MirrorError,
    MirrorOutcome, NotificationSink, PrimaryNode, PrimaryStore, StoreError, Subscription,
    SubscriptionError,
};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{Clock, ServiceError};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    Stopped,
    Starting,
    Running,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ServiceState::Stopped => "stopped",
            ServiceState::Starting => "starting",
            ServiceState::Running => "running",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedKind {
    Primary,
    Durable,
}

impl fmt::Display for FeedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FeedKind::Primary => "primary",
            FeedKind::Durable => "durable",
        })
    }
}

/// Outcome of [`ReconciliationService::resync_all`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ResyncReport {
    pub mirrored: u64,
    /// Malformed or unwatched nodes.
    pub skipped: u64,
    pub failed: u64,
}

/// Point-in-time view for operators.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ServiceStatus {
    pub state: ServiceState,
    pub sync_count: u64,
    pub notifications_enabled: bool,
    pub alert_count: usize,
    pub shown_count: usize,
    pub last_error: Option<String>,
}

/// External collaborators, injected at construction.
#[derive(Clone)]
pub struct Collaborators {
    pub primary: Arc<dyn PrimaryStore>,
    pub durable: Arc<dyn DurableStore>,
    pub sink: Arc<dyn NotificationSink>,
    pub clock: Arc<dyn Clock>,
}

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

struct NotifyState {
    throttle: NotificationThrottle,
    /// `(id, timestamp)` of every alert already run through the throttle.
    evaluated: HashSet<(String, i64)>,
    enabled: bool,
}

struct RunHandles {
    generation: u64,
    shutdown_tx: watch::Sender<bool>,
    primary_sub: Option<Subscription>,
    durable_sub: Option<Subscription>,
    primary_task: JoinHandle<()>,
    durable_task: JoinHandle<()>,
    mirror_task: JoinHandle<()>,
}

impl RunHandles {
    /// Stop listeners, unsubscribe, then let the worker drain and exit.
    async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(s) = self.primary_sub {
            s.cancel();
        }
        if let Some(s) = self.durable_sub {
            s.cancel();
        }
        for (name, task) in [
            ("primary listener", self.primary_task),
            ("durable listener", self.durable_task),
            // Exits once the primary listener has dropped the queue sender.
            ("mirror worker", self.mirror_task),
        ] {
            if let Err(e) = task.await {
                warn!(task = name, error = %e, "task ended abnormally");
            }
        }
    }
}

struct Inner {
    cfg: EngineConfig,
    primary: Arc<dyn PrimaryStore>,
    durable: Arc<dyn DurableStore>,
    sink: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    mirror: IdempotentMirror,
    mirror_gate: tokio::sync::Mutex<()>,
    dedupe: AlertDeduplicator,
    notify: Mutex<NotifyState>,
    alerts_tx: watch::Sender<Vec<MergedAlert>>,
    state_tx: watch::Sender<ServiceState>,
    sync_count: AtomicU64,
    last_error: Mutex<Option<String>>,
    run: tokio::sync::Mutex<Option<RunHandles>>,
    /// Incremented by every `start`; tags listeners so a stale one cannot
    /// tear down a newer run.
    generation: AtomicU64,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// ReconciliationService
// ---------------------------------------------------------------------------

/// Cloneable handle; every clone drives the same service.
#[derive(Clone)]
pub struct ReconciliationService {
    inner: Arc<Inner>,
}

impl ReconciliationService {
    pub fn new(cfg: EngineConfig, deps: Collaborators) -> Self {
        let (alerts_tx, _) = watch::channel(Vec::new());
        let (state_tx, _) = watch::channel(ServiceState::Stopped);
        let notify = NotifyState {
            throttle: NotificationThrottle::new(cfg.notifications.throttle_window_ms),
            evaluated: HashSet::new(),
            enabled: cfg.notifications.enabled,
        };
        let inner = Inner {
            mirror: IdempotentMirror::new(Arc::clone(&deps.durable)),
            mirror_gate: tokio::sync::Mutex::new(()),
            dedupe: AlertDeduplicator::new(cfg.primary.sentinel_key.clone()),
            notify: Mutex::new(notify),
            alerts_tx,
            state_tx,
            sync_count: AtomicU64::new(0),
            last_error: Mutex::new(None),
            run: tokio::sync::Mutex::new(None),
            generation: AtomicU64::new(0),
            primary: deps.primary,
            durable: deps.durable,
            sink: deps.sink,
            clock: deps.clock,
            cfg,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.cfg
    }

    // -- lifecycle ----------------------------------------------------------

    /// Subscribe both feeds and start the listeners. Only from `Stopped`.
    pub async fn start(&self) -> Result<(), ServiceError> {
        let inner = &self.inner;
        let mut run = inner.run.lock().await;

        let state = *inner.state_tx.borrow();
        if state != ServiceState::Stopped {
            return Err(ServiceError::InvalidState { op: "start", state });
        }
        // Left behind by a feed failure whose teardown has not run yet.
        if let Some(stale) = run.take() {
            stale.shutdown().await;
        }

        inner.state_tx.send_replace(ServiceState::Starting);
        *lock(&inner.last_error) = None;
        info!("reconciliation service starting");

        let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // Consumers first, then subscriptions: nothing delivered is lost.
        let (queue_tx, queue_rx) = mpsc::channel(inner.cfg.mirror.queue_capacity);
        let mirror_task = tokio::spawn(run_mirror_worker(Arc::clone(inner), queue_rx));

        let (primary_tx, primary_rx) = mpsc::channel(inner.cfg.primary.feed_buffer);
        let primary_task = tokio::spawn(run_primary_listener(
            Arc::clone(inner),
            primary_rx,
            queue_tx,
            shutdown_rx.clone(),
            generation,
        ));

        let (durable_tx, durable_rx) = mpsc::channel(inner.cfg.durable.feed_buffer);
        let durable_task = tokio::spawn(run_durable_listener(
            Arc::clone(inner),
            durable_rx,
            shutdown_rx,
            generation,
        ));

        let mut handles = RunHandles {
            generation,
            shutdown_tx,
            primary_sub: None,
            durable_sub: None,
            primary_task,
            durable_task,
            mirror_task,
        };

        match inner.primary.subscribe(primary_tx).await {
            Ok(sub) => handles.primary_sub = Some(sub),
            Err(e) => return Err(inner.abort_start(FeedKind::Primary, e, handles).await),
        }

        let query = DurableQuery::recent(inner.cfg.durable.feed_limit);
        match inner.durable.subscribe(query, durable_tx).await {
            Ok(sub) => handles.durable_sub = Some(sub),
            Err(e) => return Err(inner.abort_start(FeedKind::Durable, e, handles).await),
        }

        *run = Some(handles);

        // A feed may already have failed while we were subscribing.
        let promoted = inner.state_tx.send_if_modified(|s| {
            if *s == ServiceState::Starting {
                *s = ServiceState::Running;
                true
            } else {
                false
            }
        });
        if !promoted {
            let msg = lock(&inner.last_error).clone().unwrap_or_default();
            return Err(ServiceError::Subscription(SubscriptionError::Disconnected(msg)));
        }

        info!(
            primary = inner.primary.name(),
            durable = inner.durable.name(),
            "reconciliation service running"
        );
        Ok(())
    }

    /// Unsubscribe both feeds and wait for in-flight mirrors. No-op when
    /// already stopped.
    pub async fn stop(&self) -> Result<(), ServiceError> {
        let inner = &self.inner;
        let mut run = inner.run.lock().await;
        if let Some(handles) = run.take() {
            handles.shutdown().await;
            info!("reconciliation service stopped");
        }
        inner.state_tx.send_replace(ServiceState::Stopped);
        Ok(())
    }

    pub fn state(&self) -> ServiceState {
        *self.inner.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ServiceState> {
        self.inner.state_tx.subscribe()
    }

    /// Why the service last left `Running` on its own, if it did.
    pub fn last_error(&self) -> Option<String> {
        lock(&self.inner.last_error).clone()
    }

    // -- merged view --------------------------------------------------------

    pub fn observe_alerts(&self) -> WatchStream<Vec<MergedAlert>> {
        WatchStream::new(self.inner.alerts_tx.subscribe())
    }

    pub fn subscribe_alerts(&self) -> watch::Receiver<Vec<MergedAlert>> {
        self.inner.alerts_tx.subscribe()
    }

    pub fn current_alerts(&self) -> Vec<MergedAlert> {
        self.inner.alerts_tx.borrow().clone()
    }

    /// Successful mirrors since construction.
    pub fn sync_count(&self) -> u64 {
        self.inner.sync_count.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> ServiceStatus {
        let (enabled, shown) = {
            let g = lock(&self.inner.notify);
            (g.enabled, g.throttle.shown_count())
        };
        ServiceStatus {
            state: self.state(),
            sync_count: self.sync_count(),
            notifications_enabled: enabled,
            alert_count: self.inner.alerts_tx.borrow().len(),
            shown_count: shown,
            last_error: self.last_error(),
        }
    }

    // -- commands -----------------------------------------------------------

    /// Mark an alert acknowledged in the durable store, then best-effort on
    /// the primary node it came from, then clear its notification.
    pub async fn acknowledge(&self, alert_id: &str) -> Result<(), ServiceError> {
        let inner = &self.inner;

        let mut patch = DocFields::new();
        patch.insert(fields::ACKNOWLEDGED.to_string(), Value::Bool(true));
        {
            // A mirror between its lookup and its write would overwrite the flag.
            let _gate = inner.mirror_gate.lock().await;
            inner.durable.update(alert_id, patch).await?;
        }
        info!(id = alert_id, "alert acknowledged");

        let origin = match inner.durable.get(alert_id).await {
            Ok(Some(doc)) => origin_of(&doc),
            Ok(None) => None,
            Err(e) => {
                warn!(id = alert_id, error = %e, "could not read back acknowledged alert");
                None
            }
        };
        if let Some(key) = origin {
            tokio::spawn(backwrite_acknowledged(Arc::clone(inner), key));
        }

        lock(&inner.notify).throttle.acknowledge(alert_id);
        if let Err(e) = inner.sink.clear(alert_id).await {
            warn!(id = alert_id, error = %e, "notification clear failed");
        }
        Ok(())
    }

    /// Mirror every current primary node. Allowed in any state.
    pub async fn resync_all(&self) -> Result<ResyncReport, ServiceError> {
        let inner = &self.inner;
        let nodes = inner.primary.read_all().await?;
        let mut report = ResyncReport::default();
        for node in &nodes {
            let Some(event) = inner.prepare_event(node) else {
                report.skipped += 1;
                continue;
            };
            match inner.mirror_with_retry(&event).await {
                Ok(_) => report.mirrored += 1,
                Err(_) => report.failed += 1,
            }
        }
        info!(
            mirrored = report.mirrored,
            skipped = report.skipped,
            failed = report.failed,
            "manual resync finished"
        );
        Ok(report)
    }

    /// Write an alert raised locally (door, NFC) straight to the durable
    /// store. It carries no provenance. Returns the new id.
    pub async fn record_local_alert(&self, alert: NewLocalAlert) -> Result<String, ServiceError> {
        let inner = &self.inner;
        let now = inner.clock.now_millis();
        let ts = alert
            .timestamp_millis
            .map(|raw| normalize_timestamp(raw, now))
            .unwrap_or(now);
        let id = Uuid::new_v4().to_string();
        inner.durable.set(&id, local_alert_fields(&alert, ts)).await?;
        info!(id = %id, category = %alert.category, "local alert recorded");
        Ok(id)
    }

    pub fn set_notifications_enabled(&self, enabled: bool) {
        lock(&self.inner.notify).enabled = enabled;
        info!(enabled, "notification preference changed");
    }

    pub fn notifications_enabled(&self) -> bool {
        lock(&self.inner.notify).enabled
    }

    /// Forget every shown notification and clear them from the sink.
    pub async fn clear_all_notifications(&self) {
        lock(&self.inner.notify).throttle.clear_all();
        if let Err(e) = self.inner.sink.clear_all().await {
            warn!(error = %e, "notification clear-all failed");
        }
    }
}

fn origin_of(doc: &DurableDoc) -> Option<String> {
    doc.fields
        .get(fields::ORIGIN_ID)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

// ---------------------------------------------------------------------------
// Inner: shared by the handle and the spawned tasks
// ---------------------------------------------------------------------------

impl Inner {
    async fn abort_start(
        &self,
        feed: FeedKind,
        err: SubscriptionError,
        handles: RunHandles,
    ) -> ServiceError {
        error!(feed = %feed, error = %err, "feed subscription failed; service not started");
        handles.shutdown().await;
        *lock(&self.last_error) = Some(format!("{feed} feed: {err}"));
        self.state_tx.send_replace(ServiceState::Stopped);
        ServiceError::Subscription(err)
    }

    /// Terminal feed failure seen by a listener.
    fn feed_lost(self: &Arc<Self>, generation: u64, feed: FeedKind, err: SubscriptionError) {
        if self.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        error!(feed = %feed, error = %err, "feed lost; stopping service");
        *lock(&self.last_error) = Some(format!("{feed} feed: {err}"));
        self.state_tx.send_replace(ServiceState::Stopped);

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let handles = {
                let mut run = inner.run.lock().await;
                match run.as_ref() {
                    Some(h) if h.generation == generation => run.take(),
                    _ => None,
                }
            };
            if let Some(h) = handles {
                h.shutdown().await;
            }
        });
    }

    /// Parse, filter and normalize one primary node. `None` = skip.
    fn prepare_event(&self, node: &PrimaryNode) -> Option<Event> {
        let watch = &self.cfg.primary.watch_keys;
        if !watch.is_empty() && !watch.iter().any(|k| k == &node.key) {
            debug!(key = %node.key, "primary key not watched");
            return None;
        }

        let now = self.clock.now_millis();
        let mut event = match parse_primary_node(&node.key, &node.fields, now) {
            Ok(e) => e,
            Err(e) => {
                warn!(key = %node.key, error = %e, "skipping malformed primary node");
                return None;
            }
        };

        let raw = event.timestamp_millis;
        event.timestamp_millis = normalize_timestamp(raw, now);
        match classify_timestamp(raw) {
            TimestampClass::Plausible => {}
            class => debug!(
                key = %node.key,
                raw,
                normalized = event.timestamp_millis,
                ?class,
                "device timestamp corrected"
            ),
        }
        Some(event)
    }

    async fn mirror_with_retry(&self, event: &Event) -> Result<MirrorOutcome, MirrorError> {
        let attempts = self.cfg.mirror.max_attempts.max(1);
        let backoff = Duration::from_millis(self.cfg.mirror.retry_backoff_ms);
        let mut attempt = 1;
        loop {
            let result = {
                let _gate = self.mirror_gate.lock().await;
                self.mirror.mirror(event).await
            };
            match result {
                Ok(outcome) => {
                    self.sync_count.fetch_add(1, Ordering::SeqCst);
                    return Ok(outcome);
                }
                Err(e) if e.is_transient() && attempt < attempts => {
                    warn!(key = %e.key, attempt, error = %e, "mirror failed; retrying");
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(key = %e.key, attempt, error = %e, "mirror failed; giving up");
                    return Err(e);
                }
            }
        }
    }

    /// Parse, dedupe, publish, then decide notifications for one snapshot.
    async fn on_snapshot(&self, docs: Vec<DurableDoc>) {
        let now = self.clock.now_millis();
        let candidates: Vec<MergedAlert> = docs
            .iter()
            .filter_map(|d| match parse_durable_doc(&d.id, &d.fields, now) {
                Ok(r) => Some(MergedAlert::from(r)),
                Err(e) => {
                    warn!(id = %d.id, error = %e, "skipping malformed durable document");
                    None
                }
            })
            .collect();

        let merged = self.dedupe.dedupe(candidates);
        self.alerts_tx.send_replace(merged.clone());

        let due: Vec<MergedAlert> = {
            let mut g = lock(&self.notify);
            // Acknowledged elsewhere (another client, the device itself).
            for alert in merged.iter().filter(|a| a.acknowledged) {
                if g.throttle.acknowledge(&alert.id) {
                    debug!(id = %alert.id, "acknowledgement observed on durable feed");
                }
            }
            if !g.enabled {
                Vec::new()
            } else {
                let present: HashSet<(String, i64)> = merged
                    .iter()
                    .map(|a| (a.id.clone(), a.timestamp_millis))
                    .collect();
                g.evaluated.retain(|k| present.contains(k));

                let mut due = Vec::new();
                for alert in merged.iter().filter(|a| !a.acknowledged) {
                    if !g.evaluated.insert((alert.id.clone(), alert.timestamp_millis)) {
                        continue;
                    }
                    match g.throttle.decide(alert, now) {
                        ThrottleDecision::Notify => due.push(alert.clone()),
                        other => debug!(id = %alert.id, decision = ?other, "notification suppressed"),
                    }
                }
                due
            }
        };

        for alert in &due {
            match self.sink.notify(alert).await {
                Ok(()) => info!(id = %alert.id, category = %alert.category, "notification shown"),
                Err(e) => warn!(id = %alert.id, error = %e, "notification delivery failed"),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

async fn run_primary_listener(
    inner: Arc<Inner>,
    mut rx: mpsc::Receiver<FeedItem<PrimaryNode>>,
    queue: mpsc::Sender<Event>,
    mut shutdown_rx: watch::Receiver<bool>,
    generation: u64,
) {
    loop {
        let item = tokio::select! {
            biased;
            _ = shutdown_rx.changed() => return,
            item = rx.recv() => item,
        };
        match item {
            Some(Ok(node)) => {
                let Some(event) = inner.prepare_event(&node) else {
                    continue;
                };
                if queue.send(event).await.is_err() {
                    return;
                }
            }
            Some(Err(e)) => {
                if !*shutdown_rx.borrow() {
                    inner.feed_lost(generation, FeedKind::Primary, e);
                }
                return;
            }
            None => {
                if !*shutdown_rx.borrow() {
                    inner.feed_lost(generation, FeedKind::Primary, SubscriptionError::Closed);
                }
                return;
            }
        }
    }
}

async fn run_durable_listener(
    inner: Arc<Inner>,
    mut rx: mpsc::Receiver<FeedItem<Vec<DurableDoc>>>,
    mut shutdown_rx: watch::Receiver<bool>,
    generation: u64,
) {
    loop {
        let item = tokio::select! {
            biased;
            _ = shutdown_rx.changed() => return,
            item = rx.recv() => item,
        };
        match item {
            Some(Ok(docs)) => inner.on_snapshot(docs).await,
            Some(Err(e)) => {
                if !*shutdown_rx.borrow() {
                    inner.feed_lost(generation, FeedKind::Durable, e);
                }
                return;
            }
            None => {
                if !*shutdown_rx.borrow() {
                    inner.feed_lost(generation, FeedKind::Durable, SubscriptionError::Closed);
                }
                return;
            }
        }
    }
}

async fn run_mirror_worker(inner: Arc<Inner>, mut queue: mpsc::Receiver<Event>) {
    while let Some(event) = queue.recv().await {
        // Failures are logged inside; the feed keeps flowing.
        let _ = inner.mirror_with_retry(&event).await;
    }
    debug!("mirror worker drained");
}

/// `alerts/<key>/isAcknowledged = true`, retried, never surfaced.
async fn backwrite_acknowledged(inner: Arc<Inner>, key: String) {
    let attempts = inner.cfg.acknowledge.primary_backwrite_attempts.max(1);
    let backoff = Duration::from_millis(inner.cfg.acknowledge.primary_backwrite_backoff_ms);
    for attempt in 1..=attempts {
        match inner
            .primary
            .set_field(&key, fields::ACKNOWLEDGED, Value::Bool(true))
            .await
        {
            Ok(()) => {
                debug!(key = %key, "primary acknowledgement written");
                return;
            }
            Err(StoreError::NotFound { .. }) => {
                debug!(key = %key, "primary node gone; acknowledgement not written back");
                return;
            }
            Err(e) if attempt < attempts => {
                warn!(key = %key, attempt, error = %e, "primary acknowledgement failed; retrying");
                tokio::time::sleep(backoff).await;
            }
            Err(e) => {
                warn!(key = %key, attempt, error = %e, "primary acknowledgement abandoned");
            }
        }
    }
}
