//! Axum router and all HTTP handlers for hs-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers.  All handlers are `pub(crate)` so the scenario tests in
//! `tests/` can compose the router directly.

use std::{convert::Infallible, sync::Arc};

use axum::{
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post, put},
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use hs_runtime::ServiceError;
use hs_schemas::NewLocalAlert;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};

use crate::{
    api_types::{
        AckResponse, AlertsResponse, DeviceWriteResponse, ErrorResponse, HealthResponse,
        LocalAlertResponse, NotificationsRequest, NotificationsResponse, SyncResponse,
    },
    state::{AppState, BusMsg},
};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/status", get(status_handler))
        .route("/v1/stream", get(stream))
        .route("/v1/alerts", get(list_alerts))
        .route("/v1/alerts/local", post(record_local_alert))
        .route("/v1/alerts/:id/ack", post(acknowledge))
        .route("/v1/sync", post(sync))
        .route("/v1/service/start", post(service_start))
        .route("/v1/service/stop", post(service_stop))
        .route("/v1/notifications", post(set_notifications))
        .route("/v1/notifications/clear", post(clear_notifications))
        .route("/v1/primary/alerts/:key", put(device_write))
        .with_state(state)
}

fn error_response(status: StatusCode, kind: &str, error: String) -> Response {
    (
        status,
        Json(ErrorResponse {
            error,
            kind: kind.to_string(),
        }),
    )
        .into_response()
}

fn service_error(e: ServiceError) -> Response {
    let (status, kind) = match &e {
        ServiceError::InvalidState { .. } => (StatusCode::CONFLICT, "invalid_state"),
        ServiceError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
        ServiceError::Subscription(_) | ServiceError::Store(_) => {
            (StatusCode::SERVICE_UNAVAILABLE, "store_unavailable")
        }
    };
    error_response(status, kind, e.to_string())
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service.to_string(),
            version: st.build.version.to_string(),
        }),
    )
}

// ---------------------------------------------------------------------------
// GET /v1/status
// ---------------------------------------------------------------------------

pub(crate) async fn status_handler(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let snap = st.status_snapshot();
    let _ = st.bus.send(BusMsg::Status(snap.clone()));
    (StatusCode::OK, Json(snap))
}

// ---------------------------------------------------------------------------
// POST /v1/service/start  /v1/service/stop
// ---------------------------------------------------------------------------

pub(crate) async fn service_start(State(st): State<Arc<AppState>>) -> Response {
    if let Err(e) = st.service.start().await {
        warn!(error = %e, "service/start refused");
        return service_error(e);
    }
    info!("service/start");
    let snap = st.status_snapshot();
    let _ = st.bus.send(BusMsg::Status(snap.clone()));
    (StatusCode::OK, Json(snap)).into_response()
}

pub(crate) async fn service_stop(State(st): State<Arc<AppState>>) -> Response {
    if let Err(e) = st.service.stop().await {
        return service_error(e);
    }
    info!("service/stop");
    let snap = st.status_snapshot();
    let _ = st.bus.send(BusMsg::Status(snap.clone()));
    (StatusCode::OK, Json(snap)).into_response()
}

// ---------------------------------------------------------------------------
// /v1/alerts
// ---------------------------------------------------------------------------

pub(crate) async fn list_alerts(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(AlertsResponse {
            alerts: st.service.current_alerts(),
        }),
    )
}

pub(crate) async fn acknowledge(
    State(st): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match st.service.acknowledge(&id).await {
        Ok(()) => (
            StatusCode::OK,
            Json(AckResponse {
                id,
                acknowledged: true,
            }),
        )
            .into_response(),
        Err(e) => service_error(e),
    }
}

pub(crate) async fn record_local_alert(
    State(st): State<Arc<AppState>>,
    Json(alert): Json<NewLocalAlert>,
) -> Response {
    match st.service.record_local_alert(alert).await {
        Ok(id) => (StatusCode::CREATED, Json(LocalAlertResponse { id })).into_response(),
        Err(e) => service_error(e),
    }
}

// ---------------------------------------------------------------------------
// POST /v1/sync
// ---------------------------------------------------------------------------

pub(crate) async fn sync(State(st): State<Arc<AppState>>) -> Response {
    match st.service.resync_all().await {
        Ok(report) => (
            StatusCode::OK,
            Json(SyncResponse {
                mirrored: report.mirrored,
                skipped: report.skipped,
                failed: report.failed,
                sync_count: st.service.sync_count(),
            }),
        )
            .into_response(),
        Err(e) => service_error(e),
    }
}

// ---------------------------------------------------------------------------
// /v1/notifications
// ---------------------------------------------------------------------------

pub(crate) async fn set_notifications(
    State(st): State<Arc<AppState>>,
    Json(req): Json<NotificationsRequest>,
) -> impl IntoResponse {
    st.service.set_notifications_enabled(req.enabled);
    let _ = st.bus.send(BusMsg::LogLine {
        level: "INFO".to_string(),
        msg: format!("notifications enabled={}", req.enabled),
    });
    (
        StatusCode::OK,
        Json(NotificationsResponse {
            enabled: st.service.notifications_enabled(),
            shown_count: st.service.status().shown_count,
        }),
    )
}

pub(crate) async fn clear_notifications(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    st.service.clear_all_notifications().await;
    (
        StatusCode::OK,
        Json(NotificationsResponse {
            enabled: st.service.notifications_enabled(),
            shown_count: st.service.status().shown_count,
        }),
    )
}

// ---------------------------------------------------------------------------
// PUT /v1/primary/alerts/:key
// ---------------------------------------------------------------------------

/// Device write adapter: replaces `alerts/<key>` on the primary store.
pub(crate) async fn device_write(
    State(st): State<Arc<AppState>>,
    Path(key): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let Value::Object(fields) = body else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "bad_request",
            format!("alert node '{key}' must be a JSON object"),
        );
    };
    st.primary.put_node(&key, fields).await;
    (
        StatusCode::ACCEPTED,
        Json(DeviceWriteResponse {
            key,
            accepted: true,
        }),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// GET /v1/stream  (SSE)
// ---------------------------------------------------------------------------

pub(crate) async fn stream(State(st): State<Arc<AppState>>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("Connection", HeaderValue::from_static("keep-alive"));

    let rx = st.bus.subscribe();
    let events = broadcast_to_sse(rx);

    (headers, Sse::new(events).keep_alive(KeepAlive::new())).into_response()
}

fn broadcast_to_sse(
    rx: broadcast::Receiver<BusMsg>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(|msg| async move {
        match msg {
            Ok(m) => {
                let data = serde_json::to_string(&m).ok()?;
                Some(Ok(Event::default().event(m.event_name()).data(data)))
            }
            Err(_) => None, // lagged / closed
        }
    })
}
