//! Request and response types for all hs-daemon HTTP endpoints.
//!
//! These types are `Serialize + Deserialize` so they can be JSON-encoded
//! by Axum and decoded by tests.  No business logic lives here.

use hs_schemas::MergedAlert;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// /v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: String,
    pub version: String,
}

// ---------------------------------------------------------------------------
// /v1/status  /v1/service/start  /v1/service/stop
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub daemon_uptime_secs: u64,
    /// "stopped" | "starting" | "running"
    pub state: String,
    pub sync_count: u64,
    pub notifications_enabled: bool,
    pub alert_count: usize,
    pub shown_count: usize,
    pub config_hash: String,
    pub durable_store: String,
    pub last_error: Option<String>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Body of every non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    /// "invalid_state" | "not_found" | "store_unavailable" | "bad_request"
    pub kind: String,
}

// ---------------------------------------------------------------------------
// /v1/alerts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertsResponse {
    pub alerts: Vec<MergedAlert>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckResponse {
    pub id: String,
    pub acknowledged: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalAlertResponse {
    pub id: String,
}

// ---------------------------------------------------------------------------
// /v1/sync
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResponse {
    pub mirrored: u64,
    pub skipped: u64,
    pub failed: u64,
    pub sync_count: u64,
}

// ---------------------------------------------------------------------------
// /v1/notifications
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsRequest {
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsResponse {
    pub enabled: bool,
    pub shown_count: usize,
}

// ---------------------------------------------------------------------------
// /v1/primary/alerts/:key
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceWriteResponse {
    pub key: String,
    pub accepted: bool,
}
