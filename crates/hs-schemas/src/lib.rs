//! hs-schemas
//!
//! Shared data model for the alert reconciliation engine: raw events from the
//! primary feed, durable records, and the merged alerts exposed to consumers.
//!
//! Plain data only. No IO, no clock.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Document field names used by both stores.
///
/// These are the names written by deployed field devices and must not change.
pub mod fields {
    pub const TYPE: &str = "type";
    pub const MESSAGE: &str = "message";
    pub const TIMESTAMP: &str = "timestamp";
    pub const SENSOR_ID: &str = "sensorId";
    pub const ACKNOWLEDGED: &str = "isAcknowledged";
    pub const ORIGIN_ID: &str = "originalId";
}

/// LogicalKey of the live low-latency alert slot on the primary store.
///
/// Devices overwrite this single node for every new live alert, so the merged
/// view surfaces it ahead of same-timestamp ties.
pub const PRIMARY_SENTINEL_KEY: &str = "0";

// ---------------------------------------------------------------------------
// AlertCategory
// ---------------------------------------------------------------------------

/// Alert category as written by devices (upper snake case on the wire).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertCategory {
    GasLeak,
    Proximity,
    #[serde(alias = "VIBRATION_DETECTED")]
    Vibration,
    NfcUnauthorized,
    Fire,
    DoorUnauthorized,
    DoorLeftOpen,
}

impl AlertCategory {
    pub const ALL: [AlertCategory; 7] = [
        AlertCategory::GasLeak,
        AlertCategory::Proximity,
        AlertCategory::Vibration,
        AlertCategory::NfcUnauthorized,
        AlertCategory::Fire,
        AlertCategory::DoorUnauthorized,
        AlertCategory::DoorLeftOpen,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertCategory::GasLeak => "GAS_LEAK",
            AlertCategory::Proximity => "PROXIMITY",
            AlertCategory::Vibration => "VIBRATION",
            AlertCategory::NfcUnauthorized => "NFC_UNAUTHORIZED",
            AlertCategory::Fire => "FIRE",
            AlertCategory::DoorUnauthorized => "DOOR_UNAUTHORIZED",
            AlertCategory::DoorLeftOpen => "DOOR_LEFT_OPEN",
        }
    }

    /// Parse the wire spelling. Accepts the legacy `VIBRATION_DETECTED`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "GAS_LEAK" => Some(AlertCategory::GasLeak),
            "PROXIMITY" => Some(AlertCategory::Proximity),
            "VIBRATION" | "VIBRATION_DETECTED" => Some(AlertCategory::Vibration),
            "NFC_UNAUTHORIZED" => Some(AlertCategory::NfcUnauthorized),
            "FIRE" => Some(AlertCategory::Fire),
            "DOOR_UNAUTHORIZED" => Some(AlertCategory::DoorUnauthorized),
            "DOOR_LEFT_OPEN" => Some(AlertCategory::DoorLeftOpen),
            _ => None,
        }
    }

    /// Human-readable notification title.
    pub fn title(&self) -> &'static str {
        match self {
            AlertCategory::GasLeak => "Gas Leak Alert",
            AlertCategory::Proximity => "Proximity Alert",
            AlertCategory::Vibration => "Vibration Alert",
            AlertCategory::NfcUnauthorized => "Unauthorized NFC Access",
            AlertCategory::Fire => "Fire Alert",
            AlertCategory::DoorUnauthorized => "Unauthorized Door Access",
            AlertCategory::DoorLeftOpen => "Door Alert",
        }
    }
}

impl fmt::Display for AlertCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// LogicalKey
// ---------------------------------------------------------------------------

/// Identifies "the same real-world alert" across repeated observations.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogicalKey(String);

impl LogicalKey {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_sentinel(&self, sentinel: &str) -> bool {
        self.0 == sentinel
    }
}

impl fmt::Display for LogicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LogicalKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// A raw alert observation delivered by the primary feed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Generated when the event is parsed; used as LogicalKey fallback.
    pub id: Uuid,
    /// Stable identifier assigned by the originating device/channel.
    pub source_id: Option<String>,
    pub category: AlertCategory,
    pub message: String,
    pub sensor_id: String,
    pub timestamp_millis: i64,
    pub acknowledged: bool,
}

impl Event {
    /// `source_id` when present and non-empty, else the generated id.
    pub fn logical_key(&self) -> LogicalKey {
        match self.source_id.as_deref() {
            Some(s) if !s.is_empty() => LogicalKey::new(s),
            _ => LogicalKey::new(self.id.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// DurableRecord
// ---------------------------------------------------------------------------

/// Persisted projection of an [`Event`] in the durable store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurableRecord {
    /// Durable-store identity.
    pub id: String,
    pub category: AlertCategory,
    pub message: String,
    pub sensor_id: String,
    pub timestamp_millis: i64,
    pub acknowledged: bool,
    /// Provenance from the primary feed. `None` for legacy or local alerts.
    pub origin_id: Option<LogicalKey>,
}

impl DurableRecord {
    /// Project an event onto a durable identity.
    pub fn from_event(id: impl Into<String>, event: &Event, origin_id: LogicalKey) -> Self {
        Self {
            id: id.into(),
            category: event.category,
            message: event.message.clone(),
            sensor_id: event.sensor_id.clone(),
            timestamp_millis: event.timestamp_millis,
            acknowledged: event.acknowledged,
            origin_id: Some(origin_id),
        }
    }
}

// ---------------------------------------------------------------------------
// MergedAlert
// ---------------------------------------------------------------------------

/// The externally visible alert: one per LogicalKey after deduplication.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedAlert {
    /// Durable-store identity.
    pub id: String,
    pub logical_key: Option<LogicalKey>,
    pub category: AlertCategory,
    pub message: String,
    pub sensor_id: String,
    pub timestamp_millis: i64,
    pub acknowledged: bool,
}

impl From<DurableRecord> for MergedAlert {
    fn from(r: DurableRecord) -> Self {
        Self {
            id: r.id,
            logical_key: r.origin_id,
            category: r.category,
            message: r.message,
            sensor_id: r.sensor_id,
            timestamp_millis: r.timestamp_millis,
            acknowledged: r.acknowledged,
        }
    }
}

// ---------------------------------------------------------------------------
// Local alerts
// ---------------------------------------------------------------------------

/// An alert raised by a local collaborator (door/NFC) that never touches the
/// primary store. Written straight to the durable store without provenance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLocalAlert {
    pub category: AlertCategory,
    pub message: String,
    #[serde(default)]
    pub sensor_id: String,
    /// Defaults to the service clock when absent.
    #[serde(default)]
    pub timestamp_millis: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(source_id: Option<&str>) -> Event {
        Event {
            id: Uuid::new_v4(),
            source_id: source_id.map(str::to_string),
            category: AlertCategory::GasLeak,
            message: "High gas levels detected".to_string(),
            sensor_id: "gas1".to_string(),
            timestamp_millis: 1_700_000_000_000,
            acknowledged: false,
        }
    }

    #[test]
    fn category_parse_accepts_every_wire_name() {
        for c in AlertCategory::ALL {
            assert_eq!(AlertCategory::parse(c.as_str()), Some(c));
        }
        assert_eq!(AlertCategory::parse("SMOKE"), None);
    }

    #[test]
    fn legacy_vibration_spelling_maps_to_vibration() {
        assert_eq!(
            AlertCategory::parse("VIBRATION_DETECTED"),
            Some(AlertCategory::Vibration)
        );
        let c: AlertCategory = serde_json::from_str("\"VIBRATION_DETECTED\"").unwrap();
        assert_eq!(c, AlertCategory::Vibration);
        assert_eq!(serde_json::to_string(&c).unwrap(), "\"VIBRATION\"");
    }

    #[test]
    fn logical_key_prefers_source_id() {
        let e = event(Some("0"));
        assert_eq!(e.logical_key(), LogicalKey::new("0"));
    }

    #[test]
    fn logical_key_falls_back_to_generated_id() {
        let e = event(None);
        assert_eq!(e.logical_key().as_str(), e.id.to_string());

        let blank = event(Some(""));
        assert_eq!(blank.logical_key().as_str(), blank.id.to_string());
    }

    #[test]
    fn merged_alert_carries_durable_identity_and_origin() {
        let e = event(Some("0"));
        let rec = DurableRecord::from_event("doc-1", &e, e.logical_key());
        let merged = MergedAlert::from(rec);
        assert_eq!(merged.id, "doc-1");
        assert_eq!(merged.logical_key, Some(LogicalKey::new("0")));
        assert_eq!(merged.sensor_id, "gas1");
    }
}
