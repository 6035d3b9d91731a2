//! Notification throttle.
//!
//! Two rules decide whether a freshly observed alert is shown:
//!
//! 1. An alert id is shown at most once until it is acknowledged.
//! 2. GAS_LEAK alerts from one sensor are shown at most once per window.
//!    A suppressed alert is *not* marked shown, so a later observation of the
//!    same id may still notify once the window has passed.

use std::collections::{HashMap, HashSet};

use hs_schemas::{AlertCategory, MergedAlert};
use serde::Serialize;

/// Default GAS_LEAK rate-limit window: five minutes.
pub const THROTTLE_WINDOW_MS: i64 = 300_000;

/// Outcome of one throttle evaluation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ThrottleDecision {
    Notify,
    AlreadyShown,
    Throttled { sensor_id: String, retry_in_ms: i64 },
}

impl ThrottleDecision {
    pub fn is_notify(&self) -> bool {
        matches!(self, ThrottleDecision::Notify)
    }
}

/// Shown-set plus per-sensor GAS_LEAK watermark.
#[derive(Clone, Debug)]
pub struct NotificationThrottle {
    window_ms: i64,
    shown: HashSet<String>,
    last_shown_at: HashMap<String, i64>,
}

impl Default for NotificationThrottle {
    fn default() -> Self {
        Self::new(THROTTLE_WINDOW_MS)
    }
}

impl NotificationThrottle {
    pub fn new(window_ms: i64) -> Self {
        Self {
            window_ms,
            shown: HashSet::new(),
            last_shown_at: HashMap::new(),
        }
    }

    pub fn window_ms(&self) -> i64 {
        self.window_ms
    }

    /// Evaluate and, on `Notify`, record the alert as shown.
    pub fn decide(&mut self, alert: &MergedAlert, now: i64) -> ThrottleDecision {
        if self.shown.contains(&alert.id) {
            return ThrottleDecision::AlreadyShown;
        }

        if alert.category == AlertCategory::GasLeak {
            if let Some(&last) = self.last_shown_at.get(&alert.sensor_id) {
                let elapsed = now.saturating_sub(last);
                if elapsed < self.window_ms {
                    return ThrottleDecision::Throttled {
                        sensor_id: alert.sensor_id.clone(),
                        retry_in_ms: self.window_ms - elapsed,
                    };
                }
            }
            self.last_shown_at.insert(alert.sensor_id.clone(), now);
        }

        self.shown.insert(alert.id.clone());
        ThrottleDecision::Notify
    }

    pub fn should_notify(&mut self, alert: &MergedAlert, now: i64) -> bool {
        self.decide(alert, now).is_notify()
    }

    /// Forget `alert_id` so a later occurrence may notify again. The GAS_LEAK
    /// watermark is left alone.
    pub fn acknowledge(&mut self, alert_id: &str) -> bool {
        self.shown.remove(alert_id)
    }

    /// Empty the shown-set.
    pub fn clear_all(&mut self) {
        self.shown.clear();
    }

    pub fn is_shown(&self, alert_id: &str) -> bool {
        self.shown.contains(alert_id)
    }

    pub fn shown_count(&self) -> usize {
        self.shown.len()
    }

    pub fn last_shown_at(&self, sensor_id: &str) -> Option<i64> {
        self.last_shown_at.get(sensor_id).copied()
    }
}
