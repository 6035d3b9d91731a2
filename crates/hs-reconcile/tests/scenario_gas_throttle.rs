//! Scenario: GAS_LEAK notifications from one sensor are rate limited.
//!
//! # Invariants under test
//!
//! 1. Distinct ids from one gas sensor notify at 0, are suppressed at
//!    100_000, and notify again at 300_001.
//! 2. An id notifies at most once until acknowledged.
//! 3. A custom window is honoured.

use hs_reconcile::*;
use hs_schemas::{AlertCategory, LogicalKey, MergedAlert};

fn gas(id: &str) -> MergedAlert {
    MergedAlert {
        id: id.to_string(),
        logical_key: Some(LogicalKey::new("0")),
        category: AlertCategory::GasLeak,
        message: String::new(),
        sensor_id: "gas1".to_string(),
        timestamp_millis: 0,
        acknowledged: false,
    }
}

#[test]
fn scenario_default_window() {
    let mut t = NotificationThrottle::default();
    assert_eq!(t.window_ms(), THROTTLE_WINDOW_MS);
    assert!(t.should_notify(&gas("a1"), 0));
    assert!(!t.should_notify(&gas("a2"), 100_000));
    assert!(t.should_notify(&gas("a3"), 300_001));
}

#[test]
fn scenario_same_id_once_until_ack() {
    let mut t = NotificationThrottle::default();
    assert!(t.should_notify(&gas("a1"), 0));
    assert!(!t.should_notify(&gas("a1"), 900_000));
    t.acknowledge("a1");
    assert!(t.should_notify(&gas("a1"), 900_001));
}

#[test]
fn scenario_custom_window() {
    let mut t = NotificationThrottle::new(1_000);
    assert!(t.should_notify(&gas("a1"), 0));
    assert!(!t.should_notify(&gas("a2"), 999));
    assert!(t.should_notify(&gas("a3"), 1_000));
}
