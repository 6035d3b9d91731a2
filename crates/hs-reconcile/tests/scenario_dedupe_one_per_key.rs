//! Scenario: duplicate observations collapse to one merged alert per key.
//!
//! # Invariants under test
//!
//! 1. Two candidates with key "0" at ts 100 and 200 yield only the ts=200 one.
//! 2. On equal timestamps the sentinel-keyed candidate is emitted first,
//!    wherever it arrived among the tied candidates.
//! 3. Legacy candidates without a key survive next to keyed duplicates.
//! 4. Output is ordered by timestamp descending.

use hs_reconcile::*;
use hs_schemas::{AlertCategory, LogicalKey, MergedAlert};

fn alert(id: &str, key: Option<&str>, ts: i64) -> MergedAlert {
    MergedAlert {
        id: id.to_string(),
        logical_key: key.map(LogicalKey::new),
        category: AlertCategory::GasLeak,
        message: "High gas levels detected".to_string(),
        sensor_id: "gas1".to_string(),
        timestamp_millis: ts,
        acknowledged: false,
    }
}

#[test]
fn scenario_repeated_sentinel_keeps_newest() {
    let out = AlertDeduplicator::default().dedupe(vec![
        alert("old", Some("0"), 100),
        alert("new", Some("0"), 200),
    ]);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].id, "new");
    assert_eq!(out[0].timestamp_millis, 200);
}

#[test]
fn scenario_mixed_snapshot() {
    let out = AlertDeduplicator::default().dedupe(vec![
        alert("legacy-a", None, 300),
        alert("k1-old", Some("1"), 150),
        alert("door", Some("door"), 400),
        alert("live", Some("0"), 400),
        alert("k1-new", Some("1"), 350),
        alert("legacy-b", None, 50),
    ]);
    let ids: Vec<&str> = out.iter().map(|a| a.id.as_str()).collect();
    assert_eq!(ids, vec!["live", "door", "k1-new", "legacy-a", "legacy-b"]);

    let ts: Vec<i64> = out.iter().map(|a| a.timestamp_millis).collect();
    let mut sorted = ts.clone();
    sorted.sort_by(|a, b| b.cmp(a));
    assert_eq!(ts, sorted);
}

#[test]
fn scenario_sentinel_first_among_four_way_tie() {
    let ts = 1_700_000_000_000;
    let out = AlertDeduplicator::default().dedupe(vec![
        alert("door", Some("door"), ts),
        alert("window", Some("window"), ts),
        alert("live", Some("0"), ts),
        alert("nfc", Some("nfc"), ts),
    ]);
    let ids: Vec<&str> = out.iter().map(|a| a.id.as_str()).collect();
    assert_eq!(ids, vec!["live", "door", "window", "nfc"]);
    assert!(out[0].logical_key.as_ref().unwrap().is_sentinel("0"));
}
