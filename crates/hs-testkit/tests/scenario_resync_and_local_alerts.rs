//! Scenario: manual resync and locally raised alerts.
//!
//! # Invariants under test
//!
//! 1. `resync_all` mirrors every current primary node, works while stopped,
//!    counts malformed nodes as skipped, and is idempotent.
//! 2. Local alerts go straight to the durable store without provenance and
//!    appear in the merged view.
//! 3. Local alert timestamps default to the service clock and are repaired
//!    like device timestamps.

use std::time::Duration;

use hs_runtime::ResyncReport;
use hs_schemas::{AlertCategory, NewLocalAlert};
use hs_testkit::{alert_doc, gas_leak_doc, wait_until, Harness, DEFAULT_NOW};
use serde_json::json;

const T: Duration = Duration::from_secs(3);

#[tokio::test]
async fn resync_mirrors_every_node_while_stopped() {
    let h = Harness::new();
    h.device_write("0", gas_leak_doc("gas1", 1_700_000_000_000)).await;
    h.device_write("4", alert_doc("PROXIMITY", "prox4", 1_700_000_100)).await;
    h.device_write("9", json!({ "message": "no type" })).await;

    let report = h.service.resync_all().await.unwrap();
    assert_eq!(
        report,
        ResyncReport {
            mirrored: 2,
            skipped: 1,
            failed: 0
        }
    );
    assert_eq!(h.durable.len(), 2);
    assert_eq!(h.service.sync_count(), 2);
    assert_eq!(
        h.durable.docs_with_origin("4")[0].fields["timestamp"],
        json!(1_700_000_100_000i64)
    );

    let again = h.service.resync_all().await.unwrap();
    assert_eq!(again.mirrored, 2);
    assert_eq!(h.durable.len(), 2);
}

#[tokio::test]
async fn resync_reports_failures_without_aborting() {
    let h = Harness::new();
    h.device_write("1", alert_doc("FIRE", "smoke1", 1_700_000_000_000)).await;
    h.device_write("2", alert_doc("FIRE", "smoke2", 1_700_000_000_000)).await;

    // Exhausts every attempt for the first node only.
    h.durable.fail_next_writes(3);
    let report = h.service.resync_all().await.unwrap();
    assert_eq!(report.mirrored, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(h.durable.len(), 1);
}

#[tokio::test]
async fn local_alert_is_recorded_without_provenance() {
    let h = Harness::new();
    h.service.start().await.unwrap();

    let id = h
        .service
        .record_local_alert(NewLocalAlert {
            category: AlertCategory::DoorLeftOpen,
            message: "Front door left open".to_string(),
            sensor_id: "door1".to_string(),
            timestamp_millis: None,
        })
        .await
        .unwrap();

    let doc = h.durable.doc(&id).unwrap();
    assert!(doc.get("originalId").is_none());
    assert_eq!(doc["timestamp"], json!(DEFAULT_NOW));
    assert_eq!(doc["type"], json!("DOOR_LEFT_OPEN"));

    assert!(wait_until(T, || h.sink.notified_ids() == vec![id.clone()]).await);
    let alerts = h.service.current_alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].logical_key, None);

    h.service.stop().await.unwrap();
}

#[tokio::test]
async fn identical_local_alerts_are_both_kept() {
    let h = Harness::new();
    h.service.start().await.unwrap();

    let alert = NewLocalAlert {
        category: AlertCategory::DoorUnauthorized,
        message: "Door opened while armed".to_string(),
        sensor_id: "door2".to_string(),
        timestamp_millis: Some(1_700_000_000),
    };
    let a = h.service.record_local_alert(alert.clone()).await.unwrap();
    let b = h.service.record_local_alert(alert).await.unwrap();
    assert_ne!(a, b);

    assert!(wait_until(T, || h.service.current_alerts().len() == 2).await);
    assert!(h
        .service
        .current_alerts()
        .iter()
        .all(|x| x.timestamp_millis == 1_700_000_000_000));

    h.service.stop().await.unwrap();
}
