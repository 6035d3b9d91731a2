//! Scenario: service lifecycle and feed failure handling.
//!
//! # Invariants under test
//!
//! 1. `start` only from Stopped; a second start is InvalidState.
//! 2. A rejected subscription leaves the service Stopped with the other
//!    feed cancelled.
//! 3. A feed error while Running is terminal: Stopped, last_error recorded,
//!    both feeds unsubscribed.
//! 4. `stop` unsubscribes both feeds and is a no-op when already stopped.
//! 5. The service can be started again after a feed failure.

use std::sync::Arc;
use std::time::Duration;

use hs_config::EngineConfig;
use hs_runtime::{Collaborators, ManualClock, ReconciliationService, ServiceError, ServiceState};
use hs_store::memory::{MemoryDurableStore, MemoryNotificationSink, MemoryPrimaryStore};
use hs_store::SubscriptionError;

const NOW: i64 = 1_760_000_000_000;

struct Rig {
    primary: MemoryPrimaryStore,
    durable: MemoryDurableStore,
    svc: ReconciliationService,
}

fn rig() -> Rig {
    let primary = MemoryPrimaryStore::new();
    let durable = MemoryDurableStore::new();
    let svc = ReconciliationService::new(
        EngineConfig::default(),
        Collaborators {
            primary: Arc::new(primary.clone()),
            durable: Arc::new(durable.clone()),
            sink: Arc::new(MemoryNotificationSink::new()),
            clock: Arc::new(ManualClock::new(NOW)),
        },
    );
    Rig {
        primary,
        durable,
        svc,
    }
}

async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

#[tokio::test]
async fn start_only_from_stopped() {
    let r = rig();
    assert_eq!(r.svc.state(), ServiceState::Stopped);

    r.svc.start().await.unwrap();
    assert_eq!(r.svc.state(), ServiceState::Running);
    assert_eq!(r.primary.subscriber_count(), 1);
    assert_eq!(r.durable.subscriber_count(), 1);

    let err = r.svc.start().await.unwrap_err();
    assert_eq!(
        err,
        ServiceError::InvalidState {
            op: "start",
            state: ServiceState::Running
        }
    );

    r.svc.stop().await.unwrap();
}

#[tokio::test]
async fn rejected_durable_subscription_cancels_primary() {
    let r = rig();
    r.durable
        .reject_subscriptions(Some(SubscriptionError::Rejected("permission denied".into())));

    let err = r.svc.start().await.unwrap_err();
    assert!(matches!(err, ServiceError::Subscription(_)));
    assert_eq!(r.svc.state(), ServiceState::Stopped);
    assert_eq!(r.primary.subscriber_count(), 0);
    assert!(r.svc.last_error().unwrap().contains("durable"));
}

#[tokio::test]
async fn rejected_primary_subscription_never_touches_durable() {
    let r = rig();
    r.primary
        .reject_subscriptions(Some(SubscriptionError::Rejected("offline".into())));

    assert!(r.svc.start().await.is_err());
    assert_eq!(r.svc.state(), ServiceState::Stopped);
    assert_eq!(r.durable.subscriber_count(), 0);
}

#[tokio::test]
async fn feed_error_is_terminal() {
    let r = rig();
    r.svc.start().await.unwrap();

    r.durable
        .disconnect_all(SubscriptionError::Disconnected("socket reset".into()))
        .await;

    assert!(wait_until(|| r.svc.state() == ServiceState::Stopped).await);
    let last = r.svc.last_error().unwrap();
    assert!(last.contains("durable feed"), "got: {last}");
    assert!(last.contains("socket reset"), "got: {last}");
    assert!(wait_until(|| r.primary.subscriber_count() == 0).await);
}

#[tokio::test]
async fn stop_unsubscribes_and_is_idempotent() {
    let r = rig();
    r.svc.stop().await.unwrap();

    r.svc.start().await.unwrap();
    r.svc.stop().await.unwrap();
    assert_eq!(r.svc.state(), ServiceState::Stopped);
    assert_eq!(r.primary.subscriber_count(), 0);
    assert_eq!(r.durable.subscriber_count(), 0);
    assert_eq!(r.svc.last_error(), None);

    r.svc.stop().await.unwrap();
}

#[tokio::test]
async fn restart_after_feed_failure() {
    let r = rig();
    r.svc.start().await.unwrap();
    r.primary
        .disconnect_all(SubscriptionError::Disconnected("eof".into()))
        .await;
    assert!(wait_until(|| r.svc.state() == ServiceState::Stopped).await);

    r.svc.start().await.unwrap();
    assert_eq!(r.svc.state(), ServiceState::Running);
    assert_eq!(r.svc.last_error(), None);
    assert!(wait_until(|| r.primary.subscriber_count() == 1).await);

    r.svc.stop().await.unwrap();
}

#[tokio::test]
async fn state_changes_are_observable() {
    let r = rig();
    let mut rx = r.svc.subscribe_state();
    r.svc.start().await.unwrap();
    assert_eq!(*rx.borrow_and_update(), ServiceState::Running);
    r.svc.stop().await.unwrap();
    rx.changed().await.unwrap();
    assert_eq!(*rx.borrow(), ServiceState::Stopped);
}
