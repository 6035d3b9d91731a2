//! hs-reconcile
//!
//! Merge and notification decisions over the durable alert view:
//! - Duplicate observations of one LogicalKey collapse to the newest
//! - The live sentinel slot wins same-timestamp ties
//! - Legacy alerts without provenance are never collapsed
//! - A notification is shown at most once per alert id
//! - GAS_LEAK notifications are rate limited per sensor
//!
//! Deterministic, pure logic. No IO. The caller supplies `now`.

mod dedupe;
mod throttle;

pub use dedupe::{dedupe, AlertDeduplicator};
pub use throttle::{NotificationThrottle, ThrottleDecision, THROTTLE_WINDOW_MS};
