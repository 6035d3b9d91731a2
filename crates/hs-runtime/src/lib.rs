//! hs-runtime
//!
//! The reconciliation service: owns both feed listeners, the mirror worker,
//! the merged alert view, and the notification state. Everything mutable
//! lives inside one [`ReconciliationService`]; there are no globals.
//!
//! Wiring, leaves first:
//!
//! ```text
//! primary feed -> parse -> normalize -> mirror queue -> IdempotentMirror -> durable store
//! durable feed -> parse -> AlertDeduplicator -> watch<Vec<MergedAlert>> -> throttle -> sink
//! ```

mod clock;
mod error;
mod service;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::ServiceError;
pub use service::{
    Collaborators, FeedKind, ReconciliationService, ResyncReport, ServiceState, ServiceStatus,
};
