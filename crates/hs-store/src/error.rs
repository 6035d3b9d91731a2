//! Error types shared by every store and sink implementation.

use std::fmt;

/// A single read or write against a store failed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached (network, pool exhausted, injected fault).
    Unavailable(String),
    /// The addressed document does not exist.
    NotFound { id: String },
    /// A uniqueness constraint rejected the write (e.g. duplicate origin id).
    Conflict(String),
    /// Any other backend failure.
    Backend(String),
}

impl StoreError {
    /// `true` when retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Conflict(_))
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Unavailable(msg) => write!(f, "store unavailable: {msg}"),
            StoreError::NotFound { id } => write!(f, "document not found: {id}"),
            StoreError::Conflict(msg) => write!(f, "write conflict: {msg}"),
            StoreError::Backend(msg) => write!(f, "store backend error: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// A feed subscription could not be established or was lost.
///
/// Terminal for the listener that sees it; the caller decides whether to
/// subscribe again.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubscriptionError {
    /// The store refused the subscription.
    Rejected(String),
    /// The push channel dropped after it was established.
    Disconnected(String),
    /// The feed ended without an error (store shut down).
    Closed,
}

impl fmt::Display for SubscriptionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionError::Rejected(msg) => write!(f, "subscription rejected: {msg}"),
            SubscriptionError::Disconnected(msg) => write!(f, "feed disconnected: {msg}"),
            SubscriptionError::Closed => write!(f, "feed closed"),
        }
    }
}

impl std::error::Error for SubscriptionError {}

/// Notification delivery failed. Logged by callers, never propagated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SinkError(pub String);

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "notification sink error: {}", self.0)
    }
}

impl std::error::Error for SinkError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages_are_stable() {
        assert_eq!(
            StoreError::NotFound {
                id: "abc".to_string()
            }
            .to_string(),
            "document not found: abc"
        );
        assert_eq!(
            SubscriptionError::Disconnected("eof".to_string()).to_string(),
            "feed disconnected: eof"
        );
        assert_eq!(
            SinkError("offline".to_string()).to_string(),
            "notification sink error: offline"
        );
    }

    #[test]
    fn only_unavailable_and_conflict_are_transient() {
        assert!(StoreError::Unavailable("x".into()).is_transient());
        assert!(StoreError::Conflict("x".into()).is_transient());
        assert!(!StoreError::NotFound { id: "x".into() }.is_transient());
        assert!(!StoreError::Backend("x".into()).is_transient());
    }
}
