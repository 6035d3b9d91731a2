use std::fmt;

use hs_store::{StoreError, SubscriptionError};

use crate::ServiceState;

/// Errors returned by [`crate::ReconciliationService`] operations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServiceError {
    /// The operation is not allowed in the current lifecycle state.
    InvalidState {
        op: &'static str,
        state: ServiceState,
    },
    /// A feed subscription could not be established.
    Subscription(SubscriptionError),
    /// A store read or write failed.
    Store(StoreError),
    /// No durable record with this id.
    NotFound { id: String },
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceError::InvalidState { op, state } => {
                write!(f, "cannot {op} while service is {state}")
            }
            ServiceError::Subscription(e) => write!(f, "subscription failed: {e}"),
            ServiceError::Store(e) => write!(f, "{e}"),
            ServiceError::NotFound { id } => write!(f, "alert not found: {id}"),
        }
    }
}

impl std::error::Error for ServiceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServiceError::Subscription(e) => Some(e),
            ServiceError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { id } => ServiceError::NotFound { id },
            other => ServiceError::Store(other),
        }
    }
}

impl From<SubscriptionError> for ServiceError {
    fn from(e: SubscriptionError) -> Self {
        ServiceError::Subscription(e)
    }
}
