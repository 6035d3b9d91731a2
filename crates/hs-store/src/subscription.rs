//! Feed subscription handle.

use std::fmt;

/// Handle to a live feed subscription.
///
/// Cancelling (or dropping) the handle unsubscribes: the store stops
/// delivering and drops its sender, which ends the consumer's `recv` loop.
pub struct Subscription {
    label: String,
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(label: impl Into<String>, cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            label: label.into(),
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A subscription with nothing to tear down.
    pub fn detached(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            cancel: None,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Unsubscribe now. Idempotent with the drop path.
    pub fn cancel(mut self) {
        self.run_cancel();
    }

    fn run_cancel(&mut self) {
        if let Some(f) = self.cancel.take() {
            f();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run_cancel();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("label", &self.label)
            .field("active", &self.cancel.is_some())
            .finish()
    }
}
