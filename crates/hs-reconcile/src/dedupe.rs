//! Alert deduplication.
//!
//! # Invariants
//!
//! - **One per key**: for any LogicalKey at most one alert survives, the one
//!   with the greatest timestamp.
//! - **Sentinel first on ties**: among equal timestamps an alert keyed by the
//!   sentinel sorts ahead; all other ties keep arrival order.
//! - **Legacy kept**: alerts with no LogicalKey are always emitted.

use std::cmp::Ordering;
use std::collections::HashSet;

use hs_schemas::{LogicalKey, MergedAlert, PRIMARY_SENTINEL_KEY};

/// Collapses candidates to one [`MergedAlert`] per LogicalKey, newest first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AlertDeduplicator {
    sentinel: LogicalKey,
}

impl Default for AlertDeduplicator {
    fn default() -> Self {
        Self::new(PRIMARY_SENTINEL_KEY)
    }
}

impl AlertDeduplicator {
    pub fn new(sentinel: impl Into<String>) -> Self {
        Self {
            sentinel: LogicalKey::new(sentinel),
        }
    }

    pub fn sentinel(&self) -> &LogicalKey {
        &self.sentinel
    }

    pub fn dedupe(&self, candidates: Vec<MergedAlert>) -> Vec<MergedAlert> {
        dedupe(candidates, &self.sentinel)
    }
}

fn is_sentinel(a: &MergedAlert, sentinel: &LogicalKey) -> bool {
    a.logical_key
        .as_ref()
        .is_some_and(|k| k.is_sentinel(sentinel.as_str()))
}

/// Free-function form of [`AlertDeduplicator::dedupe`].
pub fn dedupe(mut candidates: Vec<MergedAlert>, sentinel: &LogicalKey) -> Vec<MergedAlert> {
    // sort_by is stable: unrelated ties keep arrival order.
    candidates.sort_by(|a, b| {
        b.timestamp_millis
            .cmp(&a.timestamp_millis)
            .then_with(|| match (is_sentinel(a, sentinel), is_sentinel(b, sentinel)) {
                (true, false) => Ordering::Less,
                (false, true) => Ordering::Greater,
                _ => Ordering::Equal,
            })
    });

    let mut seen: HashSet<LogicalKey> = HashSet::new();
    candidates
        .into_iter()
        .filter(|a| match &a.logical_key {
            Some(k) => seen.insert(k.clone()),
            None => true,
        })
        .collect()
}
