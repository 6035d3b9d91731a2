//! hs-ingest
//!
//! Boundary between raw store documents and the typed data model.
//!
//! - [`normalizer`]: heuristic repair of device timestamps.
//! - [`parse`]: document → [`hs_schemas::Event`] / [`hs_schemas::DurableRecord`]
//!   with the per-field default policy applied exactly once.
//!
//! Pure deterministic logic. The caller supplies `now`.

pub mod normalizer;
pub mod parse;

pub use normalizer::{
    classify_timestamp, normalize_timestamp, TimestampClass, EPOCH_2020_MS,
    SECONDS_VS_MILLIS_THRESHOLD,
};
pub use parse::{
    doc_fields, local_alert_fields, parse_durable_doc, parse_primary_node, record_fields,
    timestamp_of, DocFields, ParseError,
};
