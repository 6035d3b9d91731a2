//! Store document parsing.
//!
//! Both stores hold loosely-typed documents. Every optional field gets its
//! default here, once, so nothing downstream has to guess:
//!
//! - `type`: required; unknown spelling is an error.
//! - `message`, `sensorId`: default `""`.
//! - `timestamp`: default `now` (raw value is returned un-normalized).
//! - `isAcknowledged`: default `false`.
//! - `originalId`: default `None` (legacy record).
//!
//! A field that is present with the wrong JSON type is an error rather than
//! silently defaulted; the caller skips the record and logs it.

use std::fmt;

use hs_schemas::{fields, AlertCategory, DurableRecord, Event, LogicalKey, NewLocalAlert};
use serde_json::{Map, Value};
use uuid::Uuid;

/// A store document body.
pub type DocFields = Map<String, Value>;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Why a single document could not be turned into a typed record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseError {
    /// A required field is absent or null.
    MissingField { doc: String, field: &'static str },
    /// A field is present with the wrong JSON type.
    InvalidField {
        doc: String,
        field: &'static str,
        expected: &'static str,
    },
    /// `type` holds a category this build does not know.
    UnknownCategory { doc: String, raw: String },
    /// The document body is not a JSON object.
    NotAnObject { doc: String },
}

impl ParseError {
    /// Identity of the offending document (primary key or durable id).
    pub fn doc(&self) -> &str {
        match self {
            ParseError::MissingField { doc, .. }
            | ParseError::InvalidField { doc, .. }
            | ParseError::UnknownCategory { doc, .. }
            | ParseError::NotAnObject { doc } => doc,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::MissingField { doc, field } => {
                write!(f, "document '{doc}': required field '{field}' is missing")
            }
            ParseError::InvalidField {
                doc,
                field,
                expected,
            } => write!(f, "document '{doc}': field '{field}' is not {expected}"),
            ParseError::UnknownCategory { doc, raw } => {
                write!(f, "document '{doc}': unknown alert type '{raw}'")
            }
            ParseError::NotAnObject { doc } => write!(f, "document '{doc}': body is not an object"),
        }
    }
}

impl std::error::Error for ParseError {}

// ---------------------------------------------------------------------------
// Field readers
// ---------------------------------------------------------------------------

fn present<'a>(doc: &'a DocFields, field: &'static str) -> Option<&'a Value> {
    match doc.get(field) {
        None | Some(Value::Null) => None,
        Some(v) => Some(v),
    }
}

fn opt_str(id: &str, doc: &DocFields, field: &'static str) -> Result<Option<String>, ParseError> {
    match present(doc, field) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(ParseError::InvalidField {
            doc: id.to_string(),
            field,
            expected: "a string",
        }),
    }
}

fn opt_bool(id: &str, doc: &DocFields, field: &'static str) -> Result<Option<bool>, ParseError> {
    match present(doc, field) {
        None => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(ParseError::InvalidField {
            doc: id.to_string(),
            field,
            expected: "a boolean",
        }),
    }
}

/// Integer field. Finite floats are truncated toward zero; some device SDKs
/// serialise every number as a double.
fn opt_i64(id: &str, doc: &DocFields, field: &'static str) -> Result<Option<i64>, ParseError> {
    let invalid = || ParseError::InvalidField {
        doc: id.to_string(),
        field,
        expected: "an integer",
    };
    match present(doc, field) {
        None => Ok(None),
        Some(Value::Number(n)) => number_to_i64(n).map(Some).ok_or_else(invalid),
        Some(_) => Err(invalid()),
    }
}

fn number_to_i64(n: &serde_json::Number) -> Option<i64> {
    if let Some(i) = n.as_i64() {
        Some(i)
    } else if let Some(u) = n.as_u64() {
        Some(i64::try_from(u).unwrap_or(i64::MAX))
    } else {
        n.as_f64()
            .filter(|f| f.is_finite())
            .map(|f| f.trunc() as i64)
    }
}

/// The document's `timestamp`, read the same way the parsers read it.
/// `None` when absent, null or not a number. No normalization.
pub fn timestamp_of(doc: &DocFields) -> Option<i64> {
    match doc.get(fields::TIMESTAMP) {
        Some(Value::Number(n)) => number_to_i64(n),
        _ => None,
    }
}

fn category(id: &str, doc: &DocFields) -> Result<AlertCategory, ParseError> {
    let raw = opt_str(id, doc, fields::TYPE)?.ok_or_else(|| ParseError::MissingField {
        doc: id.to_string(),
        field: fields::TYPE,
    })?;
    AlertCategory::parse(&raw).ok_or(ParseError::UnknownCategory {
        doc: id.to_string(),
        raw,
    })
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Accept an arbitrary JSON body as a document. Anything but an object is
/// rejected (devices occasionally write a bare scalar to an alert node).
pub fn doc_fields(id: &str, body: Value) -> Result<DocFields, ParseError> {
    match body {
        Value::Object(m) => Ok(m),
        _ => Err(ParseError::NotAnObject { doc: id.to_string() }),
    }
}

/// Parse a primary-store alert node. `key` becomes the event's `source_id`.
///
/// The timestamp is returned as written by the device; normalization is the
/// caller's job so corrections can be logged in one place.
pub fn parse_primary_node(key: &str, doc: &DocFields, now: i64) -> Result<Event, ParseError> {
    let category = category(key, doc)?;
    Ok(Event {
        id: Uuid::new_v4(),
        source_id: if key.is_empty() {
            None
        } else {
            Some(key.to_string())
        },
        category,
        message: opt_str(key, doc, fields::MESSAGE)?.unwrap_or_default(),
        sensor_id: opt_str(key, doc, fields::SENSOR_ID)?.unwrap_or_default(),
        timestamp_millis: opt_i64(key, doc, fields::TIMESTAMP)?.unwrap_or(now),
        acknowledged: opt_bool(key, doc, fields::ACKNOWLEDGED)?.unwrap_or(false),
    })
}

/// Parse a durable-store document.
pub fn parse_durable_doc(id: &str, doc: &DocFields, now: i64) -> Result<DurableRecord, ParseError> {
    let category = category(id, doc)?;
    let origin_id = opt_str(id, doc, fields::ORIGIN_ID)?
        .filter(|s| !s.is_empty())
        .map(LogicalKey::new);
    Ok(DurableRecord {
        id: id.to_string(),
        category,
        message: opt_str(id, doc, fields::MESSAGE)?.unwrap_or_default(),
        sensor_id: opt_str(id, doc, fields::SENSOR_ID)?.unwrap_or_default(),
        timestamp_millis: opt_i64(id, doc, fields::TIMESTAMP)?.unwrap_or(now),
        acknowledged: opt_bool(id, doc, fields::ACKNOWLEDGED)?.unwrap_or(false),
        origin_id,
    })
}

// ---------------------------------------------------------------------------
// Serialization
// ---------------------------------------------------------------------------

fn base_fields(
    category: AlertCategory,
    message: &str,
    sensor_id: &str,
    timestamp_millis: i64,
    acknowledged: bool,
) -> DocFields {
    let mut m = Map::new();
    m.insert(fields::TYPE.into(), Value::from(category.as_str()));
    m.insert(fields::MESSAGE.into(), Value::from(message));
    m.insert(fields::TIMESTAMP.into(), Value::from(timestamp_millis));
    m.insert(fields::SENSOR_ID.into(), Value::from(sensor_id));
    m.insert(fields::ACKNOWLEDGED.into(), Value::from(acknowledged));
    m
}

/// Document body for a durable record (full overwrite).
pub fn record_fields(r: &DurableRecord) -> DocFields {
    let mut m = base_fields(
        r.category,
        &r.message,
        &r.sensor_id,
        r.timestamp_millis,
        r.acknowledged,
    );
    if let Some(origin) = &r.origin_id {
        m.insert(fields::ORIGIN_ID.into(), Value::from(origin.as_str()));
    }
    m
}

/// Document body for a locally raised alert (no provenance).
pub fn local_alert_fields(a: &NewLocalAlert, timestamp_millis: i64) -> DocFields {
    base_fields(a.category, &a.message, &a.sensor_id, timestamp_millis, false)
}
