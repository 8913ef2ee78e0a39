//! Metadata value type — the heterogeneous values a caller puts in a block's
//! metadata mapping before it is decomposed into typed property rows.

use std::fmt;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A single metadata value.
///
/// Covers everything the property table can store:
/// - Scalars: Bool, Int, Float, String
/// - Temporal: Date, DateTime
/// - Enumerations: Select (one choice), MultiSelect (several choices)
/// - Structured: List, Map (stored as JSON)
///
/// `Null` exists so callers can express "remove this key" in a patch. It is
/// never written as a property row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum MetaValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
    Select(String),
    MultiSelect(Vec<String>),
    List(Vec<MetaValue>),
    Map(IndexMap<String, MetaValue>),
}

// ============================================================================
// Type checking
// ============================================================================

impl MetaValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            MetaValue::Null => "null",
            MetaValue::Bool(_) => "bool",
            MetaValue::Int(_) => "int",
            MetaValue::Float(_) => "float",
            MetaValue::String(_) => "string",
            MetaValue::Date(_) => "date",
            MetaValue::DateTime(_) => "datetime",
            MetaValue::Select(_) => "select",
            MetaValue::MultiSelect(_) => "multi_select",
            MetaValue::List(_) => "list",
            MetaValue::Map(_) => "map",
        }
    }

    pub fn is_null(&self) -> bool { matches!(self, MetaValue::Null) }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetaValue::String(s) | MetaValue::Select(s) => Some(s),
            _ => None,
        }
    }
}

// ============================================================================
// JSON bridge
// ============================================================================

impl MetaValue {
    /// Lower to plain JSON. Temporal and select values become strings.
    ///
    /// Returns `None` for non-finite floats, which JSON cannot carry.
    pub fn to_json(&self) -> Option<serde_json::Value> {
        use serde_json::Value as J;
        Some(match self {
            MetaValue::Null => J::Null,
            MetaValue::Bool(b) => J::Bool(*b),
            MetaValue::Int(i) => J::from(*i),
            MetaValue::Float(f) => J::Number(serde_json::Number::from_f64(*f)?),
            MetaValue::String(s) | MetaValue::Select(s) => J::String(s.clone()),
            MetaValue::Date(d) => J::String(d.format("%Y-%m-%d").to_string()),
            MetaValue::DateTime(dt) => J::String(format_datetime(dt)),
            MetaValue::MultiSelect(items) => {
                J::Array(items.iter().cloned().map(J::String).collect())
            }
            MetaValue::List(items) => {
                J::Array(items.iter().map(MetaValue::to_json).collect::<Option<_>>()?)
            }
            MetaValue::Map(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(k.clone(), v.to_json()?);
                }
                J::Object(out)
            }
        })
    }

    /// Lift plain JSON. Strings stay strings; typing them further is the
    /// schema registry's job.
    pub fn from_json(value: &serde_json::Value) -> Self {
        use serde_json::Value as J;
        match value {
            J::Null => MetaValue::Null,
            J::Bool(b) => MetaValue::Bool(*b),
            J::Number(n) => match n.as_i64() {
                Some(i) => MetaValue::Int(i),
                None => MetaValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            J::String(s) => MetaValue::String(s.clone()),
            J::Array(items) => MetaValue::List(items.iter().map(MetaValue::from_json).collect()),
            J::Object(map) => MetaValue::Map(
                map.iter().map(|(k, v)| (k.clone(), MetaValue::from_json(v))).collect(),
            ),
        }
    }
}

/// Canonical datetime text: RFC 3339, UTC, `Z` suffix, sub-seconds only when present.
pub fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

// ============================================================================
// Conversions (From impls)
// ============================================================================

impl From<bool> for MetaValue { fn from(v: bool) -> Self { MetaValue::Bool(v) } }
impl From<i32> for MetaValue { fn from(v: i32) -> Self { MetaValue::Int(v as i64) } }
impl From<i64> for MetaValue { fn from(v: i64) -> Self { MetaValue::Int(v) } }
impl From<f64> for MetaValue { fn from(v: f64) -> Self { MetaValue::Float(v) } }
impl From<String> for MetaValue { fn from(v: String) -> Self { MetaValue::String(v) } }
impl From<&str> for MetaValue { fn from(v: &str) -> Self { MetaValue::String(v.to_owned()) } }
impl From<NaiveDate> for MetaValue { fn from(v: NaiveDate) -> Self { MetaValue::Date(v) } }
impl From<DateTime<Utc>> for MetaValue { fn from(v: DateTime<Utc>) -> Self { MetaValue::DateTime(v) } }
impl<T: Into<MetaValue>> From<Vec<T>> for MetaValue {
    fn from(v: Vec<T>) -> Self { MetaValue::List(v.into_iter().map(Into::into).collect()) }
}
impl<T: Into<MetaValue>> From<Option<T>> for MetaValue {
    fn from(v: Option<T>) -> Self { v.map(Into::into).unwrap_or(MetaValue::Null) }
}

// ============================================================================
// Display
// ============================================================================

impl fmt::Display for MetaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetaValue::Null => write!(f, "null"),
            MetaValue::Bool(b) => write!(f, "{b}"),
            MetaValue::Int(i) => write!(f, "{i}"),
            MetaValue::Float(v) => write!(f, "{v}"),
            MetaValue::String(s) => write!(f, "\"{}\"", s.replace('"', "\\\"")),
            MetaValue::Date(d) => write!(f, "{d}"),
            MetaValue::DateTime(dt) => write!(f, "{}", format_datetime(dt)),
            MetaValue::Select(s) => write!(f, "{s}"),
            MetaValue::MultiSelect(items) => write!(f, "{{{}}}", items.join(", ")),
            MetaValue::List(l) => {
                write!(f, "[")?;
                for (i, v) in l.iter().enumerate() {
                    if i > 0 { write!(f, ", ")?; }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
            MetaValue::Map(m) => {
                write!(f, "{{")?;
                for (i, (k, v)) in m.iter().enumerate() {
                    if i > 0 { write!(f, ", ")?; }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}
