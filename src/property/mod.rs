//! # Property Value Model
//!
//! One decomposed metadata key/value pair, stored as a typed row of the
//! `properties` table. The row has three nullable value columns and exactly
//! one of them is populated:
//!
//! | `PropertyType` | Column | Encoding |
//! |----------------|--------|----------|
//! | `text`         | text   | as-is |
//! | `number`       | number | JSON number (int/float kept apart) |
//! | `json`         | json   | JSON array/object |
//! | `bool`         | text   | `"true"` / `"false"` |
//! | `date`         | text   | `YYYY-MM-DD` or RFC 3339 UTC |
//! | `select`       | text   | the choice |
//! | `multi_select` | json   | array of strings |
//!
//! `PropertyValue` makes "exactly one column" structural. The raw-row
//! constructor [`Property::from_columns`] re-checks it for rows that arrive
//! as three nullable columns from a driver.

pub mod escape;
pub mod mapper;

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{BlockId, MetaValue};
use crate::{Error, Result};

pub use escape::{escape_literal, quote_literal};
pub use mapper::{compose, decode, decompose, decompose_with, infer_type};

// ============================================================================
// Types
// ============================================================================

/// Declared type of a property row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    Text,
    Number,
    Json,
    Bool,
    Date,
    Select,
    MultiSelect,
}

/// Which of the three value columns a type lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Text,
    Number,
    Json,
}

impl PropertyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyType::Text => "text",
            PropertyType::Number => "number",
            PropertyType::Json => "json",
            PropertyType::Bool => "bool",
            PropertyType::Date => "date",
            PropertyType::Select => "select",
            PropertyType::MultiSelect => "multi_select",
        }
    }

    pub fn column(&self) -> Column {
        match self {
            PropertyType::Text | PropertyType::Bool | PropertyType::Date | PropertyType::Select => Column::Text,
            PropertyType::Number => Column::Number,
            PropertyType::Json | PropertyType::MultiSelect => Column::Json,
        }
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The populated value column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "column", content = "value", rename_all = "snake_case")]
pub enum PropertyValue {
    Text(String),
    Number(serde_json::Number),
    Json(serde_json::Value),
}

impl PropertyValue {
    pub fn column(&self) -> Column {
        match self {
            PropertyValue::Text(_) => Column::Text,
            PropertyValue::Number(_) => Column::Number,
            PropertyValue::Json(_) => Column::Json,
        }
    }
}

// ============================================================================
// Property
// ============================================================================

/// A row of the `properties` table. Identity is `(block_id, name)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PropertyRecord", into = "PropertyRecord")]
pub struct Property {
    pub block_id: BlockId,
    pub name: String,
    property_type: PropertyType,
    value: PropertyValue,
    pub is_computed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn invalid(name: &str, reason: impl Into<String>) -> Error {
    Error::InvalidPropertyValue { name: name.to_owned(), reason: reason.into() }
}

impl Property {
    /// Build from an already-encoded column value.
    ///
    /// Fails when the column does not belong to `property_type` or the text
    /// does not follow the type's canonical encoding.
    pub fn new(
        block_id: BlockId,
        name: impl Into<String>,
        property_type: PropertyType,
        value: PropertyValue,
    ) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(invalid(&name, "property name must not be empty"));
        }
        if value.column() != property_type.column() {
            return Err(invalid(
                &name,
                format!("{property_type} values live in the {:?} column, got {:?}", property_type.column(), value.column()),
            ));
        }
        match (&property_type, &value) {
            (_, PropertyValue::Json(serde_json::Value::Null)) => {
                return Err(invalid(&name, "json column holds null"));
            }
            (PropertyType::Bool, PropertyValue::Text(t)) if t != "true" && t != "false" => {
                return Err(invalid(&name, format!("bool must be encoded as \"true\"/\"false\", got {t:?}")));
            }
            (PropertyType::Date, PropertyValue::Text(t)) if !is_canonical_date(t) => {
                return Err(invalid(&name, format!("date must be ISO-8601, got {t:?}")));
            }
            // A string here is a double-encoded array; decoding unwraps it.
            (PropertyType::MultiSelect, PropertyValue::Json(j)) if !is_string_array(j) && !j.is_string() => {
                return Err(invalid(&name, "multi_select must be an array of strings"));
            }
            _ => {}
        }
        let now = Utc::now();
        Ok(Self {
            block_id,
            name,
            property_type,
            value,
            is_computed: false,
            created_at: now,
            updated_at: now,
        })
    }

    /// Build from a caller-side value, encoding it for `property_type`.
    ///
    /// Fails when the value's runtime type cannot be stored as `property_type`
    /// (a list assigned to `text`, a string assigned to `number`, ...).
    pub fn from_raw(
        block_id: BlockId,
        name: impl Into<String>,
        property_type: PropertyType,
        raw: &MetaValue,
    ) -> Result<Self> {
        let name = name.into();
        let mismatch = || invalid(&name, format!("{} value cannot be stored as {property_type}", raw.type_name()));
        let value = match (property_type, raw) {
            (_, MetaValue::Null) => return Err(invalid(&name, "null has no storage column")),
            (PropertyType::Text, MetaValue::String(s)) => PropertyValue::Text(s.clone()),
            (PropertyType::Number, MetaValue::Int(i)) => PropertyValue::Number((*i).into()),
            (PropertyType::Number, MetaValue::Float(f)) => PropertyValue::Number(
                serde_json::Number::from_f64(*f)
                    .ok_or_else(|| invalid(&name, format!("non-finite number {f}")))?,
            ),
            (PropertyType::Bool, MetaValue::Bool(b)) => PropertyValue::Text(b.to_string()),
            (PropertyType::Date, MetaValue::Date(d)) => PropertyValue::Text(d.format("%Y-%m-%d").to_string()),
            (PropertyType::Date, MetaValue::DateTime(dt)) => {
                PropertyValue::Text(crate::model::value::format_datetime(dt))
            }
            (PropertyType::Select, MetaValue::Select(s) | MetaValue::String(s)) => PropertyValue::Text(s.clone()),
            (PropertyType::MultiSelect, MetaValue::MultiSelect(items)) => {
                PropertyValue::Json(items.iter().cloned().map(serde_json::Value::String).collect())
            }
            (PropertyType::MultiSelect, MetaValue::List(items)) => {
                let strings = items
                    .iter()
                    .map(|v| match v {
                        MetaValue::String(s) | MetaValue::Select(s) => Some(serde_json::Value::String(s.clone())),
                        _ => None,
                    })
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(mismatch)?;
                PropertyValue::Json(serde_json::Value::Array(strings))
            }
            (PropertyType::Json, MetaValue::List(_) | MetaValue::Map(_)) => PropertyValue::Json(
                raw.to_json()
                    .ok_or_else(|| invalid(&name, "structured value contains a non-finite number"))?,
            ),
            _ => return Err(mismatch()),
        };
        Self::new(block_id, name, property_type, value)
    }

    /// Build from the three nullable columns of a raw row.
    ///
    /// Fails unless exactly one column is non-null.
    pub fn from_columns(
        block_id: BlockId,
        name: impl Into<String>,
        property_type: PropertyType,
        text: Option<String>,
        number: Option<serde_json::Number>,
        json: Option<serde_json::Value>,
    ) -> Result<Self> {
        let name = name.into();
        let json = json.filter(|j| !j.is_null());
        let value = match (text, number, json) {
            (Some(t), None, None) => PropertyValue::Text(t),
            (None, Some(n), None) => PropertyValue::Number(n),
            (None, None, Some(j)) => PropertyValue::Json(j),
            (t, n, j) => {
                let populated = [t.is_some(), n.is_some(), j.is_some()].iter().filter(|p| **p).count();
                return Err(invalid(&name, format!("exactly one value column must be set, {populated} are")));
            }
        };
        Self::new(block_id, name, property_type, value)
    }

    pub fn property_type(&self) -> PropertyType {
        self.property_type
    }

    pub fn value(&self) -> &PropertyValue {
        &self.value
    }

    /// `(property_value_text, property_value_number, property_value_json)`.
    pub fn columns(&self) -> (Option<&str>, Option<&serde_json::Number>, Option<&serde_json::Value>) {
        match &self.value {
            PropertyValue::Text(t) => (Some(t), None, None),
            PropertyValue::Number(n) => (None, Some(n), None),
            PropertyValue::Json(j) => (None, None, Some(j)),
        }
    }

    pub fn computed(mut self, is_computed: bool) -> Self {
        self.is_computed = is_computed;
        self
    }

    /// Same stored content, ignoring timestamps.
    pub fn same_content(&self, other: &Property) -> bool {
        self.property_type == other.property_type
            && self.value == other.value
            && self.is_computed == other.is_computed
    }

    /// Evaluate a filter against this row's stored column.
    pub fn matches(&self, op: &FilterOp) -> bool {
        use std::cmp::Ordering;

        let operand = match op {
            FilterOp::Exists => return true,
            FilterOp::Eq(v) | FilterOp::Ne(v) | FilterOp::Gt(v) | FilterOp::Gte(v) | FilterOp::Lt(v) | FilterOp::Lte(v) => v,
        };
        let Some(operand) = encode_operand(operand) else {
            return matches!(op, FilterOp::Ne(_));
        };
        let ord: Option<Ordering> = match (&self.value, &operand) {
            (PropertyValue::Number(a), PropertyValue::Number(b)) => match (a.as_i64(), b.as_i64()) {
                (Some(x), Some(y)) => Some(x.cmp(&y)),
                _ => a.as_f64().zip(b.as_f64()).and_then(|(x, y)| x.partial_cmp(&y)),
            },
            (PropertyValue::Text(a), PropertyValue::Text(b)) => Some(a.as_str().cmp(b.as_str())),
            (PropertyValue::Json(a), PropertyValue::Json(b)) => {
                if a == b { Some(Ordering::Equal) } else { None }
            }
            _ => None,
        };
        match op {
            FilterOp::Eq(_) => ord == Some(Ordering::Equal),
            FilterOp::Ne(_) => ord != Some(Ordering::Equal),
            FilterOp::Gt(_) => ord == Some(Ordering::Greater),
            FilterOp::Gte(_) => matches!(ord, Some(Ordering::Greater | Ordering::Equal)),
            FilterOp::Lt(_) => ord == Some(Ordering::Less),
            FilterOp::Lte(_) => matches!(ord, Some(Ordering::Less | Ordering::Equal)),
            FilterOp::Exists => true,
        }
    }
}

/// Column value a filter operand compares against, `None` if it has none.
pub(crate) fn encode_operand(value: &MetaValue) -> Option<PropertyValue> {
    let ty = infer_type(value)?;
    Property::from_raw(BlockId::from("_"), "_", ty, value).ok().map(|p| p.value)
}

fn is_canonical_date(text: &str) -> bool {
    NaiveDate::parse_from_str(text, "%Y-%m-%d").is_ok() || DateTime::parse_from_rfc3339(text).is_ok()
}

fn is_string_array(value: &serde_json::Value) -> bool {
    value.as_array().is_some_and(|items| items.iter().all(serde_json::Value::is_string))
}

// ============================================================================
// Raw row shape
// ============================================================================

/// Column-for-column shape of a `properties` row, used for serde.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyRecord {
    pub block_id: BlockId,
    pub property_name: String,
    pub property_type: PropertyType,
    pub property_value_text: Option<String>,
    pub property_value_number: Option<serde_json::Number>,
    pub property_value_json: Option<serde_json::Value>,
    #[serde(default)]
    pub is_computed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<PropertyRecord> for Property {
    type Error = Error;

    fn try_from(rec: PropertyRecord) -> Result<Self> {
        let mut prop = Property::from_columns(
            rec.block_id,
            rec.property_name,
            rec.property_type,
            rec.property_value_text,
            rec.property_value_number,
            rec.property_value_json,
        )?;
        prop.is_computed = rec.is_computed;
        prop.created_at = rec.created_at;
        prop.updated_at = rec.updated_at;
        Ok(prop)
    }
}

impl From<Property> for PropertyRecord {
    fn from(p: Property) -> Self {
        let (text, number, json) = match p.value {
            PropertyValue::Text(t) => (Some(t), None, None),
            PropertyValue::Number(n) => (None, Some(n), None),
            PropertyValue::Json(j) => (None, None, Some(j)),
        };
        PropertyRecord {
            block_id: p.block_id,
            property_name: p.name,
            property_type: p.property_type,
            property_value_text: text,
            property_value_number: number,
            property_value_json: json,
            is_computed: p.is_computed,
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}

// ============================================================================
// Filters
// ============================================================================

/// Predicate on a single property's stored value.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterOp {
    Eq(MetaValue),
    Ne(MetaValue),
    Gt(MetaValue),
    Gte(MetaValue),
    Lt(MetaValue),
    Lte(MetaValue),
    Exists,
}

/// Metadata-content filter, evaluated against property rows. A block
/// without a row for `name` never matches.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyFilter {
    pub name: String,
    pub op: FilterOp,
}

impl PropertyFilter {
    pub fn new(name: impl Into<String>, op: FilterOp) -> Self {
        Self { name: name.into(), op }
    }

    pub fn eq(name: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        Self::new(name, FilterOp::Eq(value.into()))
    }

    pub fn exists(name: impl Into<String>) -> Self {
        Self::new(name, FilterOp::Exists)
    }
}
