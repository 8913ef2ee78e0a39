//! Schema documents compiled for validation and read-time retyping.
//!
//! Validation is delegated to `jsonschema` (draft 7). The per-field shape
//! kept beside it only drives `reconstruct`: which stored values the
//! property table flattened and should be lifted back.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use indexmap::IndexMap;
use jsonschema::{Draft, JSONSchema};
use serde_json::Value as Json;

use crate::model::{MetaValue, Metadata};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Date,
    DateTime,
}

/// What a property declaration says about retyping its stored value.
#[derive(Debug, Clone, Default)]
struct FieldShape {
    /// `integer` declared without `number`.
    integer_only: bool,
    format: Option<Format>,
    enumerated: bool,
    items: Option<Box<FieldShape>>,
}

fn bad_schema(msg: impl Into<String>) -> Error {
    Error::ValidationError(format!("invalid schema: {}", msg.into()))
}

impl FieldShape {
    fn read(doc: &Json) -> Self {
        let types: Vec<&str> = match doc.get("type") {
            Some(Json::String(t)) => vec![t.as_str()],
            Some(Json::Array(ts)) => ts.iter().filter_map(Json::as_str).collect(),
            _ => Vec::new(),
        };
        FieldShape {
            integer_only: types.contains(&"integer") && !types.contains(&"number"),
            format: match doc.get("format").and_then(Json::as_str) {
                Some("date") => Some(Format::Date),
                Some("date-time") => Some(Format::DateTime),
                _ => None,
            },
            enumerated: doc.get("enum").is_some(),
            items: doc.get("items").filter(|i| i.is_object()).map(|i| Box::new(FieldShape::read(i))),
        }
    }

    fn retype(&self, v: MetaValue) -> MetaValue {
        match v {
            MetaValue::Float(f)
                if f.fract() == 0.0 && self.integer_only && f >= i64::MIN as f64 && f < i64::MAX as f64 =>
            {
                MetaValue::Int(f as i64)
            }
            MetaValue::String(s) => match self.format {
                Some(Format::Date) => parse_naive_date(&s).map(MetaValue::Date).unwrap_or(MetaValue::String(s)),
                Some(Format::DateTime) => parse_datetime(&s).map(MetaValue::DateTime).unwrap_or(MetaValue::String(s)),
                None if self.enumerated => MetaValue::Select(s),
                None => MetaValue::String(s),
            },
            MetaValue::List(items)
                if self.items.as_ref().is_some_and(|i| i.enumerated)
                    && items.iter().all(|i| matches!(i, MetaValue::String(_))) =>
            {
                MetaValue::MultiSelect(
                    items
                        .into_iter()
                        .filter_map(|i| match i {
                            MetaValue::String(s) => Some(s),
                            _ => None,
                        })
                        .collect(),
                )
            }
            other => other,
        }
    }
}

fn parse_naive_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.with_timezone(&Utc))
}

/// A schema document in checkable form.
pub(crate) struct CompiledSchema {
    validator: JSONSchema,
    fields: IndexMap<String, FieldShape>,
}

impl fmt::Debug for CompiledSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledSchema").field("fields", &self.fields.keys()).finish_non_exhaustive()
    }
}

impl CompiledSchema {
    pub(crate) fn compile(doc: &Json) -> Result<Self> {
        let obj = doc.as_object().ok_or_else(|| bad_schema("schema must be a JSON object"))?;
        if obj.get("type").is_some_and(|t| t.as_str() != Some("object")) {
            return Err(bad_schema("top-level type must be \"object\""));
        }

        let validator = JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(doc)
            .map_err(|e| bad_schema(e.to_string()))?;

        let fields = obj
            .get("properties")
            .and_then(Json::as_object)
            .map(|props| props.iter().map(|(name, spec)| (name.clone(), FieldShape::read(spec))).collect())
            .unwrap_or_default();

        Ok(Self { validator, fields })
    }

    /// Null values count as absent.
    pub(crate) fn violations(&self, metadata: &Metadata) -> Vec<String> {
        let mut out = Vec::new();
        let mut instance = serde_json::Map::with_capacity(metadata.len());
        for (name, value) in metadata.iter().filter(|(_, v)| !v.is_null()) {
            match value.to_json() {
                Some(json) => {
                    instance.insert(name.clone(), json);
                }
                None => out.push(format!("'{name}' holds a non-finite number")),
            }
        }

        let instance = Json::Object(instance);
        if let Err(errors) = self.validator.validate(&instance) {
            for error in errors {
                let path = error.instance_path.to_string();
                if path.is_empty() {
                    out.push(error.to_string());
                } else {
                    out.push(format!("'{path}': {error}"));
                }
            }
        }
        out
    }

    pub(crate) fn reconstruct(&self, metadata: Metadata) -> Metadata {
        metadata
            .into_iter()
            .map(|(name, value)| {
                let value = match self.fields.get(&name) {
                    Some(shape) => shape.retype(value),
                    None => value,
                };
                (name, value)
            })
            .collect()
    }
}
