//! Property Mapper — metadata mapping ⇄ property rows.
//!
//! `decompose` walks metadata in insertion order and emits one row per key
//! that has a value. `Null` values produce no row: absence of a row means
//! "never set". `compose` is the inverse and rebuilds the original value
//! types from `property_type`.

use chrono::{DateTime, NaiveDate, Utc};

use super::{Property, PropertyType, PropertyValue};
use crate::model::{BlockId, MetaValue, Metadata};
use crate::{Error, Result};

/// Storage type for a value, or `None` for `Null`.
pub fn infer_type(value: &MetaValue) -> Option<PropertyType> {
    Some(match value {
        MetaValue::Null => return None,
        MetaValue::Bool(_) => PropertyType::Bool,
        MetaValue::Int(_) | MetaValue::Float(_) => PropertyType::Number,
        MetaValue::String(_) => PropertyType::Text,
        MetaValue::Date(_) | MetaValue::DateTime(_) => PropertyType::Date,
        MetaValue::Select(_) => PropertyType::Select,
        MetaValue::MultiSelect(_) => PropertyType::MultiSelect,
        MetaValue::List(_) | MetaValue::Map(_) => PropertyType::Json,
    })
}

/// Split metadata into property rows for `block_id`.
pub fn decompose(block_id: &BlockId, metadata: &Metadata) -> Result<Vec<Property>> {
    decompose_with(block_id, metadata, &[])
}

/// Like [`decompose`], marking the keys in `computed_keys` as derived.
pub fn decompose_with(
    block_id: &BlockId,
    metadata: &Metadata,
    computed_keys: &[String],
) -> Result<Vec<Property>> {
    let mut rows = Vec::with_capacity(metadata.len());
    for (name, value) in metadata {
        let Some(ty) = infer_type(value) else { continue };
        let prop = Property::from_raw(block_id.clone(), name.clone(), ty, value)?
            .computed(computed_keys.iter().any(|k| k == name));
        rows.push(prop);
    }
    Ok(rows)
}

/// Rebuild a metadata mapping from property rows, in row order.
pub fn compose(properties: &[Property]) -> Result<Metadata> {
    let mut metadata = Metadata::with_capacity(properties.len());
    for prop in properties {
        metadata.insert(prop.name.clone(), decode(prop)?);
    }
    Ok(metadata)
}

/// Decode a single row back to its caller-side value.
pub fn decode(prop: &Property) -> Result<MetaValue> {
    let corrupt = |why: String| Error::InvalidPropertyValue { name: prop.name.clone(), reason: why };
    let value = match (prop.property_type(), prop.value()) {
        (PropertyType::Text, PropertyValue::Text(t)) => MetaValue::String(t.clone()),
        (PropertyType::Select, PropertyValue::Text(t)) => MetaValue::Select(t.clone()),
        (PropertyType::Bool, PropertyValue::Text(t)) => match t.as_str() {
            "true" => MetaValue::Bool(true),
            "false" => MetaValue::Bool(false),
            other => return Err(corrupt(format!("bad bool encoding {other:?}"))),
        },
        (PropertyType::Date, PropertyValue::Text(t)) => parse_date(t)
            .ok_or_else(|| corrupt(format!("bad date encoding {t:?}")))?,
        (PropertyType::Number, PropertyValue::Number(n)) => match n.as_i64() {
            Some(i) => MetaValue::Int(i),
            None => MetaValue::Float(n.as_f64().ok_or_else(|| corrupt(format!("bad number {n}")))?),
        },
        (PropertyType::Json, PropertyValue::Json(j)) => MetaValue::from_json(&unwrap_double_encoded(j)),
        (PropertyType::MultiSelect, PropertyValue::Json(j)) => {
            let items = unwrap_double_encoded(j);
            let items = items
                .as_array()
                .and_then(|a| a.iter().map(|v| v.as_str().map(str::to_owned)).collect::<Option<Vec<_>>>())
                .ok_or_else(|| corrupt("multi_select is not an array of strings".into()))?;
            MetaValue::MultiSelect(items)
        }
        (ty, v) => return Err(corrupt(format!("{ty} stored in {:?} column", v.column()))),
    };
    Ok(value)
}

fn parse_date(text: &str) -> Option<MetaValue> {
    if let Ok(d) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Some(MetaValue::Date(d));
    }
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|dt| MetaValue::DateTime(dt.with_timezone(&Utc)))
}

/// JSON that travelled through a driver as a string of JSON arrives as
/// `"[...]"` / `"{...}"`. Structured columns never hold bare strings, so
/// such a value is unwrapped exactly once.
fn unwrap_double_encoded(value: &serde_json::Value) -> serde_json::Value {
    if let serde_json::Value::String(s) = value {
        let trimmed = s.trim_start();
        if trimmed.starts_with('[') || trimmed.starts_with('{') {
            if let Ok(inner) = serde_json::from_str::<serde_json::Value>(s) {
                return inner;
            }
        }
    }
    value.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use serde_json::json;

    fn bid() -> BlockId {
        BlockId::from("b1")
    }

    #[test]
    fn test_scenario_priority_done_list() {
        let m = metadata! {
            "priority" => 1,
            "done" => false,
            "tags_extra" => vec!["a", "b"],
        };
        let rows = decompose(&bid(), &m).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1].property_type(), PropertyType::Bool);
        assert_eq!(rows[2].property_type(), PropertyType::Json);

        let back = compose(&rows).unwrap();
        assert_eq!(back, m);
        assert_eq!(back["done"], MetaValue::Bool(false));
    }

    #[test]
    fn test_null_values_write_no_row() {
        let mut m = metadata! { "title" => "x" };
        m.insert("gone".into(), MetaValue::Null);
        let rows = decompose(&bid(), &m).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "title");
    }

    #[test]
    fn test_order_is_insertion_order() {
        let m = metadata! { "z" => 1, "a" => 2, "m" => 3 };
        let names: Vec<_> = decompose(&bid(), &m).unwrap().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["z", "a", "m"]);
    }

    #[test]
    fn test_computed_keys_flagged() {
        let m = metadata! { "summary" => "auto", "title" => "mine" };
        let rows = decompose_with(&bid(), &m, &["summary".to_string()]).unwrap();
        assert!(rows[0].is_computed);
        assert!(!rows[1].is_computed);
    }

    #[test]
    fn test_double_encoded_json_is_unwrapped_once() {
        let twice = json!("{\"a\": [1, 2]}");
        let p = Property::from_columns(bid(), "cfg", PropertyType::Json, None, None, Some(twice)).unwrap();
        let m = compose(&[p]).unwrap();
        let expected: MetaValue = [("a", MetaValue::from(vec![1, 2]))].into_iter().collect();
        assert_eq!(m["cfg"], expected);

        let ms = Property::from_columns(
            bid(), "labels", PropertyType::MultiSelect, None, None, Some(json!("[\"x\",\"y\"]")),
        ).unwrap();
        assert_eq!(decode(&ms).unwrap(), MetaValue::MultiSelect(vec!["x".into(), "y".into()]));

        // Unwrapping happens once: a triple-encoded payload stays a string.
        let thrice = json!(serde_json::to_string(&json!("[1]")).unwrap());
        let p = Property::from_columns(bid(), "deep", PropertyType::Json, None, None, Some(thrice)).unwrap();
        assert_eq!(decode(&p).unwrap(), MetaValue::String("\"[1]\"".into()));
    }

    #[test]
    fn test_select_and_dates_round_trip() {
        let m = metadata! {
            "status" => MetaValue::Select("in_progress".into()),
            "labels" => MetaValue::MultiSelect(vec!["ui".into(), "api".into()]),
            "due" => NaiveDate::from_ymd_opt(2025, 12, 24).unwrap(),
            "seen" => DateTime::parse_from_rfc3339("2025-01-02T03:04:05.123Z").unwrap().with_timezone(&Utc),
        };
        assert_eq!(compose(&decompose(&bid(), &m).unwrap()).unwrap(), m);
    }

    #[test]
    fn test_text_that_looks_like_bool_stays_text() {
        let m = metadata! { "flag" => "true", "n" => "42" };
        assert_eq!(compose(&decompose(&bid(), &m).unwrap()).unwrap(), m);
    }

    #[test]
    fn test_non_finite_float_rejected() {
        let m = metadata! { "score" => f64::INFINITY };
        assert!(matches!(decompose(&bid(), &m), Err(Error::InvalidPropertyValue { .. })));
    }

    // ------------------------------------------------------------------------
    // Round-trip law
    // ------------------------------------------------------------------------

    fn json_native() -> impl Strategy<Value = MetaValue> {
        let leaf = prop_oneof![
            Just(MetaValue::Null),
            any::<bool>().prop_map(MetaValue::Bool),
            any::<i64>().prop_map(MetaValue::Int),
            (-1.0e12f64..1.0e12).prop_filter("fractional", |f| f.fract() != 0.0).prop_map(MetaValue::Float),
            "[a-zA-Z0-9 _\\-\n\t']{0,12}".prop_map(MetaValue::String),
        ];
        leaf.prop_recursive(3, 16, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(MetaValue::List),
                prop::collection::vec(("[a-z]{1,6}", inner), 0..4)
                    .prop_map(|kv| MetaValue::Map(kv.into_iter().collect())),
            ]
        })
    }

    fn top_level() -> impl Strategy<Value = MetaValue> {
        prop_oneof![
            any::<bool>().prop_map(MetaValue::Bool),
            any::<i64>().prop_map(MetaValue::Int),
            (-1.0e12f64..1.0e12).prop_filter("fractional", |f| f.fract() != 0.0).prop_map(MetaValue::Float),
            ".{0,16}".prop_map(MetaValue::String),
            (1i32..9999, 1u32..13, 1u32..29)
                .prop_map(|(y, m, d)| MetaValue::Date(NaiveDate::from_ymd_opt(y, m, d).unwrap())),
            (0i64..4_000_000_000).prop_map(|s| MetaValue::DateTime(DateTime::<Utc>::from_timestamp(s, 0).unwrap())),
            "[a-z_]{1,10}".prop_map(MetaValue::Select),
            prop::collection::vec("[a-z]{1,5}", 0..4).prop_map(MetaValue::MultiSelect),
            prop::collection::vec(json_native(), 0..4).prop_map(MetaValue::List),
            prop::collection::vec(("[a-z]{1,6}", json_native()), 0..4)
                .prop_map(|kv| MetaValue::Map(kv.into_iter().collect())),
        ]
    }

    proptest! {
        #[test]
        fn prop_compose_inverts_decompose(
            entries in prop::collection::vec(("[a-z][a-z0-9_]{0,8}", top_level()), 0..8)
        ) {
            let m: Metadata = entries.into_iter().collect();
            let rows = decompose(&bid(), &m).unwrap();
            prop_assert_eq!(rows.len(), m.len());
            prop_assert_eq!(compose(&rows).unwrap(), m);
        }

        #[test]
        fn prop_every_row_has_one_column(
            entries in prop::collection::vec(("[a-z]{1,8}", top_level()), 0..8)
        ) {
            let m: Metadata = entries.into_iter().collect();
            for row in decompose(&bid(), &m).unwrap() {
                let (t, n, j) = row.columns();
                let populated = [t.is_some(), n.is_some(), j.is_some()].iter().filter(|p| **p).count();
                prop_assert_eq!(populated, 1);
            }
        }
    }
}
