//! Row validation and decoding against a table's current schema.
//!
//! Inbound records are untyped JSON objects; [`validate`] turns them into a
//! [`Row`] of typed values, collecting every failing field before returning.
//! Outbound, [`physical_row`] reads a store row into raw values and
//! [`decode_row`] maps them back to logical JSON values, passing through any
//! physical column the schema does not declare.

use crate::libs::config::UnknownFieldPolicy;
use crate::libs::error::{FieldError, NON_FIELD_ERRORS, Result, TableError};
use crate::libs::schema::{ColumnName, TableSchema};
use crate::libs::types::LogicalType;
use indexmap::IndexMap;
use serde_json::{Map, Number, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row as _};

const REQUIRED: &str = "This field is required.";
const NOT_NULL: &str = "This field may not be null.";
const NOT_STRING: &str = "Not a valid string.";
const NOT_NUMBER: &str = "A valid number is required.";
const NOT_BOOLEAN: &str = "Must be a valid boolean.";
const UNKNOWN: &str = "Unknown field.";

/// Largest magnitude at which every integer is exactly representable as f64.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Typed value of one validated field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Boolean(bool),
}

impl FieldValue {
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Text(s) => Value::String(s.clone()),
            FieldValue::Number(n) => number_json(*n),
            FieldValue::Boolean(b) => Value::Bool(*b),
        }
    }
}

/// A record validated against the schema of the moment. Never persisted as such.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    values: IndexMap<ColumnName, FieldValue>,
}

impl Row {
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.values.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ColumnName, &FieldValue)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Raw value as read from the store, before schema interpretation.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl RawValue {
    fn to_json(&self) -> Value {
        match self {
            RawValue::Null => Value::Null,
            RawValue::Integer(i) => Value::from(*i),
            RawValue::Real(f) => Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
            RawValue::Text(s) => Value::String(s.clone()),
        }
    }
}

pub type PhysicalRow = Vec<(String, RawValue)>;

/// A decoded row keyed by physical column name, in physical column order.
pub type Record = IndexMap<String, Value>;

/// Validates `raw` against every column declared in `schema`.
pub fn validate(
    raw: &Map<String, Value>,
    schema: &TableSchema,
    policy: UnknownFieldPolicy,
) -> Result<Row> {
    let mut row = Row::default();
    let mut errors = Vec::new();

    for (name, ty) in schema.iter() {
        let Some(value) = raw.get(name.as_str()) else {
            errors.push(FieldError::new(name.as_str(), REQUIRED));
            continue;
        };
        match coerce(value, *ty) {
            Ok(v) => {
                row.values.insert(name.clone(), v);
            }
            Err(reason) => errors.push(FieldError::new(name.as_str(), reason)),
        }
    }

    if policy == UnknownFieldPolicy::Reject {
        for key in raw.keys().filter(|k| !schema.contains(k)) {
            errors.push(FieldError::new(key.as_str(), UNKNOWN));
        }
    }

    if errors.is_empty() {
        Ok(row)
    } else {
        Err(TableError::Validation(errors))
    }
}

/// Like [`validate`] but accepts any JSON value; non-objects are rejected.
pub fn validate_value(raw: &Value, schema: &TableSchema, policy: UnknownFieldPolicy) -> Result<Row> {
    match raw.as_object() {
        Some(map) => validate(map, schema, policy),
        None => Err(TableError::Validation(vec![FieldError::new(
            NON_FIELD_ERRORS,
            format!("Invalid data. Expected a dictionary, but got {}.", json_kind(raw)),
        )])),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

fn coerce(value: &Value, ty: LogicalType) -> std::result::Result<FieldValue, &'static str> {
    if value.is_null() {
        return Err(NOT_NULL);
    }
    match ty {
        LogicalType::String => match value {
            Value::String(s) => Ok(FieldValue::Text(s.clone())),
            Value::Number(n) => Ok(FieldValue::Text(n.to_string())),
            _ => Err(NOT_STRING),
        },
        LogicalType::Number => match value {
            Value::Number(n) => n
                .as_f64()
                .filter(|f| f.is_finite())
                .map(FieldValue::Number)
                .ok_or(NOT_NUMBER),
            Value::String(s) => parse_number(s).map(FieldValue::Number).ok_or(NOT_NUMBER),
            _ => Err(NOT_NUMBER),
        },
        LogicalType::Boolean => match value {
            Value::Bool(b) => Ok(FieldValue::Boolean(*b)),
            Value::Number(n) => match n.as_f64() {
                Some(f) if f == 1.0 => Ok(FieldValue::Boolean(true)),
                Some(f) if f == 0.0 => Ok(FieldValue::Boolean(false)),
                _ => Err(NOT_BOOLEAN),
            },
            Value::String(s) => parse_bool(s).map(FieldValue::Boolean).ok_or(NOT_BOOLEAN),
            _ => Err(NOT_BOOLEAN),
        },
    }
}

fn parse_number(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|f| f.is_finite())
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "on" | "1" => Some(true),
        "false" | "f" | "no" | "n" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// Integral values come back as JSON integers so `31` round-trips as `31`.
fn number_json(f: f64) -> Value {
    if f.is_finite() && f.fract() == 0.0 && f.abs() <= MAX_SAFE_INTEGER {
        Value::from(f as i64)
    } else {
        Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
    }
}

fn decode_value(raw: &RawValue, ty: LogicalType) -> Option<Value> {
    match (raw, ty) {
        (RawValue::Null, _) => Some(Value::Null),

        (RawValue::Text(s), LogicalType::String) => Some(Value::String(s.clone())),
        (RawValue::Integer(i), LogicalType::String) => Some(Value::String(i.to_string())),
        (RawValue::Real(f), LogicalType::String) => Some(Value::String(f.to_string())),

        (RawValue::Integer(i), LogicalType::Number) => Some(Value::from(*i)),
        (RawValue::Real(f), LogicalType::Number) => Some(number_json(*f)),
        (RawValue::Text(s), LogicalType::Number) => parse_number(s).map(number_json),

        (RawValue::Integer(0), LogicalType::Boolean) => Some(Value::Bool(false)),
        (RawValue::Integer(1), LogicalType::Boolean) => Some(Value::Bool(true)),
        (RawValue::Integer(_), LogicalType::Boolean) => None,
        (RawValue::Real(f), LogicalType::Boolean) if *f == 0.0 => Some(Value::Bool(false)),
        (RawValue::Real(f), LogicalType::Boolean) if *f == 1.0 => Some(Value::Bool(true)),
        (RawValue::Real(_), LogicalType::Boolean) => None,
        (RawValue::Text(s), LogicalType::Boolean) => parse_bool(s).map(Value::Bool),
    }
}

/// Maps a physical row back to logical values.
///
/// Columns absent from `schema` (left over from an earlier layout, or added
/// outside the service) are passed through unchanged.
pub fn decode_row(physical: PhysicalRow, schema: &TableSchema) -> Record {
    let mut record = Record::with_capacity(physical.len());
    for (name, raw) in physical {
        let value = match schema.get(&name) {
            Some(ty) => decode_value(&raw, ty).unwrap_or_else(|| {
                log::warn!("column '{}' holds {:?}, not a {} value; passing it through", name, raw, ty);
                raw.to_json()
            }),
            None => raw.to_json(),
        };
        record.insert(name, value);
    }
    record
}

/// Reads every column of a store row as a raw value.
pub fn physical_row(row: &SqliteRow) -> PhysicalRow {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| {
            let value = match row.try_get::<Option<i64>, _>(i) {
                Ok(Some(v)) => RawValue::Integer(v),
                Ok(None) => RawValue::Null,
                Err(_) => match row.try_get::<Option<f64>, _>(i) {
                    Ok(Some(v)) => RawValue::Real(v),
                    Ok(None) => RawValue::Null,
                    Err(_) => match row.try_get::<Option<String>, _>(i) {
                        Ok(Some(v)) => RawValue::Text(v),
                        Ok(None) => RawValue::Null,
                        Err(_) => RawValue::Null, // blobs
                    },
                },
            };
            (col.name().to_string(), value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn people() -> TableSchema {
        TableSchema::from_titles(&["Name", "Age", "Active"], &["string", "number", "boolean"])
            .unwrap()
    }

    fn fields(err: TableError) -> Vec<(String, String)> {
        match err {
            TableError::Validation(errors) => {
                errors.into_iter().map(|e| (e.field, e.reason)).collect()
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn valid_record_is_typed() {
        let raw = json!({"name": "John", "age": "30", "active": "yes"});
        let row = validate(raw.as_object().unwrap(), &people(), UnknownFieldPolicy::Ignore).unwrap();
        assert_eq!(row.get("name"), Some(&FieldValue::Text("John".into())));
        assert_eq!(row.get("age"), Some(&FieldValue::Number(30.0)));
        assert_eq!(row.get("active"), Some(&FieldValue::Boolean(true)));
    }

    #[test]
    fn all_failures_are_collected() {
        let raw = json!({"last_name": "John", "age": "thirty", "active": null});
        let err = validate(raw.as_object().unwrap(), &people(), UnknownFieldPolicy::Ignore)
            .unwrap_err();
        assert_eq!(
            fields(err),
            vec![
                ("name".to_string(), REQUIRED.to_string()),
                ("age".to_string(), NOT_NUMBER.to_string()),
                ("active".to_string(), NOT_NULL.to_string()),
            ]
        );
    }

    #[test]
    fn unknown_fields_follow_policy() {
        let raw = json!({"name": "Ann", "age": 31, "active": false, "email": "a@b.c"});
        let map = raw.as_object().unwrap();
        assert!(validate(map, &people(), UnknownFieldPolicy::Ignore).is_ok());

        let err = validate(map, &people(), UnknownFieldPolicy::Reject).unwrap_err();
        assert_eq!(fields(err), vec![("email".to_string(), UNKNOWN.to_string())]);
    }

    #[test]
    fn coercion_edges() {
        assert_eq!(coerce(&json!(12), LogicalType::String), Ok(FieldValue::Text("12".into())));
        assert_eq!(coerce(&json!(true), LogicalType::String), Err(NOT_STRING));
        assert_eq!(coerce(&json!("NaN"), LogicalType::Number), Err(NOT_NUMBER));
        assert_eq!(coerce(&json!(false), LogicalType::Number), Err(NOT_NUMBER));
        assert_eq!(coerce(&json!(" 2.5 "), LogicalType::Number), Ok(FieldValue::Number(2.5)));
        assert_eq!(coerce(&json!(0), LogicalType::Boolean), Ok(FieldValue::Boolean(false)));
        assert_eq!(coerce(&json!("OFF"), LogicalType::Boolean), Ok(FieldValue::Boolean(false)));
        assert_eq!(coerce(&json!(2), LogicalType::Boolean), Err(NOT_BOOLEAN));
        assert_eq!(coerce(&json!([]), LogicalType::Boolean), Err(NOT_BOOLEAN));
    }

    #[test]
    fn non_object_payload_is_rejected() {
        let err = validate_value(&json!([1, 2]), &people(), UnknownFieldPolicy::Ignore).unwrap_err();
        let fields = fields(err);
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].0, NON_FIELD_ERRORS);
    }

    #[test]
    fn decode_interprets_declared_columns_and_passes_through_the_rest() {
        let physical = vec![
            ("name".to_string(), RawValue::Text("Ann".into())),
            ("age".to_string(), RawValue::Real(31.0)),
            ("active".to_string(), RawValue::Integer(1)),
            ("legacy".to_string(), RawValue::Integer(7)),
            ("note".to_string(), RawValue::Null),
        ];
        let record = decode_row(physical, &people());
        assert_eq!(
            serde_json::to_value(&record).unwrap(),
            json!({"name": "Ann", "age": 31, "active": true, "legacy": 7, "note": null})
        );
        let order: Vec<_> = record.keys().map(String::as_str).collect();
        assert_eq!(order, ["name", "age", "active", "legacy", "note"]);
    }

    #[test]
    fn undecodable_values_pass_through_raw() {
        let physical = vec![
            ("age".to_string(), RawValue::Text("n/a".into())),
            ("active".to_string(), RawValue::Integer(5)),
        ];
        let record = decode_row(physical, &people());
        assert_eq!(record["age"], json!("n/a"));
        assert_eq!(record["active"], json!(5));
    }

    #[test]
    fn fractional_numbers_stay_floats() {
        assert_eq!(number_json(2.5), json!(2.5));
        assert_eq!(number_json(-4.0), json!(-4));
        assert_eq!(FieldValue::Number(1e300).to_json(), json!(1e300));
    }
}
