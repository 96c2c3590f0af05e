//! Encoding and decoding between [`Value`] and SQLite column values.
//!
//! Timestamps are stored as fixed-width RFC 3339 strings (microseconds, `Z`)
//! so that comparing the text compares the instants. Booleans are stored as
//! 0/1 integers; JSON is stored as compact text.

use annal_core::{
  schema::FieldDecl,
  value::{FieldType, Value, format_timestamp},
};
use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;

use crate::{Error, Result};

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { format_timestamp(dt) }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Value ───────────────────────────────────────────────────────────────────

pub fn encode_value(value: &Value) -> SqlValue {
  match value {
    Value::Null => SqlValue::Null,
    Value::Boolean(b) => SqlValue::Integer(i64::from(*b)),
    Value::Integer(i) => SqlValue::Integer(*i),
    Value::Real(r) => SqlValue::Real(*r),
    Value::Text(s) => SqlValue::Text(s.clone()),
    Value::Timestamp(dt) => SqlValue::Text(encode_dt(*dt)),
    Value::Json(j) => SqlValue::Text(j.to_string()),
  }
}

fn sql_type_name(raw: &SqlValue) -> &'static str {
  match raw {
    SqlValue::Null => "null",
    SqlValue::Integer(_) => "integer",
    SqlValue::Real(_) => "real",
    SqlValue::Text(_) => "text",
    SqlValue::Blob(_) => "blob",
  }
}

/// Decode a raw column according to the field's declared type.
pub fn decode_value(field: &FieldDecl, raw: SqlValue) -> Result<Value> {
  let value = match (field.ty, raw) {
    (_, SqlValue::Null) => Value::Null,
    (FieldType::Integer, SqlValue::Integer(i)) => Value::Integer(i),
    (FieldType::Real, SqlValue::Real(r)) => Value::Real(r),
    (FieldType::Real, SqlValue::Integer(i)) => Value::Real(i as f64),
    (FieldType::Text, SqlValue::Text(s)) => Value::Text(s),
    (FieldType::Boolean, SqlValue::Integer(i)) => Value::Boolean(i != 0),
    (FieldType::Timestamp, SqlValue::Text(s)) => Value::Timestamp(decode_dt(&s)?),
    (FieldType::Json, SqlValue::Text(s)) => Value::Json(serde_json::from_str(&s)?),
    (expected, other) => {
      return Err(Error::Decode {
        column: field.name.clone(),
        expected,
        found: sql_type_name(&other),
      });
    }
  };
  Ok(value)
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  #[test]
  fn timestamps_sort_as_text() {
    let early = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
    let late = early + chrono::Duration::microseconds(1500);
    assert!(encode_dt(early) < encode_dt(late));
    assert_eq!(decode_dt(&encode_dt(late)).unwrap(), late);
  }

  #[test]
  fn booleans_are_integers() {
    let field = FieldDecl::new("active", FieldType::Boolean);
    assert_eq!(encode_value(&Value::Boolean(true)), SqlValue::Integer(1));
    assert_eq!(
      decode_value(&field, SqlValue::Integer(0)).unwrap(),
      Value::Boolean(false)
    );
  }

  #[test]
  fn decode_rejects_wrong_storage_class() {
    let field = FieldDecl::new("balance", FieldType::Integer);
    let err = decode_value(&field, SqlValue::Text("x".into())).unwrap_err();
    assert!(matches!(err, Error::Decode { found: "text", .. }));
  }
}
