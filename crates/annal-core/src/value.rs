//! Typed field values.
//!
//! Values arrive loosely typed (from JSON, TOML or application code) and are
//! coerced to the declared [`FieldType`] before they reach storage.

use std::fmt;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

// ─── FieldType ───────────────────────────────────────────────────────────────

/// The storage type of a declared field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
  Integer,
  Real,
  Text,
  Boolean,
  /// A UTC instant, kept at microsecond precision.
  Timestamp,
  /// Arbitrary JSON, stored as text.
  Json,
}

impl FieldType {
  /// Column type used in generated DDL.
  pub fn sql_type(self) -> &'static str {
    match self {
      Self::Integer | Self::Boolean => "INTEGER",
      Self::Real => "REAL",
      Self::Text | Self::Timestamp | Self::Json => "TEXT",
    }
  }
}

impl fmt::Display for FieldType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Self::Integer => "integer",
      Self::Real => "real",
      Self::Text => "text",
      Self::Boolean => "boolean",
      Self::Timestamp => "timestamp",
      Self::Json => "json",
    })
  }
}

// ─── Value ───────────────────────────────────────────────────────────────────

/// A single field value.
///
/// Deserialisation is untagged, so a JSON string always lands in
/// [`Value::Text`]; [`Value::coerce`] turns it into a timestamp when the field
/// asks for one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
  Null,
  Boolean(bool),
  Integer(i64),
  Real(f64),
  Text(String),
  Timestamp(DateTime<Utc>),
  Json(serde_json::Value),
}

impl Value {
  pub fn is_null(&self) -> bool { matches!(self, Self::Null) }

  pub fn as_i64(&self) -> Option<i64> {
    match self {
      Self::Integer(i) => Some(*i),
      _ => None,
    }
  }

  pub fn as_str(&self) -> Option<&str> {
    match self {
      Self::Text(s) => Some(s),
      _ => None,
    }
  }

  /// Short name of the variant, used in error messages.
  pub fn type_name(&self) -> &'static str {
    match self {
      Self::Null => "null",
      Self::Boolean(_) => "boolean",
      Self::Integer(_) => "integer",
      Self::Real(_) => "real",
      Self::Text(_) => "text",
      Self::Timestamp(_) => "timestamp",
      Self::Json(_) => "json",
    }
  }

  /// Convert `self` into a value of type `ty`, or fail with
  /// [`Error::TypeMismatch`] naming `field`.
  ///
  /// `Null` passes through unchanged; nullability is enforced by storage.
  pub fn coerce(self, ty: FieldType, field: &str) -> Result<Value> {
    let mismatch = |found: &Value| Error::TypeMismatch {
      field: field.to_owned(),
      expected: ty,
      found: found.type_name().to_owned(),
    };

    match (ty, self) {
      (_, Self::Null) => Ok(Self::Null),
      (FieldType::Integer, v @ Self::Integer(_)) => Ok(v),
      (FieldType::Real, v @ Self::Real(_)) => Ok(v),
      (FieldType::Real, Self::Integer(i)) => Ok(Self::Real(i as f64)),
      (FieldType::Text, v @ Self::Text(_)) => Ok(v),
      (FieldType::Boolean, v @ Self::Boolean(_)) => Ok(v),
      (FieldType::Timestamp, Self::Timestamp(dt)) => {
        Ok(Self::Timestamp(truncate_micros(dt)))
      }
      (FieldType::Timestamp, Self::Text(s)) => DateTime::parse_from_rfc3339(&s)
        .map(|dt| Self::Timestamp(truncate_micros(dt.with_timezone(&Utc))))
        .map_err(|_| mismatch(&Self::Text(s))),
      (FieldType::Json, Self::Json(j)) => Ok(Self::Json(j)),
      (FieldType::Json, other) => Ok(Self::Json(serde_json::to_value(other)?)),
      (_, other) => Err(mismatch(&other)),
    }
  }
}

impl From<i64> for Value {
  fn from(v: i64) -> Self { Self::Integer(v) }
}

impl From<f64> for Value {
  fn from(v: f64) -> Self { Self::Real(v) }
}

impl From<bool> for Value {
  fn from(v: bool) -> Self { Self::Boolean(v) }
}

impl From<&str> for Value {
  fn from(v: &str) -> Self { Self::Text(v.to_owned()) }
}

impl From<String> for Value {
  fn from(v: String) -> Self { Self::Text(v) }
}

impl From<DateTime<Utc>> for Value {
  fn from(v: DateTime<Utc>) -> Self { Self::Timestamp(v) }
}

impl fmt::Display for Value {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Null => f.write_str("null"),
      Self::Boolean(b) => write!(f, "{b}"),
      Self::Integer(i) => write!(f, "{i}"),
      Self::Real(r) => write!(f, "{r}"),
      Self::Text(s) => write!(f, "{s:?}"),
      Self::Timestamp(dt) => f.write_str(&dt.to_rfc3339()),
      Self::Json(j) => write!(f, "{j}"),
    }
  }
}

/// Drop sub-microsecond precision so a timestamp survives a storage round
/// trip unchanged.
pub fn truncate_micros(dt: DateTime<Utc>) -> DateTime<Utc> { dt.trunc_subsecs(6) }

/// Fixed-width RFC 3339 (`2024-01-01T00:00:00.000000Z`): lexical order of
/// the text equals chronological order.
pub fn format_timestamp(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  #[test]
  fn integers_widen_to_real() {
    let v = Value::Integer(3).coerce(FieldType::Real, "ratio").unwrap();
    assert_eq!(v, Value::Real(3.0));
  }

  #[test]
  fn rfc3339_text_becomes_timestamp() {
    let v = Value::from("2024-03-01T12:00:00Z")
      .coerce(FieldType::Timestamp, "opened_at")
      .unwrap();
    assert_eq!(
      v,
      Value::Timestamp(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap())
    );
  }

  #[test]
  fn mismatch_names_the_field() {
    let err = Value::from("lots").coerce(FieldType::Integer, "balance").unwrap_err();
    assert!(matches!(
      err,
      Error::TypeMismatch { ref field, expected: FieldType::Integer, ref found }
        if field == "balance" && found == "text"
    ));
  }

  #[test]
  fn anything_fits_json() {
    let v = Value::Integer(7).coerce(FieldType::Json, "meta").unwrap();
    assert_eq!(v, Value::Json(serde_json::json!(7)));
  }

  #[test]
  fn timestamps_format_at_fixed_width() {
    let dt = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    assert_eq!(format_timestamp(dt), "2024-03-01T12:00:00.000000Z");
  }

  #[test]
  fn null_passes_through() {
    assert_eq!(Value::Null.coerce(FieldType::Integer, "x").unwrap(), Value::Null);
  }

  #[test]
  fn untagged_deserialisation() {
    let v: Value = serde_json::from_value(serde_json::json!(150)).unwrap();
    assert_eq!(v, Value::Integer(150));
    let v: Value = serde_json::from_value(serde_json::json!("hi")).unwrap();
    assert_eq!(v, Value::Text("hi".into()));
    let v: Value = serde_json::from_value(serde_json::json!({"a": 1})).unwrap();
    assert_eq!(v, Value::Json(serde_json::json!({"a": 1})));
  }
}
