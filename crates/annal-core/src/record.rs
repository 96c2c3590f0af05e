//! Rows as seen by application code: entity records and journal entries.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  derive::{ID_FIELD, PARENT_FIELD, TIMESTAMP_FIELD},
  schema::TableSchema,
  value::Value,
};

/// Column name → value.
pub type Row = BTreeMap<String, Value>;

// ─── Record ──────────────────────────────────────────────────────────────────

/// One instance of an entity type.
///
/// The primary key may be left out of a new record when storage assigns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
  pub entity: String,
  pub values: Row,
}

impl Record {
  pub fn new(entity: impl Into<String>) -> Self {
    Self { entity: entity.into(), values: Row::new() }
  }

  pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
    self.set(field, value);
    self
  }

  pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
    self.values.insert(field.into(), value.into());
  }

  pub fn get(&self, field: &str) -> Option<&Value> { self.values.get(field) }

  /// The primary key value, if one is set and not null.
  pub fn key(&self, schema: &TableSchema) -> Option<&Value> {
    self
      .values
      .get(&schema.primary_key().name)
      .filter(|v| !v.is_null())
  }

  /// Check every value against `schema`, coercing it to the declared type.
  ///
  /// Unknown fields and values written to generated columns are rejected.
  pub fn validated(&self, schema: &TableSchema) -> Result<Row> {
    self
      .values
      .iter()
      .map(|(name, value)| {
        let field = schema
          .field(name)
          .filter(|f| f.is_editable())
          .ok_or_else(|| Error::UnknownField {
            entity: schema.name.clone(),
            field:  name.clone(),
          })?;
        Ok((name.clone(), value.clone().coerce(field.ty, name)?))
      })
      .collect()
  }
}

// ─── JournalEntry ────────────────────────────────────────────────────────────

/// One immutable snapshot of an entity.
///
/// `id` and `timestamp` are `None` until storage persists the entry; an entry
/// with an `id` can never be written again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
  pub id:        Option<i64>,
  pub parent:    Value,
  pub timestamp: Option<DateTime<Utc>>,
  /// The entity's data fields as of the write that produced this entry.
  pub values:    Row,
}

impl JournalEntry {
  /// A fresh, unpersisted entry for `parent`.
  pub fn new(parent: impl Into<Value>) -> Self {
    Self {
      id:        None,
      parent:    parent.into(),
      timestamp: None,
      values:    Row::new(),
    }
  }

  pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
    self.values.insert(field.into(), value.into());
    self
  }

  pub fn get(&self, field: &str) -> Option<&Value> { self.values.get(field) }

  pub fn is_persisted(&self) -> bool { self.id.is_some() }

  /// Build the snapshot of `stored` (a freshly re-read entity row) for
  /// `journal`.
  pub fn snapshot_of(journal: &TableSchema, parent: Value, stored: &Row) -> Self {
    let values = journal
      .data_fields()
      .map(|f| {
        let value = stored.get(&f.name).cloned().unwrap_or(Value::Null);
        (f.name.clone(), value)
      })
      .collect();
    Self { id: None, parent, timestamp: None, values }
  }

  /// The row to insert: parent plus data fields. Identity and timestamp are
  /// left for storage to fill.
  pub fn to_insert_row(&self) -> Row {
    let mut row = self.values.clone();
    row.insert(PARENT_FIELD.to_owned(), self.parent.clone());
    row
  }

  /// Rebuild an entry from a full journal row.
  pub fn from_row(mut row: Row) -> Self {
    let id = row.remove(ID_FIELD).and_then(|v| v.as_i64());
    let parent = row.remove(PARENT_FIELD).unwrap_or(Value::Null);
    let timestamp = match row.remove(TIMESTAMP_FIELD) {
      Some(Value::Timestamp(dt)) => Some(dt),
      _ => None,
    };
    Self { id, parent, timestamp, values: row }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    derive::{Derived, derive},
    schema::{EntityDecl, FieldDecl},
    value::FieldType,
  };

  fn schemas() -> (TableSchema, TableSchema) {
    let decl = EntityDecl::new("Account", "account")
      .field(FieldDecl::new("id", FieldType::Integer).primary_key())
      .field(FieldDecl::new("balance", FieldType::Real))
      .field(FieldDecl::new("owner", FieldType::Text).nullable());
    match derive(&decl).unwrap() {
      Derived::Journaled { entity, journal } => (entity, journal),
      other => panic!("unexpected {other:?}"),
    }
  }

  #[test]
  fn validation_coerces_and_rejects_unknown_fields() {
    let (entity, _) = schemas();
    let row = Record::new("Account")
      .with("balance", 10)
      .validated(&entity)
      .unwrap();
    assert_eq!(row["balance"], Value::Real(10.0));

    let err = Record::new("Account")
      .with("colour", "red")
      .validated(&entity)
      .unwrap_err();
    assert!(matches!(err, Error::UnknownField { field, .. } if field == "colour"));
  }

  #[test]
  fn journal_generated_columns_are_not_writable() {
    let (_, journal) = schemas();
    let err = Record::new("AccountJournal")
      .with("timestamp", "2024-01-01T00:00:00Z")
      .validated(&journal)
      .unwrap_err();
    assert!(matches!(err, Error::UnknownField { field, .. } if field == "timestamp"));
  }

  #[test]
  fn snapshot_excludes_the_primary_key() {
    let (_, journal) = schemas();
    let stored: Row = [
      ("id".to_owned(), Value::Integer(4)),
      ("balance".to_owned(), Value::Real(100.0)),
      ("owner".to_owned(), Value::Null),
    ]
    .into_iter()
    .collect();

    let entry = JournalEntry::snapshot_of(&journal, Value::Integer(4), &stored);
    assert_eq!(entry.parent, Value::Integer(4));
    assert!(!entry.values.contains_key("id"));
    assert_eq!(entry.values.len(), 2);
    assert!(!entry.is_persisted());
  }
}
