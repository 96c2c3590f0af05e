//! Point-in-time reads over a journal.
//!
//! Every function here issues its own query; nothing is cached between
//! calls.

use chrono::{DateTime, Utc};

use crate::{
  Result,
  derive::{ID_FIELD, PARENT_FIELD, TIMESTAMP_FIELD},
  record::JournalEntry,
  schema::{OrderBy, TableSchema},
  storage::{Condition, Query, StorageTx},
  value::Value,
};

fn parent_condition(journal: &TableSchema, parent: &Value) -> Result<Condition> {
  let ty = journal
    .field(PARENT_FIELD)
    .map(|f| f.ty)
    .unwrap_or_else(|| journal.primary_key().ty);
  Ok(Condition::Eq(
    PARENT_FIELD.to_owned(),
    parent.clone().coerce(ty, PARENT_FIELD)?,
  ))
}

fn entries(tx: &mut dyn StorageTx, journal: &TableSchema, query: Query) -> Result<Vec<JournalEntry>> {
  Ok(
    tx.query_rows(journal, &query)?
      .into_iter()
      .map(JournalEntry::from_row)
      .collect(),
  )
}

/// All entries for `parent`, oldest first.
pub fn history(tx: &mut dyn StorageTx, journal: &TableSchema, parent: &Value) -> Result<Vec<JournalEntry>> {
  let query = Query::new()
    .filter(parent_condition(journal, parent)?)
    .order_by(OrderBy::asc(TIMESTAMP_FIELD));
  entries(tx, journal, query)
}

/// The entry with the greatest timestamp that is `<= at`, or `None` when
/// `at` predates the first snapshot.
pub fn snapshot_at(
  tx: &mut dyn StorageTx,
  journal: &TableSchema,
  parent: &Value,
  at: DateTime<Utc>,
) -> Result<Option<JournalEntry>> {
  let query = Query::new()
    .filter(parent_condition(journal, parent)?)
    .filter(Condition::Le(TIMESTAMP_FIELD.to_owned(), Value::Timestamp(at)))
    .order_by(OrderBy::desc(TIMESTAMP_FIELD))
    .limit(1);
  Ok(entries(tx, journal, query)?.into_iter().next())
}

/// The creation snapshot.
pub fn first(tx: &mut dyn StorageTx, journal: &TableSchema, parent: &Value) -> Result<Option<JournalEntry>> {
  let query = Query::new()
    .filter(parent_condition(journal, parent)?)
    .order_by(OrderBy::asc(TIMESTAMP_FIELD))
    .limit(1);
  Ok(entries(tx, journal, query)?.into_iter().next())
}

/// The snapshot of the most recent write.
pub fn last(tx: &mut dyn StorageTx, journal: &TableSchema, parent: &Value) -> Result<Option<JournalEntry>> {
  let query = Query::new()
    .filter(parent_condition(journal, parent)?)
    .order_by(OrderBy::desc(TIMESTAMP_FIELD))
    .limit(1);
  Ok(entries(tx, journal, query)?.into_iter().next())
}

pub fn created_at(
  tx: &mut dyn StorageTx,
  journal: &TableSchema,
  parent: &Value,
) -> Result<Option<DateTime<Utc>>> {
  Ok(first(tx, journal, parent)?.and_then(|e| e.timestamp))
}

pub fn updated_at(
  tx: &mut dyn StorageTx,
  journal: &TableSchema,
  parent: &Value,
) -> Result<Option<DateTime<Utc>>> {
  Ok(last(tx, journal, parent)?.and_then(|e| e.timestamp))
}

pub fn count(tx: &mut dyn StorageTx, journal: &TableSchema, parent: &Value) -> Result<usize> {
  tx.count_rows(journal, &[parent_condition(journal, parent)?])
}

/// A single entry by its identity.
pub fn entry(tx: &mut dyn StorageTx, journal: &TableSchema, id: i64) -> Result<Option<JournalEntry>> {
  let query = Query::new()
    .filter(Condition::Eq(ID_FIELD.to_owned(), Value::Integer(id)))
    .limit(1);
  Ok(entries(tx, journal, query)?.into_iter().next())
}
