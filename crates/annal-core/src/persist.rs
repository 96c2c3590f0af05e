//! The write path: a plain upsert wrapped in `before_write` / `after_write`
//! hooks, all inside one storage transaction.
//!
//! The snapshot writer is the `after_write` hook of a journaled entity; the
//! journal guard is the `before_write` hook of a journal. Neither knows how
//! the upsert itself is done.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  record::{JournalEntry, Record, Row},
  schema::TableSchema,
  storage::{Condition, Query, StorageTx},
  value::{FieldType, Value},
};

// ─── Outcome ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteOutcome {
  Inserted,
  Updated,
}

/// What a write returns: the row as stored (defaults and generated values
/// filled in) and whether it was created or changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Saved {
  pub record:  Record,
  pub outcome: WriteOutcome,
}

// ─── Hooks ───────────────────────────────────────────────────────────────────

/// Capabilities run around a row write, inside the write's transaction.
/// An `Err` from either hook aborts the whole transaction.
pub trait Persistable {
  /// Runs before the record is validated or storage is touched.
  fn before_write(
    &self,
    _tx: &mut dyn StorageTx,
    _schema: &TableSchema,
    _record: &Record,
  ) -> Result<()> {
    Ok(())
  }

  /// Runs after the write, with the row re-read from storage.
  fn after_write(
    &self,
    _tx: &mut dyn StorageTx,
    _schema: &TableSchema,
    _key: &Value,
    _stored: &Row,
  ) -> Result<()> {
    Ok(())
  }
}

/// No hooks: the write of a non-journaled entity.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainWrite;

impl Persistable for PlainWrite {}

/// Appends one journal entry after every successful entity write.
#[derive(Debug, Clone)]
pub struct SnapshotWriter {
  journal: Arc<TableSchema>,
}

impl SnapshotWriter {
  pub fn new(journal: Arc<TableSchema>) -> Self { Self { journal } }

  /// Insert the snapshot of `stored` for `parent` and return the persisted
  /// entry.
  pub fn append(
    &self,
    tx: &mut dyn StorageTx,
    parent: &Value,
    stored: &Row,
  ) -> Result<JournalEntry> {
    let mut entry = JournalEntry::snapshot_of(&self.journal, parent.clone(), stored);
    let generated = tx.insert_row(&self.journal, &entry.to_insert_row())?;
    let stamped = JournalEntry::from_row(generated);
    entry.id = stamped.id;
    entry.timestamp = stamped.timestamp;

    tracing::debug!(
      journal = %self.journal.table,
      parent = %parent,
      id = ?entry.id,
      timestamp = ?entry.timestamp,
      "appended snapshot"
    );
    Ok(entry)
  }
}

impl Persistable for SnapshotWriter {
  fn after_write(
    &self,
    tx: &mut dyn StorageTx,
    _schema: &TableSchema,
    key: &Value,
    stored: &Row,
  ) -> Result<()> {
    self.append(tx, key, stored).map(|_| ())
  }
}

/// Refuses to write any journal entry that already has an identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct JournalGuard;

impl JournalGuard {
  /// The check behind [`Persistable::before_write`]. It needs no storage,
  /// so callers may run it before opening a transaction.
  pub fn check(schema: &TableSchema, record: &Record) -> Result<()> {
    match record.key(schema) {
      Some(id) => {
        tracing::warn!(journal = %schema.table, id = %id, "rejected journal update");
        Err(Error::IllegalMutation {
          journal: schema.name.clone(),
          id:      id.as_i64(),
          action:  "updated",
        })
      }
      None => Ok(()),
    }
  }
}

impl Persistable for JournalGuard {
  fn before_write(
    &self,
    _tx: &mut dyn StorageTx,
    schema: &TableSchema,
    record: &Record,
  ) -> Result<()> {
    Self::check(schema, record)
  }
}

/// The error every attempt to delete a journal entry ends in.
pub fn refuse_delete(journal: &TableSchema, id: Option<i64>) -> Error {
  match id {
    Some(id) => tracing::warn!(journal = %journal.table, id, "rejected journal delete"),
    None => tracing::warn!(journal = %journal.table, "rejected journal delete"),
  }
  Error::IllegalMutation { journal: journal.name.clone(), id, action: "deleted" }
}

/// The hooks a write to `schema` must run.
pub fn hooks_for(schema: &TableSchema, journal: Option<Arc<TableSchema>>) -> Box<dyn Persistable> {
  if schema.is_journal() {
    return Box::new(JournalGuard);
  }
  match journal {
    Some(journal) if schema.is_journaled() => Box::new(SnapshotWriter::new(journal)),
    _ => Box::new(PlainWrite),
  }
}

// ─── Write path ──────────────────────────────────────────────────────────────

/// Persist `record` into `schema`'s table, running `hooks` around the upsert.
///
/// Without a primary key the row is inserted and storage assigns the key
/// (integer keys only). With a key, the provided columns are updated; if no
/// row matched, the row is inserted under that key.
pub fn write_through(
  tx: &mut dyn StorageTx,
  schema: &TableSchema,
  record: &Record,
  hooks: &dyn Persistable,
) -> Result<Saved> {
  hooks.before_write(tx, schema, record)?;

  let pk = &schema.primary_key().name;
  let mut row = record.validated(schema)?;
  let key = row.get(pk).filter(|v| !v.is_null()).cloned();

  let (key, outcome) = match key {
    None => {
      if schema.primary_key().ty != FieldType::Integer {
        return Err(Error::MissingPrimaryKey(schema.name.clone()));
      }
      row.remove(pk);
      let generated = tx.insert_row(schema, &row)?;
      let key = generated
        .get(pk)
        .cloned()
        .ok_or_else(|| Error::MissingPrimaryKey(schema.name.clone()))?;
      (key, WriteOutcome::Inserted)
    }
    Some(key) => {
      let mut columns = row.clone();
      columns.remove(pk);
      let matched = if columns.is_empty() {
        tx.count_rows(schema, &[Condition::Eq(pk.clone(), key.clone())])?
      } else {
        tx.update_row(schema, &key, &columns)?
      };
      if matched == 0 {
        tx.insert_row(schema, &row)?;
        (key, WriteOutcome::Inserted)
      } else {
        (key, WriteOutcome::Updated)
      }
    }
  };

  let stored = fetch_row(tx, schema, &key)?.ok_or_else(|| {
    Error::Storage(format!("{} row {key} vanished after write", schema.table).into())
  })?;

  tracing::debug!(table = %schema.table, key = %key, ?outcome, "wrote row");

  hooks.after_write(tx, schema, &key, &stored)?;

  Ok(Saved {
    record: Record { entity: schema.name.clone(), values: stored },
    outcome,
  })
}

/// Delete the entity with primary key `key`; its journal follows by cascade.
/// Journal rows themselves can never be deleted this way.
pub fn delete_through(tx: &mut dyn StorageTx, schema: &TableSchema, key: &Value) -> Result<bool> {
  if schema.is_journal() {
    return Err(refuse_delete(schema, key.as_i64()));
  }
  let key = key.clone().coerce(schema.primary_key().ty, &schema.primary_key().name)?;
  let removed = tx.delete_row(schema, &key)?;
  tracing::debug!(table = %schema.table, key = %key, removed, "deleted row");
  Ok(removed > 0)
}

/// Bulk paths would skip the per-row hooks, so they are refused for any
/// journaled entity or journal.
pub fn reject_bulk(schema: &TableSchema, operation: &'static str) -> Result<()> {
  if schema.is_journal() || schema.is_journaled() {
    tracing::warn!(table = %schema.table, operation, "rejected bulk operation");
    return Err(Error::NotSupported { operation, target: schema.name.clone() });
  }
  Ok(())
}

/// Load the row of `schema` whose primary key is `key`.
pub fn fetch_row(tx: &mut dyn StorageTx, schema: &TableSchema, key: &Value) -> Result<Option<Row>> {
  let pk = schema.primary_key();
  let key = key.clone().coerce(pk.ty, &pk.name)?;
  let query = Query::new().filter(Condition::Eq(pk.name.clone(), key)).limit(1);
  Ok(tx.query_rows(schema, &query)?.into_iter().next())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    ErrorKind,
    registry::SchemaRegistry,
    schema::{EntityDecl, FieldDecl},
  };

  fn registry() -> SchemaRegistry {
    let mut registry = SchemaRegistry::new();
    registry
      .register(
        EntityDecl::new("Account", "account")
          .field(FieldDecl::new("id", FieldType::Integer).primary_key())
          .field(FieldDecl::new("balance", FieldType::Integer)),
      )
      .unwrap();
    registry
      .register(
        EntityDecl::new("Tag", "tag")
          .field(FieldDecl::new("id", FieldType::Integer).primary_key())
          .not_journaled(),
      )
      .unwrap();
    registry
  }

  #[test]
  fn guard_rejects_entries_with_identity() {
    let registry = registry();
    let journal = registry.journal_of("Account").unwrap();

    let fresh = Record::new("AccountJournal").with("parent", 1).with("balance", 5);
    assert!(JournalGuard::check(&journal, &fresh).is_ok());

    let persisted = fresh.with("id", 9);
    let err = JournalGuard::check(&journal, &persisted).unwrap_err();
    assert!(matches!(
      err,
      Error::IllegalMutation { id: Some(9), action: "updated", .. }
    ));
    assert_eq!(err.kind(), ErrorKind::IllegalMutation);
  }

  #[test]
  fn refused_delete_names_the_journal() {
    let registry = registry();
    let journal = registry.journal_of("Account").unwrap();
    let err = refuse_delete(&journal, None);
    assert_eq!(err.to_string(), "entries of \"AccountJournal\" cannot be deleted");
  }

  #[test]
  fn bulk_is_refused_only_where_hooks_would_be_skipped() {
    let registry = registry();
    let account = registry.entity("Account").unwrap();
    let journal = registry.journal_of("Account").unwrap();
    let tag = registry.entity("Tag").unwrap();

    for schema in [&account, &journal] {
      let err = reject_bulk(schema, "bulk insert").unwrap_err();
      assert_eq!(err.kind(), ErrorKind::NotSupported);
    }
    assert!(reject_bulk(&tag, "bulk insert").is_ok());
  }
}
