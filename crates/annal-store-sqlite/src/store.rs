//! [`SqliteStore`] and the per-type [`Repository`] / [`JournalRepository`]
//! handles built from it.

use std::{path::Path, sync::Arc};

use annal_core::{
  ddl,
  history,
  persist::{self, JournalGuard, Saved},
  record::{JournalEntry, Record},
  registry::SchemaRegistry,
  schema::TableSchema,
  storage::{Clock, Query, StorageTx, SystemClock},
  value::Value,
};
use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension as _;

use crate::{
  Error, Result,
  schema::{FINGERPRINT_KEY, PRAGMAS},
  tx::{SqliteTx, map_sqlite_error},
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A journaling store backed by a single SQLite file.
///
/// Clones share the connection, registry and clock.
#[derive(Clone)]
pub struct SqliteStore {
  pub(crate) conn: tokio_rusqlite::Connection,
  registry:        Arc<SchemaRegistry>,
  clock:           Arc<dyn Clock>,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and define every registered table.
  pub async fn open(path: impl AsRef<Path>, registry: SchemaRegistry) -> Result<Self> {
    Self::open_with_clock(path, registry, Arc::new(SystemClock)).await
  }

  pub async fn open_with_clock(
    path: impl AsRef<Path>,
    registry: SchemaRegistry,
    clock: Arc<dyn Clock>,
  ) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    Self::init(conn, registry, clock).await
  }

  /// Open a private in-memory store, mostly for tests.
  pub async fn open_in_memory(registry: SchemaRegistry) -> Result<Self> {
    Self::open_in_memory_with_clock(registry, Arc::new(SystemClock)).await
  }

  pub async fn open_in_memory_with_clock(
    registry: SchemaRegistry,
    clock: Arc<dyn Clock>,
  ) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    Self::init(conn, registry, clock).await
  }

  async fn init(
    conn: tokio_rusqlite::Connection,
    registry: SchemaRegistry,
    clock: Arc<dyn Clock>,
  ) -> Result<Self> {
    let store = Self { conn, registry: Arc::new(registry), clock };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(PRAGMAS)?;
        Ok(())
      })
      .await?;

    let registry = self.registry.clone();
    let tables = self
      .transact(move |tx| {
        let mut tables = 0;
        for schema in registry.schemas() {
          tx.define_table(schema)?;
          tables += 1;
        }
        Ok(tables)
      })
      .await?;

    let fingerprint = ddl::fingerprint(&self.registry);
    let current = fingerprint.clone();
    let previous: Option<String> = self
      .conn
      .call(move |conn| {
        let previous = conn
          .query_row(
            "SELECT value FROM annal_meta WHERE key = ?1",
            rusqlite::params![FINGERPRINT_KEY],
            |r| r.get(0),
          )
          .optional()?;
        conn.execute(
          "INSERT INTO annal_meta (key, value) VALUES (?1, ?2)
           ON CONFLICT (key) DO UPDATE SET value = excluded.value",
          rusqlite::params![FINGERPRINT_KEY, current],
        )?;
        Ok(previous)
      })
      .await?;

    if let Some(previous) = previous.filter(|p| *p != fingerprint) {
      tracing::warn!(
        %previous,
        current = %fingerprint,
        "schema fingerprint changed since this store was last opened; existing tables may need a migration"
      );
    }
    tracing::info!(tables, %fingerprint, "schema initialised");
    Ok(())
  }

  /// Run `f` inside one SQLite transaction on the connection's thread.
  /// The transaction commits if `f` returns `Ok` and rolls back otherwise.
  pub(crate) async fn transact<T, F>(&self, f: F) -> Result<T>
  where
    F: FnOnce(&mut dyn StorageTx) -> annal_core::Result<T> + Send + 'static,
    T: Send + 'static,
  {
    let clock = self.clock.clone();
    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let result = {
          let mut storage = SqliteTx::new(&tx, clock.as_ref());
          f(&mut storage)
        };
        Ok(match result {
          Ok(value) => tx.commit().map(|()| value).map_err(map_sqlite_error),
          // Dropping `tx` rolls it back.
          Err(e) => Err(e),
        })
      })
      .await?;
    Ok(outcome?)
  }

  pub fn registry(&self) -> &SchemaRegistry { &self.registry }

  /// A repository for entity type `entity`.
  pub fn repository(&self, entity: &str) -> Result<Repository> {
    let schema = self.registry.entity(entity)?;
    let journal = match self.registry.journal_of(entity) {
      Ok(journal) => Some(journal),
      Err(annal_core::Error::NotJournaled(_)) => None,
      Err(e) => return Err(e.into()),
    };
    Ok(Repository { store: self.clone(), schema, journal })
  }

  /// A repository over the journal of entity type `entity`.
  pub fn journal(&self, entity: &str) -> Result<JournalRepository> {
    let journal = self.registry.journal_of(entity)?;
    Ok(JournalRepository { store: self.clone(), journal })
  }
}

// ─── Repository ──────────────────────────────────────────────────────────────

/// Reads and writes for one entity type. Writes to a journaled type append a
/// snapshot in the same transaction.
#[derive(Clone)]
pub struct Repository {
  store:   SqliteStore,
  schema:  Arc<TableSchema>,
  journal: Option<Arc<TableSchema>>,
}

impl Repository {
  pub fn schema(&self) -> &TableSchema { &self.schema }

  pub fn journal_schema(&self) -> Option<&TableSchema> { self.journal.as_deref() }

  fn journal_or_err(&self) -> Result<Arc<TableSchema>> {
    self
      .journal
      .clone()
      .ok_or_else(|| annal_core::Error::NotJournaled(self.schema.name.clone()).into())
  }

  fn check_entity(&self, record: &Record) -> Result<()> {
    if record.entity != self.schema.name {
      return Err(annal_core::Error::UnknownEntity(record.entity.clone()).into());
    }
    Ok(())
  }

  /// Insert or update `record`; see [`persist::write_through`].
  pub async fn save(&self, record: Record) -> Result<Saved> {
    self.check_entity(&record)?;
    let schema = self.schema.clone();
    let journal = self.journal.clone();
    self
      .store
      .transact(move |tx| {
        let hooks = persist::hooks_for(&schema, journal);
        persist::write_through(tx, &schema, &record, hooks.as_ref())
      })
      .await
  }

  pub async fn get(&self, key: impl Into<Value>) -> Result<Option<Record>> {
    let key = key.into();
    let schema = self.schema.clone();
    let row = self
      .store
      .transact(move |tx| persist::fetch_row(tx, &schema, &key))
      .await?;
    Ok(row.map(|values| Record { entity: self.schema.name.clone(), values }))
  }

  /// Every row, in the entity's default ordering.
  pub async fn list(&self) -> Result<Vec<Record>> {
    let schema = self.schema.clone();
    let rows = self
      .store
      .transact(move |tx| tx.query_rows(&schema, &Query::new()))
      .await?;
    Ok(
      rows
        .into_iter()
        .map(|values| Record { entity: self.schema.name.clone(), values })
        .collect(),
    )
  }

  /// Delete the entity; its journal entries are removed by cascade.
  /// Returns `false` if no such entity existed.
  pub async fn delete(&self, key: impl Into<Value>) -> Result<bool> {
    let key = key.into();
    let schema = self.schema.clone();
    self
      .store
      .transact(move |tx| persist::delete_through(tx, &schema, &key))
      .await
  }

  /// Insert many records in one transaction. Refused for journaled types,
  /// which must be written one row at a time.
  pub async fn bulk_insert(&self, records: Vec<Record>) -> Result<Vec<Saved>> {
    persist::reject_bulk(&self.schema, "bulk insert")?;
    for record in &records {
      self.check_entity(record)?;
    }
    let schema = self.schema.clone();
    self
      .store
      .transact(move |tx| {
        records
          .iter()
          .map(|r| persist::write_through(tx, &schema, r, &persist::PlainWrite))
          .collect()
      })
      .await
  }

  /// Update `fields` of many existing records in one transaction. Refused for
  /// journaled types. Returns the number of rows changed.
  pub async fn bulk_update(&self, records: Vec<Record>, fields: &[&str]) -> Result<usize> {
    persist::reject_bulk(&self.schema, "bulk update")?;
    let fields: Vec<String> = fields.iter().map(|f| (*f).to_owned()).collect();
    let schema = self.schema.clone();
    self
      .store
      .transact(move |tx| {
        let pk = &schema.primary_key().name;
        let mut changed = 0;
        for record in &records {
          let mut row = record.validated(&schema)?;
          let key = row
            .remove(pk)
            .filter(|v| !v.is_null())
            .ok_or_else(|| annal_core::Error::MissingPrimaryKey(schema.name.clone()))?;
          row.retain(|name, _| fields.contains(name));
          if !row.is_empty() {
            changed += tx.update_row(&schema, &key, &row)?;
          }
        }
        Ok(changed)
      })
      .await
  }

  // ── Journal reads ─────────────────────────────────────────────────────────

  /// Every snapshot of the entity, oldest first.
  pub async fn history(&self, key: impl Into<Value>) -> Result<Vec<JournalEntry>> {
    let key = key.into();
    let journal = self.journal_or_err()?;
    self
      .store
      .transact(move |tx| history::history(tx, &journal, &key))
      .await
  }

  /// The entity as it was at `at`: the latest snapshot taken at or before
  /// that instant.
  pub async fn get_at_timestamp(
    &self,
    key: impl Into<Value>,
    at: DateTime<Utc>,
  ) -> Result<Option<JournalEntry>> {
    let key = key.into();
    let journal = self.journal_or_err()?;
    self
      .store
      .transact(move |tx| history::snapshot_at(tx, &journal, &key, at))
      .await
  }

  pub async fn first_snapshot(&self, key: impl Into<Value>) -> Result<Option<JournalEntry>> {
    let key = key.into();
    let journal = self.journal_or_err()?;
    self
      .store
      .transact(move |tx| history::first(tx, &journal, &key))
      .await
  }

  pub async fn last_snapshot(&self, key: impl Into<Value>) -> Result<Option<JournalEntry>> {
    let key = key.into();
    let journal = self.journal_or_err()?;
    self
      .store
      .transact(move |tx| history::last(tx, &journal, &key))
      .await
  }

  /// Timestamp of the creation snapshot.
  pub async fn created_at(&self, key: impl Into<Value>) -> Result<Option<DateTime<Utc>>> {
    let key = key.into();
    let journal = self.journal_or_err()?;
    self
      .store
      .transact(move |tx| history::created_at(tx, &journal, &key))
      .await
  }

  /// Timestamp of the most recent snapshot.
  pub async fn updated_at(&self, key: impl Into<Value>) -> Result<Option<DateTime<Utc>>> {
    let key = key.into();
    let journal = self.journal_or_err()?;
    self
      .store
      .transact(move |tx| history::updated_at(tx, &journal, &key))
      .await
  }
}

// ─── JournalRepository ───────────────────────────────────────────────────────

/// Direct access to one journal. Entries can be appended and read; never
/// updated or deleted.
#[derive(Clone)]
pub struct JournalRepository {
  store:   SqliteStore,
  journal: Arc<TableSchema>,
}

impl JournalRepository {
  pub fn schema(&self) -> &TableSchema { &self.journal }

  /// Persist a fresh entry. An entry that already has an `id` is rejected
  /// with [`annal_core::Error::IllegalMutation`] before storage is touched.
  pub async fn save(&self, entry: JournalEntry) -> Result<JournalEntry> {
    let mut record = Record::new(self.journal.name.clone());
    record.values = entry.to_insert_row();
    if let Some(id) = entry.id {
      record.set(annal_core::derive::ID_FIELD, id);
    }

    // A rejected entry never reaches the connection thread.
    let journal = self.journal.clone();
    JournalGuard::check(&journal, &record)?;

    let saved = self
      .store
      .transact(move |tx| persist::write_through(tx, &journal, &record, &JournalGuard))
      .await?;
    Ok(JournalEntry::from_row(saved.record.values))
  }

  /// Always fails: journal entries are only removed with their parent.
  pub fn delete(&self, entry: &JournalEntry) -> Result<()> {
    Err(persist::refuse_delete(&self.journal, entry.id).into())
  }

  pub async fn get(&self, id: i64) -> Result<Option<JournalEntry>> {
    let journal = self.journal.clone();
    self
      .store
      .transact(move |tx| history::entry(tx, &journal, id))
      .await
  }

  pub async fn for_parent(&self, parent: impl Into<Value>) -> Result<Vec<JournalEntry>> {
    let parent = parent.into();
    let journal = self.journal.clone();
    self
      .store
      .transact(move |tx| history::history(tx, &journal, &parent))
      .await
  }

  pub async fn count(&self, parent: impl Into<Value>) -> Result<usize> {
    let parent = parent.into();
    let journal = self.journal.clone();
    self
      .store
      .transact(move |tx| history::count(tx, &journal, &parent))
      .await
  }

  /// Always fails: journal entries are appended one at a time.
  pub async fn bulk_insert(&self, _entries: Vec<JournalEntry>) -> Result<Vec<JournalEntry>> {
    persist::reject_bulk(&self.journal, "bulk insert")
      .map(|()| Vec::new())
      .map_err(Error::from)
  }

  pub async fn bulk_update(&self, _entries: Vec<JournalEntry>, _fields: &[&str]) -> Result<usize> {
    persist::reject_bulk(&self.journal, "bulk update")
      .map(|()| 0)
      .map_err(Error::from)
  }
}
