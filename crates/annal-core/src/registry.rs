//! The schema registry: every entity type registered exactly once, with its
//! journal looked up by an explicit key rather than hidden type metadata.

use std::{
  collections::{HashMap, HashSet},
  sync::Arc,
};

use crate::{
  Error, Result,
  ddl::META_TABLE,
  derive::{Derived, derive},
  error::DerivationError,
  schema::{EntityDecl, TableSchema},
};

/// What [`SchemaRegistry::register`] produced for one declaration.
#[derive(Debug, Clone)]
pub enum Registration {
  /// An abstract base; nothing was stored, the declaration is handed back.
  Abstract(EntityDecl),
  Plain(Arc<TableSchema>),
  Journaled {
    entity:  Arc<TableSchema>,
    journal: Arc<TableSchema>,
  },
}

#[derive(Debug, Clone)]
struct Entry {
  entity:  Arc<TableSchema>,
  journal: Option<Arc<TableSchema>>,
}

/// All derived schemas, keyed by entity type name.
///
/// Built once at startup and then shared read-only (behind an `Arc`) by the
/// store and its repositories.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
  entries: HashMap<String, Entry>,
  /// Registration order, so DDL and fingerprints are stable.
  order:   Vec<String>,
}

impl SchemaRegistry {
  pub fn new() -> Self { Self::default() }

  /// Derive and record schemas for `decl`.
  ///
  /// Registering the same type name twice fails with
  /// [`DerivationError::AlreadyRegistered`]. A table or type name (entity or
  /// journal) that is already claimed fails with
  /// [`DerivationError::NameInUse`]. Abstract declarations are returned
  /// unchanged and not recorded.
  pub fn register(&mut self, decl: EntityDecl) -> Result<Registration> {
    if self.entries.contains_key(&decl.name) {
      return Err(DerivationError::AlreadyRegistered(decl.name).into());
    }

    let (entry, registration) = match derive(&decl)? {
      Derived::Passthrough(decl) => {
        tracing::debug!(entity = %decl.name, "abstract declaration passed through");
        return Ok(Registration::Abstract(decl));
      }
      Derived::Plain(entity) => {
        let entity = Arc::new(entity);
        (
          Entry { entity: entity.clone(), journal: None },
          Registration::Plain(entity),
        )
      }
      Derived::Journaled { entity, journal } => {
        let entity = Arc::new(entity);
        let journal = Arc::new(journal);
        (
          Entry { entity: entity.clone(), journal: Some(journal.clone()) },
          Registration::Journaled { entity, journal },
        )
      }
    };
    self.check_claims(&entry)?;

    tracing::debug!(
      entity = %entry.entity.name,
      table = %entry.entity.table,
      journal = ?entry.journal.as_ref().map(|j| &j.table),
      "registered entity type"
    );

    self.order.push(decl.name.clone());
    self.entries.insert(decl.name, entry);
    Ok(registration)
  }

  /// Fail if any table or type name of `entry` is already taken. Table names
  /// compare case-insensitively, as SQLite does.
  fn check_claims(&self, entry: &Entry) -> Result<()> {
    let mut types: HashSet<&str> = HashSet::new();
    let mut tables: HashSet<String> = HashSet::from([META_TABLE.to_owned()]);
    for schema in self.schemas() {
      types.insert(schema.name.as_str());
      tables.insert(schema.table.to_ascii_lowercase());
    }

    let new = std::iter::once(&entry.entity).chain(entry.journal.as_ref());
    for schema in new {
      let taken = if types.contains(schema.name.as_str()) {
        Some(&schema.name)
      } else if tables.contains(&schema.table.to_ascii_lowercase()) {
        Some(&schema.table)
      } else {
        None
      };
      if let Some(name) = taken {
        tracing::warn!(entity = %entry.entity.name, %name, "name already in use");
        return Err(
          DerivationError::NameInUse {
            entity: entry.entity.name.clone(),
            name:   name.clone(),
          }
          .into(),
        );
      }
    }
    Ok(())
  }

  /// Register several declarations in order, stopping at the first error.
  pub fn register_all(
    &mut self,
    decls: impl IntoIterator<Item = EntityDecl>,
  ) -> Result<Vec<Registration>> {
    decls.into_iter().map(|d| self.register(d)).collect()
  }

  pub fn entity(&self, name: &str) -> Result<Arc<TableSchema>> {
    self
      .entries
      .get(name)
      .map(|e| e.entity.clone())
      .ok_or_else(|| Error::UnknownEntity(name.to_owned()))
  }

  /// The journal derived for entity type `name`.
  pub fn journal_of(&self, name: &str) -> Result<Arc<TableSchema>> {
    let entry = self
      .entries
      .get(name)
      .ok_or_else(|| Error::UnknownEntity(name.to_owned()))?;
    entry
      .journal
      .clone()
      .ok_or_else(|| Error::NotJournaled(name.to_owned()))
  }

  /// Look a schema up by type name, whether entity or journal.
  pub fn lookup(&self, type_name: &str) -> Option<Arc<TableSchema>> {
    if let Some(entry) = self.entries.get(type_name) {
      return Some(entry.entity.clone());
    }
    self
      .entries
      .values()
      .filter_map(|e| e.journal.as_ref())
      .find(|j| j.name == type_name)
      .cloned()
  }

  /// Every schema in registration order, each entity followed by its journal.
  pub fn schemas(&self) -> impl Iterator<Item = &Arc<TableSchema>> {
    self.order.iter().filter_map(|name| self.entries.get(name)).flat_map(|e| {
      std::iter::once(&e.entity).chain(e.journal.as_ref())
    })
  }

  pub fn len(&self) -> usize { self.entries.len() }

  pub fn is_empty(&self) -> bool { self.entries.is_empty() }
}
