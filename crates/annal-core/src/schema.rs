//! Entity declarations and the table schemas derived from them.
//!
//! An [`EntityDecl`] is what application code (or a config file) writes down.
//! A [`TableSchema`] is the validated, storage-ready form produced by the
//! [`SchemaRegistry`](crate::registry::SchemaRegistry): one for the entity
//! itself and, for journaled entities, one for its journal.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::{FieldType, Value};

// ─── Fields ──────────────────────────────────────────────────────────────────

/// How storage fills a column the application never writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Generated {
  /// Monotonic integer identity, never reused.
  AutoIncrement,
  /// Set once from the storage clock when the row is inserted.
  CreatedAt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnDelete {
  Cascade,
  Restrict,
}

/// A reference from one table's column to another table's primary key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
  pub table:     String,
  pub column:    String,
  pub on_delete: OnDelete,
}

/// A single declared column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDecl {
  pub name:        String,
  #[serde(rename = "type")]
  pub ty:          FieldType,
  #[serde(default)]
  pub nullable:    bool,
  #[serde(default)]
  pub unique:      bool,
  #[serde(default)]
  pub primary_key: bool,
  #[serde(default)]
  pub default:     Option<Value>,
  /// Only ever set by derivation; not accepted from declarations.
  #[serde(skip)]
  pub generated:   Option<Generated>,
  #[serde(skip)]
  pub references:  Option<ForeignKey>,
}

impl FieldDecl {
  pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
    Self {
      name: name.into(),
      ty,
      nullable: false,
      unique: false,
      primary_key: false,
      default: None,
      generated: None,
      references: None,
    }
  }

  pub fn primary_key(mut self) -> Self {
    self.primary_key = true;
    self
  }

  pub fn nullable(mut self) -> Self {
    self.nullable = true;
    self
  }

  pub fn unique(mut self) -> Self {
    self.unique = true;
    self
  }

  pub fn default_value(mut self, value: impl Into<Value>) -> Self {
    self.default = Some(value.into());
    self
  }

  /// Application code may set this field directly.
  pub fn is_editable(&self) -> bool { self.generated.is_none() }
}

// ─── Table options ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDecl {
  pub name:   String,
  pub fields: Vec<String>,
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
  #[default]
  Asc,
  Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
  pub field:     String,
  #[serde(default)]
  pub direction: Direction,
}

impl OrderBy {
  pub fn asc(field: impl Into<String>) -> Self {
    Self { field: field.into(), direction: Direction::Asc }
  }

  pub fn desc(field: impl Into<String>) -> Self {
    Self { field: field.into(), direction: Direction::Desc }
  }
}

fn default_permissions() -> Vec<String> {
  ["add", "change", "delete", "view"].map(String::from).to_vec()
}

/// Table-level options the storage layer understands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableOptions {
  #[serde(default)]
  pub unique_together:     Vec<Vec<String>>,
  #[serde(default)]
  pub indexes:             Vec<IndexDecl>,
  #[serde(default)]
  pub ordering:            Vec<OrderBy>,
  /// Permission codenames granted to administrators by default.
  #[serde(default = "default_permissions")]
  pub default_permissions: Vec<String>,
}

impl Default for TableOptions {
  fn default() -> Self {
    Self {
      unique_together:     Vec::new(),
      indexes:             Vec::new(),
      ordering:            Vec::new(),
      default_permissions: default_permissions(),
    }
  }
}

// ─── Declarations ────────────────────────────────────────────────────────────

fn journaled_by_default() -> bool { true }

/// The declarative description of an entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDecl {
  /// Type identifier; the registry key.
  pub name:       String,
  #[serde(default)]
  pub table:      Option<String>,
  #[serde(default)]
  pub fields:     Vec<FieldDecl>,
  #[serde(default = "journaled_by_default")]
  pub journaled:  bool,
  /// Mixin/base declarations carry fields for others but are never stored.
  #[serde(default, rename = "abstract")]
  pub is_abstract: bool,
  #[serde(default)]
  pub options:    TableOptions,
}

impl EntityDecl {
  pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
    Self {
      name:        name.into(),
      table:       Some(table.into()),
      fields:      Vec::new(),
      journaled:   true,
      is_abstract: false,
      options:     TableOptions::default(),
    }
  }

  /// An abstract base: fields only, no table.
  pub fn mixin(name: impl Into<String>) -> Self {
    Self {
      name:        name.into(),
      table:       None,
      fields:      Vec::new(),
      journaled:   false,
      is_abstract: true,
      options:     TableOptions::default(),
    }
  }

  pub fn field(mut self, field: FieldDecl) -> Self {
    self.fields.push(field);
    self
  }

  pub fn not_journaled(mut self) -> Self {
    self.journaled = false;
    self
  }

  pub fn options(mut self, options: TableOptions) -> Self {
    self.options = options;
    self
  }

  /// Inherit the fields of an abstract base ahead of the fields declared so
  /// far. Fields already declared here win over same-named base fields.
  pub fn extend(mut self, base: &EntityDecl) -> Self {
    let mut fields: Vec<FieldDecl> = base
      .fields
      .iter()
      .filter(|f| !self.fields.iter().any(|own| own.name == f.name))
      .cloned()
      .collect();
    fields.append(&mut self.fields);
    self.fields = fields;
    self
  }

  pub fn primary_key(&self) -> Option<&FieldDecl> {
    self.fields.iter().find(|f| f.primary_key)
  }
}

// ─── Table schemas ───────────────────────────────────────────────────────────

/// Whether a schema describes an entity or a journal, plus the
/// cross-reference to its counterpart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableKind {
  Entity {
    /// Type name of the derived journal, if the entity is journaled.
    journal: Option<String>,
  },
  Journal {
    /// Type name of the entity this journal mirrors.
    mirrors: String,
  },
}

/// A validated, storage-ready table definition.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
  pub name:    String,
  pub table:   String,
  pub fields:  Vec<FieldDecl>,
  pub options: TableOptions,
  pub kind:    TableKind,
}

impl TableSchema {
  pub fn field(&self, name: &str) -> Option<&FieldDecl> {
    self.fields.iter().find(|f| f.name == name)
  }

  /// The primary key column. Validation guarantees there is exactly one.
  pub fn primary_key(&self) -> &FieldDecl {
    self
      .fields
      .iter()
      .find(|f| f.primary_key)
      .unwrap_or(&self.fields[0])
  }

  /// Columns copied into (or out of) a snapshot: everything except the
  /// primary key and generated columns.
  pub fn data_fields(&self) -> impl Iterator<Item = &FieldDecl> {
    self
      .fields
      .iter()
      .filter(|f| !f.primary_key && f.generated.is_none() && f.references.is_none())
  }

  pub fn is_journal(&self) -> bool { matches!(self.kind, TableKind::Journal { .. }) }

  pub fn is_journaled(&self) -> bool {
    matches!(self.kind, TableKind::Entity { journal: Some(_) })
  }

  /// Name of the counterpart type: the journal of an entity, or the entity a
  /// journal mirrors.
  pub fn counterpart(&self) -> Option<&str> {
    match &self.kind {
      TableKind::Entity { journal } => journal.as_deref(),
      TableKind::Journal { mirrors } => Some(mirrors),
    }
  }

  /// Ordering applied when a query does not specify one.
  pub fn default_ordering(&self) -> &[OrderBy] { &self.options.ordering }
}

impl fmt::Display for TableSchema {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.kind {
      TableKind::Entity { .. } => write!(f, "<Entity {}>", self.name),
      TableKind::Journal { mirrors } => write!(f, "<Journal of {mirrors}>"),
    }
  }
}
