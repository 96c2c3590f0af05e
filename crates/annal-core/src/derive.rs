//! The schema deriver: entity declaration in, (entity, journal) schemas out.
//!
//! Derivation is a pure function of the declaration. Running it twice on the
//! same input yields identical schemas, which is what lets migration tooling
//! diff the generated DDL across environments.

use std::collections::HashSet;

use crate::{
  error::DerivationError,
  schema::{
    EntityDecl, FieldDecl, ForeignKey, Generated, IndexDecl, OnDelete, OrderBy,
    TableKind, TableOptions, TableSchema,
  },
  value::FieldType,
};

/// Appended to the entity's table name to form the journal's table name.
pub const JOURNAL_TABLE_SUFFIX: &str = "_journal";
/// Appended to the entity's type name to form the journal's type name.
pub const JOURNAL_TYPE_SUFFIX: &str = "Journal";

pub const ID_FIELD: &str = "id";
pub const PARENT_FIELD: &str = "parent";
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// Result of feeding one declaration through the deriver.
#[derive(Debug, Clone, PartialEq)]
pub enum Derived {
  /// Abstract bases pass through untouched.
  Passthrough(EntityDecl),
  /// A concrete entity that is stored but not journaled.
  Plain(TableSchema),
  /// A concrete journaled entity and its journal.
  Journaled { entity: TableSchema, journal: TableSchema },
}

/// Validate `decl` and derive its schemas.
pub fn derive(decl: &EntityDecl) -> Result<Derived, DerivationError> {
  if decl.is_abstract {
    return Ok(Derived::Passthrough(decl.clone()));
  }

  let entity = entity_schema(decl)?;
  if !decl.journaled {
    return Ok(Derived::Plain(entity));
  }

  let journal = journal_schema(&entity);
  let entity = TableSchema {
    kind: TableKind::Entity { journal: Some(journal.name.clone()) },
    ..entity
  };
  Ok(Derived::Journaled { entity, journal })
}

fn entity_schema(decl: &EntityDecl) -> Result<TableSchema, DerivationError> {
  let table = decl
    .table
    .clone()
    .filter(|t| !t.is_empty())
    .ok_or_else(|| DerivationError::MissingTable(decl.name.clone()))?;

  let mut seen = HashSet::new();
  let mut keys = 0;
  let mut fields = Vec::with_capacity(decl.fields.len());

  for field in &decl.fields {
    if !seen.insert(field.name.as_str()) {
      return Err(DerivationError::DuplicateField {
        entity: decl.name.clone(),
        field:  field.name.clone(),
      });
    }

    if field.primary_key {
      keys += 1;
    } else if decl.journaled
      && [ID_FIELD, PARENT_FIELD, TIMESTAMP_FIELD].contains(&field.name.as_str())
    {
      return Err(DerivationError::ReservedField {
        entity: decl.name.clone(),
        field:  field.name.clone(),
      });
    }

    let mut field = field.clone();
    // Declarations cannot ask for generated columns or foreign keys.
    field.generated = None;
    field.references = None;
    if let Some(default) = field.default.take() {
      let coerced = default.coerce(field.ty, &field.name).map_err(|e| {
        DerivationError::InvalidDefault {
          entity: decl.name.clone(),
          field:  field.name.clone(),
          reason: e.to_string(),
        }
      })?;
      field.default = Some(coerced);
    }
    fields.push(field);
  }

  match keys {
    0 => return Err(DerivationError::MissingPrimaryKey(decl.name.clone())),
    1 => {}
    _ => {
      return Err(DerivationError::MultiplePrimaryKeys {
        entity: decl.name.clone(),
      });
    }
  }

  Ok(TableSchema {
    name: decl.name.clone(),
    table,
    fields,
    options: decl.options.clone(),
    kind: TableKind::Entity { journal: None },
  })
}

/// Build the journal schema mirroring `entity`.
///
/// Column order is identity, parent, timestamp, then the entity's data
/// fields in declaration order.
fn journal_schema(entity: &TableSchema) -> TableSchema {
  let key = entity.primary_key();
  let table = format!("{}{JOURNAL_TABLE_SUFFIX}", entity.table);

  let mut id = FieldDecl::new(ID_FIELD, FieldType::Integer).primary_key();
  id.generated = Some(Generated::AutoIncrement);

  let mut parent = FieldDecl::new(PARENT_FIELD, key.ty);
  parent.references = Some(ForeignKey {
    table:     entity.table.clone(),
    column:    key.name.clone(),
    on_delete: OnDelete::Cascade,
  });

  let mut timestamp = FieldDecl::new(TIMESTAMP_FIELD, FieldType::Timestamp);
  timestamp.generated = Some(Generated::CreatedAt);

  let mut fields = vec![id, parent, timestamp];
  fields.extend(entity.data_fields().map(|f| FieldDecl {
    // The journal repeats values by nature.
    unique: false,
    ..f.clone()
  }));

  let pair = vec![PARENT_FIELD.to_owned(), TIMESTAMP_FIELD.to_owned()];
  let options = TableOptions {
    unique_together:     vec![pair.clone()],
    indexes:             vec![IndexDecl {
      name:   format!("{table}_{PARENT_FIELD}_{TIMESTAMP_FIELD}_idx"),
      fields: pair,
    }],
    ordering:            vec![OrderBy::asc(TIMESTAMP_FIELD)],
    default_permissions: Vec::new(),
  };

  TableSchema {
    name: format!("{}{JOURNAL_TYPE_SUFFIX}", entity.name),
    table,
    fields,
    options,
    kind: TableKind::Journal { mirrors: entity.name.clone() },
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{schema::Direction, value::Value};

  fn account() -> EntityDecl {
    EntityDecl::new("Account", "account")
      .field(FieldDecl::new("id", FieldType::Integer).primary_key())
      .field(FieldDecl::new("owner", FieldType::Text).unique())
      .field(FieldDecl::new("balance", FieldType::Integer).default_value(0))
  }

  fn journaled(decl: &EntityDecl) -> (TableSchema, TableSchema) {
    match derive(decl).unwrap() {
      Derived::Journaled { entity, journal } => (entity, journal),
      other => panic!("expected a journaled derivation, got {other:?}"),
    }
  }

  #[test]
  fn journal_mirrors_data_fields() {
    let (entity, journal) = journaled(&account());

    let names: Vec<_> = journal.fields.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, ["id", "parent", "timestamp", "owner", "balance"]);

    assert_eq!(journal.table, "account_journal");
    assert_eq!(journal.name, "AccountJournal");
    assert_eq!(entity.counterpart(), Some("AccountJournal"));
    assert_eq!(journal.counterpart(), Some("Account"));
  }

  #[test]
  fn structural_columns() {
    let (_, journal) = journaled(&account());

    let id = journal.field("id").unwrap();
    assert!(id.primary_key);
    assert_eq!(id.generated, Some(Generated::AutoIncrement));

    let parent = journal.field("parent").unwrap();
    assert_eq!(parent.ty, FieldType::Integer);
    assert_eq!(
      parent.references,
      Some(ForeignKey {
        table:     "account".into(),
        column:    "id".into(),
        on_delete: OnDelete::Cascade,
      })
    );

    let timestamp = journal.field("timestamp").unwrap();
    assert_eq!(timestamp.generated, Some(Generated::CreatedAt));
    assert!(!timestamp.is_editable());
  }

  #[test]
  fn journal_options() {
    let (_, journal) = journaled(&account());

    assert_eq!(journal.options.unique_together, vec![vec![
      "parent".to_owned(),
      "timestamp".to_owned()
    ]]);
    assert_eq!(journal.options.indexes.len(), 1);
    assert_eq!(
      journal.options.indexes[0].name,
      "account_journal_parent_timestamp_idx"
    );
    assert_eq!(journal.options.ordering, vec![OrderBy {
      field:     "timestamp".into(),
      direction: Direction::Asc,
    }]);
    assert!(journal.options.default_permissions.is_empty());
  }

  #[test]
  fn copied_fields_drop_uniqueness_but_keep_defaults() {
    let (entity, journal) = journaled(&account());
    assert!(entity.field("owner").unwrap().unique);
    assert!(!journal.field("owner").unwrap().unique);
    assert_eq!(
      journal.field("balance").unwrap().default,
      Some(Value::Integer(0))
    );
  }

  #[test]
  fn parent_takes_the_key_type() {
    let decl = EntityDecl::new("Sku", "sku")
      .field(FieldDecl::new("code", FieldType::Text).primary_key())
      .field(FieldDecl::new("price", FieldType::Real));
    let (_, journal) = journaled(&decl);
    assert_eq!(journal.field("parent").unwrap().ty, FieldType::Text);
    assert!(journal.field("code").is_none());
  }

  #[test]
  fn derivation_is_deterministic() {
    assert_eq!(derive(&account()).unwrap(), derive(&account()).unwrap());
  }

  #[test]
  fn abstract_bases_pass_through() {
    let base = EntityDecl::mixin("Timestamped")
      .field(FieldDecl::new("note", FieldType::Text).nullable());
    assert_eq!(derive(&base).unwrap(), Derived::Passthrough(base));
  }

  #[test]
  fn unjournaled_entities_get_no_journal() {
    let decl = account().not_journaled();
    match derive(&decl).unwrap() {
      Derived::Plain(schema) => {
        assert_eq!(schema.kind, TableKind::Entity { journal: None })
      }
      other => panic!("expected a plain derivation, got {other:?}"),
    }
  }

  #[test]
  fn missing_metadata_is_rejected() {
    let mut no_table = account();
    no_table.table = None;
    assert_eq!(
      derive(&no_table).unwrap_err(),
      DerivationError::MissingTable("Account".into())
    );

    let no_key = EntityDecl::new("Account", "account")
      .field(FieldDecl::new("balance", FieldType::Integer));
    assert_eq!(
      derive(&no_key).unwrap_err(),
      DerivationError::MissingPrimaryKey("Account".into())
    );
  }

  #[test]
  fn reserved_names_are_rejected() {
    let decl = account().field(FieldDecl::new("timestamp", FieldType::Timestamp));
    assert!(matches!(
      derive(&decl).unwrap_err(),
      DerivationError::ReservedField { field, .. } if field == "timestamp"
    ));
  }

  #[test]
  fn bad_defaults_are_rejected() {
    let decl = EntityDecl::new("Account", "account")
      .field(FieldDecl::new("id", FieldType::Integer).primary_key())
      .field(FieldDecl::new("balance", FieldType::Integer).default_value("many"));
    assert!(matches!(
      derive(&decl).unwrap_err(),
      DerivationError::InvalidDefault { field, .. } if field == "balance"
    ));
  }

  #[test]
  fn display_distinguishes_entity_from_journal() {
    let (entity, journal) = journaled(&account());
    assert_eq!(entity.to_string(), "<Entity Account>");
    assert_eq!(journal.to_string(), "<Journal of Account>");
  }
}
