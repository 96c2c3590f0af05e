//! Deterministic DDL for derived schemas.
//!
//! The statements are idempotent (`IF NOT EXISTS`) and depend only on the
//! declarations, so migration tooling can regenerate and diff them in any
//! environment. [`fingerprint`] condenses a whole registry into one digest.

use sha2::{Digest, Sha256};

use crate::{
  registry::SchemaRegistry,
  schema::{FieldDecl, Generated, OnDelete, TableSchema},
  value::{FieldType, Value, format_timestamp},
};

/// The store's own bookkeeping table. No entity or journal may use it.
pub const META_TABLE: &str = "annal_meta";

/// Quote an SQL identifier.
pub fn ident(name: &str) -> String { format!("\"{}\"", name.replace('"', "\"\"")) }

fn literal(value: &Value) -> String {
  let quoted = |s: &str| format!("'{}'", s.replace('\'', "''"));
  match value {
    Value::Null => "NULL".to_owned(),
    Value::Boolean(b) => (if *b { "1" } else { "0" }).to_owned(),
    Value::Integer(i) => i.to_string(),
    Value::Real(r) => format!("{r:?}"),
    Value::Text(s) => quoted(s),
    Value::Timestamp(dt) => quoted(&format_timestamp(*dt)),
    Value::Json(j) => quoted(&j.to_string()),
  }
}

fn column(field: &FieldDecl) -> String {
  let mut col = format!("{} {}", ident(&field.name), field.ty.sql_type());

  if field.primary_key {
    col.push_str(" PRIMARY KEY");
    if field.generated == Some(Generated::AutoIncrement) {
      col.push_str(" AUTOINCREMENT");
    } else if field.ty != FieldType::Integer {
      col.push_str(" NOT NULL");
    }
  } else {
    if !field.nullable {
      col.push_str(" NOT NULL");
    }
    if field.unique {
      col.push_str(" UNIQUE");
    }
  }

  if let Some(default) = &field.default {
    col.push_str(" DEFAULT ");
    col.push_str(&literal(default));
  }

  if let Some(fk) = &field.references {
    col.push_str(&format!(
      " REFERENCES {}({}) ON DELETE {}",
      ident(&fk.table),
      ident(&fk.column),
      match fk.on_delete {
        OnDelete::Cascade => "CASCADE",
        OnDelete::Restrict => "RESTRICT",
      }
    ));
  }

  col
}

fn ident_list(names: &[String]) -> String {
  names.iter().map(|n| ident(n)).collect::<Vec<_>>().join(", ")
}

/// `CREATE TABLE` followed by one `CREATE INDEX` per declared index.
pub fn create_statements(schema: &TableSchema) -> Vec<String> {
  let mut lines: Vec<String> = schema.fields.iter().map(column).collect();
  lines.extend(
    schema
      .options
      .unique_together
      .iter()
      .map(|cols| format!("UNIQUE ({})", ident_list(cols))),
  );

  let mut statements = vec![format!(
    "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
    ident(&schema.table),
    lines.join(",\n    ")
  )];

  statements.extend(schema.options.indexes.iter().map(|index| {
    format!(
      "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
      ident(&index.name),
      ident(&schema.table),
      ident_list(&index.fields)
    )
  }));

  statements
}

/// Every statement for every registered schema, in registration order.
pub fn registry_statements(registry: &SchemaRegistry) -> Vec<String> {
  registry.schemas().flat_map(|s| create_statements(s)).collect()
}

/// Hex SHA-256 over [`registry_statements`].
pub fn fingerprint(registry: &SchemaRegistry) -> String {
  let mut hasher = Sha256::new();
  for statement in registry_statements(registry) {
    hasher.update(statement.as_bytes());
    hasher.update(b";\n");
  }
  hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::schema::EntityDecl;

  fn registry() -> SchemaRegistry {
    let mut registry = SchemaRegistry::new();
    registry
      .register(
        EntityDecl::new("Account", "account")
          .field(FieldDecl::new("id", FieldType::Integer).primary_key())
          .field(FieldDecl::new("owner", FieldType::Text).unique())
          .field(FieldDecl::new("balance", FieldType::Integer).default_value(0)),
      )
      .unwrap();
    registry
  }

  #[test]
  fn journal_table_ddl() {
    let registry = registry();
    let journal = registry.journal_of("Account").unwrap();
    let statements = create_statements(&journal);

    assert_eq!(statements.len(), 2);
    assert_eq!(
      statements[0],
      "CREATE TABLE IF NOT EXISTS \"account_journal\" (\n    \
       \"id\" INTEGER PRIMARY KEY AUTOINCREMENT,\n    \
       \"parent\" INTEGER NOT NULL REFERENCES \"account\"(\"id\") ON DELETE CASCADE,\n    \
       \"timestamp\" TEXT NOT NULL,\n    \
       \"owner\" TEXT NOT NULL,\n    \
       \"balance\" INTEGER NOT NULL DEFAULT 0,\n    \
       UNIQUE (\"parent\", \"timestamp\")\n)"
    );
    assert_eq!(
      statements[1],
      "CREATE INDEX IF NOT EXISTS \"account_journal_parent_timestamp_idx\" \
       ON \"account_journal\" (\"parent\", \"timestamp\")"
    );
  }

  #[test]
  fn entity_table_ddl_keeps_uniqueness() {
    let registry = registry();
    let entity = registry.entity("Account").unwrap();
    let statements = create_statements(&entity);
    assert_eq!(statements.len(), 1);
    assert!(statements[0].contains("\"id\" INTEGER PRIMARY KEY,"));
    assert!(statements[0].contains("\"owner\" TEXT NOT NULL UNIQUE"));
  }

  #[test]
  fn fingerprint_is_stable() {
    let a = fingerprint(&registry());
    let b = fingerprint(&registry());
    assert_eq!(a, b);
    assert_eq!(a.len(), 64);

    let mut other = registry();
    other
      .register(
        EntityDecl::new("Tag", "tag")
          .field(FieldDecl::new("id", FieldType::Integer).primary_key()),
      )
      .unwrap();
    assert_ne!(a, fingerprint(&other));
  }

  #[test]
  fn literals_are_escaped() {
    assert_eq!(literal(&Value::Text("o'clock".into())), "'o''clock'");
    assert_eq!(ident("we\"ird"), "\"we\"\"ird\"");
  }
}
