//! [`SqliteTx`]: the [`StorageTx`] implementation over an open `rusqlite`
//! transaction.

use annal_core::{
  ddl::{create_statements, ident},
  record::Row,
  schema::{Direction, Generated, OrderBy, TableSchema},
  storage::{Clock, Condition, Query, StorageTx},
  value::Value,
};
use rusqlite::{ErrorCode, ffi, params_from_iter, types::Value as SqlValue};

use crate::encode::{decode_value, encode_value};

type CoreResult<T> = annal_core::Result<T>;

/// Map a SQLite failure onto the core error kinds. Only uniqueness failures
/// become [`ConstraintViolation`](annal_core::Error::ConstraintViolation);
/// NOT NULL, foreign key and CHECK failures are integrity errors.
pub fn map_sqlite_error(err: rusqlite::Error) -> annal_core::Error {
  match &err {
    rusqlite::Error::SqliteFailure(e, msg) if e.code == ErrorCode::ConstraintViolation => {
      let message = msg.clone().unwrap_or_else(|| e.to_string());
      match e.extended_code {
        ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
          tracing::warn!(%message, "constraint violation");
          annal_core::Error::ConstraintViolation(message)
        }
        code => {
          tracing::warn!(%message, code, "integrity violation");
          annal_core::Error::Integrity(message)
        }
      }
    }
    _ => annal_core::Error::Storage(Box::new(err)),
  }
}

pub struct SqliteTx<'a> {
  conn:  &'a rusqlite::Connection,
  clock: &'a dyn Clock,
}

impl<'a> SqliteTx<'a> {
  /// `conn` is expected to be inside a transaction (a
  /// [`rusqlite::Transaction`] derefs to it).
  pub fn new(conn: &'a rusqlite::Connection, clock: &'a dyn Clock) -> Self {
    Self { conn, clock }
  }

  fn where_clause(
    schema: &TableSchema,
    conditions: &[Condition],
    params: &mut Vec<SqlValue>,
  ) -> CoreResult<String> {
    if conditions.is_empty() {
      return Ok(String::new());
    }
    let mut parts = Vec::with_capacity(conditions.len());
    for condition in conditions {
      let field = known_field(schema, condition.field())?;
      let value = condition.value().clone().coerce(field.ty, &field.name)?;
      params.push(encode_value(&value));
      parts.push(format!(
        "{} {} ?{}",
        ident(&field.name),
        condition.operator(),
        params.len()
      ));
    }
    Ok(format!(" WHERE {}", parts.join(" AND ")))
  }
}

fn known_field<'s>(
  schema: &'s TableSchema,
  name: &str,
) -> CoreResult<&'s annal_core::schema::FieldDecl> {
  schema.field(name).ok_or_else(|| annal_core::Error::UnknownField {
    entity: schema.name.clone(),
    field:  name.to_owned(),
  })
}

fn order_clause(schema: &TableSchema, order_by: &[OrderBy]) -> CoreResult<String> {
  let order_by = if order_by.is_empty() { schema.default_ordering() } else { order_by };
  if order_by.is_empty() {
    return Ok(String::new());
  }
  let terms = order_by
    .iter()
    .map(|o| {
      known_field(schema, &o.field)?;
      Ok(format!(
        "{} {}",
        ident(&o.field),
        match o.direction {
          Direction::Asc => "ASC",
          Direction::Desc => "DESC",
        }
      ))
    })
    .collect::<CoreResult<Vec<_>>>()?;
  Ok(format!(" ORDER BY {}", terms.join(", ")))
}

impl StorageTx for SqliteTx<'_> {
  fn define_table(&mut self, schema: &TableSchema) -> CoreResult<()> {
    for statement in create_statements(schema) {
      self.conn.execute_batch(&statement).map_err(map_sqlite_error)?;
    }
    tracing::debug!(table = %schema.table, "defined table");
    Ok(())
  }

  fn insert_row(&mut self, schema: &TableSchema, row: &Row) -> CoreResult<Row> {
    let mut generated = Row::new();
    let mut columns = Vec::new();
    let mut params = Vec::new();

    for field in &schema.fields {
      let value = match field.generated {
        Some(Generated::AutoIncrement) => continue,
        Some(Generated::CreatedAt) => {
          let now = Value::Timestamp(self.clock.now());
          generated.insert(field.name.clone(), now.clone());
          now
        }
        None => match row.get(&field.name) {
          Some(v) => v.clone(),
          None => continue,
        },
      };
      columns.push(ident(&field.name));
      params.push(encode_value(&value));
    }

    let sql = if columns.is_empty() {
      format!("INSERT INTO {} DEFAULT VALUES", ident(&schema.table))
    } else {
      let placeholders: Vec<_> = (1..=params.len()).map(|i| format!("?{i}")).collect();
      format!(
        "INSERT INTO {} ({}) VALUES ({})",
        ident(&schema.table),
        columns.join(", "),
        placeholders.join(", ")
      )
    };

    self
      .conn
      .execute(&sql, params_from_iter(params))
      .map_err(map_sqlite_error)?;

    let pk = schema.primary_key();
    let key = match row.get(&pk.name).filter(|v| !v.is_null()) {
      Some(v) => v.clone(),
      None => Value::Integer(self.conn.last_insert_rowid()),
    };
    generated.insert(pk.name.clone(), key);
    Ok(generated)
  }

  fn update_row(&mut self, schema: &TableSchema, key: &Value, row: &Row) -> CoreResult<usize> {
    let mut params = Vec::with_capacity(row.len() + 1);
    let mut sets = Vec::with_capacity(row.len());
    for (name, value) in row {
      let field = known_field(schema, name)?;
      params.push(encode_value(value));
      sets.push(format!("{} = ?{}", ident(&field.name), params.len()));
    }
    params.push(encode_value(key));
    let sql = format!(
      "UPDATE {} SET {} WHERE {} = ?{}",
      ident(&schema.table),
      sets.join(", "),
      ident(&schema.primary_key().name),
      params.len()
    );
    self
      .conn
      .execute(&sql, params_from_iter(params))
      .map_err(map_sqlite_error)
  }

  fn delete_row(&mut self, schema: &TableSchema, key: &Value) -> CoreResult<usize> {
    let sql = format!(
      "DELETE FROM {} WHERE {} = ?1",
      ident(&schema.table),
      ident(&schema.primary_key().name)
    );
    self
      .conn
      .execute(&sql, [encode_value(key)])
      .map_err(map_sqlite_error)
  }

  fn query_rows(&mut self, schema: &TableSchema, query: &Query) -> CoreResult<Vec<Row>> {
    let mut params = Vec::new();
    let columns: Vec<_> = schema.fields.iter().map(|f| ident(&f.name)).collect();
    let mut sql = format!("SELECT {} FROM {}", columns.join(", "), ident(&schema.table));
    sql.push_str(&Self::where_clause(schema, &query.conditions, &mut params)?);
    sql.push_str(&order_clause(schema, &query.order_by)?);
    if let Some(limit) = query.limit {
      sql.push_str(&format!(" LIMIT {limit}"));
    }

    let mut stmt = self.conn.prepare(&sql).map_err(map_sqlite_error)?;
    let raws = stmt
      .query_map(params_from_iter(params), |r| {
        (0..schema.fields.len())
          .map(|i| r.get::<_, SqlValue>(i))
          .collect::<rusqlite::Result<Vec<_>>>()
      })
      .map_err(map_sqlite_error)?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(map_sqlite_error)?;

    raws
      .into_iter()
      .map(|raw| {
        schema
          .fields
          .iter()
          .zip(raw)
          .map(|(field, value)| Ok((field.name.clone(), decode_value(field, value)?)))
          .collect::<crate::Result<Row>>()
          .map_err(annal_core::Error::from)
      })
      .collect()
  }

  fn count_rows(&mut self, schema: &TableSchema, conditions: &[Condition]) -> CoreResult<usize> {
    let mut params = Vec::new();
    let sql = format!(
      "SELECT COUNT(*) FROM {}{}",
      ident(&schema.table),
      Self::where_clause(schema, conditions, &mut params)?
    );
    let count: i64 = self
      .conn
      .query_row(&sql, params_from_iter(params), |r| r.get(0))
      .map_err(map_sqlite_error)?;
    Ok(count as usize)
  }
}
