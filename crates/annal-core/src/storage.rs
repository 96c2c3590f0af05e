//! The storage collaborator contract.
//!
//! Journaling needs only four things from storage: define a table, insert a
//! row, update/delete rows by key, and query rows with a filter and an order.
//! Each [`StorageTx`] is one open transaction; the backend commits it when the
//! caller's closure returns `Ok` and rolls it back otherwise.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

use crate::{
  Result,
  record::Row,
  schema::{OrderBy, TableSchema},
  value::{Value, truncate_micros},
};

// ─── Queries ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
  Eq(String, Value),
  Lt(String, Value),
  Le(String, Value),
  Gt(String, Value),
  Ge(String, Value),
}

impl Condition {
  pub fn field(&self) -> &str {
    match self {
      Self::Eq(f, _) | Self::Lt(f, _) | Self::Le(f, _) | Self::Gt(f, _) | Self::Ge(f, _) => f,
    }
  }

  pub fn value(&self) -> &Value {
    match self {
      Self::Eq(_, v) | Self::Lt(_, v) | Self::Le(_, v) | Self::Gt(_, v) | Self::Ge(_, v) => v,
    }
  }

  pub fn operator(&self) -> &'static str {
    match self {
      Self::Eq(..) => "=",
      Self::Lt(..) => "<",
      Self::Le(..) => "<=",
      Self::Gt(..) => ">",
      Self::Ge(..) => ">=",
    }
  }
}

/// Conjunctive filter, ordering and limit for [`StorageTx::query_rows`].
///
/// An empty `order_by` falls back to the table's default ordering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
  pub conditions: Vec<Condition>,
  pub order_by:   Vec<OrderBy>,
  pub limit:      Option<usize>,
}

impl Query {
  pub fn new() -> Self { Self::default() }

  pub fn filter(mut self, condition: Condition) -> Self {
    self.conditions.push(condition);
    self
  }

  pub fn order_by(mut self, order: OrderBy) -> Self {
    self.order_by.push(order);
    self
  }

  pub fn limit(mut self, limit: usize) -> Self {
    self.limit = Some(limit);
    self
  }
}

// ─── Transaction ─────────────────────────────────────────────────────────────

/// One open storage transaction.
pub trait StorageTx {
  /// Create `schema`'s table and indexes if they do not exist yet.
  fn define_table(&mut self, schema: &TableSchema) -> Result<()>;

  /// Insert `row` and return the values storage generated for it: the
  /// primary key, and any generated column (identity, creation timestamp).
  fn insert_row(&mut self, schema: &TableSchema, row: &Row) -> Result<Row>;

  /// Update the row whose primary key is `key` with the columns in `row`.
  /// Returns the number of rows changed.
  fn update_row(&mut self, schema: &TableSchema, key: &Value, row: &Row) -> Result<usize>;

  /// Delete the row whose primary key is `key`. Returns the number of rows
  /// removed, not counting cascaded deletes.
  fn delete_row(&mut self, schema: &TableSchema, key: &Value) -> Result<usize>;

  fn query_rows(&mut self, schema: &TableSchema, query: &Query) -> Result<Vec<Row>>;

  fn count_rows(&mut self, schema: &TableSchema, conditions: &[Condition]) -> Result<usize>;
}

// ─── Clock ───────────────────────────────────────────────────────────────────

/// Source of creation timestamps for generated columns.
pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> { truncate_micros(Utc::now()) }
}

/// A clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
  now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
  pub fn new(start: DateTime<Utc>) -> Self {
    Self { now: Arc::new(Mutex::new(truncate_micros(start))) }
  }

  pub fn set(&self, at: DateTime<Utc>) {
    *self.now.lock().unwrap_or_else(|e| e.into_inner()) = truncate_micros(at);
  }

  pub fn advance(&self, by: Duration) {
    let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
    *now = truncate_micros(*now + by);
  }
}

impl Clock for ManualClock {
  fn now(&self) -> DateTime<Utc> { *self.now.lock().unwrap_or_else(|e| e.into_inner()) }
}
