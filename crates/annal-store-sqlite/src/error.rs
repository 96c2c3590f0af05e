//! Error type for `annal-store-sqlite`.

use annal_core::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error(transparent)]
  Core(#[from] annal_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// A stored column did not match its declared type.
  #[error("cannot decode column {column:?} as {expected}: found {found}")]
  Decode {
    column:   String,
    expected: annal_core::value::FieldType,
    found:    &'static str,
  },
}

impl Error {
  pub fn kind(&self) -> ErrorKind {
    match self {
      Self::Core(e) => e.kind(),
      _ => ErrorKind::Storage,
    }
  }

  pub fn is_retryable(&self) -> bool { self.kind() == ErrorKind::ConstraintViolation }
}

/// Fold a backend error into the core error the storage contract speaks.
impl From<Error> for annal_core::Error {
  fn from(e: Error) -> Self {
    match e {
      Error::Core(core) => core,
      other => annal_core::Error::Storage(Box::new(other)),
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
