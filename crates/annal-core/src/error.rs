//! Error types for `annal-core`.
//!
//! Every failure carries a [`ErrorKind`] so callers can tell a structurally
//! disallowed operation apart from one that may succeed on retry.

use thiserror::Error;

use crate::value::FieldType;

/// Why deriving (or registering) a schema failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DerivationError {
  #[error("entity type {0:?} is already registered")]
  AlreadyRegistered(String),

  #[error("entity type {0:?} declares no table name")]
  MissingTable(String),

  #[error("entity type {0:?} declares no primary key")]
  MissingPrimaryKey(String),

  #[error("entity type {entity:?} declares more than one primary key")]
  MultiplePrimaryKeys { entity: String },

  #[error("entity type {entity:?} declares field {field:?} twice")]
  DuplicateField { entity: String, field: String },

  #[error("field {field:?} on {entity:?} collides with a journal column")]
  ReservedField { entity: String, field: String },

  /// A table or type name already claimed by another registration.
  #[error("{entity:?} claims {name:?}, which is already in use")]
  NameInUse { entity: String, name: String },

  #[error("default for {entity}.{field} does not fit its type: {reason}")]
  InvalidDefault {
    entity: String,
    field:  String,
    reason: String,
  },
}

#[derive(Debug, Error)]
pub enum Error {
  /// Attempted update or delete of a persisted journal entry.
  #[error("entries of {journal:?} cannot be {action}")]
  IllegalMutation {
    journal: String,
    id:      Option<i64>,
    action:  &'static str,
  },

  /// Attempted a bulk path on a journaled entity or a journal.
  #[error("{operation} is not supported on {target:?}")]
  NotSupported {
    operation: &'static str,
    target:    String,
  },

  /// A uniqueness constraint failed, e.g. two snapshots at one timestamp.
  #[error("constraint violation: {0}")]
  ConstraintViolation(String),

  /// A NOT NULL, foreign key or CHECK constraint failed. Retrying the same
  /// write fails the same way.
  #[error("integrity violation: {0}")]
  Integrity(String),

  #[error("derivation error: {0}")]
  Derivation(#[from] DerivationError),

  #[error("unknown entity type: {0:?}")]
  UnknownEntity(String),

  #[error("entity type {0:?} is not journaled")]
  NotJournaled(String),

  #[error("unknown field {field:?} on {entity:?}")]
  UnknownField { entity: String, field: String },

  #[error("field {field:?} expects {expected}, got {found}")]
  TypeMismatch {
    field:    String,
    expected: FieldType,
    found:    String,
  },

  #[error("record for {0:?} has no primary key value")]
  MissingPrimaryKey(String),

  #[error("storage error: {0}")]
  Storage(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  /// Journal history is immutable. A caller bug; never retry.
  IllegalMutation,
  /// The operation is disabled for this collection; switch to per-row writes.
  NotSupported,
  /// A uniqueness collision; re-issuing the write may succeed.
  ConstraintViolation,
  /// Schema declaration problem.
  Derivation,
  /// The request does not match the declared schema or breaks a NOT NULL,
  /// foreign key or CHECK rule.
  Invalid,
  /// The storage collaborator failed.
  Storage,
}

impl Error {
  pub fn kind(&self) -> ErrorKind {
    match self {
      Self::IllegalMutation { .. } => ErrorKind::IllegalMutation,
      Self::NotSupported { .. } => ErrorKind::NotSupported,
      Self::ConstraintViolation(_) => ErrorKind::ConstraintViolation,
      Self::Derivation(_) => ErrorKind::Derivation,
      Self::UnknownEntity(_)
      | Self::NotJournaled(_)
      | Self::UnknownField { .. }
      | Self::TypeMismatch { .. }
      | Self::MissingPrimaryKey(_)
      | Self::Integrity(_) => ErrorKind::Invalid,
      Self::Storage(_) | Self::Serialization(_) => ErrorKind::Storage,
    }
  }

  pub fn is_retryable(&self) -> bool {
    self.kind() == ErrorKind::ConstraintViolation
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
