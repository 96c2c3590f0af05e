//! Core types for annal: entity declarations, the journal deriver, and the
//! storage-agnostic snapshot write and point-in-time read paths.
//!
//! This crate is deliberately free of database dependencies. Backends
//! implement [`storage::StorageTx`]; everything else is built on top of it.

pub mod ddl;
pub mod derive;
pub mod error;
pub mod history;
pub mod persist;
pub mod record;
pub mod registry;
pub mod schema;
pub mod storage;
pub mod value;

pub use error::{DerivationError, Error, ErrorKind, Result};
