//! SQLite backend for annal.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Every write (the entity row and its
//! snapshot) runs inside a single SQLite transaction.

mod encode;
mod schema;
mod store;
mod tx;

pub mod error;

pub use error::{Error, Result};
pub use store::{JournalRepository, Repository, SqliteStore};
