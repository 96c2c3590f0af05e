//! Connection setup and schema bookkeeping for the annal SQLite store.
//!
//! Table DDL is generated from the registry by `annal_core::ddl`. This module
//! only holds the per-connection pragmas and the metadata table that records
//! which schema fingerprint the file was last opened with.

/// Executed once per connection, before any table is defined.
///
/// `foreign_keys` must be on for journal rows to cascade with their parent.
pub const PRAGMAS: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS annal_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

pub const FINGERPRINT_KEY: &str = "schema_fingerprint";
