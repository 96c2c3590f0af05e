//! Subcommand implementations. Each prints JSON to stdout.

use annal_core::{
  ddl,
  derive::{ID_FIELD, PARENT_FIELD},
  record::{JournalEntry, Record},
  value::Value,
};
use annal_store_sqlite::SqliteStore;
use anyhow::{Context as _, anyhow};
use chrono::{DateTime, Utc};
use clap::Subcommand;
use serde::Serialize;

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Print the DDL for every registered table and the schema fingerprint.
  Schema {
    /// Print only the fingerprint.
    #[arg(long)]
    fingerprint: bool,
  },

  /// Insert or update a record. Journal type names append a journal entry.
  Save {
    /// Entity type name (e.g. `Account`) or journal type name
    /// (e.g. `AccountJournal`).
    entity: String,

    /// `field=value` pairs. Values are parsed as JSON, falling back to text.
    #[arg(short, long = "set", value_name = "FIELD=VALUE")]
    set: Vec<String>,
  },

  /// Show one record, or all records of a type.
  Show {
    entity: String,
    key:    Option<String>,
  },

  /// Every snapshot of an entity, oldest first.
  History { entity: String, key: String },

  /// The snapshot in effect at an RFC 3339 instant.
  At {
    entity: String,
    key:    String,
    at:     DateTime<Utc>,
  },

  /// Delete a record and its journal.
  Delete { entity: String, key: String },

  /// Creation and last-update timestamps of an entity.
  Timestamps { entity: String, key: String },
}

/// Parse a command-line value: JSON if it parses, text otherwise.
pub fn parse_value(raw: &str) -> Value {
  serde_json::from_str(raw).unwrap_or_else(|_| Value::Text(raw.to_owned()))
}

fn parse_assignment(raw: &str) -> anyhow::Result<(String, Value)> {
  let (field, value) = raw
    .split_once('=')
    .ok_or_else(|| anyhow!("expected FIELD=VALUE, got {raw:?}"))?;
  if field.is_empty() {
    return Err(anyhow!("empty field name in {raw:?}"));
  }
  Ok((field.to_owned(), parse_value(value)))
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

#[derive(Serialize)]
struct Timestamps {
  created_at: Option<DateTime<Utc>>,
  updated_at: Option<DateTime<Utc>>,
}

impl Command {
  pub async fn run(self, store: &SqliteStore) -> anyhow::Result<()> {
    match self {
      Self::Schema { fingerprint } => {
        if !fingerprint {
          for statement in ddl::registry_statements(store.registry()) {
            println!("{statement};\n");
          }
        }
        println!("-- fingerprint: {}", ddl::fingerprint(store.registry()));
      }

      Self::Save { entity, set } => {
        let values = set
          .iter()
          .map(|raw| parse_assignment(raw))
          .collect::<anyhow::Result<Vec<_>>>()?;

        if let Some(mirrors) = mirrored_entity(store, &entity) {
          let entry = journal_entry(values)?;
          let saved = store.journal(&mirrors)?.save(entry).await?;
          print_json(&saved)?;
        } else {
          let mut record = Record::new(entity.as_str());
          for (field, value) in values {
            record.set(field, value);
          }
          let saved = store.repository(&entity)?.save(record).await?;
          print_json(&saved)?;
        }
      }

      Self::Show { entity, key } => {
        let repository = store.repository(&entity)?;
        match key {
          Some(key) => {
            let record = repository
              .get(parse_value(&key))
              .await?
              .with_context(|| format!("no {entity} with key {key}"))?;
            print_json(&record)?;
          }
          None => print_json(&repository.list().await?)?,
        }
      }

      Self::History { entity, key } => {
        let history = store.repository(&entity)?.history(parse_value(&key)).await?;
        print_json(&history)?;
      }

      Self::At { entity, key, at } => {
        let snapshot = store
          .repository(&entity)?
          .get_at_timestamp(parse_value(&key), at)
          .await?;
        print_json(&snapshot)?;
      }

      Self::Delete { entity, key } => {
        if let Some(mirrors) = mirrored_entity(store, &entity) {
          let mut entry = JournalEntry::new(Value::Null);
          let id = parse_value(&key)
            .as_i64()
            .ok_or_else(|| anyhow!("journal entry ids are integers, got {key:?}"))?;
          entry.id = Some(id);
          store.journal(&mirrors)?.delete(&entry)?;
        } else {
          let removed = store.repository(&entity)?.delete(parse_value(&key)).await?;
          print_json(&serde_json::json!({ "deleted": removed }))?;
        }
      }

      Self::Timestamps { entity, key } => {
        let repository = store.repository(&entity)?;
        let key = parse_value(&key);
        let timestamps = Timestamps {
          created_at: repository.created_at(key.clone()).await?,
          updated_at: repository.updated_at(key).await?,
        };
        print_json(&timestamps)?;
      }
    }
    Ok(())
  }
}

/// For a journal type name, the entity type it mirrors.
fn mirrored_entity(store: &SqliteStore, type_name: &str) -> Option<String> {
  store
    .registry()
    .lookup(type_name)
    .filter(|schema| schema.is_journal())
    .and_then(|schema| schema.counterpart().map(str::to_owned))
}

/// Build a journal entry from `--set` pairs; `parent` is required and `id`
/// is passed through so the store can refuse it.
fn journal_entry(values: Vec<(String, Value)>) -> anyhow::Result<JournalEntry> {
  let mut parent = None;
  let mut entry = JournalEntry::new(Value::Null);
  for (field, value) in values {
    match field.as_str() {
      PARENT_FIELD => parent = Some(value),
      ID_FIELD => {
        let id = value
          .as_i64()
          .ok_or_else(|| anyhow!("journal entry {ID_FIELD} must be an integer, got {value:?}"))?;
        entry.id = Some(id);
      }
      _ => {
        entry.values.insert(field, value);
      }
    }
  }
  entry.parent = parent.ok_or_else(|| anyhow!("journal entries need --set {PARENT_FIELD}=..."))?;
  Ok(entry)
}
