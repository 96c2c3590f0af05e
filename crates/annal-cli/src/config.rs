//! `annal.toml`: where the store lives and which entity types it holds.
//!
//! ```toml
//! [store]
//! path = "~/.local/share/annal/annal.db"
//!
//! [[entities]]
//! name = "Audited"
//! abstract = true
//! fields = [{ name = "note", type = "text", nullable = true }]
//!
//! [[entities]]
//! name = "Account"
//! table = "account"
//! extends = ["Audited"]
//! fields = [
//!   { name = "id", type = "integer", primary_key = true },
//!   { name = "balance", type = "integer", default = 0 },
//! ]
//! ```
//!
//! Every key can be overridden from the environment with the `ANNAL_` prefix
//! and `__` as the nesting separator, e.g. `ANNAL_STORE__PATH=:memory:`.

use std::{
  collections::HashMap,
  path::{Path, PathBuf},
};

use annal_core::{
  registry::{Registration, SchemaRegistry},
  schema::EntityDecl,
};
use anyhow::{Context as _, bail};
use serde::Deserialize;

/// Path value that selects a throwaway in-memory store.
pub const IN_MEMORY: &str = ":memory:";

#[derive(Debug, Deserialize)]
pub struct Settings {
  #[serde(default)]
  pub store:    StoreSettings,
  #[serde(default)]
  pub entities: Vec<EntityConfig>,
}

#[derive(Debug, Deserialize)]
pub struct StoreSettings {
  #[serde(default = "default_store_path")]
  pub path: PathBuf,
}

fn default_store_path() -> PathBuf { PathBuf::from("annal.db") }

impl Default for StoreSettings {
  fn default() -> Self { Self { path: default_store_path() } }
}

impl StoreSettings {
  pub fn is_in_memory(&self) -> bool { self.path.as_os_str() == IN_MEMORY }

  /// The store path with a leading `~` expanded.
  pub fn resolved_path(&self) -> PathBuf { expand_tilde(&self.path) }
}

/// One `[[entities]]` table: a declaration plus the abstract bases it
/// inherits fields from.
#[derive(Debug, Deserialize)]
pub struct EntityConfig {
  #[serde(flatten)]
  pub decl:    EntityDecl,
  /// Names of abstract entities declared earlier in the file.
  #[serde(default)]
  pub extends: Vec<String>,
}

impl Settings {
  /// Read `path` (if it exists) and layer `ANNAL_*` variables over it.
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    Self::from_builder(
      config::Config::builder().add_source(config::File::from(path).required(false)),
    )
  }

  fn from_builder(
    builder: config::ConfigBuilder<config::builder::DefaultState>,
  ) -> anyhow::Result<Self> {
    builder
      .add_source(
        config::Environment::with_prefix("ANNAL")
          .prefix_separator("_")
          .separator("__"),
      )
      .build()
      .context("failed to read config file")?
      .try_deserialize()
      .context("failed to deserialise settings")
  }

  /// Register every declared entity, in file order.
  pub fn registry(&self) -> anyhow::Result<SchemaRegistry> {
    let mut registry = SchemaRegistry::new();
    let mut mixins: HashMap<String, EntityDecl> = HashMap::new();

    for entity in &self.entities {
      let mut decl = entity.decl.clone();
      // Later bases go first so the earliest listed base ends up leading.
      for base in entity.extends.iter().rev() {
        let Some(base) = mixins.get(base) else {
          bail!("{:?} extends unknown abstract entity {base:?}", decl.name);
        };
        decl = decl.extend(base);
      }

      let name = decl.name.clone();
      let registration = registry
        .register(decl)
        .with_context(|| format!("invalid declaration for {name:?}"))?;
      if let Registration::Abstract(decl) = registration {
        mixins.insert(decl.name.clone(), decl);
      }
    }

    Ok(registry)
  }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}

#[cfg(test)]
mod tests {
  use annal_core::value::{FieldType, Value};

  use super::*;

  const SAMPLE: &str = r#"
[store]
path = ":memory:"

[[entities]]
name = "Audited"
abstract = true
fields = [{ name = "note", type = "text", nullable = true }]

[[entities]]
name = "Account"
table = "account"
extends = ["Audited"]
fields = [
  { name = "id", type = "integer", primary_key = true },
  { name = "balance", type = "integer", default = 0 },
]

[[entities]]
name = "Tag"
table = "tag"
journaled = false
fields = [{ name = "slug", type = "text", primary_key = true }]
"#;

  fn parse(toml: &str) -> Settings {
    Settings::from_builder(
      config::Config::builder()
        .add_source(config::File::from_str(toml, config::FileFormat::Toml)),
    )
    .unwrap()
  }

  #[test]
  fn declarations_load_in_order() {
    let settings = parse(SAMPLE);
    assert!(settings.store.is_in_memory());
    assert_eq!(settings.entities.len(), 3);

    let account = &settings.entities[1];
    assert_eq!(account.extends, vec!["Audited".to_owned()]);
    assert!(account.decl.journaled);
    assert_eq!(account.decl.fields[1].ty, FieldType::Integer);
    assert_eq!(account.decl.fields[1].default, Some(Value::Integer(0)));
    assert!(!settings.entities[2].decl.journaled);
  }

  #[test]
  fn mixins_are_applied_before_registration() {
    let registry = parse(SAMPLE).registry().unwrap();
    assert_eq!(registry.len(), 2);

    let journal = registry.journal_of("Account").unwrap();
    let names: Vec<_> = journal.data_fields().map(|f| f.name.as_str()).collect();
    assert_eq!(names, ["note", "balance"]);
    assert!(registry.journal_of("Tag").is_err());
  }

  #[test]
  fn unknown_base_is_an_error() {
    let settings = parse(
      r#"
[[entities]]
name = "Account"
table = "account"
extends = ["Nope"]
fields = [{ name = "id", type = "integer", primary_key = true }]
"#,
    );
    let err = settings.registry().unwrap_err();
    assert!(err.to_string().contains("Nope"));
  }

  #[test]
  fn store_path_defaults_and_expands() {
    let settings = parse("");
    assert_eq!(settings.store.path, PathBuf::from("annal.db"));
    assert!(!settings.store.is_in_memory());

    let home = StoreSettings { path: PathBuf::from("~/annal.db") };
    if let Ok(dir) = std::env::var("HOME") {
      assert_eq!(home.resolved_path(), PathBuf::from(dir).join("annal.db"));
    }
  }
}
