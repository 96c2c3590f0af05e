//! `annal` - inspect and write journaled entities from the command line.
//!
//! # Usage
//!
//! ```
//! annal --config annal.toml schema
//! annal save Account --set balance=100 --set owner=ada
//! annal at Account 1 2024-01-01T09:00:30Z
//! ANNAL_STORE__PATH=:memory: annal schema --fingerprint
//! ```
//!
//! Exit status: 3 when journal history would be modified, 4 for an operation
//! the target does not support, 75 for a uniqueness conflict that may succeed
//! if retried, 1 for anything else (including NOT NULL and foreign key
//! failures).

mod commands;
mod config;

use std::{path::PathBuf, process::ExitCode};

use annal_core::ErrorKind;
use annal_store_sqlite::SqliteStore;
use anyhow::Context as _;
use clap::Parser;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::{commands::Command, config::Settings};

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "annal", version, about = "Journaled entity store")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "annal.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

// ─── Exit codes ───────────────────────────────────────────────────────────────

const EXIT_PROTECTED_HISTORY: u8 = 3;
const EXIT_UNSUPPORTED: u8 = 4;
/// `EX_TEMPFAIL` from sysexits.h.
const EXIT_RETRYABLE: u8 = 75;

fn error_kind(err: &anyhow::Error) -> Option<ErrorKind> {
  err
    .chain()
    .find_map(|cause| {
      cause
        .downcast_ref::<annal_store_sqlite::Error>()
        .map(annal_store_sqlite::Error::kind)
        .or_else(|| cause.downcast_ref::<annal_core::Error>().map(annal_core::Error::kind))
    })
}

fn exit_code(err: &anyhow::Error) -> ExitCode {
  match error_kind(err) {
    Some(ErrorKind::IllegalMutation) => ExitCode::from(EXIT_PROTECTED_HISTORY),
    Some(ErrorKind::NotSupported) => ExitCode::from(EXIT_UNSUPPORTED),
    Some(ErrorKind::ConstraintViolation) => ExitCode::from(EXIT_RETRYABLE),
    _ => ExitCode::FAILURE,
  }
}

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> ExitCode {
  // Logs go to stderr; stdout carries command output.
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  match run(cli).await {
    Ok(()) => ExitCode::SUCCESS,
    Err(err) => {
      eprintln!("error: {err:#}");
      exit_code(&err)
    }
  }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
  let settings = Settings::load(&cli.config)?;
  let registry = settings.registry()?;
  tracing::debug!(
    config = ?cli.config,
    entities = registry.len(),
    "loaded entity declarations"
  );

  let store = if settings.store.is_in_memory() {
    SqliteStore::open_in_memory(registry)
      .await
      .context("failed to open in-memory store")?
  } else {
    let path = settings.store.resolved_path();
    SqliteStore::open(&path, registry)
      .await
      .with_context(|| format!("failed to open store at {path:?}"))?
  };

  cli.command.run(&store).await
}
