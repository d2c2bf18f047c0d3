//! `plait` — unified personal-communications ledger.
//!
//! Reads `plait.toml` (or the path given with `--config`), opens the SQLite
//! ledger, and runs one subcommand:
//!
//! ```
//! plait ingest exports/imessage.jsonl exports/gmail.jsonl
//! plait export --timeline
//! plait person a@b.com
//! ```

mod ingest;

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use plait_core::ledger::{Ledger as _, render_timeline};
use plait_pipeline::{
  CheckpointStore, ChunkConfig, Interrupt, Processor, RunOutcome, RunStats,
};
use plait_store_sqlite::SqliteLedger;
use serde::Deserialize;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::ingest::JsonlTransform;

// ─── CLI args ────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "plait", version, about = "Unified personal-communications ledger")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "plait.toml")]
  config: PathBuf,

  /// Ledger database path (overrides the config file).
  #[arg(long)]
  db: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Ingest JSONL record files into the ledger, resuming any prior run.
  Ingest {
    /// Input files, one wire-format JSON record per line.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Directory for progress/results checkpoint files.
    #[arg(long)]
    checkpoint_dir: Option<PathBuf>,

    /// Items per chunk.
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Save the checkpoint after every N items within a chunk.
    #[arg(long)]
    save_interval: Option<usize>,

    /// Discard any existing checkpoint and start over.
    #[arg(long)]
    fresh: bool,

    /// Drop records older than this date (YYYY-MM-DD or RFC 3339).
    #[arg(long)]
    since: Option<String>,
  },

  /// Write the full ledger export as JSON (or a readable timeline).
  Export {
    /// Output file; stdout if omitted.
    #[arg(long)]
    out: Option<PathBuf>,

    /// Render a human-readable chronological timeline instead of JSON.
    #[arg(long)]
    timeline: bool,
  },

  /// Print summary counters.
  Stats,

  /// Look up a person by email, phone, or `source:id` key.
  Person { identifier: String },

  /// Delete the checkpoint files from a previous ingest run.
  ResetCheckpoint {
    #[arg(long)]
    checkpoint_dir: Option<PathBuf>,
  },
}

// ─── Config file ─────────────────────────────────────────────────────────────

/// Shape of the optional TOML config file; every key can also be set with a
/// `PLAIT_`-prefixed environment variable. CLI flags win over both.
#[derive(Debug, Clone, Deserialize)]
struct AppConfig {
  #[serde(default = "default_db_path")]
  db_path:        PathBuf,
  #[serde(default = "default_checkpoint_dir")]
  checkpoint_dir: PathBuf,
  #[serde(default = "default_chunk_size")]
  chunk_size:     usize,
  #[serde(default = "default_save_interval")]
  save_interval:  usize,
  /// Ignore records older than this date at ingest time.
  #[serde(default)]
  start_date:     Option<String>,
}

fn default_db_path() -> PathBuf { PathBuf::from("plait.db") }
fn default_checkpoint_dir() -> PathBuf { PathBuf::from(".plait-checkpoint") }
fn default_chunk_size() -> usize { ChunkConfig::default().chunk_size }
fn default_save_interval() -> usize { ChunkConfig::default().save_interval }

/// Accept a bare date (midnight UTC) or a full RFC 3339 timestamp.
fn parse_start_date(raw: &str) -> anyhow::Result<DateTime<Utc>> {
  if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
    return Ok(ts.with_timezone(&Utc));
  }
  let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
    .with_context(|| format!("invalid start date {raw:?}"))?;
  let midnight = date
    .and_hms_opt(0, 0, 0)
    .context("invalid start date")?;
  Ok(midnight.and_utc())
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

// ─── Entry point ─────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config.clone()).required(false))
    .add_source(config::Environment::with_prefix("PLAIT"))
    .build()
    .context("failed to read configuration")?;
  let cfg: AppConfig = settings
    .try_deserialize()
    .context("failed to deserialise configuration")?;

  let db_path = expand_tilde(cli.db.as_ref().unwrap_or(&cfg.db_path));
  let ledger = SqliteLedger::open(&db_path)
    .await
    .with_context(|| format!("failed to open ledger at {db_path:?}"))?;

  match cli.command {
    Command::Ingest {
      inputs,
      checkpoint_dir,
      chunk_size,
      save_interval,
      fresh,
      since,
    } => {
      let start_date = since
        .or(cfg.start_date)
        .map(|raw| parse_start_date(&raw))
        .transpose()?;
      let config = ChunkConfig {
        chunk_size:    chunk_size.unwrap_or(cfg.chunk_size),
        save_interval: save_interval.unwrap_or(cfg.save_interval),
      };
      let dir = checkpoint_dir.unwrap_or(cfg.checkpoint_dir);

      run_ingest(&ledger, &inputs, config, &dir, fresh, start_date).await
    }

    Command::Export { out, timeline } => {
      let export = ledger.export().await.context("export failed")?;
      let text = if timeline {
        render_timeline(&export)
      } else {
        serde_json::to_string_pretty(&export)?
      };
      match out {
        Some(path) => std::fs::write(&path, text)
          .with_context(|| format!("writing {}", path.display()))?,
        None => println!("{text}"),
      }
      Ok(())
    }

    Command::Stats => {
      let stats = ledger.stats().await?;
      let tags: Vec<&str> =
        stats.sources_seen.iter().map(|s| s.tag()).collect();
      println!("Events:  {}", stats.total_events);
      println!("Persons: {}", stats.unique_person_count);
      println!("Sources: {}", tags.join(", "));
      Ok(())
    }

    Command::Person { identifier } => show_person(&ledger, &identifier).await,

    Command::ResetCheckpoint { checkpoint_dir } => {
      let dir = checkpoint_dir.unwrap_or(cfg.checkpoint_dir);
      CheckpointStore::create(&dir)?.reset()?;
      println!("Checkpoint in {} cleared.", dir.display());
      Ok(())
    }
  }
}

// ─── Subcommand bodies ───────────────────────────────────────────────────────

async fn run_ingest(
  ledger: &SqliteLedger,
  inputs: &[PathBuf],
  config: ChunkConfig,
  checkpoint_dir: &Path,
  fresh: bool,
  start_date: Option<DateTime<Utc>>,
) -> anyhow::Result<()> {
  let store = CheckpointStore::create(checkpoint_dir)?;
  let items = ingest::read_items(inputs)?;

  let interrupt = Interrupt::new();
  {
    let interrupt = interrupt.clone();
    tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        tracing::warn!("ctrl-c received; finishing the current item");
        interrupt.trip();
      }
    });
  }

  let transform = JsonlTransform { start_date };
  let processor = Processor::new(config, store).with_interrupt(interrupt);
  let stats = processor
    .process(&items, &transform, ledger, !fresh)
    .await
    .context("ingest failed")?;

  print_report(&stats);
  Ok(())
}

fn print_report(stats: &RunStats) {
  println!("Processed: {}", stats.processed);
  println!("  succeeded: {}", stats.succeeded);
  println!("  skipped:   {}", stats.skipped);
  println!("  failed:    {}", stats.failed);
  if !stats.failures.is_empty() {
    println!("\nFailures:");
    for failure in &stats.failures {
      println!("  {}: {}", failure.item_id, failure.cause);
    }
  }
  if stats.outcome == RunOutcome::Interrupted {
    println!("\nInterrupted; re-run the same command to resume.");
  }
}

async fn show_person(
  ledger: &SqliteLedger,
  identifier: &str,
) -> anyhow::Result<()> {
  let Some(person) = ledger.get_person_by_identifier(identifier).await? else {
    println!("No person matches {identifier:?}.");
    return Ok(());
  };

  println!("{}", person.label());
  if let Some(email) = &person.email {
    println!("  email:  {email}");
  }
  if let Some(phone) = &person.phone {
    println!("  phone:  {phone}");
  }
  for key in &person.sources {
    println!("  source: {key}");
  }
  println!("  seen:   {} .. {}", person.first_seen, person.last_seen);
  println!("  events: {}", person.event_count);
  if person.is_self {
    println!("  (this is you)");
  }

  let events = ledger.get_events_for_person(person.person_id).await?;
  if !events.is_empty() {
    println!("\nRecent:");
    for event in events.iter().rev().take(10).rev() {
      let preview: String = event.body.chars().take(60).collect();
      println!(
        "  {} [{}] {}",
        event.timestamp.format("%Y-%m-%d %H:%M"),
        event.source.tag(),
        preview
      );
    }
  }
  Ok(())
}
