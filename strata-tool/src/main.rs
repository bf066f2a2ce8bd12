//! Maintenance CLI for a strata cache directory.
//!
//! Configuration comes from `STRATA_*` environment variables (a `.env` file
//! is honoured); `--data-dir` overrides `STRATA_DATA_DIR`.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use shared::config::Settings;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::time::Duration;
use strata::{CacheConfig, Compaction, Connection};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "strata-tool")]
#[command(version)]
#[command(about = "Inspect and maintain a strata cache directory")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Database directory (defaults to STRATA_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Print storage sizes as JSON
    Stats,
    /// Print the value stored at a key
    Get { key: String },
    /// Store a value, optionally with its own TTL in seconds
    Put {
        key: String,
        value: String,
        #[arg(long)]
        ttl: Option<u64>,
    },
    /// Remove a key
    Delete { key: String },
    /// Add to a counter and print the new value
    Incr {
        key: String,
        #[arg(long, default_value_t = 1)]
        by: u64,
    },
    /// Write entries newer than a version to a backup file
    Backup {
        file: PathBuf,
        #[arg(long, default_value_t = 0)]
        since: u64,
    },
    /// Load a backup file
    Restore { file: PathBuf },
    /// Compact until nothing is left to reclaim
    Gc,
}

#[tokio::main]
async fn main() -> Result<()> {
    match dotenvy::dotenv() {
        Ok(_) => {}
        Err(e) if e.not_found() => {}
        Err(e) => eprintln!("Ignoring unreadable .env file: {e}"),
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = Settings::from_env();
    let data_dir = cli
        .data_dir
        .unwrap_or_else(|| PathBuf::from(&settings.data_dir));

    let config = CacheConfig::from_settings(&settings).context("invalid cache settings")?;
    let conn = config
        .open(&data_dir)
        .await
        .with_context(|| format!("failed to open {}", data_dir.display()))?;

    // Close even when the command fails so the GC loop is stopped cleanly.
    let outcome = run(&conn, cli.command);
    conn.close().await.context("failed to close cache")?;
    outcome
}

fn run(conn: &Connection, command: Command) -> Result<()> {
    match command {
        Command::Stats => {
            let stats = conn.stats()?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Get { key } => {
            let value = conn
                .read(key.as_bytes())
                .with_context(|| format!("no live entry for {key:?}"))?;
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&value)?;
            stdout.write_all(b"\n")?;
        }
        Command::Put { key, value, ttl } => {
            match ttl {
                Some(secs) => {
                    conn.write_ttl(key.as_bytes(), value.as_bytes(), Duration::from_secs(secs))?
                }
                None => conn.write(key.as_bytes(), value.as_bytes())?,
            }
            conn.sync()?;
        }
        Command::Delete { key } => {
            if !conn.delete(key.as_bytes())? {
                warn!(key = %key, "Key was not present");
            }
            conn.sync()?;
        }
        Command::Incr { key, by } => {
            let value = conn.increment(key.as_bytes(), by)?;
            conn.sync()?;
            println!("{value}");
        }
        Command::Backup { file, since } => {
            let out = File::create(&file)
                .with_context(|| format!("failed to create {}", file.display()))?;
            let mut writer = BufWriter::new(out);
            let upto = conn.backup(&mut writer, since)?;
            writer.flush()?;
            info!(file = %file.display(), since, upto, "Backup written");
            println!("{upto}");
        }
        Command::Restore { file } => {
            let input = File::open(&file)
                .with_context(|| format!("failed to open {}", file.display()))?;
            conn.load(BufReader::new(input))?;
            info!(file = %file.display(), "Backup restored");
        }
        Command::Gc => {
            let mut entries = 0;
            let mut bytes = 0;
            while let Compaction::Reclaimed { entries: e, bytes: b } = conn.compact()? {
                entries += e;
                bytes += b;
            }
            conn.sync()?;
            info!(entries, bytes, "Compaction finished");
        }
    }

    Ok(())
}
