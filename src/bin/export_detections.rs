//! export_detections - dump audit log records as JSON lines

use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;

use vigil::{AuditStore, DetectionQuery, DetectionStatus, SqliteAuditStore};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the audit database.
    #[arg(long, env = "VIGIL_DB_PATH", default_value = "vigil.db")]
    db_path: String,

    /// Only records at or after this time (epoch seconds).
    #[arg(long)]
    since: Option<u64>,

    /// Only records with this status (recognized|stranger).
    #[arg(long)]
    status: Option<String>,

    /// Maximum number of records to export.
    #[arg(long, default_value_t = 1000)]
    limit: usize,

    /// Output file; stdout when omitted.
    #[arg(long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    let query = DetectionQuery {
        since: args.since,
        status: args.status.as_deref().map(DetectionStatus::parse).transpose()?,
        limit: args.limit,
    };

    let mut store = SqliteAuditStore::open(&args.db_path)?;
    let records = store.read(&query)?;

    let mut out: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(
            std::fs::File::create(path)
                .with_context(|| format!("create output file {}", path.display()))?,
        ),
        None => Box::new(std::io::stdout().lock()),
    };
    for record in &records {
        serde_json::to_writer(&mut out, record)?;
        writeln!(out)?;
    }
    out.flush()?;

    eprintln!("{} record(s) exported", records.len());
    Ok(())
}
