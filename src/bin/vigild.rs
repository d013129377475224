//! vigild - motion-gated face recognition daemon
//!
//! Startup order:
//! 1. Load configuration (file + VIGIL_* environment overrides)
//! 2. Load the signature cache, rebuilding from enrollment photos if the
//!    cache is missing or invalid for the current engine
//! 3. Start the capture / recognition / sink threads
//! 4. Log pipeline health every 5 seconds until Ctrl-C, then stop with an
//!    ordered drain and report what was written and what was lost

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use vigil::{
    build_engine, load_or_rebuild, open_stream, Pipeline, SignatureCache, SqliteAuditStore,
    VigilConfig,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to a TOML config file. Falls back to VIGIL_CONFIG, then defaults.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = VigilConfig::load_from(args.config.as_deref())?;

    let engine = build_engine(&config.recognition.engine)?;
    log::info!(
        "face engine {} ({}-dim embeddings)",
        engine.engine_id(),
        engine.embedding_dim()
    );

    // A fresh install has no enrollment directory yet; that is an empty
    // store, not a startup error.
    std::fs::create_dir_all(&config.faces_dir).with_context(|| {
        format!(
            "create enrollment directory {}",
            config.faces_dir.display()
        )
    })?;
    let cache = SignatureCache::new(config.cache_path.clone());
    let store = Arc::new(load_or_rebuild(&cache, &config.faces_dir, engine.as_ref())?);
    if store.is_empty() {
        log::warn!("no identities enrolled; every detected face will raise a stranger alert");
    }

    let stream = open_stream(&config.stream)?;
    let audit = SqliteAuditStore::open(&config.db_path)?;
    let pipeline = Pipeline::start(&config, stream, engine, store, Box::new(audit))?;

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || {
            running.store(false, Ordering::SeqCst);
        })
        .context("install shutdown handler")?;
    }

    log::info!(
        "vigild running: source={} db={} snapshots={}",
        config.stream.source,
        config.db_path,
        config.sink.snapshot_dir.display()
    );

    let mut last_health = Instant::now();
    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(100));

        for fault in pipeline.drain_faults() {
            log::error!(
                "detection not persisted: identity={} frame={} ({})",
                fault.identity,
                fault.frame_seq,
                fault.message
            );
        }

        if last_health.elapsed() >= Duration::from_secs(5) {
            let stats = pipeline.stats();
            log::info!(
                "health: captured={} processed={} significant={} faces={} written={} queue={}",
                stats.capture.frames_published,
                stats.stage.frames_processed,
                stats.stage.frames_significant,
                stats.stage.faces_located,
                stats.sink.written,
                stats.queue_depth
            );
            if stats.capture.disconnects > 0 {
                log::info!(
                    "stream: {} disconnect(s), {} reconnect(s)",
                    stats.capture.disconnects,
                    stats.capture.reconnects
                );
            }
            last_health = Instant::now();
        }
    }

    log::info!("shutdown signal received, draining");
    for fault in pipeline.drain_faults() {
        log::error!(
            "detection not persisted: identity={} frame={} ({})",
            fault.identity,
            fault.frame_seq,
            fault.message
        );
    }
    let report = pipeline.stop()?;
    if report.drain_timed_out {
        log::warn!(
            "drain timed out: {} queued event(s) were not written",
            report.dropped_on_shutdown
        );
        std::process::exit(1);
    }
    Ok(())
}
