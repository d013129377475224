//! Vigil
//!
//! This crate implements a motion-gated face recognition pipeline for a
//! single camera feed, backed by a durable audit log.
//!
//! # Architecture
//!
//! Frames flow through three threads connected by two handoff points:
//!
//! 1. **Capture** pulls decoded frames from the source and publishes each
//!    into a single-slot buffer; only the latest frame is retained.
//! 2. **Recognition** takes each new frame exactly once, runs the motion
//!    gate over it, and only for significant frames locates faces, embeds
//!    them and matches against the signature store. Matches and stranger
//!    alerts become [`events::DetectionEvent`]s on a bounded queue.
//! 3. **The sink** drains the queue in order into SQLite, writing stranger
//!    snapshots before their records so the log never references a
//!    snapshot that does not exist.
//!
//! # Module Structure
//!
//! - `frame`: shared frames and the single-slot handoff buffer
//! - `ingest`: video sources (synthetic, RTSP) and the capture loop
//! - `motion`: running-average background model and the significance gate
//! - `faces`: face engine abstraction, regions, embeddings, stub engine
//! - `signatures`: insertion-ordered identity store and matching
//! - `cache`: versioned, checksummed signature cache file
//! - `enroll`: photo-directory enrollment and cache rebuild
//! - `events` / `queue`: detection events and the bounded handoff queue
//! - `storage` / `sink`: append-only audit store and its writer thread
//! - `pipeline`: thread wiring, stats and ordered shutdown
//! - `config`: file + environment configuration

use anyhow::{anyhow, Result};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

pub mod cache;
pub mod config;
pub mod enroll;
pub mod events;
pub mod faces;
pub mod frame;
pub mod ingest;
pub mod motion;
pub mod pipeline;
pub mod queue;
pub mod recognize;
pub mod signatures;
pub mod sink;
pub mod storage;
pub mod ui;

pub use cache::{CacheError, SignatureCache};
pub use config::VigilConfig;
pub use enroll::{import_photos, load_or_rebuild, rebuild_store, remove_identity, RebuildOutcome};
pub use events::{DetectedIdentity, DetectionEvent};
pub use faces::{build_engine, Embedding, FaceEngine, FaceRegion, StubFaceEngine};
pub use frame::{Frame, FrameSlot, Freshness, SlotConfig};
pub use ingest::{open_stream, VideoStream};
pub use motion::{MotionDecision, MotionGate};
pub use pipeline::{Pipeline, PipelineStats, ShutdownReport};
pub use queue::{EventQueue, OverflowPolicy, RecvOutcome, SubmitOutcome};
pub use signatures::{IdentityEntry, MatchOutcome, SignatureStore};
pub use sink::{SinkFault, SinkService, SinkStats};
pub use storage::{
    AuditStore, DetectionQuery, DetectionRecord, DetectionStatus, InMemoryAuditStore,
    NewDetection, SqliteAuditStore,
};

// -------------------- Identity Name Discipline --------------------

/// Identity names double as enrollment directory names and audit log
/// values, so they are held to a conservative allowlist.
///
/// Allowed: "alice", "bob_smith", "visitor-03"
/// Disallowed: anything with whitespace, slashes, dots, or other
/// punctuation outside [_-].
pub fn validate_identity_name(name: &str) -> Result<()> {
    // Compile once for hot paths.
    static IDENTITY_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = IDENTITY_RE.get_or_init(|| regex::Regex::new(r"^[A-Za-z0-9_-]{1,64}$").unwrap());

    if !re.is_match(name) {
        return Err(anyhow!(
            "identity name must match ^[A-Za-z0-9_-]{{1,64}}$"
        ));
    }
    Ok(())
}

// -------------------- Time --------------------

pub fn now_epoch_s() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

/// Epoch seconds for a capture timestamp. Pre-epoch times collapse to zero
/// instead of failing the write path.
pub fn epoch_s(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}
