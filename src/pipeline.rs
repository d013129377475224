//! Wires capture, recognition and the audit sink into one running pipeline.
//!
//! Thread layout:
//! - capture thread ([`CaptureService`]) publishes frames into the slot,
//! - recognition thread pulls each new frame exactly once via
//!   [`FrameSlot::next_after`] and submits events to the queue,
//! - sink thread ([`SinkService`]) drains the queue into the audit store.
//!
//! Shutdown is ordered: capture stops first, the slot closes so the
//! recognition thread finishes at most its in-flight frame, then the queue
//! closes and the sink drains within its timeout. Whatever could not be
//! drained is reported, not silently lost.

use anyhow::Result;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::VigilConfig;
use crate::faces::FaceEngine;
use crate::frame::{FrameSlot, Freshness};
use crate::ingest::capture::{CaptureService, CaptureStats};
use crate::ingest::VideoStream;
use crate::queue::{EventQueue, SubmitOutcome};
use crate::recognize::{RecognitionStage, StageCounters, StageStats};
use crate::signatures::SignatureStore;
use crate::sink::{SinkFault, SinkService, SinkStats};
use crate::storage::AuditStore;

/// How long the recognition thread waits for a new frame per attempt.
const FRAME_WAIT: Duration = Duration::from_millis(250);

/// Events lost at the queue boundary, counted by submit outcome.
#[derive(Default)]
struct LossCounters {
    displaced: AtomicU64,
    dropped: AtomicU64,
}

/// Point-in-time view across all three threads.
#[derive(Clone, Copy, Debug)]
pub struct PipelineStats {
    pub capture: CaptureStats,
    pub stage: StageStats,
    pub sink: SinkStats,
    pub queue_depth: usize,
    /// Oldest events displaced by newer ones under `DropOldest`.
    pub events_displaced: u64,
    /// Events rejected at submission under `DropNewest` or a blocked queue.
    pub events_dropped: u64,
}

/// What happened to queued events when the pipeline stopped.
#[derive(Clone, Copy, Debug)]
pub struct ShutdownReport {
    pub written: u64,
    pub dropped_on_shutdown: u64,
    pub drain_timed_out: bool,
    pub events_displaced: u64,
    pub events_dropped: u64,
}

pub struct Pipeline {
    slot: Arc<FrameSlot>,
    queue: Arc<EventQueue>,
    capture: CaptureService,
    sink: SinkService,
    recognition_shutdown: Arc<AtomicBool>,
    recognition_join: Option<JoinHandle<()>>,
    stage_counters: Arc<StageCounters>,
    losses: Arc<LossCounters>,
    faults: mpsc::Receiver<SinkFault>,
}

impl Pipeline {
    /// Start all three threads. The stream and audit store move onto their
    /// threads; the engine and signature store are shared.
    pub fn start(
        config: &VigilConfig,
        stream: Box<dyn VideoStream>,
        engine: Arc<dyn FaceEngine>,
        store: Arc<SignatureStore>,
        audit: Box<dyn AuditStore>,
    ) -> Result<Self> {
        let slot = Arc::new(FrameSlot::new(config.slot));
        let queue = Arc::new(EventQueue::new(config.queue.capacity, config.queue.policy));

        let (sink, faults) = SinkService::spawn(queue.clone(), audit, config.sink.clone())?;
        let capture = CaptureService::spawn(stream, slot.clone(), config.capture);

        let stage = RecognitionStage::new(
            engine,
            store,
            config.motion,
            config.recognition.clone(),
        );
        let stage_counters = stage.counters();
        let losses = Arc::new(LossCounters::default());
        let recognition_shutdown = Arc::new(AtomicBool::new(false));

        let thread_slot = slot.clone();
        let thread_queue = queue.clone();
        let thread_shutdown = recognition_shutdown.clone();
        let thread_losses = losses.clone();
        let recognition_join = std::thread::spawn(move || {
            run_recognition(
                thread_slot,
                thread_queue,
                stage,
                thread_shutdown,
                thread_losses,
            );
        });

        Ok(Self {
            slot,
            queue,
            capture,
            sink,
            recognition_shutdown,
            recognition_join: Some(recognition_join),
            stage_counters,
            losses,
            faults,
        })
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            capture: self.capture.stats(),
            stage: self.stage_counters.snapshot(),
            sink: self.sink.stats(),
            queue_depth: self.queue.len(),
            events_displaced: self.losses.displaced.load(Ordering::Relaxed),
            events_dropped: self.losses.dropped.load(Ordering::Relaxed),
        }
    }

    /// Events the sink could not persist, collected without blocking.
    pub fn drain_faults(&self) -> Vec<SinkFault> {
        let mut faults = Vec::new();
        while let Ok(fault) = self.faults.try_recv() {
            faults.push(fault);
        }
        faults
    }

    /// Stop capture, let recognition finish its in-flight frame, then drain
    /// the sink within its configured timeout.
    pub fn stop(mut self) -> Result<ShutdownReport> {
        self.capture.stop()?;

        self.recognition_shutdown.store(true, Ordering::SeqCst);
        self.slot.close();
        if let Some(join) = self.recognition_join.take() {
            join.join()
                .map_err(|_| anyhow::anyhow!("recognition thread panicked"))?;
        }

        let sink_stats = self.sink.stop()?;
        let report = ShutdownReport {
            written: sink_stats.written,
            dropped_on_shutdown: sink_stats.dropped_on_shutdown,
            drain_timed_out: sink_stats.drain_timed_out,
            events_displaced: self.losses.displaced.load(Ordering::Relaxed),
            events_dropped: self.losses.dropped.load(Ordering::Relaxed),
        };
        log::info!(
            "pipeline stopped: {} written, {} dropped on shutdown{}",
            report.written,
            report.dropped_on_shutdown,
            if report.drain_timed_out {
                " (drain timed out)"
            } else {
                ""
            }
        );
        Ok(report)
    }
}

fn run_recognition(
    slot: Arc<FrameSlot>,
    queue: Arc<EventQueue>,
    mut stage: RecognitionStage,
    shutdown: Arc<AtomicBool>,
    losses: Arc<LossCounters>,
) {
    let mut last_seq: Option<u64> = None;

    while !shutdown.load(Ordering::SeqCst) {
        let (frame, freshness) = match slot.next_after(last_seq, FRAME_WAIT) {
            Some(pair) => pair,
            // Nothing new yet, or the slot closed; the loop condition
            // decides which.
            None => continue,
        };
        last_seq = Some(frame.seq());
        if freshness == Freshness::Stale {
            log::debug!("processing stale frame {}", frame.seq());
        }

        for event in stage.process(&frame) {
            match queue.submit(event) {
                SubmitOutcome::Enqueued => {}
                SubmitOutcome::DisplacedOldest => {
                    losses.displaced.fetch_add(1, Ordering::Relaxed);
                    log::warn!("event queue full, oldest event displaced");
                }
                SubmitOutcome::DroppedNewest => {
                    losses.dropped.fetch_add(1, Ordering::Relaxed);
                    log::warn!("event queue full, new event dropped");
                }
                SubmitOutcome::Closed => {
                    log::warn!("event queue closed, stopping recognition");
                    return;
                }
            }
        }
    }
    log::debug!("recognition loop exiting");
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        MotionConfig, QueueConfig, RecognitionConfig, SinkConfig, StreamConfig,
    };
    use crate::faces::StubFaceEngine;
    use crate::frame::SlotConfig;
    use crate::ingest::capture::CaptureConfig;
    use crate::ingest::open_stream;
    use crate::queue::OverflowPolicy;
    use crate::storage::InMemoryAuditStore;
    use std::sync::Mutex;
    use std::time::Instant;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir, source: &str) -> VigilConfig {
        VigilConfig {
            stream: StreamConfig {
                source: source.to_string(),
                target_fps: 0,
                width: 96,
                height: 72,
            },
            motion: MotionConfig {
                alpha: 0.2,
                threshold: 2.0,
                reduced_width: 32,
                warmup_frames: 3,
            },
            recognition: RecognitionConfig {
                engine: "stub".to_string(),
                downscale: 0.5,
                tolerance: 0.5,
                log_cooldown: Duration::ZERO,
                alert_cooldown: Duration::ZERO,
            },
            queue: QueueConfig {
                capacity: 32,
                policy: OverflowPolicy::default(),
            },
            sink: SinkConfig {
                snapshot_dir: dir.path().join("snapshots"),
                drain_timeout: Duration::from_secs(2),
                write_retries: 1,
                retry_backoff: Duration::from_millis(1),
            },
            slot: SlotConfig::default(),
            capture: CaptureConfig {
                target_fps: 0,
                backoff_base: Duration::from_millis(1),
                backoff_cap: Duration::from_millis(4),
            },
            db_path: dir
                .path()
                .join("vigil.db")
                .to_string_lossy()
                .into_owned(),
            faces_dir: dir.path().join("faces"),
            cache_path: dir.path().join("faces/signatures.json"),
        }
    }

    #[test]
    fn quiet_scene_runs_and_stops_clean() -> Result<()> {
        let dir = TempDir::new()?;
        let config = test_config(&dir, "stub://static");
        let stream = open_stream(&config.stream)?;
        let audit = Arc::new(Mutex::new(InMemoryAuditStore::new()));

        let pipeline = Pipeline::start(
            &config,
            stream,
            Arc::new(StubFaceEngine::new()),
            Arc::new(SignatureStore::new()),
            Box::new(audit.clone()),
        )?;

        let deadline = Instant::now() + Duration::from_secs(2);
        while pipeline.stats().stage.frames_processed < 10 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        let stats = pipeline.stats();
        let report = pipeline.stop()?;

        assert!(stats.capture.frames_published >= 10);
        assert!(stats.stage.frames_processed >= 10);
        // Static scene dither stays below the motion threshold.
        assert_eq!(stats.stage.frames_significant, 0);
        assert_eq!(report.written, 0);
        assert_eq!(report.dropped_on_shutdown, 0);
        assert!(!report.drain_timed_out);
        assert!(audit.lock().unwrap().records().is_empty());
        Ok(())
    }

    #[test]
    fn patrol_scene_produces_stranger_records() -> Result<()> {
        let dir = TempDir::new()?;
        let config = test_config(&dir, "stub://patrol");
        let stream = open_stream(&config.stream)?;
        let audit = Arc::new(Mutex::new(InMemoryAuditStore::new()));

        let pipeline = Pipeline::start(
            &config,
            stream,
            Arc::new(StubFaceEngine::new()),
            Arc::new(SignatureStore::new()),
            Box::new(audit.clone()),
        )?;

        let deadline = Instant::now() + Duration::from_secs(5);
        while pipeline.stats().sink.written == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        let report = pipeline.stop()?;

        assert!(report.written >= 1, "no stranger record was written");
        let guard = audit.lock().unwrap();
        let records = guard.records();
        assert!(!records.is_empty());
        assert_eq!(records[0].identity, "unknown");
        // Audit order must follow frame order.
        let seqs: Vec<u64> = records.iter().map(|r| r.frame_seq).collect();
        let mut sorted = seqs.clone();
        sorted.sort_unstable();
        assert_eq!(seqs, sorted);
        Ok(())
    }
}
