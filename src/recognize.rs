//! Recognition stage: motion gate, face location, matching, debouncing.
//!
//! `process` runs once per frame the recognition loop pulls from the slot:
//! the motion gate sees every frame and keeps its background model current;
//! only significant frames pay for the heavy path. That path downscales the
//! frame by the configured fraction, locates faces, embeds and matches each
//! region, and emits one event per face with the region mapped back to
//! original frame coordinates.
//!
//! A region whose embedding fails is skipped and counted; it never aborts
//! the other regions in the frame. Known identities are debounced by a
//! per-identity cooldown and stranger alerts by a global one, both
//! disabled when set to zero.

use image::imageops::FilterType;
use image::RgbImage;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::config::{MotionConfig, RecognitionConfig};
use crate::events::{confidence_from_distance, DetectedIdentity, DetectionEvent};
use crate::faces::FaceEngine;
use crate::frame::Frame;
use crate::motion::MotionGate;
use crate::signatures::{MatchOutcome, SignatureStore};

/// Counters shared with whoever wants to report stage health.
#[derive(Default)]
pub struct StageCounters {
    frames_processed: AtomicU64,
    frames_significant: AtomicU64,
    faces_located: AtomicU64,
    regions_skipped: AtomicU64,
    events_emitted: AtomicU64,
    suppressed: AtomicU64,
}

impl StageCounters {
    pub fn snapshot(&self) -> StageStats {
        StageStats {
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            frames_significant: self.frames_significant.load(Ordering::Relaxed),
            faces_located: self.faces_located.load(Ordering::Relaxed),
            regions_skipped: self.regions_skipped.load(Ordering::Relaxed),
            events_emitted: self.events_emitted.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct StageStats {
    pub frames_processed: u64,
    pub frames_significant: u64,
    pub faces_located: u64,
    pub regions_skipped: u64,
    pub events_emitted: u64,
    pub suppressed: u64,
}

pub struct RecognitionStage {
    gate: MotionGate,
    engine: Arc<dyn FaceEngine>,
    store: Arc<SignatureStore>,
    config: RecognitionConfig,
    counters: Arc<StageCounters>,
    /// Last time each known identity was logged, for the log cooldown.
    last_logged: HashMap<String, Instant>,
    /// Last stranger alert, for the alert cooldown.
    last_alert: Option<Instant>,
}

impl RecognitionStage {
    pub fn new(
        engine: Arc<dyn FaceEngine>,
        store: Arc<SignatureStore>,
        motion: MotionConfig,
        config: RecognitionConfig,
    ) -> Self {
        Self {
            gate: MotionGate::new(motion),
            engine,
            store,
            config,
            counters: Arc::new(StageCounters::default()),
            last_logged: HashMap::new(),
            last_alert: None,
        }
    }

    pub fn counters(&self) -> Arc<StageCounters> {
        self.counters.clone()
    }

    /// Gate and, when warranted, recognize one frame.
    pub fn process(&mut self, frame: &Frame) -> Vec<DetectionEvent> {
        self.counters
            .frames_processed
            .fetch_add(1, Ordering::Relaxed);

        let decision = self.gate.evaluate(frame);
        if !decision.significant {
            log::trace!(
                "frame {} gated out (score {:.2})",
                frame.seq(),
                decision.score
            );
            return Vec::new();
        }
        self.counters
            .frames_significant
            .fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "frame {} significant (score {:.2}), running recognition",
            frame.seq(),
            decision.score
        );

        let (small, upscale) = match self.downscaled(frame) {
            Some(pair) => pair,
            None => return Vec::new(),
        };

        let regions = self.engine.locate_faces(&small);
        self.counters
            .faces_located
            .fetch_add(regions.len() as u64, Ordering::Relaxed);

        let mut events = Vec::new();
        for region in &regions {
            let embedding = match self.engine.embed(&small, region) {
                Ok(embedding) => embedding,
                Err(err) => {
                    // Skipping this region must not abort the others.
                    self.counters
                        .regions_skipped
                        .fetch_add(1, Ordering::Relaxed);
                    log::warn!(
                        "face region skipped in frame {}: {err:#}",
                        frame.seq()
                    );
                    continue;
                }
            };

            let outcome = self
                .store
                .match_embedding(&embedding, self.config.tolerance);
            let full_region = region.scale(upscale, frame.width(), frame.height());

            match outcome {
                MatchOutcome::Known { name, distance } => {
                    if !self.should_log_known(&name) {
                        self.counters.suppressed.fetch_add(1, Ordering::Relaxed);
                        log::trace!("suppressing repeat sighting of {name:?}");
                        continue;
                    }
                    log::info!(
                        "recognized {name:?} in frame {} (distance {distance:.3})",
                        frame.seq()
                    );
                    events.push(DetectionEvent {
                        identity: DetectedIdentity::Known(name),
                        confidence: confidence_from_distance(distance, self.config.tolerance),
                        timestamp: frame.timestamp(),
                        region: full_region,
                        frame_seq: frame.seq(),
                        snapshot_frame: None,
                    });
                }
                MatchOutcome::Unknown => {
                    if !self.should_alert_stranger() {
                        self.counters.suppressed.fetch_add(1, Ordering::Relaxed);
                        log::trace!("suppressing repeat stranger alert");
                        continue;
                    }
                    log::info!("unrecognized face in frame {}, raising alert", frame.seq());
                    events.push(DetectionEvent {
                        identity: DetectedIdentity::Unknown,
                        confidence: 0.0,
                        timestamp: frame.timestamp(),
                        region: full_region,
                        frame_seq: frame.seq(),
                        snapshot_frame: Some(frame.clone()),
                    });
                }
            }
        }

        self.counters
            .events_emitted
            .fetch_add(events.len() as u64, Ordering::Relaxed);
        events
    }

    /// Build the reduced image recognition runs on, plus the factor that
    /// maps its coordinates back onto the original frame.
    fn downscaled(&self, frame: &Frame) -> Option<(RgbImage, f32)> {
        let full = match RgbImage::from_raw(
            frame.width(),
            frame.height(),
            frame.pixels().to_vec(),
        ) {
            Some(image) => image,
            None => {
                log::error!("frame {} has inconsistent dimensions", frame.seq());
                return None;
            }
        };

        let fraction = self.config.downscale;
        if fraction >= 1.0 {
            return Some((full, 1.0));
        }
        let width = ((frame.width() as f32 * fraction).round() as u32).max(1);
        let height = ((frame.height() as f32 * fraction).round() as u32).max(1);
        let small = image::imageops::resize(&full, width, height, FilterType::Triangle);
        Some((small, frame.width() as f32 / width as f32))
    }

    fn should_log_known(&mut self, name: &str) -> bool {
        let cooldown = self.config.log_cooldown;
        if cooldown.is_zero() {
            return true;
        }
        let now = Instant::now();
        match self.last_logged.get(name) {
            Some(last) if now.duration_since(*last) < cooldown => false,
            _ => {
                self.last_logged.insert(name.to_string(), now);
                true
            }
        }
    }

    fn should_alert_stranger(&mut self) -> bool {
        let cooldown = self.config.alert_cooldown;
        if cooldown.is_zero() {
            return true;
        }
        let now = Instant::now();
        match self.last_alert {
            Some(last) if now.duration_since(last) < cooldown => false,
            _ => {
                self.last_alert = Some(now);
                true
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
