//! Motion gate: decides whether a frame warrants running recognition.
//!
//! Maintains a running-average background model over a reduced grayscale
//! version of the stream and scores each frame by its mean absolute delta
//! from that model. The gate runs on every captured frame, so it works on
//! a small fixed-size image and reuses its buffers across calls.
//!
//! The model has exactly one writer (the recognition loop) and is never
//! shared; it lives inside the gate.

use crate::config::MotionConfig;
use crate::frame::Frame;

/// Outcome of gating one frame.
#[derive(Clone, Copy, Debug)]
pub struct MotionDecision {
    /// Mean absolute delta between the frame and the background model,
    /// in 0..255 luma units.
    pub score: f32,
    /// Whether the score crossed the configured threshold. Always false
    /// during the warm-up window.
    pub significant: bool,
}

pub struct MotionGate {
    config: MotionConfig,
    /// Background model over the reduced grayscale image.
    model: Vec<f32>,
    /// Reduced grayscale of the current frame; reused across calls.
    reduced: Vec<f32>,
    counts: Vec<u32>,
    reduced_dims: (u32, u32),
    frames_seen: u64,
}

impl MotionGate {
    pub fn new(config: MotionConfig) -> Self {
        Self {
            config,
            model: Vec::new(),
            reduced: Vec::new(),
            counts: Vec::new(),
            reduced_dims: (0, 0),
            frames_seen: 0,
        }
    }

    /// Update the background model with `frame` and score it.
    pub fn evaluate(&mut self, frame: &Frame) -> MotionDecision {
        let dims = self.reduce(frame);

        if dims != self.reduced_dims || self.model.len() != self.reduced.len() {
            // First frame, or the stream changed resolution: restart the
            // model and the warm-up window.
            self.reduced_dims = dims;
            self.model.clear();
            self.model.extend_from_slice(&self.reduced);
            self.frames_seen = 1;
            return MotionDecision {
                score: 0.0,
                significant: false,
            };
        }

        let alpha = self.config.alpha;
        let mut delta_sum = 0.0f32;
        for (model, &sample) in self.model.iter_mut().zip(&self.reduced) {
            *model = alpha * sample + (1.0 - alpha) * *model;
            delta_sum += (sample - *model).abs();
        }
        let score = delta_sum / self.model.len() as f32;

        self.frames_seen += 1;
        let warmed_up = self.frames_seen > self.config.warmup_frames as u64;
        MotionDecision {
            score,
            significant: warmed_up && score > self.config.threshold,
        }
    }

    /// Frames evaluated since the model was (re)started.
    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }

    /// Box-sample the frame into a reduced grayscale image. Each source
    /// pixel contributes to exactly one cell, so the pass is O(pixels).
    fn reduce(&mut self, frame: &Frame) -> (u32, u32) {
        let (w, h) = (frame.width() as usize, frame.height() as usize);
        let rw = (self.config.reduced_width as usize).min(w).max(1);
        let rh = (h * rw / w).max(1);

        self.reduced.clear();
        self.reduced.resize(rw * rh, 0.0);
        self.counts.clear();
        self.counts.resize(rw * rh, 0);

        let pixels = frame.pixels();
        for y in 0..h {
            let ry = (y * rh / h).min(rh - 1);
            for x in 0..w {
                let rx = (x * rw / w).min(rw - 1);
                let i = (y * w + x) * 3;
                let luma = (pixels[i] as u32 * 30
                    + pixels[i + 1] as u32 * 59
                    + pixels[i + 2] as u32 * 11)
                    / 100;
                let cell = ry * rw + rx;
                self.reduced[cell] += luma as f32;
                self.counts[cell] += 1;
            }
        }
        for (sample, &count) in self.reduced.iter_mut().zip(&self.counts) {
            if count > 0 {
                *sample /= count as f32;
            }
        }

        (rw as u32, rh as u32)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(value: u8, seq: u64) -> Frame {
        Frame::new(vec![value; 32 * 24 * 3], 32, 24, seq)
    }

    fn gate(warmup_frames: u32, threshold: f32) -> MotionGate {
        MotionGate::new(MotionConfig {
            alpha: 0.5,
            threshold,
            reduced_width: 16,
            warmup_frames,
        })
    }

    #[test]
    fn warmup_window_never_significant() {
        let mut gate = gate(5, 1.0);
        // Alternating black/white frames: maximal deltas from the start.
        for seq in 1..=5 {
            let value = if seq % 2 == 0 { 255 } else { 0 };
            let decision = gate.evaluate(&solid(value, seq));
            assert!(
                !decision.significant,
                "frame {seq} fired during warm-up (score {})",
                decision.score
            );
        }
        // First post-warm-up frame with a real delta may fire.
        let decision = gate.evaluate(&solid(255, 6));
        assert!(decision.significant);
    }

    #[test]
    fn static_scene_scores_near_zero() {
        let mut gate = gate(2, 1.0);
        let mut last = MotionDecision {
            score: 0.0,
            significant: true,
        };
        for seq in 1..=10 {
            last = gate.evaluate(&solid(128, seq));
        }
        assert!(last.score < 0.01, "static score {}", last.score);
        assert!(!last.significant);
    }

    #[test]
    fn score_matches_model_arithmetic() {
        let mut gate = gate(1, 1.0);
        for seq in 1..=4 {
            gate.evaluate(&solid(0, seq));
        }
        // Model is 0; a white frame updates it to 127.5 (alpha 0.5) and
        // scores the remaining distance.
        let decision = gate.evaluate(&solid(255, 5));
        assert!(
            (decision.score - 127.5).abs() < 0.01,
            "score {}",
            decision.score
        );
        assert!(decision.significant);
    }

    #[test]
    fn resolution_change_restarts_warmup() {
        let mut gate = gate(2, 1.0);
        for seq in 1..=6 {
            gate.evaluate(&solid(0, seq));
        }
        assert_eq!(gate.frames_seen(), 6);

        let resized = Frame::new(vec![255u8; 64 * 48 * 3], 64, 48, 7);
        let decision = gate.evaluate(&resized);
        assert!(!decision.significant);
        assert_eq!(gate.frames_seen(), 1);
    }

    #[test]
    fn scores_a_partial_change() {
        let mut gate = gate(1, 2.0);
        for seq in 1..=6 {
            gate.evaluate(&solid(10, seq));
        }
        // Brighten one quadrant only.
        let mut pixels = vec![10u8; 32 * 24 * 3];
        for y in 0..12 {
            for x in 0..16 {
                let i = (y * 32 + x) * 3;
                pixels[i] = 240;
                pixels[i + 1] = 240;
                pixels[i + 2] = 240;
            }
        }
        let decision = gate.evaluate(&Frame::new(pixels, 32, 24, 7));
        assert!(decision.significant, "quadrant change scored {}", decision.score);
        // A quarter of the image moved by ~230 luma, halved by the update.
        assert!(decision.score > 20.0 && decision.score < 60.0);
    }
}
