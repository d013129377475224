//! Synthetic frame source for tests and demos.
//!
//! Serves deterministic scenes behind `stub://` URLs so the whole pipeline
//! can run without a camera:
//! - `stub://static` - a fixed gradient background with sub-threshold dither;
//!   the motion gate should stay quiet on it.
//! - `stub://patrol` - the same background with a bright block that enters
//!   the scene periodically, producing motion bursts.
//!
//! Pixel generation is fully determined by the frame sequence number, so
//! test runs are reproducible.

use anyhow::Result;

use super::{StreamStats, VideoStream};
use crate::config::StreamConfig;
use crate::frame::Frame;

/// How often the patrol block enters, in frames.
const PATROL_PERIOD: u64 = 40;
/// How many consecutive frames the block stays visible.
const PATROL_DWELL: u64 = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Scene {
    Static,
    Patrol,
}

impl Scene {
    fn parse(source: &str) -> Result<Self> {
        match source.trim_start_matches("stub://") {
            "" | "static" => Ok(Scene::Static),
            "patrol" => Ok(Scene::Patrol),
            other => anyhow::bail!("unknown synthetic scene {:?} (expected static or patrol)", other),
        }
    }
}

/// Deterministic in-process stream. Always healthy, never disconnects.
pub struct SyntheticStream {
    source: String,
    scene: Scene,
    width: u32,
    height: u32,
    frame_count: u64,
}

impl SyntheticStream {
    pub fn new(config: &StreamConfig) -> Result<Self> {
        Ok(Self {
            source: config.source.clone(),
            scene: Scene::parse(&config.source)?,
            width: config.width,
            height: config.height,
            frame_count: 0,
        })
    }

    fn render(&self, seq: u64) -> Vec<u8> {
        let (w, h) = (self.width as usize, self.height as usize);
        let mut pixels = vec![0u8; w * h * 3];

        for y in 0..h {
            for x in 0..w {
                let base = (x * 160 / w + y * 64 / h) as u8;
                // Low-amplitude dither so consecutive frames are not
                // byte-identical but stay well under any motion threshold.
                let dither = ((x * 31 + y * 17 + seq as usize * 7) % 3) as u8;
                let i = (y * w + x) * 3;
                pixels[i] = base.saturating_add(dither);
                pixels[i + 1] = base.saturating_add(16).saturating_add(dither);
                pixels[i + 2] = base.saturating_add(32).saturating_add(dither);
            }
        }

        if self.scene == Scene::Patrol && seq % PATROL_PERIOD < PATROL_DWELL {
            self.draw_block(&mut pixels, seq);
        }

        pixels
    }

    /// Paint a bright square whose position walks with each visit.
    fn draw_block(&self, pixels: &mut [u8], seq: u64) {
        let (w, h) = (self.width as usize, self.height as usize);
        let side = (h / 3).max(8).min(w);
        let visit = seq / PATROL_PERIOD;
        let x0 = (visit as usize * 37) % (w - side + 1);
        let y0 = h / 4;

        for y in y0..(y0 + side).min(h) {
            for x in x0..x0 + side {
                let i = (y * w + x) * 3;
                pixels[i] = 235;
                pixels[i + 1] = 235;
                pixels[i + 2] = 235;
            }
        }
    }
}

impl VideoStream for SyntheticStream {
    fn connect(&mut self) -> Result<()> {
        log::info!("synthetic stream connected: {}", self.source);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        self.frame_count += 1;
        let pixels = self.render(self.frame_count);
        Ok(Frame::new(pixels, self.width, self.height, self.frame_count))
    }

    fn is_healthy(&self) -> bool {
        true
    }

    fn stats(&self) -> StreamStats {
        StreamStats {
            frames_captured: self.frame_count,
            source: self.source.clone(),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn config(source: &str) -> StreamConfig {
        StreamConfig {
            source: source.to_string(),
            target_fps: 10,
            width: 64,
            height: 48,
        }
    }

    #[test]
    fn produces_sequenced_frames() -> Result<()> {
        let mut stream = SyntheticStream::new(&config("stub://static"))?;
        stream.connect()?;

        let a = stream.next_frame()?;
        let b = stream.next_frame()?;
        assert_eq!(a.width(), 64);
        assert_eq!(a.height(), 48);
        assert_eq!(a.pixels().len(), 64 * 48 * 3);
        assert_eq!(b.seq(), a.seq() + 1);
        Ok(())
    }

    #[test]
    fn static_scene_barely_changes() -> Result<()> {
        let mut stream = SyntheticStream::new(&config("stub://static"))?;
        let a = stream.next_frame()?;
        let b = stream.next_frame()?;

        let total: u64 = a
            .pixels()
            .iter()
            .zip(b.pixels())
            .map(|(&x, &y)| x.abs_diff(y) as u64)
            .sum();
        let mean = total as f64 / a.pixels().len() as f64;
        assert!(mean < 2.0, "static scene moved too much: {mean}");
        Ok(())
    }

    #[test]
    fn patrol_scene_has_motion_bursts() -> Result<()> {
        let mut stream = SyntheticStream::new(&config("stub://patrol"))?;
        let mut prev = stream.next_frame()?;
        let mut max_mean = 0.0f64;
        for _ in 0..PATROL_PERIOD + PATROL_DWELL {
            let next = stream.next_frame()?;
            let total: u64 = prev
                .pixels()
                .iter()
                .zip(next.pixels())
                .map(|(&x, &y)| x.abs_diff(y) as u64)
                .sum();
            max_mean = max_mean.max(total as f64 / next.pixels().len() as f64);
            prev = next;
        }
        assert!(max_mean > 5.0, "patrol block never appeared: {max_mean}");
        Ok(())
    }

    #[test]
    fn unknown_scene_is_rejected() {
        assert!(SyntheticStream::new(&config("stub://lava-lamp")).is_err());
    }
}
