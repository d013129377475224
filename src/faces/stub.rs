//! Deterministic stand-in face engine.
//!
//! Treats bright regions as "faces" and derives embeddings from region
//! pixel statistics. Good enough to exercise every pipeline path (locate,
//! embed, match, alert) without a real model, and fully deterministic so
//! tests can enroll and re-recognize synthetic identities.

use anyhow::Result;
use image::RgbImage;

use super::{Embedding, FaceEngine, FaceRegion};

/// Luma above which a pixel counts as part of a "face".
const BRIGHT_LUMA: u32 = 200;
/// Minimum fraction of bright pixels for a detection, about 0.25%.
const MIN_AREA_DENOM: u32 = 400;

const EMBED_DIM: usize = 8;

pub struct StubFaceEngine;

impl StubFaceEngine {
    pub fn new() -> Self {
        Self
    }
}

impl Default for StubFaceEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn luma(pixel: &image::Rgb<u8>) -> u32 {
    (pixel.0[0] as u32 * 30 + pixel.0[1] as u32 * 59 + pixel.0[2] as u32 * 11) / 100
}

impl FaceEngine for StubFaceEngine {
    fn engine_id(&self) -> &str {
        "stub-stats-v1"
    }

    fn embedding_dim(&self) -> usize {
        EMBED_DIM
    }

    /// Bounding box over bright pixels, if enough of them exist.
    fn locate_faces(&self, image: &RgbImage) -> Vec<FaceRegion> {
        let (w, h) = image.dimensions();
        let mut bright = 0u32;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (w, h, 0u32, 0u32);

        for (x, y, pixel) in image.enumerate_pixels() {
            if luma(pixel) >= BRIGHT_LUMA {
                bright += 1;
                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = max_x.max(x);
                max_y = max_y.max(y);
            }
        }

        if bright < (w * h / MIN_AREA_DENOM).max(4) {
            return Vec::new();
        }
        vec![FaceRegion {
            x: min_x,
            y: min_y,
            width: max_x - min_x + 1,
            height: max_y - min_y + 1,
        }]
    }

    /// Channel means and deviations plus coarse texture measures, all
    /// normalized to 0..1. Depends only on region content, not position.
    fn embed(&self, image: &RgbImage, region: &FaceRegion) -> Result<Embedding> {
        let (w, h) = image.dimensions();
        if region.width == 0 || region.height == 0 {
            anyhow::bail!("degenerate face region {region:?}");
        }
        if region.x + region.width > w || region.y + region.height > h {
            anyhow::bail!("face region {region:?} outside {w}x{h} image");
        }

        let count = (region.width * region.height) as f64;
        let mut sum = [0.0f64; 3];
        let mut sum_sq = [0.0f64; 3];
        let mut edge_sum = 0.0f64;
        let mut bright_count = 0u32;

        for y in region.y..region.y + region.height {
            for x in region.x..region.x + region.width {
                let pixel = image.get_pixel(x, y);
                for c in 0..3 {
                    let v = pixel.0[c] as f64 / 255.0;
                    sum[c] += v;
                    sum_sq[c] += v * v;
                }
                if luma(pixel) >= 128 {
                    bright_count += 1;
                }
                if x + 1 < region.x + region.width {
                    let next = image.get_pixel(x + 1, y);
                    edge_sum += (luma(pixel) as f64 - luma(next) as f64).abs() / 255.0;
                }
            }
        }

        let mut values = Vec::with_capacity(EMBED_DIM);
        for c in 0..3 {
            values.push((sum[c] / count) as f32);
        }
        for c in 0..3 {
            let mean = sum[c] / count;
            let variance = (sum_sq[c] / count - mean * mean).max(0.0);
            values.push(variance.sqrt() as f32);
        }
        values.push((edge_sum / count) as f32);
        values.push(bright_count as f32 / count as f32);

        Ok(Embedding::new(values))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
