//! Face location and embedding, behind a trait.
//!
//! The concrete recognition algorithm is an external capability. The
//! pipeline consumes exactly three operations:
//! - `locate_faces`: find face regions in an image
//! - `embed`: turn one region into a fixed-length vector
//! - `engine_id`: a stable identifier that versions the signature cache
//!
//! Engines must be deterministic for a given image and region; matching
//! and cache validity both rely on that.

pub mod stub;

use anyhow::Result;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use stub::StubFaceEngine;

/// Axis-aligned face bounding box, in pixel coordinates of the image the
/// locator ran on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceRegion {
    /// Rescale by `factor`, clamping to `max_width`/`max_height`.
    ///
    /// Used to map regions found on a downscaled frame back onto the
    /// original frame for snapshots and audit records.
    pub fn scale(&self, factor: f32, max_width: u32, max_height: u32) -> FaceRegion {
        let x = ((self.x as f32 * factor).round() as u32).min(max_width.saturating_sub(1));
        let y = ((self.y as f32 * factor).round() as u32).min(max_height.saturating_sub(1));
        let width = ((self.width as f32 * factor).round() as u32)
            .max(1)
            .min(max_width - x);
        let height = ((self.height as f32 * factor).round() as u32)
            .max(1)
            .min(max_height - y);
        FaceRegion {
            x,
            y,
            width,
            height,
        }
    }
}

/// Fixed-length numeric vector representing a face.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Euclidean distance. Mismatched dimensions never match anything.
    pub fn distance(&self, other: &Embedding) -> f32 {
        if self.values.len() != other.values.len() {
            return f32::INFINITY;
        }
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// The external face recognition capability.
pub trait FaceEngine: Send + Sync {
    /// Identifier baked into the signature cache; changing the algorithm
    /// must change this, which invalidates every cached embedding.
    fn engine_id(&self) -> &str;

    /// Dimension of the vectors this engine produces.
    fn embedding_dim(&self) -> usize;

    fn locate_faces(&self, image: &RgbImage) -> Vec<FaceRegion>;

    /// Compute the embedding for one located region. Errors are per-region;
    /// the caller skips the region and continues.
    fn embed(&self, image: &RgbImage, region: &FaceRegion) -> Result<Embedding>;
}

/// Look up an engine by its configured name.
pub fn build_engine(name: &str) -> Result<Arc<dyn FaceEngine>> {
    match name {
        "stub" => Ok(Arc::new(StubFaceEngine::new())),
        other => anyhow::bail!("unknown face engine {:?} (available: stub)", other),
    }
}
