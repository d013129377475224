//! Frame ingestion sources and the capture loop.
//!
//! This module provides the sources the pipeline can pull decoded frames
//! from:
//! - Synthetic scenes (`stub://` URLs, testing and demos)
//! - RTSP streams (IP cameras, feature: rtsp-gstreamer)
//!
//! All sources implement [`VideoStream`] and produce [`Frame`] instances
//! that flow into the single-slot latest-frame buffer. The ingestion layer
//! is responsible for:
//! - Decoding to packed RGB24
//! - Stamping capture sequence numbers
//! - Reporting stream health
//!
//! Reconnection policy lives in [`capture::CaptureService`], not in the
//! sources themselves; a source only has to fail its `next_frame` call and
//! the capture loop applies bounded backoff around it.

pub mod capture;
#[cfg(feature = "rtsp-gstreamer")]
pub mod rtsp;
pub mod synthetic;

use anyhow::Result;

use crate::config::StreamConfig;
use crate::frame::Frame;

pub use capture::{CaptureService, CaptureStats};
pub use synthetic::SyntheticStream;

/// A live video input. The pipeline consumes only "give me the next decoded
/// frame" plus health reporting; everything else is the source's business.
pub trait VideoStream: Send {
    /// Establish (or re-establish) the underlying stream. Called once at
    /// startup and again by the capture loop after a failure.
    fn connect(&mut self) -> Result<()>;

    /// Decode and return the next frame. An error here means the stream is
    /// unavailable; the capture loop reconnects with backoff.
    fn next_frame(&mut self) -> Result<Frame>;

    /// Whether the source currently looks alive.
    fn is_healthy(&self) -> bool;

    fn stats(&self) -> StreamStats;
}

/// Counters a source exposes for health logging.
#[derive(Clone, Debug)]
pub struct StreamStats {
    pub frames_captured: u64,
    pub source: String,
}

/// Open the configured stream source.
///
/// `stub://<scene>` selects a synthetic source; `rtsp://` URLs require the
/// `rtsp-gstreamer` feature. Anything else is a startup configuration error.
pub fn open_stream(config: &StreamConfig) -> Result<Box<dyn VideoStream>> {
    if config.source.starts_with("stub://") {
        return Ok(Box::new(SyntheticStream::new(config)?));
    }
    if config.source.starts_with("rtsp://") {
        #[cfg(feature = "rtsp-gstreamer")]
        {
            return Ok(Box::new(rtsp::RtspStream::new(config)?));
        }
        #[cfg(not(feature = "rtsp-gstreamer"))]
        {
            anyhow::bail!("RTSP sources require the rtsp-gstreamer feature");
        }
    }
    anyhow::bail!(
        "unsupported stream source {:?} (expected stub:// or rtsp://)",
        config.source
    )
}
