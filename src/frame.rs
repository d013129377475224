//! Frame representation and the single-slot latest-frame buffer.
//!
//! - `Frame`: immutable decoded RGB frame, cheap to share (`Arc` inside).
//! - `Freshness`: whether a served frame is current or a stale hold-over.
//! - `FrameSlot`: the handoff cell between the capture thread and the
//!   recognition thread. One writer, one reader; publishing replaces the
//!   held frame, so a slow reader silently skips intermediate frames.
//!
//! The slot never buffers more than one frame. Freshness over completeness:
//! a reader always sees the newest frame the stream has produced, or nothing.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant, SystemTime};

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// Immutable decoded frame. Pixels are RGB24, row-major, no padding.
///
/// Clones share the underlying buffer, so holding a `Frame` across a slot
/// overwrite is safe and allocation-free.
#[derive(Clone)]
pub struct Frame {
    inner: Arc<FrameData>,
}

struct FrameData {
    pixels: Vec<u8>,
    width: u32,
    height: u32,
    seq: u64,
    captured_at: Instant,
    timestamp: SystemTime,
}

impl Frame {
    /// Wrap a decoded pixel buffer. Called by the ingest layer.
    ///
    /// `pixels.len()` must equal `width * height * 3`.
    pub fn new(pixels: Vec<u8>, width: u32, height: u32, seq: u64) -> Self {
        debug_assert_eq!(pixels.len(), width as usize * height as usize * 3);
        Self {
            inner: Arc::new(FrameData {
                pixels,
                width,
                height,
                seq,
                captured_at: Instant::now(),
                timestamp: SystemTime::now(),
            }),
        }
    }

    pub fn pixels(&self) -> &[u8] {
        &self.inner.pixels
    }

    pub fn width(&self) -> u32 {
        self.inner.width
    }

    pub fn height(&self) -> u32 {
        self.inner.height
    }

    /// Monotonically increasing capture sequence number.
    pub fn seq(&self) -> u64 {
        self.inner.seq
    }

    /// Wall-clock capture time, for audit records.
    pub fn timestamp(&self) -> SystemTime {
        self.inner.timestamp
    }

    /// Time elapsed since capture (monotonic).
    pub fn age(&self) -> Duration {
        self.inner.captured_at.elapsed()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("seq", &self.inner.seq)
            .field("width", &self.inner.width)
            .field("height", &self.inner.height)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// FrameSlot
// ----------------------------------------------------------------------------

/// How current a frame served by the slot is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Freshness {
    /// Captured within the configured staleness window.
    Fresh,
    /// The stream has stopped refreshing the slot; this is the last good frame.
    Stale,
}

/// Timing knobs for the slot.
#[derive(Clone, Copy, Debug)]
pub struct SlotConfig {
    /// A frame older than this is served marked `Stale`.
    pub stale_after: Duration,
    /// A frame older than this is not served at all.
    pub expire_after: Duration,
}

impl Default for SlotConfig {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(2),
            expire_after: Duration::from_secs(30),
        }
    }
}

struct SlotState {
    frame: Option<Frame>,
    closed: bool,
}

/// Single-slot exclusive-access cell holding the newest captured frame.
///
/// Single writer (capture loop), single reader (recognition loop). Every
/// access takes the mutex for the full read or write, so a reader can never
/// observe a partially overwritten frame.
pub struct FrameSlot {
    state: Mutex<SlotState>,
    arrived: Condvar,
    config: SlotConfig,
}

impl FrameSlot {
    pub fn new(config: SlotConfig) -> Self {
        Self {
            state: Mutex::new(SlotState {
                frame: None,
                closed: false,
            }),
            arrived: Condvar::new(),
            config,
        }
    }

    /// Replace the held frame with a newer one. The previous frame is
    /// dropped unless a reader still holds a clone of it.
    pub fn publish(&self, frame: Frame) {
        let mut state = self.lock();
        state.frame = Some(frame);
        self.arrived.notify_all();
    }

    /// Non-blocking read of the newest frame.
    ///
    /// Returns `None` before the first capture and after the held frame
    /// has expired; otherwise the frame plus its freshness.
    pub fn latest(&self) -> Option<(Frame, Freshness)> {
        let state = self.lock();
        self.classify(state.frame.as_ref())
    }

    /// Wait for a frame newer than `last_seq`, up to `timeout`.
    ///
    /// Used by the recognition loop so it never reprocesses the frame it
    /// just finished. Returns `None` on timeout, slot close, or expiry.
    pub fn next_after(
        &self,
        last_seq: Option<u64>,
        timeout: Duration,
    ) -> Option<(Frame, Freshness)> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if state.closed {
                return None;
            }
            let newer = state
                .frame
                .as_ref()
                .map(|f| last_seq.map_or(true, |seen| f.seq() > seen))
                .unwrap_or(false);
            if newer {
                return self.classify(state.frame.as_ref());
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (next, _timed_out) = self
                .arrived
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            state = next;
        }
    }

    /// Wake all waiters and stop serving new frames to them. Idempotent.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        self.arrived.notify_all();
    }

    fn classify(&self, frame: Option<&Frame>) -> Option<(Frame, Freshness)> {
        let frame = frame?;
        let age = frame.age();
        if age > self.config.expire_after {
            return None;
        }
        let freshness = if age > self.config.stale_after {
            Freshness::Stale
        } else {
            Freshness::Fresh
        };
        Some((frame.clone(), freshness))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SlotState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
