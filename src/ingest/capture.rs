//! Capture loop: pulls frames from a [`VideoStream`] into the frame slot.
//!
//! Runs on its own thread so stream latency never blocks recognition. On
//! stream failure the loop reconnects with jittered exponential backoff,
//! bounded by a configurable cap; downstream keeps being served the last
//! good frame by the slot until it expires.

use anyhow::{anyhow, Result};
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::VideoStream;
use crate::frame::FrameSlot;

#[derive(Clone, Copy, Debug)]
pub struct CaptureConfig {
    /// Capture rate ceiling. `0` means uncapped (pull as fast as the
    /// stream delivers).
    pub target_fps: u32,
    /// First reconnect delay after a failure.
    pub backoff_base: Duration,
    /// Upper bound for the reconnect delay.
    pub backoff_cap: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            target_fps: 10,
            backoff_base: Duration::from_millis(250),
            backoff_cap: Duration::from_secs(5),
        }
    }
}

/// Counters shared with the capture thread.
#[derive(Default)]
struct CaptureCounters {
    frames_published: AtomicU64,
    disconnects: AtomicU64,
    reconnects: AtomicU64,
}

/// Point-in-time view of the capture thread's counters.
#[derive(Clone, Copy, Debug)]
pub struct CaptureStats {
    pub frames_published: u64,
    pub disconnects: u64,
    pub reconnects: u64,
}

/// Handle to the running capture thread.
pub struct CaptureService {
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
    counters: Arc<CaptureCounters>,
}

impl CaptureService {
    /// Start capturing into `slot`. The stream is moved onto the thread.
    pub fn spawn(
        stream: Box<dyn VideoStream>,
        slot: Arc<FrameSlot>,
        config: CaptureConfig,
    ) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(CaptureCounters::default());

        let thread_shutdown = shutdown.clone();
        let thread_counters = counters.clone();
        let join = std::thread::spawn(move || {
            run_capture(stream, slot, config, thread_shutdown, thread_counters);
        });

        Self {
            shutdown,
            join: Some(join),
            counters,
        }
    }

    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            frames_published: self.counters.frames_published.load(Ordering::Relaxed),
            disconnects: self.counters.disconnects.load(Ordering::Relaxed),
            reconnects: self.counters.reconnects.load(Ordering::Relaxed),
        }
    }

    /// Signal the loop to stop and wait for it to exit.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join().map_err(|_| anyhow!("capture thread panicked"))?;
        }
        Ok(())
    }
}

fn run_capture(
    mut stream: Box<dyn VideoStream>,
    slot: Arc<FrameSlot>,
    config: CaptureConfig,
    shutdown: Arc<AtomicBool>,
    counters: Arc<CaptureCounters>,
) {
    let frame_interval = if config.target_fps == 0 {
        Duration::ZERO
    } else {
        Duration::from_millis((1000 / config.target_fps.max(1)) as u64)
    };
    let mut backoff = Backoff::new(config.backoff_base, config.backoff_cap);
    let mut connected = false;
    let mut ever_connected = false;

    while !shutdown.load(Ordering::SeqCst) {
        if !connected {
            match stream.connect() {
                Ok(()) => {
                    connected = true;
                    if ever_connected {
                        counters.reconnects.fetch_add(1, Ordering::Relaxed);
                    }
                    ever_connected = true;
                    backoff.reset();
                }
                Err(err) => {
                    let delay = backoff.next_delay();
                    log::warn!("stream connect failed (retry in {delay:?}): {err:#}");
                    idle(&shutdown, delay);
                }
            }
            continue;
        }

        match stream.next_frame() {
            Ok(frame) => {
                slot.publish(frame);
                counters.frames_published.fetch_add(1, Ordering::Relaxed);
                backoff.reset();
                if !frame_interval.is_zero() {
                    idle(&shutdown, frame_interval);
                }
            }
            Err(err) => {
                counters.disconnects.fetch_add(1, Ordering::Relaxed);
                connected = false;
                let delay = backoff.next_delay();
                log::warn!("stream unavailable (reconnect in {delay:?}): {err:#}");
                idle(&shutdown, delay);
            }
        }
    }
    log::debug!("capture loop exiting");
}

/// Sleep in short slices so a stop signal is honored promptly.
fn idle(shutdown: &AtomicBool, total: Duration) {
    let slice = Duration::from_millis(25);
    let deadline = Instant::now() + total;
    while !shutdown.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        std::thread::sleep((deadline - now).min(slice));
    }
}

/// Jittered exponential backoff between `base` and `cap`.
struct Backoff {
    base: Duration,
    cap: Duration,
    current: Duration,
}

impl Backoff {
    fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            current: base,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.cap);
        let jitter_ceiling = (delay / 4).as_millis() as u64;
        if jitter_ceiling == 0 {
            return delay;
        }
        let jitter = rand::thread_rng().gen_range(0..=jitter_ceiling);
        delay + Duration::from_millis(jitter)
    }

    fn reset(&mut self) {
        self.current = self.base;
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
