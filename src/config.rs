use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::frame::SlotConfig;
use crate::ingest::capture::CaptureConfig;
use crate::queue::OverflowPolicy;

const DEFAULT_DB_PATH: &str = "vigil.db";
const DEFAULT_FACES_DIR: &str = "faces";
const DEFAULT_CACHE_PATH: &str = "faces/signatures.json";
const DEFAULT_STREAM_SOURCE: &str = "stub://patrol";
const DEFAULT_STREAM_FPS: u32 = 10;
const DEFAULT_STREAM_WIDTH: u32 = 640;
const DEFAULT_STREAM_HEIGHT: u32 = 480;
const DEFAULT_MOTION_ALPHA: f32 = 0.1;
const DEFAULT_MOTION_THRESHOLD: f32 = 4.0;
const DEFAULT_REDUCED_WIDTH: u32 = 64;
const DEFAULT_WARMUP_FRAMES: u32 = 5;
const DEFAULT_ENGINE: &str = "stub";
const DEFAULT_DOWNSCALE: f32 = 0.5;
const DEFAULT_TOLERANCE: f32 = 0.6;
const DEFAULT_LOG_COOLDOWN_SECS: u64 = 30;
const DEFAULT_ALERT_COOLDOWN_SECS: u64 = 300;
const DEFAULT_QUEUE_CAPACITY: usize = 64;
const DEFAULT_QUEUE_POLICY: &str = "block";
const DEFAULT_BLOCK_TIMEOUT_MS: u64 = 250;
const DEFAULT_SNAPSHOT_DIR: &str = "snapshots";
const DEFAULT_DRAIN_TIMEOUT_SECS: u64 = 5;
const DEFAULT_WRITE_RETRIES: u32 = 3;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 100;
const DEFAULT_STALE_AFTER_MS: u64 = 2_000;
const DEFAULT_EXPIRE_AFTER_MS: u64 = 30_000;

#[derive(Debug, Deserialize, Default)]
struct VigilConfigFile {
    db_path: Option<String>,
    faces_dir: Option<PathBuf>,
    cache_path: Option<PathBuf>,
    stream: Option<StreamConfigFile>,
    motion: Option<MotionConfigFile>,
    recognition: Option<RecognitionConfigFile>,
    queue: Option<QueueConfigFile>,
    sink: Option<SinkConfigFile>,
    slot: Option<SlotConfigFile>,
    capture: Option<CaptureConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    source: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct MotionConfigFile {
    alpha: Option<f32>,
    threshold: Option<f32>,
    reduced_width: Option<u32>,
    warmup_frames: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct RecognitionConfigFile {
    engine: Option<String>,
    downscale: Option<f32>,
    tolerance: Option<f32>,
    log_cooldown_secs: Option<u64>,
    alert_cooldown_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct QueueConfigFile {
    capacity: Option<usize>,
    policy: Option<String>,
    block_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct SinkConfigFile {
    snapshot_dir: Option<PathBuf>,
    drain_timeout_secs: Option<u64>,
    write_retries: Option<u32>,
    retry_backoff_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct SlotConfigFile {
    stale_after_ms: Option<u64>,
    expire_after_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    backoff_base_ms: Option<u64>,
    backoff_cap_ms: Option<u64>,
}

/// Where frames come from.
#[derive(Clone, Debug)]
pub struct StreamConfig {
    /// `stub://<scene>` or an `rtsp://` URL.
    pub source: String,
    pub target_fps: u32,
    /// Frame size for synthetic sources; network sources deliver their own.
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Copy, Debug)]
pub struct MotionConfig {
    /// Background model update rate, in (0, 1].
    pub alpha: f32,
    /// Mean absolute luma delta above which a frame is significant.
    pub threshold: f32,
    /// Width frames are box-sampled down to before differencing.
    pub reduced_width: u32,
    /// Frames after (re)start during which nothing is significant.
    pub warmup_frames: u32,
}

#[derive(Clone, Debug)]
pub struct RecognitionConfig {
    pub engine: String,
    /// Fraction of the original frame size recognition runs at, in (0, 1].
    pub downscale: f32,
    /// Match distance cutoff; a candidate matches strictly below it.
    pub tolerance: f32,
    /// Per-identity window within which repeat sightings are not re-logged.
    pub log_cooldown: Duration,
    /// Window within which repeat stranger alerts are suppressed.
    pub alert_cooldown: Duration,
}

#[derive(Clone, Copy, Debug)]
pub struct QueueConfig {
    pub capacity: usize,
    pub policy: OverflowPolicy,
}

#[derive(Clone, Debug)]
pub struct SinkConfig {
    pub snapshot_dir: PathBuf,
    /// How long the writer keeps draining queued events after stop.
    pub drain_timeout: Duration,
    /// Retries per record on storage failure before it is reported lost.
    pub write_retries: u32,
    pub retry_backoff: Duration,
}

#[derive(Clone, Debug)]
pub struct VigilConfig {
    pub stream: StreamConfig,
    pub motion: MotionConfig,
    pub recognition: RecognitionConfig,
    pub queue: QueueConfig,
    pub sink: SinkConfig,
    pub slot: SlotConfig,
    pub capture: CaptureConfig,
    pub db_path: String,
    /// Enrollment root: one subdirectory of photos per identity.
    pub faces_dir: PathBuf,
    pub cache_path: PathBuf,
}

impl VigilConfig {
    /// Load from `VIGIL_CONFIG` (if set), then apply `VIGIL_*` overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Like [`load`](Self::load), with an explicit file path taking
    /// precedence over the environment.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var("VIGIL_CONFIG").ok();
        let chosen = path.or_else(|| env_path.as_deref().map(Path::new));
        let file_cfg = match chosen {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: VigilConfigFile) -> Result<Self> {
        let stream = StreamConfig {
            source: file
                .stream
                .as_ref()
                .and_then(|stream| stream.source.clone())
                .unwrap_or_else(|| DEFAULT_STREAM_SOURCE.to_string()),
            target_fps: file
                .stream
                .as_ref()
                .and_then(|stream| stream.target_fps)
                .unwrap_or(DEFAULT_STREAM_FPS),
            width: file
                .stream
                .as_ref()
                .and_then(|stream| stream.width)
                .unwrap_or(DEFAULT_STREAM_WIDTH),
            height: file
                .stream
                .as_ref()
                .and_then(|stream| stream.height)
                .unwrap_or(DEFAULT_STREAM_HEIGHT),
        };
        let motion = MotionConfig {
            alpha: file
                .motion
                .as_ref()
                .and_then(|motion| motion.alpha)
                .unwrap_or(DEFAULT_MOTION_ALPHA),
            threshold: file
                .motion
                .as_ref()
                .and_then(|motion| motion.threshold)
                .unwrap_or(DEFAULT_MOTION_THRESHOLD),
            reduced_width: file
                .motion
                .as_ref()
                .and_then(|motion| motion.reduced_width)
                .unwrap_or(DEFAULT_REDUCED_WIDTH),
            warmup_frames: file
                .motion
                .as_ref()
                .and_then(|motion| motion.warmup_frames)
                .unwrap_or(DEFAULT_WARMUP_FRAMES),
        };
        let recognition = RecognitionConfig {
            engine: file
                .recognition
                .as_ref()
                .and_then(|recognition| recognition.engine.clone())
                .unwrap_or_else(|| DEFAULT_ENGINE.to_string()),
            downscale: file
                .recognition
                .as_ref()
                .and_then(|recognition| recognition.downscale)
                .unwrap_or(DEFAULT_DOWNSCALE),
            tolerance: file
                .recognition
                .as_ref()
                .and_then(|recognition| recognition.tolerance)
                .unwrap_or(DEFAULT_TOLERANCE),
            log_cooldown: Duration::from_secs(
                file.recognition
                    .as_ref()
                    .and_then(|recognition| recognition.log_cooldown_secs)
                    .unwrap_or(DEFAULT_LOG_COOLDOWN_SECS),
            ),
            alert_cooldown: Duration::from_secs(
                file.recognition
                    .as_ref()
                    .and_then(|recognition| recognition.alert_cooldown_secs)
                    .unwrap_or(DEFAULT_ALERT_COOLDOWN_SECS),
            ),
        };
        let queue = QueueConfig {
            capacity: file
                .queue
                .as_ref()
                .and_then(|queue| queue.capacity)
                .unwrap_or(DEFAULT_QUEUE_CAPACITY),
            policy: parse_policy(
                file.queue
                    .as_ref()
                    .and_then(|queue| queue.policy.as_deref())
                    .unwrap_or(DEFAULT_QUEUE_POLICY),
                Duration::from_millis(
                    file.queue
                        .as_ref()
                        .and_then(|queue| queue.block_timeout_ms)
                        .unwrap_or(DEFAULT_BLOCK_TIMEOUT_MS),
                ),
            )?,
        };
        let sink = SinkConfig {
            snapshot_dir: file
                .sink
                .as_ref()
                .and_then(|sink| sink.snapshot_dir.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SNAPSHOT_DIR)),
            drain_timeout: Duration::from_secs(
                file.sink
                    .as_ref()
                    .and_then(|sink| sink.drain_timeout_secs)
                    .unwrap_or(DEFAULT_DRAIN_TIMEOUT_SECS),
            ),
            write_retries: file
                .sink
                .as_ref()
                .and_then(|sink| sink.write_retries)
                .unwrap_or(DEFAULT_WRITE_RETRIES),
            retry_backoff: Duration::from_millis(
                file.sink
                    .as_ref()
                    .and_then(|sink| sink.retry_backoff_ms)
                    .unwrap_or(DEFAULT_RETRY_BACKOFF_MS),
            ),
        };
        let slot = SlotConfig {
            stale_after: Duration::from_millis(
                file.slot
                    .as_ref()
                    .and_then(|slot| slot.stale_after_ms)
                    .unwrap_or(DEFAULT_STALE_AFTER_MS),
            ),
            expire_after: Duration::from_millis(
                file.slot
                    .as_ref()
                    .and_then(|slot| slot.expire_after_ms)
                    .unwrap_or(DEFAULT_EXPIRE_AFTER_MS),
            ),
        };
        let capture_defaults = CaptureConfig::default();
        let capture = CaptureConfig {
            target_fps: stream.target_fps,
            backoff_base: file
                .capture
                .as_ref()
                .and_then(|capture| capture.backoff_base_ms)
                .map(Duration::from_millis)
                .unwrap_or(capture_defaults.backoff_base),
            backoff_cap: file
                .capture
                .as_ref()
                .and_then(|capture| capture.backoff_cap_ms)
                .map(Duration::from_millis)
                .unwrap_or(capture_defaults.backoff_cap),
        };
        Ok(Self {
            stream,
            motion,
            recognition,
            queue,
            sink,
            slot,
            capture,
            db_path: file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            faces_dir: file
                .faces_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_FACES_DIR)),
            cache_path: file
                .cache_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_PATH)),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(source) = std::env::var("VIGIL_STREAM_SOURCE") {
            if !source.trim().is_empty() {
                self.stream.source = source;
            }
        }
        if let Ok(path) = std::env::var("VIGIL_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = path;
            }
        }
        if let Ok(dir) = std::env::var("VIGIL_FACES_DIR") {
            if !dir.trim().is_empty() {
                self.faces_dir = PathBuf::from(dir);
            }
        }
        if let Ok(dir) = std::env::var("VIGIL_SNAPSHOT_DIR") {
            if !dir.trim().is_empty() {
                self.sink.snapshot_dir = PathBuf::from(dir);
            }
        }
        if let Ok(tolerance) = std::env::var("VIGIL_TOLERANCE") {
            self.recognition.tolerance = tolerance
                .parse()
                .map_err(|_| anyhow!("VIGIL_TOLERANCE must be a number"))?;
        }
        if let Ok(threshold) = std::env::var("VIGIL_MOTION_THRESHOLD") {
            self.motion.threshold = threshold
                .parse()
                .map_err(|_| anyhow!("VIGIL_MOTION_THRESHOLD must be a number"))?;
        }
        if let Ok(capacity) = std::env::var("VIGIL_QUEUE_CAPACITY") {
            self.queue.capacity = capacity
                .parse()
                .map_err(|_| anyhow!("VIGIL_QUEUE_CAPACITY must be an integer"))?;
        }
        if let Ok(secs) = std::env::var("VIGIL_LOG_COOLDOWN_SECS") {
            let secs: u64 = secs.parse().map_err(|_| {
                anyhow!("VIGIL_LOG_COOLDOWN_SECS must be an integer number of seconds")
            })?;
            self.recognition.log_cooldown = Duration::from_secs(secs);
        }
        if let Ok(secs) = std::env::var("VIGIL_ALERT_COOLDOWN_SECS") {
            let secs: u64 = secs.parse().map_err(|_| {
                anyhow!("VIGIL_ALERT_COOLDOWN_SECS must be an integer number of seconds")
            })?;
            self.recognition.alert_cooldown = Duration::from_secs(secs);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.stream.source.trim().is_empty() {
            return Err(anyhow!("stream.source must not be empty"));
        }
        if self.stream.width < 8 || self.stream.height < 8 {
            return Err(anyhow!("stream dimensions must be at least 8x8"));
        }
        if !(self.motion.alpha > 0.0 && self.motion.alpha <= 1.0) {
            return Err(anyhow!("motion.alpha must be in (0, 1]"));
        }
        if self.motion.threshold < 0.0 {
            return Err(anyhow!("motion.threshold must not be negative"));
        }
        if self.motion.reduced_width < 8 {
            return Err(anyhow!("motion.reduced_width must be at least 8"));
        }
        if self.recognition.engine.trim().is_empty() {
            return Err(anyhow!("recognition.engine must not be empty"));
        }
        if !(self.recognition.downscale > 0.0 && self.recognition.downscale <= 1.0) {
            return Err(anyhow!("recognition.downscale must be in (0, 1]"));
        }
        if self.recognition.tolerance <= 0.0 {
            return Err(anyhow!("recognition.tolerance must be greater than zero"));
        }
        if self.queue.capacity == 0 {
            return Err(anyhow!("queue.capacity must be at least 1"));
        }
        if self.slot.expire_after < self.slot.stale_after {
            return Err(anyhow!(
                "slot.expire_after_ms must not be below slot.stale_after_ms"
            ));
        }
        if self.capture.backoff_base.is_zero() {
            return Err(anyhow!("capture.backoff_base_ms must be greater than zero"));
        }
        if self.capture.backoff_cap < self.capture.backoff_base {
            return Err(anyhow!(
                "capture.backoff_cap_ms must not be below capture.backoff_base_ms"
            ));
        }
        if self.db_path.trim().is_empty() {
            return Err(anyhow!("db_path must not be empty"));
        }
        Ok(())
    }
}

fn parse_policy(name: &str, block_timeout: Duration) -> Result<OverflowPolicy> {
    match name {
        "block" => Ok(OverflowPolicy::Block {
            timeout: block_timeout,
        }),
        "drop_oldest" => Ok(OverflowPolicy::DropOldest),
        "drop_newest" => Ok(OverflowPolicy::DropNewest),
        other => Err(anyhow!(
            "unknown queue.policy {other:?} (expected block, drop_oldest or drop_newest)"
        )),
    }
}

fn read_config_file(path: &Path) -> Result<VigilConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
