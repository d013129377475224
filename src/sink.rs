//! Sink loop: drains the event queue into the audit store.
//!
//! Runs on its own thread so database and filesystem latency never stalls
//! recognition. Events are written in queue order. For a stranger alert the
//! snapshot is written before the record, so a stored record never points at
//! a snapshot that was yet to be written; if the snapshot fails the record
//! is kept and marked. A record write is retried a bounded number of times,
//! and on final failure the event is reported on the fault channel and any
//! snapshot written for it is removed.
//!
//! On stop the loop keeps draining queued events until the queue reports
//! empty or the drain timeout passes, whichever comes first. The timeout is
//! checked between events, not mid-write.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::config::SinkConfig;
use crate::events::{DetectedIdentity, DetectionEvent};
use crate::frame::Frame;
use crate::queue::{EventQueue, RecvOutcome};
use crate::storage::{AuditStore, DetectionStatus, NewDetection};

/// How often the loop wakes to notice a stop signal while the queue is idle.
const RECV_POLL: Duration = Duration::from_millis(200);

/// An event the sink could not persist after exhausting retries.
#[derive(Clone, Debug)]
pub struct SinkFault {
    pub identity: String,
    pub frame_seq: u64,
    pub message: String,
}

/// Counters shared with the sink thread.
#[derive(Default)]
struct SinkCounters {
    written: AtomicU64,
    snapshot_failures: AtomicU64,
    record_faults: AtomicU64,
    dropped_on_shutdown: AtomicU64,
    drain_timed_out: AtomicBool,
}

/// Point-in-time view of the sink thread's counters.
#[derive(Clone, Copy, Debug)]
pub struct SinkStats {
    pub written: u64,
    pub snapshot_failures: u64,
    pub record_faults: u64,
    pub dropped_on_shutdown: u64,
    pub drain_timed_out: bool,
}

/// Handle to the running sink thread.
pub struct SinkService {
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
    counters: Arc<SinkCounters>,
    queue: Arc<EventQueue>,
}

impl SinkService {
    /// Start draining `queue` into `store`. The store is moved onto the
    /// thread; the snapshot directory is created up front.
    pub fn spawn(
        queue: Arc<EventQueue>,
        store: Box<dyn AuditStore>,
        config: SinkConfig,
    ) -> Result<(Self, mpsc::Receiver<SinkFault>)> {
        std::fs::create_dir_all(&config.snapshot_dir).with_context(|| {
            format!(
                "create snapshot directory {}",
                config.snapshot_dir.display()
            )
        })?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(SinkCounters::default());
        let (fault_tx, fault_rx) = mpsc::channel();

        let thread_queue = queue.clone();
        let thread_shutdown = shutdown.clone();
        let thread_counters = counters.clone();
        let join = std::thread::spawn(move || {
            run_sink(
                thread_queue,
                store,
                config,
                thread_shutdown,
                thread_counters,
                fault_tx,
            );
        });

        Ok((
            Self {
                shutdown,
                join: Some(join),
                counters,
                queue,
            },
            fault_rx,
        ))
    }

    pub fn stats(&self) -> SinkStats {
        SinkStats {
            written: self.counters.written.load(Ordering::Relaxed),
            snapshot_failures: self.counters.snapshot_failures.load(Ordering::Relaxed),
            record_faults: self.counters.record_faults.load(Ordering::Relaxed),
            dropped_on_shutdown: self.counters.dropped_on_shutdown.load(Ordering::Relaxed),
            drain_timed_out: self.counters.drain_timed_out.load(Ordering::Relaxed),
        }
    }

    /// Close the queue, let the thread drain what it can within the
    /// configured timeout, and wait for it to exit.
    pub fn stop(mut self) -> Result<SinkStats> {
        self.shutdown.store(true, Ordering::SeqCst);
        self.queue.close();
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow::anyhow!("sink thread panicked"))?;
        }
        Ok(self.stats())
    }
}

fn run_sink(
    queue: Arc<EventQueue>,
    mut store: Box<dyn AuditStore>,
    config: SinkConfig,
    shutdown: Arc<AtomicBool>,
    counters: Arc<SinkCounters>,
    faults: mpsc::Sender<SinkFault>,
) {
    let mut drain_deadline: Option<Instant> = None;

    loop {
        if drain_deadline.is_none() && shutdown.load(Ordering::SeqCst) {
            drain_deadline = Some(Instant::now() + config.drain_timeout);
        }
        if let Some(deadline) = drain_deadline {
            if Instant::now() >= deadline {
                let left = queue.len() as u64;
                if left > 0 {
                    counters.dropped_on_shutdown.fetch_add(left, Ordering::Relaxed);
                    counters.drain_timed_out.store(true, Ordering::Relaxed);
                    log::warn!("drain timeout passed with {left} events still queued");
                }
                break;
            }
        }

        match queue.recv(RECV_POLL) {
            RecvOutcome::Event(event) => {
                handle_event(store.as_mut(), &config, &counters, &faults, *event);
            }
            RecvOutcome::TimedOut => continue,
            RecvOutcome::Drained => break,
        }
    }
    log::debug!("sink loop exiting");
}

/// Persist one event: snapshot first for alerts, then the record.
fn handle_event(
    store: &mut dyn AuditStore,
    config: &SinkConfig,
    counters: &SinkCounters,
    faults: &mpsc::Sender<SinkFault>,
    event: DetectionEvent,
) {
    let (snapshot_path, snapshot_missing) = match &event.snapshot_frame {
        Some(frame) => match write_snapshot(&config.snapshot_dir, &event, frame) {
            Ok(path) => (Some(path), false),
            Err(err) => {
                counters.snapshot_failures.fetch_add(1, Ordering::Relaxed);
                log::warn!(
                    "snapshot write failed for frame {}, keeping record: {err:#}",
                    event.frame_seq
                );
                (None, true)
            }
        },
        None => (None, false),
    };

    let status = match &event.identity {
        DetectedIdentity::Known(_) => DetectionStatus::Recognized,
        DetectedIdentity::Unknown => DetectionStatus::Stranger,
    };
    let detection = NewDetection {
        recorded_at: crate::epoch_s(event.timestamp),
        identity: event.identity.label().to_string(),
        confidence: event.confidence as f64,
        frame_seq: event.frame_seq,
        region: event.region,
        status,
        snapshot_path: snapshot_path
            .as_ref()
            .map(|path| path.display().to_string()),
        snapshot_missing,
    };

    match append_with_retry(store, &detection, config) {
        Ok(id) => {
            counters.written.fetch_add(1, Ordering::Relaxed);
            log::debug!("audit record {id} written for frame {}", event.frame_seq);
        }
        Err(err) => {
            counters.record_faults.fetch_add(1, Ordering::Relaxed);
            log::error!(
                "audit record lost for frame {} after {} retries: {err:#}",
                event.frame_seq,
                config.write_retries
            );
            // A snapshot without its record is an orphan; remove it so the
            // directory only holds files the log accounts for.
            if let Some(path) = &snapshot_path {
                if let Err(remove_err) = std::fs::remove_file(path) {
                    log::warn!(
                        "orphan snapshot {} not removed: {remove_err}",
                        path.display()
                    );
                }
            }
            let _ = faults.send(SinkFault {
                identity: detection.identity.clone(),
                frame_seq: event.frame_seq,
                message: format!("{err:#}"),
            });
        }
    }
}

fn write_snapshot(dir: &Path, event: &DetectionEvent, frame: &Frame) -> Result<PathBuf> {
    let name = format!(
        "stranger_{}_{}.jpg",
        crate::epoch_s(event.timestamp),
        event.frame_seq
    );
    let path = dir.join(name);
    image::save_buffer(
        &path,
        frame.pixels(),
        frame.width(),
        frame.height(),
        image::ExtendedColorType::Rgb8,
    )
    .with_context(|| format!("write snapshot {}", path.display()))?;
    Ok(path)
}

fn append_with_retry(
    store: &mut dyn AuditStore,
    detection: &NewDetection,
    config: &SinkConfig,
) -> Result<i64> {
    let mut backoff = config.retry_backoff;
    let mut attempt = 0;
    loop {
        match store.append(detection) {
            Ok(id) => return Ok(id),
            Err(err) if attempt < config.write_retries => {
                attempt += 1;
                log::warn!(
                    "audit append failed (attempt {attempt}/{}): {err:#}",
                    config.write_retries
                );
                std::thread::sleep(backoff);
                backoff *= 2;
            }
            Err(err) => return Err(err),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
