//! Bounded FIFO handoff between recognition and the sink writer.
//!
//! Built on a mutex-held deque with two condvars rather than an unbounded
//! channel so overflow behavior is explicit. When the queue is full the
//! configured [`OverflowPolicy`] decides: block the producer up to a bound,
//! drop the oldest queued event, or drop the incoming one. Every outcome is
//! reported to the producer; nothing is dropped silently.
//!
//! Single producer (recognition loop), single consumer (sink writer).

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::events::DetectionEvent;

/// What to do with a submission when the queue is full.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Wait up to the timeout for space; if none frees up, the incoming
    /// event is dropped (and reported). The default: brief stalls in the
    /// writer slow the producer instead of losing events.
    Block { timeout: Duration },
    /// Evict the oldest queued event to make room.
    DropOldest,
    /// Reject the incoming event.
    DropNewest,
}

impl Default for OverflowPolicy {
    fn default() -> Self {
        OverflowPolicy::Block {
            timeout: Duration::from_millis(250),
        }
    }
}

/// How a submission was handled. Anything but `Enqueued` means an event
/// was lost or displaced and should be counted by the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    Enqueued,
    /// The incoming event was enqueued, but the oldest queued event was
    /// evicted for it.
    DisplacedOldest,
    /// The incoming event was dropped (full queue under `DropNewest`, or
    /// `Block` timed out).
    DroppedNewest,
    /// The queue is closed; shutdown is in progress.
    Closed,
}

/// Result of a consumer receive.
#[derive(Debug)]
pub enum RecvOutcome {
    Event(Box<DetectionEvent>),
    TimedOut,
    /// Closed and fully drained; the consumer can exit.
    Drained,
}

struct QueueState {
    items: VecDeque<DetectionEvent>,
    closed: bool,
}

pub struct EventQueue {
    state: Mutex<QueueState>,
    not_full: Condvar,
    not_empty: Condvar,
    capacity: usize,
    policy: OverflowPolicy,
}

impl EventQueue {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            capacity: capacity.max(1),
            policy,
        }
    }

    pub fn submit(&self, event: DetectionEvent) -> SubmitOutcome {
        let mut state = self.lock();
        if state.closed {
            return SubmitOutcome::Closed;
        }
        if state.items.len() < self.capacity {
            state.items.push_back(event);
            self.not_empty.notify_one();
            return SubmitOutcome::Enqueued;
        }

        match self.policy {
            OverflowPolicy::DropNewest => SubmitOutcome::DroppedNewest,
            OverflowPolicy::DropOldest => {
                state.items.pop_front();
                state.items.push_back(event);
                self.not_empty.notify_one();
                SubmitOutcome::DisplacedOldest
            }
            OverflowPolicy::Block { timeout } => {
                let deadline = Instant::now() + timeout;
                loop {
                    if state.closed {
                        return SubmitOutcome::Closed;
                    }
                    if state.items.len() < self.capacity {
                        state.items.push_back(event);
                        self.not_empty.notify_one();
                        return SubmitOutcome::Enqueued;
                    }
                    let now = Instant::now();
                    if now >= deadline {
                        return SubmitOutcome::DroppedNewest;
                    }
                    let (next, _) = self
                        .not_full
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                    state = next;
                }
            }
        }
    }

    /// Pop the next event in FIFO order, waiting up to `timeout`.
    ///
    /// After `close`, queued events are still served until the queue is
    /// empty; only then does this return `Drained`.
    pub fn recv(&self, timeout: Duration) -> RecvOutcome {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if let Some(event) = state.items.pop_front() {
                self.not_full.notify_one();
                return RecvOutcome::Event(Box::new(event));
            }
            if state.closed {
                return RecvOutcome::Drained;
            }
            let now = Instant::now();
            if now >= deadline {
                return RecvOutcome::TimedOut;
            }
            let (next, _) = self
                .not_empty
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            state = next;
        }
    }

    /// Stop accepting submissions. Already-queued events remain available
    /// to the consumer. Idempotent.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::DetectedIdentity;
    use crate::faces::FaceRegion;
    use std::sync::Arc;
    use std::thread;
    use std::time::SystemTime;

    fn event(seq: u64) -> DetectionEvent {
        DetectionEvent {
            identity: DetectedIdentity::Known(format!("person-{seq}")),
            confidence: 0.9,
            timestamp: SystemTime::now(),
            region: FaceRegion {
                x: 0,
                y: 0,
                width: 10,
                height: 10,
            },
            frame_seq: seq,
            snapshot_frame: None,
        }
    }

    fn drain_seqs(queue: &EventQueue) -> Vec<u64> {
        let mut seqs = Vec::new();
        loop {
            match queue.recv(Duration::from_millis(10)) {
                RecvOutcome::Event(event) => seqs.push(event.frame_seq),
                RecvOutcome::TimedOut | RecvOutcome::Drained => return seqs,
            }
        }
    }

    #[test]
    fn fifo_order_is_preserved() {
        let queue = EventQueue::new(8, OverflowPolicy::default());
        for seq in 1..=5 {
            assert_eq!(queue.submit(event(seq)), SubmitOutcome::Enqueued);
        }
        assert_eq!(drain_seqs(&queue), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn drop_oldest_keeps_the_newest_events() {
        let queue = EventQueue::new(3, OverflowPolicy::DropOldest);
        let mut displaced = 0;
        for seq in 1..=5 {
            if queue.submit(event(seq)) == SubmitOutcome::DisplacedOldest {
                displaced += 1;
            }
        }
        assert_eq!(displaced, 2);
        assert_eq!(drain_seqs(&queue), vec![3, 4, 5]);
    }

    #[test]
    fn drop_newest_keeps_the_oldest_events() {
        let queue = EventQueue::new(3, OverflowPolicy::DropNewest);
        let mut dropped = 0;
        for seq in 1..=5 {
            if queue.submit(event(seq)) == SubmitOutcome::DroppedNewest {
                dropped += 1;
            }
        }
        assert_eq!(dropped, 2);
        assert_eq!(drain_seqs(&queue), vec![1, 2, 3]);
    }

    #[test]
    fn blocked_submit_times_out_and_reports_the_drop() {
        let queue = EventQueue::new(1, OverflowPolicy::Block {
            timeout: Duration::from_millis(40),
        });
        assert_eq!(queue.submit(event(1)), SubmitOutcome::Enqueued);

        let started = Instant::now();
        let outcome = queue.submit(event(2));
        assert_eq!(outcome, SubmitOutcome::DroppedNewest);
        assert!(
            started.elapsed() >= Duration::from_millis(35),
            "submit returned before the block timeout"
        );
    }

    #[test]
    fn burst_with_consumer_loses_nothing() {
        // Capacity 10, burst of 20: the producer must absorb the overflow
        // by blocking while the consumer drains.
        let queue = Arc::new(EventQueue::new(
            10,
            OverflowPolicy::Block {
                timeout: Duration::from_millis(500),
            },
        ));

        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || {
                let mut seqs = Vec::new();
                loop {
                    match queue.recv(Duration::from_secs(2)) {
                        RecvOutcome::Event(event) => {
                            seqs.push(event.frame_seq);
                            thread::sleep(Duration::from_millis(5));
                        }
                        RecvOutcome::Drained => return seqs,
                        RecvOutcome::TimedOut => panic!("consumer starved"),
                    }
                }
            })
        };

        let started = Instant::now();
        for seq in 1..=20 {
            assert_eq!(queue.submit(event(seq)), SubmitOutcome::Enqueued);
        }
        let elapsed = started.elapsed();
        queue.close();

        let seqs = consumer.join().unwrap();
        assert_eq!(seqs, (1..=20).collect::<Vec<_>>());
        // Roughly 10 submissions had to wait for the 5ms-per-event consumer.
        assert!(
            elapsed >= Duration::from_millis(20),
            "burst did not block at all: {elapsed:?}"
        );
    }

    #[test]
    fn close_serves_queued_events_then_reports_drained() {
        let queue = EventQueue::new(8, OverflowPolicy::default());
        queue.submit(event(1));
        queue.submit(event(2));
        queue.close();

        assert_eq!(queue.submit(event(3)), SubmitOutcome::Closed);
        assert!(matches!(
            queue.recv(Duration::from_millis(10)),
            RecvOutcome::Event(_)
        ));
        assert!(matches!(
            queue.recv(Duration::from_millis(10)),
            RecvOutcome::Event(_)
        ));
        assert!(matches!(
            queue.recv(Duration::from_millis(10)),
            RecvOutcome::Drained
        ));
    }

    #[test]
    fn close_wakes_a_blocked_producer() {
        let queue = Arc::new(EventQueue::new(
            1,
            OverflowPolicy::Block {
                timeout: Duration::from_secs(10),
            },
        ));
        queue.submit(event(1));

        let producer = {
            let queue = queue.clone();
            thread::spawn(move || queue.submit(event(2)))
        };
        thread::sleep(Duration::from_millis(20));
        queue.close();
        assert_eq!(producer.join().unwrap(), SubmitOutcome::Closed);
    }
}
