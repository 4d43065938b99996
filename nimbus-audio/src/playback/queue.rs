//! Bounded producer/consumer frame queue
//!
//! FIFO of pool slot indices with condvar-based blocking dequeue. The
//! consumer waits with a timeout so a stalled stream shuts the thread
//! down instead of hanging forever; `interrupt` wakes it immediately
//! for teardown.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

struct Inner {
    queue: VecDeque<usize>,
    interrupted: bool,
}

/// Result of one blocking dequeue attempt.
///
/// Pops happen under the same lock that guards the condvar, so a
/// successful wakeup always carries a frame; spurious wakeups loop
/// internally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DequeueOutcome {
    /// A slot index is ready for the sink.
    Frame(usize),
    /// Nothing arrived within the timeout.
    TimedOut,
    /// Teardown requested.
    Interrupted,
}

pub struct PlaybackQueue {
    inner: Mutex<Inner>,
    available: Condvar,
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                interrupted: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Append a slot index and wake one waiting consumer.
    pub fn enqueue(&self, slot: usize) {
        let mut inner = self.inner.lock().unwrap();
        inner.queue.push_back(slot);
        self.available.notify_one();
    }

    /// Block until a frame arrives, the timeout elapses, or the queue
    /// is interrupted.
    pub fn dequeue_blocking(&self, timeout: Duration) -> DequeueOutcome {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock().unwrap();
        loop {
            if inner.interrupted {
                return DequeueOutcome::Interrupted;
            }
            if let Some(slot) = inner.queue.pop_front() {
                return DequeueOutcome::Frame(slot);
            }
            let now = Instant::now();
            if now >= deadline {
                return DequeueOutcome::TimedOut;
            }
            let (guard, result) = self
                .available
                .wait_timeout(inner, deadline - now)
                .unwrap();
            inner = guard;
            if result.timed_out() && inner.queue.is_empty() && !inner.interrupted {
                return DequeueOutcome::TimedOut;
            }
        }
    }

    /// Drop all pending frames. Interrupt state is cleared so the
    /// queue is reusable after a resync.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.queue.clear();
        inner.interrupted = false;
    }

    /// Wake every waiter for shutdown.
    pub fn interrupt(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.interrupted = true;
        self.available.notify_all();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PlaybackQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let queue = PlaybackQueue::new();
        queue.enqueue(3);
        queue.enqueue(1);
        queue.enqueue(2);
        assert_eq!(
            queue.dequeue_blocking(Duration::from_millis(10)),
            DequeueOutcome::Frame(3)
        );
        assert_eq!(
            queue.dequeue_blocking(Duration::from_millis(10)),
            DequeueOutcome::Frame(1)
        );
        assert_eq!(
            queue.dequeue_blocking(Duration::from_millis(10)),
            DequeueOutcome::Frame(2)
        );
    }

    #[test]
    fn test_dequeue_times_out_when_empty() {
        let queue = PlaybackQueue::new();
        let start = Instant::now();
        assert_eq!(
            queue.dequeue_blocking(Duration::from_millis(30)),
            DequeueOutcome::TimedOut
        );
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_interrupt_wakes_blocked_consumer() {
        let queue = Arc::new(PlaybackQueue::new());
        let waiter = Arc::clone(&queue);
        let handle = thread::spawn(move || waiter.dequeue_blocking(Duration::from_secs(5)));
        thread::sleep(Duration::from_millis(20));
        queue.interrupt();
        assert_eq!(handle.join().unwrap(), DequeueOutcome::Interrupted);
    }

    #[test]
    fn test_enqueue_wakes_blocked_consumer() {
        let queue = Arc::new(PlaybackQueue::new());
        let waiter = Arc::clone(&queue);
        let handle = thread::spawn(move || waiter.dequeue_blocking(Duration::from_secs(5)));
        thread::sleep(Duration::from_millis(20));
        queue.enqueue(7);
        assert_eq!(handle.join().unwrap(), DequeueOutcome::Frame(7));
    }

    #[test]
    fn test_clear_drops_pending_and_rearms() {
        let queue = PlaybackQueue::new();
        queue.enqueue(1);
        queue.enqueue(2);
        queue.interrupt();
        queue.clear();
        assert!(queue.is_empty());
        queue.enqueue(5);
        assert_eq!(
            queue.dequeue_blocking(Duration::from_millis(10)),
            DequeueOutcome::Frame(5)
        );
    }
}
