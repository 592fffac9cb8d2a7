//! Timeout manager: two FIFO queues with a single sweeper (`spec.md` §4.6).

use crossbeam::queue::SegQueue;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tokio::sync::Notify;

/// A handle shared between an in-flight I/O operation and its timeout item,
/// so the sweeper can tell whether the operation already completed before
/// disposing the connection it belongs to.
#[derive(Clone)]
pub(crate) struct IoHandle {
    completed: Arc<AtomicBool>,
    dispose: Arc<Notify>,
}

impl IoHandle {
    pub(crate) fn new() -> Self {
        Self {
            completed: Arc::new(AtomicBool::new(false)),
            dispose: Arc::new(Notify::new()),
        }
    }

    /// Marks the I/O operation as completed; the sweeper observes this and
    /// drops the timeout item silently instead of disposing the connection.
    pub(crate) fn complete(&self) {
        self.completed.store(true, Ordering::Release);
    }

    pub(crate) fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    /// Waits until either the operation completes or the sweeper decides
    /// this handle's deadline has passed and disposes it.
    pub(crate) async fn disposed(&self) {
        self.dispose.notified().await;
    }

    fn dispose(&self) {
        self.dispose.notify_waiters();
    }
}

struct TimeoutItem {
    expiry: Instant,
    handle: IoHandle,
}

/// A FIFO of timeout items sharing one configured duration. Because every
/// item is enqueued at `now + timeout` and the duration is constant per
/// queue, expiry order is always nondecreasing — the head is always the
/// earliest expiry.
pub(crate) struct TimeoutQueue {
    items: SegQueue<TimeoutItem>,
    timeout: Duration,
}

impl TimeoutQueue {
    pub(crate) fn new(timeout: Duration) -> Self {
        Self {
            items: SegQueue::new(),
            timeout,
        }
    }

    /// Registers a new outstanding I/O operation, returning the handle the
    /// caller must mark `complete()` on success.
    pub(crate) fn register(&self) -> IoHandle {
        let handle = IoHandle::new();
        self.items.push(TimeoutItem {
            expiry: Instant::now() + self.timeout,
            handle: handle.clone(),
        });
        handle
    }

    /// Dequeues items from the head while `head.expiry <= now`, disposing
    /// those whose I/O did not complete and silently dropping those that did.
    fn sweep(&self, now: Instant) {
        while let Some(item) = self.items.pop() {
            if item.expiry > now {
                // Not yet expired — no ordering guarantee to put it back at
                // the exact head, but since expiry is monotonic per queue
                // and this is the first unexpired item we've seen, nothing
                // behind it can be expired either.
                self.items.push(item);
                break;
            }

            if !item.handle.is_completed() {
                item.handle.dispose();
            }
        }
    }
}

/// Owns the server's two timeout queues and the 1s-cadence sweeper task.
pub(crate) struct TimeoutManager {
    pub(crate) read: Arc<TimeoutQueue>,
    pub(crate) write: Arc<TimeoutQueue>,
    stop: Arc<Notify>,
}

impl TimeoutManager {
    pub(crate) fn start(read_timeout: Duration, write_timeout: Duration) -> Arc<Self> {
        let manager = Arc::new(Self {
            read: Arc::new(TimeoutQueue::new(read_timeout)),
            write: Arc::new(TimeoutQueue::new(write_timeout)),
            stop: Arc::new(Notify::new()),
        });

        let sweeper_manager = manager.clone();
        tokio::spawn(async move {
            sweeper_manager.sweep_loop().await;
        });

        manager
    }

    async fn sweep_loop(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(1)) => {
                    let now = Instant::now();
                    self.read.sweep(now);
                    self.write.sweep(now);
                }
                _ = self.stop.notified() => break,
            }
        }
    }

    pub(crate) fn stop(&self) {
        self.stop.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn head_is_always_smallest_expiry() {
        let queue = TimeoutQueue::new(Duration::from_millis(10));
        let _h1 = queue.register();
        std::thread::sleep(Duration::from_millis(1));
        let _h2 = queue.register();

        // Expiry is nondecreasing by construction (now + constant timeout);
        // the first-registered item always expires first.
        let now = Instant::now() + Duration::from_millis(11);
        queue.sweep(now);
        // after a sweep past both expiries the queue should be empty
        assert!(queue.items.is_empty());
    }

    #[test]
    fn completed_io_is_dropped_silently() {
        let queue = TimeoutQueue::new(Duration::from_millis(0));
        let handle = queue.register();
        handle.complete();

        queue.sweep(Instant::now() + Duration::from_millis(1));
        assert!(queue.items.is_empty());
    }
}
