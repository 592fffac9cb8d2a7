//! Connection registry: a concurrent set of live connections with wakeup
//! signaling (`spec.md` §4.7: "insert and signal a wakeup; on destruction,
//! remove and signal").

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::{sync::Notify, task::AbortHandle, time::timeout};

struct Entry {
    close: Arc<Notify>,
    /// Set once the connection's task has been spawned (`Registry::insert`
    /// runs before the task exists). Used by `force_close_all` on a
    /// shutdown-timeout to abort connections that never finished draining.
    abort: Option<AbortHandle>,
}

/// Concurrent set of live connections. Each entry carries a `Notify` the
/// registry signals to request that connection tear down its current read
/// (`spec.md` §4.7 shutdown: "told to tear down their read by disposing the
/// stream").
pub(crate) struct Registry {
    entries: Mutex<HashMap<u64, Entry>>,
    next_id: AtomicU64,
    drained: Notify,
}

impl Registry {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            drained: Notify::new(),
        })
    }

    /// Registers a new connection, returning a handle that removes it from
    /// the registry when dropped.
    pub(crate) fn insert(self: &Arc<Self>) -> RegisteredConnection {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let close = Arc::new(Notify::new());

        self.entries.lock().unwrap().insert(id, Entry { close: close.clone(), abort: None });

        RegisteredConnection {
            id,
            registry: self.clone(),
            close,
        }
    }

    /// Attaches the abort handle for the task spawned to run a registered
    /// connection, once that task exists.
    pub(crate) fn attach_abort_handle(&self, id: u64, handle: AbortHandle) {
        if let Some(entry) = self.entries.lock().unwrap().get_mut(&id) {
            entry.abort = Some(handle);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Signals every live connection's close notification (`RequestClose`).
    pub(crate) fn request_close_all(&self) {
        for entry in self.entries.lock().unwrap().values() {
            entry.close.notify_waiters();
        }
    }

    /// Aborts the task of every connection still registered
    /// (`spec.md` §4.7: "on timeout, `ForceClose` all remaining
    /// connections"). Abort unwinds the task, dropping its
    /// `RegisteredConnection` and deregistering it.
    pub(crate) fn force_close_all(&self) {
        for entry in self.entries.lock().unwrap().values() {
            if let Some(abort) = &entry.abort {
                abort.abort();
            }
        }
    }

    /// Waits until the registry empties or `max_wait` elapses. Returns
    /// `true` if the registry drained in time.
    pub(crate) async fn wait_until_empty(&self, max_wait: Duration) -> bool {
        if self.len() == 0 {
            return true;
        }
        timeout(max_wait, async {
            loop {
                self.drained.notified().await;
                if self.len() == 0 {
                    break;
                }
            }
        })
        .await
        .is_ok()
    }

    fn remove(&self, id: u64) {
        let mut entries = self.entries.lock().unwrap();
        entries.remove(&id);
        if entries.is_empty() {
            self.drained.notify_waiters();
        }
    }
}

/// A connection's membership in the registry. Dropping it deregisters the
/// connection and, if the registry is now empty, wakes any `stop()` waiter.
pub(crate) struct RegisteredConnection {
    id: u64,
    registry: Arc<Registry>,
    close: Arc<Notify>,
}

impl RegisteredConnection {
    /// Resolves once the registry has requested this connection close.
    pub(crate) async fn closed(&self) {
        self.close.notified().await;
    }

    /// This connection's registry id, used to attach its task's abort handle
    /// after the connection task has been spawned.
    pub(crate) fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for RegisteredConnection {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_and_drop_updates_len() {
        let registry = Registry::new();
        let conn = registry.insert();
        assert_eq!(registry.len(), 1);
        drop(conn);
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn wait_until_empty_returns_immediately_when_already_empty() {
        let registry = Registry::new();
        assert!(registry.wait_until_empty(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn wait_until_empty_times_out_with_live_connections() {
        let registry = Registry::new();
        let _conn = registry.insert();
        assert!(!registry.wait_until_empty(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn request_close_all_wakes_closed_waiters() {
        let registry = Registry::new();
        let conn = registry.insert();
        registry.request_close_all();
        tokio::time::timeout(Duration::from_millis(50), conn.closed())
            .await
            .expect("close notification should have fired");
    }

    #[tokio::test]
    async fn force_close_all_aborts_attached_tasks() {
        let registry = Registry::new();
        let conn = registry.insert();
        let id = conn.id();

        let task = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        registry.attach_abort_handle(id, task.abort_handle());

        registry.force_close_all();

        let result = tokio::time::timeout(Duration::from_millis(50), task).await;
        assert!(matches!(result, Ok(Err(join_error)) if join_error.is_cancelled()));
    }
}
