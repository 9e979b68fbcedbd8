//! [`WorkerGroup`] – tracks the long-running workers that must release
//! before the process may exit cleanly.
//!
//! Every worker registers under a name and holds the returned
//! [`WorkerGuard`] for as long as it runs.  Dropping the guard releases the
//! worker, so a worker that returns early or panics still releases.
//! [`WorkerGroup::wait`] completes once no guard is outstanding, and
//! [`WorkerGroup::outstanding`] names the stragglers when it does not.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use tokio::sync::Notify;
use tracing::debug;

struct WorkerEntry {
    name: String,
    started: Instant,
}

#[derive(Default)]
struct GroupInner {
    next_id: AtomicU64,
    workers: Mutex<HashMap<u64, WorkerEntry>>,
    released: Notify,
}

/// Synchronization count of outstanding workers.  Clone it cheaply – all
/// clones share the same count.
///
/// # Example
///
/// ```
/// use rigbridge_kernel::worker_group::WorkerGroup;
///
/// let group = WorkerGroup::new();
/// let guard = group.register("transport");
/// assert_eq!(group.outstanding(), vec!["transport".to_string()]);
/// drop(guard);
/// assert!(group.is_empty());
/// ```
#[derive(Clone, Default)]
pub struct WorkerGroup {
    inner: Arc<GroupInner>,
}

impl WorkerGroup {
    /// Create an empty group.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker named `name`.  The worker counts as outstanding
    /// until the returned guard is dropped.
    pub fn register(&self, name: &str) -> WorkerGuard {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                id,
                WorkerEntry {
                    name: name.to_string(),
                    started: Instant::now(),
                },
            );
        WorkerGuard {
            group: Arc::clone(&self.inner),
            id,
        }
    }

    /// Names of all workers that have not released yet, sorted.
    pub fn outstanding(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|w| w.name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.inner
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until every registered worker has released.
    pub async fn wait(&self) {
        loop {
            // Arm before checking so a release between the check and the
            // await is not missed.
            let released = self.inner.released.notified();
            if self.is_empty() {
                return;
            }
            released.await;
        }
    }
}

/// Proof of registration in a [`WorkerGroup`]; dropping it releases.
pub struct WorkerGuard {
    group: Arc<GroupInner>,
    id: u64,
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        let entry = self
            .group
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
        if let Some(entry) = entry {
            debug!(
                worker = %entry.name,
                ran_for_ms = entry.started.elapsed().as_millis() as u64,
                "worker released"
            );
        }
        self.group.released.notify_waiters();
    }
}
