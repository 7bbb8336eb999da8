//! Cancellable delayed tasks.
//!
//! Every simulated delay (connection open, subscription acknowledgement,
//! inbound latency, interruption reconnect) is a [`TaskHandle`] produced by
//! the [`Scheduler`]. Cancelling a handle guarantees its closure never runs,
//! unless it has already started.
//!
//! Tasks run on the tokio runtime captured when the scheduler was created,
//! so tests using `start_paused = true` drive every delay on a virtual clock.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::trace;

use crate::error::{Error, Result};
use crate::identifiers::TaskId;

// ============================================================================
// Types
// ============================================================================

/// Map of pending task IDs to their join handles.
type TaskMap = FxHashMap<TaskId, JoinHandle<()>>;

// ============================================================================
// Scheduler
// ============================================================================

/// Spawns closures after a delay and tracks them until they run.
#[derive(Clone)]
pub struct Scheduler {
    /// Runtime the tasks are spawned on.
    runtime: Handle,
    /// Counter for task IDs.
    next_id: Arc<AtomicU64>,
    /// Tasks that have not started yet.
    pending: Arc<Mutex<TaskMap>>,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Creates a scheduler bound to the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when called outside a tokio runtime.
    pub fn new() -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::config(format!("a tokio runtime is required: {e}")))?;
        Ok(Self::with_runtime(runtime))
    }

    /// Creates a scheduler spawning onto `runtime`.
    #[must_use]
    pub fn with_runtime(runtime: Handle) -> Self {
        Self {
            runtime,
            next_id: Arc::new(AtomicU64::new(1)),
            pending: Arc::new(Mutex::new(TaskMap::default())),
        }
    }

    /// Runs `task` once `delay` has elapsed.
    pub fn schedule<F>(&self, delay: Duration, task: F) -> TaskHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let id = TaskId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let pending = Arc::downgrade(&self.pending);

        // Hold the lock across spawn so the task cannot look itself up
        // before it is registered.
        let mut guard = self.pending.lock();
        let join = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;

            let Some(pending) = pending.upgrade() else {
                return;
            };
            if pending.lock().remove(&id).is_none() {
                return;
            }

            trace!(%id, "Running scheduled task");
            task();
        });
        guard.insert(id, join);
        drop(guard);

        trace!(%id, delay_ms = delay.as_millis() as u64, "Task scheduled");

        TaskHandle {
            id,
            pending: Arc::downgrade(&self.pending),
        }
    }

    /// Returns the number of tasks waiting to run.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Cancels every pending task.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<_> = self.pending.lock().drain().collect();
        let count = drained.len();
        for (_, join) in drained {
            join.abort();
        }
        count
    }
}

// ============================================================================
// TaskHandle
// ============================================================================

/// Handle to a scheduled task.
///
/// Dropping the handle does not cancel the task.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    /// Task ID.
    id: TaskId,
    /// Scheduler's pending map.
    pending: Weak<Mutex<TaskMap>>,
}

impl TaskHandle {
    /// Returns the task ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Cancels the task.
    ///
    /// Returns `false` if it already ran or was cancelled.
    pub fn cancel(&self) -> bool {
        let Some(pending) = self.pending.upgrade() else {
            return false;
        };
        let join = pending.lock().remove(&self.id);
        match join {
            Some(join) => {
                join.abort();
                trace!(id = %self.id, "Task cancelled");
                true
            }
            None => false,
        }
    }

    /// Returns `true` while the task has neither run nor been cancelled.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending
            .upgrade()
            .is_some_and(|pending| pending.lock().contains_key(&self.id))
    }
}

// ============================================================================
// Tests
// ============================================================================
