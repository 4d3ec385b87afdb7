//! # Bounded concurrency executor.
//!
//! Runs at most `max_concurrency` units of work at once over an unbounded backlog.
//!
//! ```text
//! start(work) ──► in-flight < max ? ──yes──► reserve slot ──► spawn(work) ──► return
//!                        │ no
//!                        ▼
//!                wait for any unit to finish (or cancel)
//!
//! unit finishes (or is aborted) ──► slot released ──► notify waiters
//! wait()   ──► returns once the in-flight set is empty
//! ```
//!
//! ## Rules
//! - The slot is reserved under the lock **before** spawning, so the cap holds even
//!   when many callers race `start`.
//! - The lock guards only map mutation; it is never held across an `.await`.
//! - Units may finish in any order; a finished unit frees its own slot.
//! - `abort_all` is the forced-exit path; aborted units release their slots as well.

use std::collections::HashMap;
use std::future::Future;
use std::pin::pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

use crate::error::ExecutorError;

struct Inner {
    slots: Mutex<HashMap<u64, Option<AbortHandle>>>,
    changed: Notify,
    next_id: AtomicU64,
}

impl Inner {
    fn slots(&self) -> MutexGuard<'_, HashMap<u64, Option<AbortHandle>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Releases a slot when the unit's future completes or is dropped.
struct SlotGuard {
    inner: Arc<Inner>,
    id: u64,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.inner.slots().remove(&self.id);
        self.inner.changed.notify_waiters();
    }
}

/// Runs up to `max_concurrency` spawned units of work at once.
///
/// ## Example
/// ```rust
/// use tokio_util::sync::CancellationToken;
/// use queuevisor::BoundedExecutor;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let exec = BoundedExecutor::new(2);
/// let cancel = CancellationToken::new();
/// for n in 0..5 {
///     exec.start(async move { let _ = n * 2; }, &cancel).await.unwrap();
/// }
/// exec.wait(&cancel).await.unwrap();
/// assert_eq!(exec.in_flight(), 0);
/// # }
/// ```
#[derive(Clone)]
pub struct BoundedExecutor {
    max: usize,
    inner: Arc<Inner>,
}

impl BoundedExecutor {
    /// Creates an executor running at most `max_concurrency` units (min 1).
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            max: max_concurrency.max(1),
            inner: Arc::new(Inner {
                slots: Mutex::new(HashMap::new()),
                changed: Notify::new(),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Concurrency cap.
    pub fn max_concurrency(&self) -> usize {
        self.max
    }

    /// Number of units currently running.
    pub fn in_flight(&self) -> usize {
        self.inner.slots().len()
    }

    /// Suspends until a slot is free, then spawns `work` and returns without waiting for it.
    ///
    /// Fails with [`ExecutorError::Canceled`] if `cancel` fires while saturated;
    /// `work` is then dropped unstarted.
    pub async fn start<F>(&self, work: F, cancel: &CancellationToken) -> Result<(), ExecutorError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = loop {
            let mut changed = pin!(self.inner.changed.notified());
            changed.as_mut().enable();
            {
                let mut slots = self.inner.slots();
                if slots.len() < self.max {
                    let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                    slots.insert(id, None);
                    break id;
                }
            }
            tokio::select! {
                _ = changed => {}
                _ = cancel.cancelled() => return Err(ExecutorError::Canceled),
            }
        };

        let guard = SlotGuard {
            inner: Arc::clone(&self.inner),
            id,
        };
        let handle = tokio::spawn(async move {
            let _guard = guard;
            work.await;
        });
        if let Some(slot) = self.inner.slots().get_mut(&id) {
            *slot = Some(handle.abort_handle());
        }
        Ok(())
    }

    /// Suspends until every started unit has finished.
    pub async fn wait(&self, cancel: &CancellationToken) -> Result<(), ExecutorError> {
        loop {
            let mut changed = pin!(self.inner.changed.notified());
            changed.as_mut().enable();
            if self.inner.slots().is_empty() {
                return Ok(());
            }
            tokio::select! {
                _ = changed => {}
                _ = cancel.cancelled() => return Err(ExecutorError::Canceled),
            }
        }
    }

    /// Aborts every running unit; returns how many were abandoned.
    pub fn abort_all(&self) -> usize {
        let handles: Vec<AbortHandle> = self
            .inner
            .slots()
            .values_mut()
            .filter_map(Option::take)
            .collect();
        let abandoned = self.in_flight();
        for h in handles {
            h.abort();
        }
        abandoned
    }
}
