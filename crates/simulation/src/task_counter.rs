//! Quiescence gate shared by every task of an invocation.
//!
//! The counter holds one unit per piece of outstanding work: a node's main
//! loop, a message in flight, a crash notification not yet handled. Units
//! are owned by [`TaskGuard`]s and released when the guard drops, so a unit
//! is returned on every exit path including cancellation and panics.
//!
//! The completion signal fires exactly once, either when the count returns
//! to zero or when [`TaskCounter::fire`] is called for a fatal error.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::trace;

/// Atomic count of outstanding work with a one-shot completion signal.
#[derive(Debug, Default)]
pub struct TaskCounter {
    count: AtomicI64,
    fired: AtomicBool,
    notify: Notify,
}

impl TaskCounter {
    /// Create a counter with no outstanding work.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Count one unit of work and return the guard releasing it.
    pub fn acquire(self: &Arc<Self>) -> TaskGuard {
        self.count.fetch_add(1, Ordering::AcqRel);
        TaskGuard {
            counter: self.clone(),
        }
    }

    /// Take ownership of a unit already counted with [`TaskCounter::add`].
    pub fn adopt(self: &Arc<Self>) -> TaskGuard {
        TaskGuard {
            counter: self.clone(),
        }
    }

    /// Count `delta` units of work to be adopted later.
    pub fn add(&self, delta: usize) {
        self.count.fetch_add(delta as i64, Ordering::AcqRel);
    }

    /// Run `work` while holding one unit.
    pub async fn run_safely<F: Future>(self: &Arc<Self>, work: F) -> F::Output {
        let _guard = self.acquire();
        work.await
    }

    /// Fire the completion signal. Only the first call has an effect.
    pub fn fire(&self) -> bool {
        if self.fired.swap(true, Ordering::AcqRel) {
            return false;
        }
        trace!(count = self.count(), "Completion signal fired");
        self.notify.notify_waiters();
        true
    }

    /// Whether the completion signal has fired.
    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Current number of outstanding units.
    pub fn count(&self) -> i64 {
        self.count.load(Ordering::Acquire)
    }

    /// Wait for the completion signal.
    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_fired() {
                return;
            }
            notified.await;
        }
    }

    fn release(&self) {
        if self.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.fire();
        }
    }
}

/// One counted unit of work, released on drop.
#[derive(Debug)]
pub struct TaskGuard {
    counter: Arc<TaskCounter>,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.counter.release();
    }
}
