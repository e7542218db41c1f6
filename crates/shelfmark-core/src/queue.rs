//! Single-lane FIFO execution.
//!
//! Every execute / undo / redo / clear request takes the lane for the whole
//! of its critical section, so store mutations and history updates of two
//! requests never interleave. The lane is a [`parking_lot::FairMutex`]:
//! waiters are handed the lock in arrival order rather than racing for it.
//!
//! A thread that already holds the lane (a batch body calling back into the
//! manager) is refused with [`ProgrammingError::Reentrant`] instead of
//! deadlocking on itself.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, ThreadId};

use parking_lot::{FairMutex, Mutex};
use tracing::{debug_span, trace};

use crate::error::ProgrammingError;

/// FIFO lane guarding a piece of state.
#[derive(Debug)]
pub struct ExecutionQueue<S> {
    lane: FairMutex<S>,
    holder: Mutex<Option<ThreadId>>,
    next_ticket: AtomicU64,
    waiting: AtomicUsize,
}

/// Clears the recorded lane holder when the request finishes, panics
/// included.
struct HolderGuard<'a> {
    slot: &'a Mutex<Option<ThreadId>>,
}

impl<'a> HolderGuard<'a> {
    fn set(slot: &'a Mutex<Option<ThreadId>>, id: ThreadId) -> Self {
        *slot.lock() = Some(id);
        Self { slot }
    }
}

impl Drop for HolderGuard<'_> {
    fn drop(&mut self) {
        *self.slot.lock() = None;
    }
}

impl<S> ExecutionQueue<S> {
    #[must_use]
    pub fn new(state: S) -> Self {
        Self {
            lane: FairMutex::new(state),
            holder: Mutex::new(None),
            next_ticket: AtomicU64::new(1),
            waiting: AtomicUsize::new(0),
        }
    }

    /// Run `f` once every earlier request has finished.
    ///
    /// # Errors
    ///
    /// [`ProgrammingError::Reentrant`] when the calling thread is itself
    /// inside a request.
    pub fn run<R>(&self, kind: &'static str, f: impl FnOnce(&mut S) -> R) -> Result<R, ProgrammingError> {
        let me = thread::current().id();
        if *self.holder.lock() == Some(me) {
            return Err(ProgrammingError::Reentrant(kind));
        }

        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let span = debug_span!("request", kind, ticket);
        let _entered = span.enter();

        self.waiting.fetch_add(1, Ordering::AcqRel);
        let mut state = self.lane.lock();
        self.waiting.fetch_sub(1, Ordering::AcqRel);
        let _holder = HolderGuard::set(&self.holder, me);
        trace!("admitted");

        Ok(f(&mut state))
    }

    /// Requests currently blocked on the lane.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn into_inner(self) -> S {
        self.lane.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    #[test]
    fn requests_run_one_at_a_time() {
        let queue = Arc::new(ExecutionQueue::new(Vec::<usize>::new()));
        let busy = Arc::new(AtomicBool::new(false));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let queue = Arc::clone(&queue);
                let busy = Arc::clone(&busy);
                thread::spawn(move || {
                    queue
                        .run("push", |log| {
                            assert!(!busy.swap(true, Ordering::SeqCst), "lane was shared");
                            thread::sleep(Duration::from_millis(2));
                            log.push(i);
                            busy.store(false, Ordering::SeqCst);
                        })
                        .unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let queue = Arc::try_unwrap(queue).unwrap();
        let mut log = queue.into_inner();
        log.sort_unstable();
        assert_eq!(log, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn reentrant_request_is_refused() {
        let queue = ExecutionQueue::new(0_u32);
        let inner = queue
            .run("outer", |n| {
                *n += 1;
                queue.run("inner", |n| *n += 1)
            })
            .unwrap();
        assert_eq!(inner, Err(ProgrammingError::Reentrant("inner")));
        assert_eq!(queue.run("after", |n| *n).unwrap(), 1);
    }

    #[test]
    fn holder_is_released_after_panic() {
        let queue = Arc::new(ExecutionQueue::new(()));
        let q = Arc::clone(&queue);
        let result = thread::spawn(move || {
            q.run("boom", |_| panic!("boom")).ok();
        })
        .join();
        assert!(result.is_err());
        assert!(queue.run("next", |_| ()).is_ok());
        assert_eq!(queue.waiting(), 0);
    }
}
