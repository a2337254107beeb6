/*
 * Condition Variable
 *
 * Monitor-style: every operation requires the associated lock. Each
 * suspended caller of wait() owns a waiter token holding a private
 * binary semaphore; signal() picks a token and ups its semaphore.
 *
 * Ordering is two-stage. Tokens are inserted sorted by the waiter's
 * effective priority, and signal() re-sorts against live priorities
 * before picking the front, because donations may have changed the
 * ordering while the waiters slept.
 */

use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::interrupt::{self, IntrCell};
use crate::scheduler::{self, Thread};
use crate::sync::{Lock, Semaphore};

/// One suspended wait() call: the waiting thread and the private
/// semaphore its signal arrives on.
struct Waiter {
    thread: Arc<Thread>,
    semaphore: Arc<Semaphore>,
}

/// Monitor condition variable.
pub struct Condvar {
    waiters: IntrCell<Vec<Waiter>>,
}

impl Condvar {
    pub const fn new() -> Self {
        Self {
            waiters: IntrCell::new(Vec::new()),
        }
    }

    /// Atomically releases `lock` and sleeps until signaled, then
    /// re-acquires `lock` before returning.
    ///
    /// The caller must hold `lock`. May not be called from an interrupt
    /// handler.
    pub fn wait(&self, lock: &Lock) {
        assert!(
            !interrupt::in_interrupt(),
            "condvar wait in an interrupt handler"
        );
        assert!(lock.held_by_current(), "condvar wait without the lock");

        let semaphore = Arc::new(Semaphore::new(0));
        let cur = scheduler::current();

        let old = interrupt::disable();
        self.waiters.with(|waiters| {
            let priority = cur.effective_priority();
            let at = waiters
                .iter()
                .position(|w| w.thread.effective_priority() < priority)
                .unwrap_or(waiters.len());
            waiters.insert(
                at,
                Waiter {
                    thread: Arc::clone(&cur),
                    semaphore: Arc::clone(&semaphore),
                },
            );
        });
        interrupt::set_level(old);

        lock.release();
        semaphore.down();
        lock.acquire();
    }

    /// Wakes the highest-priority waiter, if any. The caller must hold
    /// `lock`.
    pub fn signal(&self, lock: &Lock) {
        assert!(
            !interrupt::in_interrupt(),
            "condvar signal in an interrupt handler"
        );
        assert!(lock.held_by_current(), "condvar signal without the lock");

        let old = interrupt::disable();
        let front = self.waiters.with(|waiters| {
            if waiters.is_empty() {
                return None;
            }
            // Priorities may have moved since insertion; re-sort by the
            // waiting threads' live effective priorities. The sort is
            // stable, so arrival order still breaks ties.
            waiters.sort_by(|a, b| {
                b.thread
                    .effective_priority()
                    .cmp(&a.thread.effective_priority())
            });
            Some(waiters.remove(0))
        });
        interrupt::set_level(old);

        if let Some(waiter) = front {
            waiter.semaphore.up();
        }
    }

    /// Wakes every waiter. The caller must hold `lock`.
    pub fn broadcast(&self, lock: &Lock) {
        loop {
            let old = interrupt::disable();
            let empty = self.waiters.with(|w| w.is_empty());
            interrupt::set_level(old);
            if empty {
                break;
            }
            self.signal(lock);
        }
    }
}

impl Default for Condvar {
    fn default() -> Self {
        Self::new()
    }
}
