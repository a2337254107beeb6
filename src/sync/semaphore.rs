/*
 * Counting Semaphore
 *
 * A nonnegative counter with two atomic operations: down ("P") waits
 * for the value to become positive and decrements it; up ("V")
 * increments it and wakes one waiter. The waiter woken by up is the
 * one with the highest effective priority at that moment, so donations
 * that arrived while a thread slept are honored.
 */

use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::interrupt::{self, IntrCell};
use crate::scheduler::{self, Thread};

/// Counting semaphore with a priority-ordered wake.
///
/// Invariant: the waiter list is non-empty only while `value` is zero;
/// up() either hands the increment to a waiter or leaves it for the
/// next down().
pub struct Semaphore {
    inner: IntrCell<Inner>,
}

struct Inner {
    value: u32,
    waiters: Vec<Arc<Thread>>,
}

impl Semaphore {
    pub const fn new(value: u32) -> Self {
        Self {
            inner: IntrCell::new(Inner {
                value,
                waiters: Vec::new(),
            }),
        }
    }

    /// Down or "P". Waits for the value to become positive, then
    /// decrements it.
    ///
    /// May sleep, so it must not be called from an interrupt handler.
    /// It may be called with interrupts disabled; if it sleeps, the
    /// next scheduled thread restores its own interrupt state.
    pub fn down(&self) {
        assert!(
            !interrupt::in_interrupt(),
            "semaphore down in an interrupt handler"
        );

        let old = interrupt::disable();
        loop {
            let claimed = self.inner.with(|inner| {
                if inner.value > 0 {
                    inner.value -= 1;
                    return true;
                }
                let cur = scheduler::current();
                debug_assert!(
                    !inner.waiters.iter().any(|t| Arc::ptr_eq(t, &cur)),
                    "thread already enlisted on this semaphore"
                );
                inner.waiters.push(cur);
                false
            });
            if claimed {
                break;
            }
            // Enlisted; sleep until an up() picks this thread. It was
            // removed from the waiter list by then, so losing the race
            // for the counter just means enlisting again.
            scheduler::block();
        }
        interrupt::set_level(old);
    }

    /// Down without waiting. Returns true if the value was decremented.
    ///
    /// Safe from an interrupt handler.
    pub fn try_down(&self) -> bool {
        let old = interrupt::disable();
        let claimed = self.inner.with(|inner| {
            if inner.value > 0 {
                inner.value -= 1;
                true
            } else {
                false
            }
        });
        interrupt::set_level(old);
        claimed
    }

    /// Up or "V". Increments the value and wakes the waiting thread of
    /// highest effective priority, if any. Outside interrupt context it
    /// then yields, so a more important wakeup preempts immediately.
    ///
    /// Safe from an interrupt handler (the yield is skipped there).
    pub fn up(&self) {
        let old = interrupt::disable();
        self.inner.with(|inner| {
            if !inner.waiters.is_empty() {
                let mut best = 0;
                for i in 1..inner.waiters.len() {
                    if inner.waiters[i].effective_priority()
                        > inner.waiters[best].effective_priority()
                    {
                        best = i;
                    }
                }
                let thread = inner.waiters.remove(best);
                scheduler::unblock(&thread);
            }
            inner.value += 1;
        });
        interrupt::set_level(old);

        if !interrupt::in_interrupt() {
            scheduler::yield_now();
        }
    }

    /// Number of threads currently sleeping in down().
    pub fn waiter_count(&self) -> usize {
        let old = interrupt::disable();
        let n = self.inner.with(|inner| inner.waiters.len());
        interrupt::set_level(old);
        n
    }
}
