/*
 * Lock with Priority Donation
 *
 * A lock is a binary semaphore plus a holder and a priority ceiling.
 * The ceiling tracks the highest effective priority known to be waiting
 * on the lock; while a thread holds locks, its donated priority is the
 * maximum of their ceilings. A blocked acquirer walks the chain
 *
 *     lock -> holder -> lock the holder waits on -> ...
 *
 * raising ceilings and donated priorities as it goes, so the whole
 * chain becomes at least as schedulable as the donor before the donor
 * sleeps. The walk is bounded: a cycle of lock holders is a bug, but it
 * must not hang the kernel.
 *
 * Locks are non-recursive and must not be used from interrupt context.
 */

use alloc::sync::{Arc, Weak};

use crate::interrupt::{self, IntrCell};
use crate::scheduler::{self, PRI_MIN, Thread};
use crate::sync::Semaphore;

/// Donation walks stop after this many links.
const MAX_DONATION_DEPTH: usize = 8;

/// Shared state of a lock. Threads keep handles to this: strong ones in
/// held_locks, a weak one in waiting_on, so the structure survives as
/// long as anyone holds or waits while the Lock object itself stays
/// owned by whoever declared it.
pub(crate) struct LockState {
    semaphore: Semaphore,
    /// Non-owning back-reference; None when the lock is free.
    holder: IntrCell<Option<Weak<Thread>>>,
    /// Highest effective priority donated through this lock. PRI_MIN
    /// when nothing is known to be waiting.
    ceiling: IntrCell<u8>,
}

/// A non-recursive mutex with priority donation.
pub struct Lock {
    state: Arc<LockState>,
}

impl Lock {
    pub fn new() -> Self {
        Self {
            state: Arc::new(LockState {
                semaphore: Semaphore::new(1),
                holder: IntrCell::new(None),
                ceiling: IntrCell::new(PRI_MIN),
            }),
        }
    }

    /// Acquires the lock, sleeping until it is available.
    ///
    /// On the slow path the caller donates its effective priority down
    /// the holder chain before sleeping. Must not be called from an
    /// interrupt handler or by the current holder.
    pub fn acquire(&self) {
        assert!(
            !interrupt::in_interrupt(),
            "lock acquire in an interrupt handler"
        );
        assert!(
            !self.held_by_current(),
            "recursive acquire of a non-recursive lock"
        );

        let old = interrupt::disable();
        if !self.try_claim() {
            let cur = scheduler::current();
            donate(&self.state, cur.effective_priority());
            cur.waiting_on
                .with(|w| *w = Some(Arc::downgrade(&self.state)));

            self.state.semaphore.down();

            // Awake again: the releaser already reset holder and
            // ceiling; claim ownership.
            cur.waiting_on.with(|w| *w = None);
            self.state.holder.with(|h| *h = Some(Arc::downgrade(&cur)));
            cur.held_locks.with(|l| l.push(Arc::clone(&self.state)));
        }
        interrupt::set_level(old);
    }

    /// Acquires the lock only if it is free right now. A successful
    /// try does not donate: donation is only meaningful while an
    /// acquirer waits.
    pub fn try_acquire(&self) -> bool {
        assert!(
            !self.held_by_current(),
            "recursive acquire of a non-recursive lock"
        );

        let old = interrupt::disable();
        let claimed = self.try_claim();
        interrupt::set_level(old);
        claimed
    }

    /// Releases the lock and re-derives the caller's donated priority
    /// from the locks it still holds, dropping whatever was flowing in
    /// through this one.
    pub fn release(&self) {
        assert!(
            self.held_by_current(),
            "release of a lock the caller does not hold"
        );

        let old = interrupt::disable();
        {
            let cur = scheduler::current();
            cur.held_locks
                .with(|l| l.retain(|s| !Arc::ptr_eq(s, &self.state)));
            self.state.holder.with(|h| *h = None);
            self.state.ceiling.set(PRI_MIN);

            let donated = cur.held_locks.with(|l| {
                l.iter()
                    .map(|s| s.ceiling.get())
                    .max()
                    .unwrap_or(PRI_MIN)
            });
            cur.donated_priority.set(donated);
        }
        interrupt::set_level(old);

        // Wakes the highest-priority waiter, which claims holdership
        // inside its own resumed acquire().
        self.state.semaphore.up();
    }

    /// True if the calling thread holds this lock.
    pub fn held_by_current(&self) -> bool {
        let old = interrupt::disable();
        let holder = self.state.holder.with(|h| h.clone());
        let held = holder
            .and_then(|w| w.upgrade())
            .is_some_and(|t| Arc::ptr_eq(&t, &scheduler::current()));
        interrupt::set_level(old);
        held
    }

    /// Claims a free lock. Interrupts must be disabled.
    fn try_claim(&self) -> bool {
        if !self.state.semaphore.try_down() {
            return false;
        }
        let cur = scheduler::current();
        self.state.holder.with(|h| *h = Some(Arc::downgrade(&cur)));
        cur.held_locks.with(|l| l.push(Arc::clone(&self.state)));
        true
    }
}

impl Default for Lock {
    fn default() -> Self {
        Self::new()
    }
}

/// Walks the holder chain from `start`, raising each lock's ceiling and
/// each holder's donated priority to at least `priority`.
///
/// Donation is monotonic: a donor at or below a ceiling it meets has
/// nothing to add further down and stops. The walk also stops at a free
/// lock, at a holder that is not itself waiting, at a stale
/// back-reference, and after MAX_DONATION_DEPTH links.
///
/// Interrupts must be disabled.
fn donate(start: &Arc<LockState>, priority: u8) {
    let mut lock = Arc::clone(start);
    for _ in 0..MAX_DONATION_DEPTH {
        if lock.ceiling.get() >= priority {
            return;
        }
        lock.ceiling.set(priority);

        let holder = lock.holder.with(|h| h.clone());
        let Some(holder) = holder.and_then(|w| w.upgrade()) else {
            return;
        };
        if holder.donated_priority.get() < priority {
            holder.donated_priority.set(priority);
            log::debug!(
                "priority {} donated to {} '{}'",
                priority,
                holder.tid(),
                holder.name()
            );
        }

        let next = holder.waiting_on.with(|w| w.clone());
        let Some(next) = next.and_then(|w| w.upgrade()) else {
            return;
        };
        lock = next;
    }
}
