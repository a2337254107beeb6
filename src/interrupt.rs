/*
 * Interrupt Discipline
 *
 * Every piece of shared scheduler state (the ready list, the registry,
 * semaphore counters and waiter lists, lock holders and ceilings) is
 * protected by one mechanism only: disabling interrupts on the single
 * execution context. This module is the crate-internal face of that
 * mechanism.
 *
 * It provides:
 *
 * - Save/restore of the interrupt level, delegated to the installed
 *   platform (`disable`, `set_level`, `level`, `in_interrupt`).
 * - `IntrCell<T>`, a cell that hands out scoped mutable access to state
 *   that may only be touched with interrupts disabled.
 * - The deferred-yield flag: an interrupt handler may not switch
 *   threads itself, so `yield_on_return` records the request and
 *   `end_of_handler` honors it once the handler has unwound.
 */

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::platform::{self, IntrLevel};

/// Disables interrupts and returns the previous level.
pub fn disable() -> IntrLevel {
    platform::active().disable_interrupts()
}

/// Restores a previously saved interrupt level.
pub fn set_level(level: IntrLevel) {
    platform::active().set_interrupt_level(level);
}

/// Enables interrupts.
pub fn enable() {
    platform::active().set_interrupt_level(IntrLevel::On);
}

/// Returns the current interrupt level.
pub fn level() -> IntrLevel {
    platform::active().interrupt_level()
}

/// Returns true while executing inside an interrupt handler.
pub fn in_interrupt() -> bool {
    platform::active().in_interrupt()
}

/// Set when a time slice expires inside the tick handler. The platform's
/// interrupt-return path must call [`end_of_handler`] to honor it.
static YIELD_ON_RETURN: AtomicBool = AtomicBool::new(false);

/// Requests a yield once the current interrupt handler returns.
///
/// Thread switches are forbidden in interrupt context, so the tick
/// handler records the request here instead of yielding directly.
pub fn yield_on_return() {
    assert!(
        in_interrupt(),
        "yield_on_return is only meaningful inside an interrupt handler"
    );
    YIELD_ON_RETURN.store(true, Ordering::SeqCst);
}

/// Called by the platform's interrupt glue after a handler has unwound
/// and the in-interrupt flag has been cleared. Performs the deferred
/// yield requested by [`yield_on_return`], if any.
pub fn end_of_handler() {
    if YIELD_ON_RETURN.swap(false, Ordering::SeqCst) {
        crate::scheduler::yield_now();
    }
}

/// Clears any pending deferred yield. Used when the thread system is
/// (re)initialized.
pub(crate) fn reset() {
    YIELD_ON_RETURN.store(false, Ordering::SeqCst);
}

/// A cell for state guarded by the interrupts-disabled critical section.
///
/// `with` hands the closure exclusive access to the contents. Two rules
/// make this sound on a single execution context:
///
/// 1. Interrupts must be disabled for the whole access (checked in
///    debug builds once a platform is installed).
/// 2. The access must not span a suspension point. A thread that
///    switches away while holding a borrow would leave the borrow live
///    on its frozen stack while the next thread reopens the cell.
///
/// Rule 2 is enforced at runtime with a borrow flag; the closure shape
/// makes it hard to violate by accident. Every invariant in this crate
/// leans on this critical section: there is no memory-ordering story
/// here beyond "one CPU, interrupts off".
pub struct IntrCell<T> {
    value: UnsafeCell<T>,
    borrowed: AtomicBool,
}

// One execution context plus the interrupts-off requirement gives the
// exclusivity that Sync normally demands of the type itself.
unsafe impl<T: Send> Sync for IntrCell<T> {}

impl<T> IntrCell<T> {
    pub const fn new(value: T) -> Self {
        Self {
            value: UnsafeCell::new(value),
            borrowed: AtomicBool::new(false),
        }
    }

    /// Runs `f` with exclusive access to the contents.
    ///
    /// # Panics
    ///
    /// Panics on re-entrant access to the same cell. Debug builds also
    /// check that interrupts are disabled.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        if let Some(p) = platform::try_active() {
            debug_assert_eq!(
                p.interrupt_level(),
                IntrLevel::Off,
                "interrupt-protected state accessed with interrupts enabled"
            );
        }
        let was = self.borrowed.swap(true, Ordering::SeqCst);
        assert!(!was, "re-entrant access to interrupt-protected state");
        let reset = BorrowReset(&self.borrowed);
        let result = f(unsafe { &mut *self.value.get() });
        drop(reset);
        result
    }
}

impl<T: Copy> IntrCell<T> {
    pub fn get(&self) -> T {
        self.with(|v| *v)
    }

    pub fn set(&self, value: T) {
        self.with(|v| *v = value);
    }
}

/// Clears the borrow flag even if the closure panics.
struct BorrowReset<'a>(&'a AtomicBool);

impl Drop for BorrowReset<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
