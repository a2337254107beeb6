/*
 * Synchronization Primitives
 *
 * Sleeping primitives built on the scheduler's block/unblock pair:
 *
 * - Semaphore: counting, with priority-ordered wake.
 * - Lock: a binary semaphore plus a holder and the priority-donation
 *   bookkeeping that prevents priority inversion.
 * - Condvar: monitor-style condition variable layered on per-waiter
 *   private semaphores.
 *
 * Like the scheduler itself, these protect their state by disabling
 * interrupts; a thread that must sleep enlists itself on a waiter list
 * and blocks inside the same interrupts-off region.
 */

pub mod condvar;
pub mod lock;
pub mod semaphore;

pub use condvar::Condvar;
pub use lock::Lock;
pub use semaphore::Semaphore;
