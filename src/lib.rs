/*
 * Strand - a priority-scheduling thread core
 *
 * This crate multiplexes a single hardware execution context across
 * cooperating kernel threads. It provides:
 *
 * - The thread lifecycle, run queue, and context-switch scheduler
 *   (strict priority, round-robin within a priority band).
 * - Counting semaphores, non-recursive locks, and condition variables
 *   built on the scheduler's block/unblock primitives.
 * - Nested priority donation, so that a high-priority thread blocked
 *   on a lock temporarily raises the priority of the chain of holders
 *   standing in its way.
 *
 * The core owns no hardware. Interrupt control, the low-level context
 * switch, stack allocation, and the idle halt are a capability set the
 * embedder supplies through the `platform::Platform` trait. All core
 * state is guarded by globally disabling interrupts through that trait;
 * there is no other mutual-exclusion mechanism at this layer.
 *
 * Under `test` (or the `sim` feature) the crate links std and ships a
 * hosted simulation of the capability set, `platform::sim`, which hands
 * a CPU token between host threads so that exactly one simulated
 * context executes at a time.
 */

#![cfg_attr(not(any(test, feature = "sim")), no_std)]

extern crate alloc;

pub mod interrupt;
pub mod platform;
pub mod scheduler;
pub mod sync;

#[cfg(test)]
mod tests;

pub use platform::{ContextId, IntrLevel, Platform};
pub use scheduler::{PRI_DEFAULT, PRI_MAX, PRI_MIN, SpawnError, TIME_SLICE, Tid};
pub use sync::{Condvar, Lock, Semaphore};
