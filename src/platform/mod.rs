/*
 * Platform Capability Set
 *
 * The scheduling core is polymorphic over the hardware it runs on. An
 * embedder supplies one object implementing `Platform`, covering:
 *
 * - interrupt enable/disable and the in-interrupt flag,
 * - execution contexts: creation (stack allocation folded in), the
 *   low-level switch, and destruction,
 * - the idle halt.
 *
 * The trait is object-safe on purpose: the core holds a single
 * `&'static dyn Platform`, installed once per boot by
 * `scheduler::init`, and never needs to be generic over it.
 */

use alloc::boxed::Box;
use core::fmt;

use spin::RwLock;

#[cfg(any(test, feature = "sim"))]
pub mod sim;

/// Interrupt level: either interrupts are deliverable or they are not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntrLevel {
    /// Interrupts disabled.
    Off,
    /// Interrupts enabled.
    On,
}

/// Opaque handle to an execution context (a stack plus saved CPU state).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(pub usize);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Context({})", self.0)
    }
}

/// The capability set the scheduling core requires from its host.
pub trait Platform: Sync {
    /// Disables interrupt delivery and returns the previous level.
    fn disable_interrupts(&self) -> IntrLevel;

    /// Restores a previously saved interrupt level.
    fn set_interrupt_level(&self, level: IntrLevel);

    /// Returns the current interrupt level.
    fn interrupt_level(&self) -> IntrLevel;

    /// Returns true while executing inside an interrupt handler.
    fn in_interrupt(&self) -> bool;

    /// The context of the thread that booted the system. It already has
    /// a stack (the boot stack) and is the context `switch` saves into
    /// when the initial thread first yields.
    fn bootstrap_context(&self) -> ContextId;

    /// Allocates a stack and an execution context that will run `entry`
    /// the first time it is switched to. Returns `None` if the stack
    /// cannot be allocated; the caller surfaces that as a spawn error.
    ///
    /// `entry` never returns: it ends by switching away for the last
    /// time (the scheduler's exit path).
    fn new_context(&self, entry: Box<dyn FnOnce() + Send>) -> Option<ContextId>;

    /// Saves the CPU state of `prev` and restores that of `next`.
    /// Returns in `next`'s context; from the caller's point of view the
    /// call returns when `prev` is next scheduled.
    ///
    /// Must be called with interrupts disabled.
    fn switch(&self, prev: ContextId, next: ContextId);

    /// Frees a context's stack. Called by the successor of a dying
    /// thread, never by the dying thread itself (it is still running on
    /// that stack when it schedules away).
    fn destroy_context(&self, context: ContextId);

    /// Idles the CPU until the next interrupt, enabling interrupts if
    /// they are disabled. Only the idle thread calls this.
    fn halt_until_interrupt(&self);
}

/// The installed platform. Set once per boot; re-installation is only
/// expected from hosted test harnesses that boot the core repeatedly.
static ACTIVE: RwLock<Option<&'static dyn Platform>> = RwLock::new(None);

pub(crate) fn install(platform: &'static dyn Platform) {
    *ACTIVE.write() = Some(platform);
}

/// The installed platform.
///
/// # Panics
///
/// Panics if called before `scheduler::init`.
pub(crate) fn active() -> &'static dyn Platform {
    (*ACTIVE.read()).expect("no platform installed; call scheduler::init first")
}

pub(crate) fn try_active() -> Option<&'static dyn Platform> {
    *ACTIVE.read()
}
