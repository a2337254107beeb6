/*
 * Priority Scheduler
 *
 * This module owns the thread lifecycle and the CPU. It keeps the ready
 * list as an unsorted bag and picks the thread with the highest
 * effective priority by a linear scan: priorities mutate while threads
 * sit on the list (donation lands on blocked and ready threads alike),
 * so a sorted structure would be stale the moment it was built. Ties
 * go to the earliest entry, which yields round-robin within a band.
 *
 * SCHEDULING DISCIPLINE:
 *
 * All scheduler state is guarded by disabling interrupts. block() and
 * schedule() must be entered with interrupts already disabled;
 * unblock() disables and restores around its own work. Thread switches
 * are forbidden in interrupt context; the tick handler requests a
 * deferred yield instead, honored at interrupt return.
 *
 * THREAD LIFECYCLE:
 *
 *          spawn               unblock
 *  (none) ------> Blocked --------------> Ready
 *                    ^                      |
 *                    | block                | scheduled
 *                    |                      v
 *                    +------------------ Running
 *                                           | exit
 *                                           v
 *                                         Dying -> reaped by successor
 *
 * A dying thread cannot free its own stack (it is running on it), so
 * the record is reaped by the next thread on the CPU, right after the
 * switch completes.
 */

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicI32, AtomicU32, AtomicU64, Ordering};

use lazy_static::lazy_static;

use crate::interrupt::{self, IntrCell};
use crate::platform::{self, IntrLevel, Platform};
use crate::sync::{Lock, Semaphore};

pub mod thread;

pub use thread::{Status, Thread, Tid};

/// Lowest priority.
pub const PRI_MIN: u8 = 0;
/// Priority of the initial thread, and the usual default.
pub const PRI_DEFAULT: u8 = 31;
/// Highest priority.
pub const PRI_MAX: u8 = 63;

/// Timer ticks a thread may run before the tick handler forces a yield.
pub const TIME_SLICE: u32 = 4;

/// Threads ready to run. An unsorted bag, scanned for the maximum
/// effective priority.
static READY: IntrCell<Vec<Arc<Thread>>> = IntrCell::new(Vec::new());

/// Every live thread, in creation order.
static ALL: IntrCell<Vec<Arc<Thread>>> = IntrCell::new(Vec::new());

/// The thread currently on the CPU.
static CURRENT: IntrCell<Option<Arc<Thread>>> = IntrCell::new(None);

/// The thread switched away from, pending finish_switch bookkeeping.
static PREVIOUS: IntrCell<Option<Arc<Thread>>> = IntrCell::new(None);

/// Runs when the ready list is empty.
static IDLE: IntrCell<Option<Arc<Thread>>> = IntrCell::new(None);

/// The boot thread; its record is never reaped.
static INITIAL: IntrCell<Option<Arc<Thread>>> = IntrCell::new(None);

/// Timer ticks since boot, and their attribution.
static TICKS: AtomicU64 = AtomicU64::new(0);
static IDLE_TICKS: AtomicU64 = AtomicU64::new(0);
static KERNEL_TICKS: AtomicU64 = AtomicU64::new(0);

/// Ticks since the running thread was last scheduled.
static THREAD_TICKS: AtomicU32 = AtomicU32::new(0);

static NEXT_TID: AtomicI32 = AtomicI32::new(1);

lazy_static! {
    /// Guards TID allocation. Initialized (lazily) before the allocator
    /// is first called, which resolves the bootstrap circularity of a
    /// lock protecting the counter that numbers the lock's own users.
    static ref TID_LOCK: Lock = Lock::new();
}

/// Spawning can fail only by resource exhaustion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnError {
    /// The platform could not allocate a stack for the new thread.
    OutOfMemory,
}

impl fmt::Display for SpawnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpawnError::OutOfMemory => write!(f, "out of memory allocating a thread stack"),
        }
    }
}

impl core::error::Error for SpawnError {}

/// Per-boot tick accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub total_ticks: u64,
    pub idle_ticks: u64,
    pub kernel_ticks: u64,
}

/// Initializes the thread system on `platform` and turns the calling
/// context into the initial thread, named "main", at PRI_DEFAULT.
///
/// Must be called with interrupts disabled, before any other function
/// in this crate. Calling it again re-boots the core on a fresh
/// platform; only hosted test harnesses do that.
pub fn init(platform: &'static dyn Platform) {
    platform::install(platform);
    assert_eq!(
        interrupt::level(),
        IntrLevel::Off,
        "scheduler::init requires interrupts disabled"
    );

    READY.with(|q| q.clear());
    ALL.with(|l| l.clear());
    CURRENT.with(|c| *c = None);
    PREVIOUS.with(|p| *p = None);
    IDLE.with(|i| *i = None);
    INITIAL.with(|i| *i = None);
    TICKS.store(0, Ordering::SeqCst);
    IDLE_TICKS.store(0, Ordering::SeqCst);
    KERNEL_TICKS.store(0, Ordering::SeqCst);
    THREAD_TICKS.store(0, Ordering::SeqCst);
    NEXT_TID.store(1, Ordering::SeqCst);
    interrupt::reset();

    let initial = Arc::new(Thread::new("main", PRI_DEFAULT, platform.bootstrap_context()));
    initial.status.set(Status::Running);
    CURRENT.with(|c| *c = Some(Arc::clone(&initial)));
    INITIAL.with(|i| *i = Some(Arc::clone(&initial)));
    ALL.with(|l| l.push(Arc::clone(&initial)));

    // The initial thread is current by now, so the TID lock works.
    let tid = allocate_tid();
    initial.tid.set(tid);

    log::info!("thread system initialized; initial thread is {}", tid);
}

/// Creates the idle thread and enables preemptive scheduling.
///
/// Blocks until the idle thread has registered itself, so that the
/// ready-list-empty fallback is in place before the caller goes on.
pub fn start() {
    let started = Arc::new(Semaphore::new(0));
    let handshake = Arc::clone(&started);
    spawn("idle", PRI_MIN, move || idle_loop(handshake))
        .expect("failed to create the idle thread");

    interrupt::enable();
    started.down();

    log::info!("scheduler started; preemption enabled");
}

/// The idle thread: registers itself, completes the start() handshake,
/// then alternates between blocking and halting. It is never on the
/// ready list; next_thread_to_run returns it when the list is empty.
fn idle_loop(started: Arc<Semaphore>) {
    let me = current();
    let old = interrupt::disable();
    IDLE.with(|i| *i = Some(me));
    interrupt::set_level(old);

    started.up();

    loop {
        interrupt::disable();
        block();
        platform::active().halt_until_interrupt();
    }
}

/// Creates a new thread running `func` and makes it Ready. If the new
/// thread's effective priority exceeds the caller's, yields so it runs
/// immediately.
///
/// Returns the new thread's TID, or an error if the platform cannot
/// allocate a stack.
pub fn spawn(
    name: &str,
    priority: u8,
    func: impl FnOnce() + Send + 'static,
) -> Result<Tid, SpawnError> {
    assert!(priority <= PRI_MAX, "priority out of range");

    // The first switch into the new context lands here: complete the
    // switch bookkeeping, leave the interrupts-off schedule path, run
    // the thread function, and exit on its behalf when it returns.
    let entry: Box<dyn FnOnce() + Send> = Box::new(move || {
        finish_switch();
        interrupt::enable();
        func();
        exit();
    });

    let context = platform::active()
        .new_context(entry)
        .ok_or(SpawnError::OutOfMemory)?;

    let thread = Arc::new(Thread::new(name, priority, context));
    let tid = allocate_tid();

    let old = interrupt::disable();
    thread.tid.set(tid);
    ALL.with(|l| l.push(Arc::clone(&thread)));
    interrupt::set_level(old);

    log::info!("spawned {} '{}' at priority {}", tid, thread.name(), priority);

    unblock(&thread);

    let preempted = {
        let old = interrupt::disable();
        let mine = CURRENT.with(|c| c.as_ref().expect("spawn before init").effective_priority());
        let theirs = thread.effective_priority();
        interrupt::set_level(old);
        theirs > mine
    };
    if preempted {
        yield_now();
    }

    Ok(tid)
}

/// Puts the current thread to sleep. It will not run again until some
/// other thread passes it to [`unblock`].
///
/// Interrupts must already be disabled: the caller has just put itself
/// on a waiter list and the two steps must be atomic. Returns with
/// interrupts still disabled.
pub fn block() {
    assert!(!interrupt::in_interrupt(), "cannot block in an interrupt handler");
    assert_eq!(
        interrupt::level(),
        IntrLevel::Off,
        "block requires interrupts disabled"
    );

    CURRENT.with(|c| {
        c.as_ref()
            .expect("no running thread")
            .status
            .set(Status::Blocked);
    });
    schedule();
}

/// Moves a Blocked thread to the ready list. Does not yield: the caller
/// decides whether the wakeup should preempt anybody.
///
/// Safe to call with interrupts on or off, and from interrupt context.
pub fn unblock(thread: &Arc<Thread>) {
    thread.check();
    let old = interrupt::disable();
    assert_eq!(
        thread.status.get(),
        Status::Blocked,
        "unblock of a thread that is not blocked"
    );
    READY.with(|q| q.push(Arc::clone(thread)));
    thread.status.set(Status::Ready);
    interrupt::set_level(old);
}

/// Yields the CPU. The current thread goes to the back of the ready
/// bag and the scheduler picks again; with strict priority scheduling
/// the caller resumes immediately unless something at least as
/// important is ready.
pub fn yield_now() {
    assert!(!interrupt::in_interrupt(), "cannot yield in an interrupt handler");

    let old = interrupt::disable();
    {
        let cur = CURRENT.with(|c| Arc::clone(c.as_ref().expect("no running thread")));
        let is_idle = IDLE.with(|i| i.as_ref().is_some_and(|idle| Arc::ptr_eq(idle, &cur)));
        if !is_idle {
            READY.with(|q| q.push(Arc::clone(&cur)));
        }
        cur.status.set(Status::Ready);
    }
    schedule();
    interrupt::set_level(old);
}

/// Terminates the current thread. The record is unregistered here and
/// reaped by the successor thread after the final switch.
pub fn exit() -> ! {
    assert!(!interrupt::in_interrupt(), "cannot exit in an interrupt handler");

    interrupt::disable();
    {
        let cur = CURRENT.with(|c| Arc::clone(c.as_ref().expect("no running thread")));
        log::info!("{} '{}' exiting", cur.tid(), cur.name());
        ALL.with(|l| l.retain(|t| !Arc::ptr_eq(t, &cur)));
        cur.status.set(Status::Dying);
        // The local handle drops here, before the final switch; the one
        // strong reference left is PREVIOUS, which the successor takes
        // and drops after destroying the context.
    }
    schedule();
    unreachable!("a dying thread was rescheduled");
}

/// Timer-tick hook. Called from the timer interrupt handler; attributes
/// the tick and, once a time slice has elapsed, requests a yield on
/// interrupt return.
pub fn tick() {
    assert!(interrupt::in_interrupt(), "tick must be called from the timer handler");

    TICKS.fetch_add(1, Ordering::SeqCst);

    let idle_running = CURRENT.with(|c| {
        IDLE.with(|i| match (c.as_ref(), i.as_ref()) {
            (Some(cur), Some(idle)) => Arc::ptr_eq(cur, idle),
            _ => false,
        })
    });
    if idle_running {
        IDLE_TICKS.fetch_add(1, Ordering::SeqCst);
    } else {
        KERNEL_TICKS.fetch_add(1, Ordering::SeqCst);
    }

    if THREAD_TICKS.fetch_add(1, Ordering::SeqCst) + 1 >= TIME_SLICE {
        interrupt::yield_on_return();
    }
}

/// Tick accounting since boot.
pub fn stats() -> Stats {
    Stats {
        total_ticks: TICKS.load(Ordering::SeqCst),
        idle_ticks: IDLE_TICKS.load(Ordering::SeqCst),
        kernel_ticks: KERNEL_TICKS.load(Ordering::SeqCst),
    }
}

pub fn log_stats() {
    let s = stats();
    log::info!(
        "ticks: {} idle, {} kernel, {} total",
        s.idle_ticks,
        s.kernel_ticks,
        s.total_ticks
    );
}

/// Sets the current thread's own priority and yields, so the new
/// ordering takes effect immediately. A donation above the new value
/// still dominates.
pub fn set_priority(priority: u8) {
    assert!(priority <= PRI_MAX, "priority out of range");

    let old = interrupt::disable();
    CURRENT.with(|c| {
        c.as_ref()
            .expect("no running thread")
            .base_priority
            .set(priority);
    });
    interrupt::set_level(old);

    yield_now();
}

/// The current thread's effective priority: the larger of its own
/// priority and the highest donation it is receiving.
pub fn get_priority() -> u8 {
    let old = interrupt::disable();
    let priority = CURRENT.with(|c| c.as_ref().expect("no running thread").effective_priority());
    interrupt::set_level(old);
    priority
}

/// A handle to the running thread's record.
pub fn current() -> Arc<Thread> {
    let old = interrupt::disable();
    let cur = CURRENT.with(|c| Arc::clone(c.as_ref().expect("no running thread")));
    interrupt::set_level(old);
    cur
}

/// The running thread's name.
pub fn name() -> heapless::String<{ thread::NAME_MAX }> {
    let mut out = heapless::String::new();
    let _ = out.push_str(current().name());
    out
}

/// The running thread's TID.
pub fn tid() -> Tid {
    current().tid()
}

/// Applies `f` to every live thread. `f` must not call back into the
/// thread registry (spawn, exit, foreach).
pub fn foreach(mut f: impl FnMut(&Arc<Thread>)) {
    let old = interrupt::disable();
    ALL.with(|l| {
        for t in l.iter() {
            f(t);
        }
    });
    interrupt::set_level(old);
}

fn allocate_tid() -> Tid {
    TID_LOCK.acquire();
    let tid = Tid(NEXT_TID.load(Ordering::Relaxed));
    NEXT_TID.store(tid.0 + 1, Ordering::Relaxed);
    TID_LOCK.release();
    tid
}

/// Picks the thread to run next: the highest effective priority on the
/// ready list, earliest entry winning ties. Falls back to the idle
/// thread when the list is empty.
fn next_thread_to_run() -> Arc<Thread> {
    let picked = READY.with(|q| {
        if q.is_empty() {
            return None;
        }
        let mut best = 0;
        for i in 1..q.len() {
            if q[i].effective_priority() > q[best].effective_priority() {
                best = i;
            }
        }
        Some(q.remove(best))
    });
    picked.unwrap_or_else(|| {
        IDLE.with(|i| i.clone())
            .expect("ready list empty before the idle thread exists")
    })
}

/// Switches to the next thread. Interrupts must be disabled and the
/// current thread must already have left the Running state.
///
/// The outgoing thread's handle is parked in PREVIOUS rather than held
/// on this stack: if the outgoing thread is dying, this frame is never
/// resumed and anything it owned would leak.
fn schedule() {
    debug_assert_eq!(interrupt::level(), IntrLevel::Off);

    let switch = {
        let cur = CURRENT.with(|c| Arc::clone(c.as_ref().expect("no running thread")));
        debug_assert_ne!(cur.status.get(), Status::Running);

        let next = next_thread_to_run();
        if Arc::ptr_eq(&cur, &next) {
            None
        } else {
            let pair = (cur.context, next.context);
            PREVIOUS.with(|p| *p = Some(cur));
            CURRENT.with(|c| *c = Some(next));
            Some(pair)
        }
    };

    if let Some((prev, next)) = switch {
        platform::active().switch(prev, next);
    }
    finish_switch();
}

/// Completes a switch in the context of the incoming thread: marks it
/// Running, restarts its time slice, and reaps the outgoing thread if
/// it was dying. Also the first thing a brand-new thread runs.
pub(crate) fn finish_switch() {
    debug_assert_eq!(interrupt::level(), IntrLevel::Off);

    CURRENT.with(|c| {
        c.as_ref()
            .expect("no running thread")
            .status
            .set(Status::Running);
    });
    THREAD_TICKS.store(0, Ordering::SeqCst);

    let previous = PREVIOUS.with(|p| p.take());
    if let Some(prev) = previous {
        if prev.status.get() == Status::Dying {
            let is_initial =
                INITIAL.with(|i| i.as_ref().is_some_and(|init| Arc::ptr_eq(init, &prev)));
            if !is_initial {
                platform::active().destroy_context(prev.context);
            }
        }
    }
}
