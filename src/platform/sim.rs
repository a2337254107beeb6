/*
 * Simulated Platform
 *
 * A hosted realization of the capability set, used by the test suite
 * (and available to embedders through the `sim` feature). Each
 * simulated context is backed by a host OS thread; a single mutex plus
 * condvar hand a "CPU token" between them so that exactly one context
 * executes at any moment. That token is the simulation of the single
 * hardware execution context, and the interrupt level degenerates to a
 * flag: with one runner there is nothing to race with, only the
 * discipline to uphold.
 *
 * Interrupt handlers do not exist on a host, so `run_in_interrupt`
 * simulates one: it disables interrupts, sets the in-interrupt flag
 * around a closure, and performs the deferred-yield check on the way
 * out, the way real interrupt-return glue would.
 */

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::thread;

use log::{Level, LevelFilter, Metadata, Record};

use super::{ContextId, IntrLevel, Platform};

/// Hosted platform backed by OS threads.
pub struct SimPlatform {
    shared: Arc<Shared>,
}

struct Shared {
    state: Mutex<SimState>,
    scheduled: Condvar,
    intr_enabled: AtomicBool,
    in_interrupt: AtomicBool,
    fail_next_context: AtomicBool,
}

struct SimState {
    /// The context holding the CPU token.
    current: ContextId,
    next_context: usize,
}

impl SimPlatform {
    /// Creates a platform and leaks it, since the core holds platforms
    /// by `&'static`. The bootstrap context is the calling thread.
    /// Interrupts start disabled, as on real hardware at boot.
    pub fn new() -> &'static SimPlatform {
        Box::leak(Box::new(SimPlatform {
            shared: Arc::new(Shared {
                state: Mutex::new(SimState {
                    current: ContextId(0),
                    next_context: 1,
                }),
                scheduled: Condvar::new(),
                intr_enabled: AtomicBool::new(false),
                in_interrupt: AtomicBool::new(false),
                fail_next_context: AtomicBool::new(false),
            }),
        }))
    }

    /// Makes the next `new_context` call fail, exercising the stack
    /// exhaustion path of `scheduler::spawn`.
    pub fn fail_next_context(&self) {
        self.shared.fail_next_context.store(true, Ordering::SeqCst);
    }

    /// Runs `f` as if it were the body of an interrupt handler:
    /// interrupts off, in-interrupt flag set, and the deferred-yield
    /// check performed on "interrupt return".
    pub fn run_in_interrupt(&self, f: impl FnOnce()) {
        let saved = self.disable_interrupts();
        self.shared.in_interrupt.store(true, Ordering::SeqCst);
        f();
        self.shared.in_interrupt.store(false, Ordering::SeqCst);
        self.set_interrupt_level(saved);
        crate::interrupt::end_of_handler();
    }
}

impl Platform for SimPlatform {
    fn disable_interrupts(&self) -> IntrLevel {
        if self.shared.intr_enabled.swap(false, Ordering::SeqCst) {
            IntrLevel::On
        } else {
            IntrLevel::Off
        }
    }

    fn set_interrupt_level(&self, level: IntrLevel) {
        self.shared
            .intr_enabled
            .store(level == IntrLevel::On, Ordering::SeqCst);
    }

    fn interrupt_level(&self) -> IntrLevel {
        if self.shared.intr_enabled.load(Ordering::SeqCst) {
            IntrLevel::On
        } else {
            IntrLevel::Off
        }
    }

    fn in_interrupt(&self) -> bool {
        self.shared.in_interrupt.load(Ordering::SeqCst)
    }

    fn bootstrap_context(&self) -> ContextId {
        ContextId(0)
    }

    fn new_context(&self, entry: Box<dyn FnOnce() + Send>) -> Option<ContextId> {
        if self.shared.fail_next_context.swap(false, Ordering::SeqCst) {
            return None;
        }

        let id = {
            let mut state = self.shared.state.lock().unwrap();
            let id = ContextId(state.next_context);
            state.next_context += 1;
            id
        };

        // The host thread parks until the scheduler first switches to
        // this context, then runs the entry trampoline. The trampoline
        // ends in scheduler::exit, which switches away for good.
        let shared = Arc::clone(&self.shared);
        thread::Builder::new()
            .name(std::format!("sim-context-{}", id.0))
            .spawn(move || {
                let mut state = shared.state.lock().unwrap();
                while state.current != id {
                    state = shared.scheduled.wait(state).unwrap();
                }
                drop(state);
                entry();
                unreachable!("context entry returned instead of exiting");
            })
            .ok()?;

        Some(id)
    }

    fn switch(&self, prev: ContextId, next: ContextId) {
        let shared = &self.shared;
        let mut state = shared.state.lock().unwrap();
        state.current = next;
        shared.scheduled.notify_all();
        while state.current != prev {
            state = shared.scheduled.wait(state).unwrap();
        }
    }

    fn destroy_context(&self, _context: ContextId) {
        // The backing host thread is parked inside its final switch and
        // never wakes; the OS reclaims it at process exit. Nothing to
        // free eagerly here.
    }

    fn halt_until_interrupt(&self) {
        // On hardware this is sti; hlt. The simulation has no interrupt
        // sources, so reaching the idle halt means every thread is
        // blocked with nothing left to wake it. Fail fast.
        panic!("cpu halted: all threads are blocked and the simulated platform has no interrupt sources");
    }
}

/// Logger for hosted runs, writing to stderr.
struct StderrLogger;

impl log::Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Info
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!("[{}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: StderrLogger = StderrLogger;

/// Installs the stderr logger. Safe to call repeatedly; only the first
/// call takes effect.
pub fn init_logging() {
    let _ = log::set_logger(&LOGGER).map(|()| log::set_max_level(LevelFilter::Info));
}
