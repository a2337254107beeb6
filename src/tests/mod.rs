/*
 * Test Suite
 *
 * Scenario tests for the scheduler and the synchronization primitives,
 * run against the simulated platform. Each test boots a fresh kernel:
 * a new SimPlatform, scheduler::init on the calling thread (which
 * becomes the initial "main" thread at PRI_DEFAULT), and
 * scheduler::start for the idle thread.
 *
 * The core is a module-scope singleton, so tests serialize on a boot
 * lock. Threads left over from a previous boot stay parked inside the
 * previous platform and never run again.
 *
 * Worker threads record what happened into shared fixtures and the
 * test's own thread does the asserting; a panicking worker would park
 * the whole boot instead of failing the test.
 */

use std::sync::{Mutex, MutexGuard};

use crate::platform::sim::{self, SimPlatform};
use crate::scheduler;

pub mod priority;

static BOOT_LOCK: Mutex<()> = Mutex::new(());

/// A booted kernel on a fresh simulated platform. Holding it holds the
/// boot lock.
pub struct Kernel {
    pub platform: &'static SimPlatform,
    _boot: MutexGuard<'static, ()>,
}

/// Boots the core for one test.
pub fn boot() -> Kernel {
    // A previous test failing an assert poisons the lock; the kernel is
    // re-initialized from scratch here, so the poison carries no state.
    let guard = BOOT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    sim::init_logging();
    let platform = SimPlatform::new();
    scheduler::init(platform);
    scheduler::start();
    Kernel {
        platform,
        _boot: guard,
    }
}

// ========== REGISTRY AND RECORD BASICS ==========

#[test]
fn boot_registers_main_and_idle() {
    let _k = boot();

    let mut names = std::vec::Vec::new();
    let mut running = 0;
    scheduler::foreach(|t| {
        names.push(std::string::String::from(t.name()));
        if t.status() == scheduler::Status::Running {
            running += 1;
        }
    });

    assert!(names.iter().any(|n| n == "main"));
    assert!(names.iter().any(|n| n == "idle"));
    assert_eq!(running, 1, "exactly one thread is Running");
}

#[test]
fn current_accessors_describe_the_boot_thread() {
    let _k = boot();

    assert_eq!(scheduler::name().as_str(), "main");
    assert_eq!(scheduler::tid(), scheduler::current().tid());
    assert_eq!(scheduler::get_priority(), scheduler::PRI_DEFAULT);
}

#[test]
fn tids_are_positive_and_increase() {
    let _k = boot();

    let a = scheduler::spawn("a", scheduler::PRI_DEFAULT, || {}).unwrap();
    let b = scheduler::spawn("b", scheduler::PRI_DEFAULT, || {}).unwrap();
    assert!(a.0 > 0);
    assert!(b.0 > a.0);
}

#[test]
fn wake_up_time_orders_sleepers() {
    let _k = boot();

    let cur = scheduler::current();
    cur.set_wake_up_time(100);
    assert_eq!(cur.wake_up_time(), 100);

    let mut ordered = None;
    scheduler::foreach(|t| {
        if t.name() == "idle" {
            t.set_wake_up_time(250);
            ordered = Some(cur.wakes_before(t));
        }
    });
    assert_eq!(ordered, Some(true));
}

#[test]
fn stats_start_at_zero() {
    let _k = boot();

    let s = scheduler::stats();
    assert_eq!(s.total_ticks, 0);
    assert_eq!(s.idle_ticks, 0);
    assert_eq!(s.kernel_ticks, 0);
}
