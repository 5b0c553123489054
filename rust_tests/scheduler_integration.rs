//! Full-run scheduler tests: category ordering, hooks, isolation and
//! timeout enforcement observed through RunStats.

use cst::config::{RunConfig, EXIT_CONFIG_ERROR};
use cst::registry::Registry;
use cst::scheduler;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

// Forked children share the process-wide allocation table with the
// parent; serialize the runs so no other thread holds its lock mid-fork.
static LOCK: Mutex<()> = Mutex::new(());

fn quiet_config() -> RunConfig {
    // No signal handler: these runs happen inside the test harness process
    RunConfig {
        sighandler: false,
        ..RunConfig::default()
    }
}

#[test]
fn test_scenario_math_one_of_two_fails() {
    let _g = LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let mut reg = Registry::new();
    reg.test("Math", "two_plus_two_is_four", || cst::check_eq(2 + 2, 4));
    reg.test("Math", "two_plus_two_is_five", || cst::check_eq(2 + 2, 5));

    let stats = scheduler::run(&mut reg, &quiet_config()).unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.failed, 1);
}

#[test]
fn test_every_test_executed_exactly_once() {
    let _g = LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let mut reg = Registry::new();
    reg.test("", "a", || {});
    reg.test("X", "b", || {});
    reg.test("", "c", || {});

    let stats = scheduler::run(&mut reg, &quiet_config()).unwrap();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.failed, 0);
    assert!(reg.tests().iter().all(|t| t.executed));
}

#[test]
fn test_global_before_all_runs_once() {
    let _g = LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let mut reg = Registry::new();
    let count = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&count);
    reg.before_all(None, move || {
        c.fetch_add(1, Ordering::SeqCst);
    });
    reg.test("A", "a1", || {});
    reg.test("B", "b1", || {});
    reg.test("C", "c1", || {});

    scheduler::run(&mut reg, &quiet_config()).unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn test_category_before_all_runs_once_for_five_tests() {
    let _g = LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let mut reg = Registry::new();
    let count = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&count);
    reg.before_all(Some("X"), move || {
        c.fetch_add(1, Ordering::SeqCst);
    });
    for name in ["x1", "x2", "x3", "x4", "x5"] {
        reg.test("X", name, || {});
    }

    scheduler::run(&mut reg, &quiet_config()).unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn test_category_contiguity_and_each_hook_order() {
    let _g = LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let mut reg = Registry::new();
    let events = Arc::new(Mutex::new(Vec::<&'static str>::new()));

    let e = Arc::clone(&events);
    reg.before_each(Some(""), move || e.lock().unwrap().push("root"));
    let e = Arc::clone(&events);
    reg.before_each(Some("Math"), move || e.lock().unwrap().push("math"));

    // Interleaved registration; scheduling must still group by category
    reg.test("Math", "m1", || {});
    reg.test("", "t1", || {});
    reg.test("Math", "m2", || {});
    reg.test("", "t2", || {});

    scheduler::run(&mut reg, &quiet_config()).unwrap();
    let seen = events.lock().unwrap().clone();
    assert_eq!(seen, ["root", "root", "math", "math"]);
}

#[test]
fn test_after_each_runs_regardless_of_outcome() {
    let _g = LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let mut reg = Registry::new();
    let count = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&count);
    reg.after_each(None, move || {
        c.fetch_add(1, Ordering::SeqCst);
    });
    reg.test("", "passes", || {});
    reg.test("", "fails", || std::process::exit(1));

    let stats = scheduler::run(&mut reg, &quiet_config()).unwrap();
    assert_eq!(stats.failed, 1);
    assert_eq!(count.load(Ordering::SeqCst), 2);
}

#[test]
fn test_timeout_kills_hung_test() {
    let _g = LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let mut reg = Registry::new();
    reg.test_with_timeout("", "never_returns", 50, || loop {
        std::thread::sleep(Duration::from_millis(10));
    });

    let start = Instant::now();
    let stats = scheduler::run(&mut reg, &quiet_config()).unwrap();
    assert_eq!(stats.failed, 1);
    // Bounded overshoot over the 50ms deadline
    assert!(start.elapsed() < Duration::from_millis(500));
}

#[test]
fn test_crash_does_not_block_subsequent_tests() {
    let _g = LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let mut reg = Registry::new();
    let ran_after = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&ran_after);
    reg.test("", "crashes", || std::process::abort());
    reg.after_each(None, move || {
        c.fetch_add(1, Ordering::SeqCst);
    });
    reg.test("", "still_runs", || {});

    let stats = scheduler::run(&mut reg, &quiet_config()).unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.failed, 1);
    assert_eq!(ran_after.load(Ordering::SeqCst), 2);
}

#[test]
fn test_empty_registry_is_config_error() {
    let code = cst::run_with_config(Registry::new(), quiet_config());
    assert_eq!(code, EXIT_CONFIG_ERROR);
}

#[test]
fn test_exit_code_is_failed_count() {
    let _g = LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let mut reg = Registry::new();
    reg.test("", "p", || {});
    reg.test("", "f1", || std::process::exit(1));
    reg.test("", "f2", || std::process::exit(1));

    let code = cst::run_with_config(reg, quiet_config());
    assert_eq!(code, 2);
}
