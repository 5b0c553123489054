//! Fork-based memcheck tests: fatal paths (double free, leak at test
//! end) observed through the child's exit status.

use cst::{context, memcheck};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, ForkResult};
use std::sync::Mutex;

// The allocation table is process-wide; hold this across every fork so
// no sibling thread owns its lock when the child snapshot is taken.
static LOCK: Mutex<()> = Mutex::new(());

/// Run `body` in a forked child and return its exit code. A body that
/// survives to the end exits 42, so fatal paths are distinguishable
/// from "nothing happened".
fn child_exit_code(body: impl FnOnce()) -> i32 {
    match unsafe { fork() }.expect("fork") {
        ForkResult::Child => {
            body();
            unsafe { libc::_exit(42) }
        }
        ForkResult::Parent { child } => match waitpid(child, None).expect("waitpid") {
            WaitStatus::Exited(_, code) => code,
            other => panic!("child did not exit normally: {other:?}"),
        },
    }
}

#[test]
fn test_double_free_is_fatal_before_further_code() {
    let _g = LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let code = child_exit_code(|| {
        context::begin_test("double_free_demo");
        memcheck::reset();
        let ptr = memcheck::tracked_alloc(16);
        unsafe {
            memcheck::tracked_free(ptr);
            memcheck::tracked_free(ptr);
        }
    });
    assert_eq!(code, 1, "second free must terminate the child");
}

#[test]
fn test_invalid_free_is_fatal() {
    let _g = LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let code = child_exit_code(|| {
        context::begin_test("invalid_free_demo");
        memcheck::reset();
        unsafe { memcheck::tracked_free(0x1000 as *mut libc::c_void) };
    });
    assert_eq!(code, 1);
}

#[test]
fn test_leak_at_test_end_fails_the_test() {
    let _g = LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let code = child_exit_code(|| {
        context::begin_test("leak_demo");
        memcheck::reset();
        let _leaked = memcheck::tracked_alloc(64);
        memcheck::check_leaks_before_exit();
    });
    assert_eq!(code, 1, "leak check must convert success to failure");
}

#[test]
fn test_clean_test_passes_leak_check() {
    let _g = LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let code = child_exit_code(|| {
        context::begin_test("clean_demo");
        memcheck::reset();
        let ptr = memcheck::tracked_alloc(64);
        unsafe { memcheck::tracked_free(ptr) };
        memcheck::check_leaks_before_exit();
        unsafe { libc::_exit(0) }
    });
    assert_eq!(code, 0);
}

#[test]
fn test_disabled_memcheck_allows_untracked_free() {
    let _g = LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let code = child_exit_code(|| {
        memcheck::set_enabled(false);
        let raw = unsafe { libc::malloc(8) };
        unsafe { memcheck::tracked_free(raw) };
        memcheck::set_enabled(true);
        unsafe { libc::_exit(0) }
    });
    assert_eq!(code, 0);
}
