//! Fork-based assertion tests: failing checks terminate the child with
//! failure status, passing checks let the body continue.

use cst::{assertions, context, memcheck};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, ForkResult};
use std::sync::Mutex;

static LOCK: Mutex<()> = Mutex::new(());

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
fn test_failing_check_terminates_with_failure() {
    let _g = LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let code = child_exit_code(|| {
        context::begin_test("eq_fail_demo");
        memcheck::reset();
        assertions::check_eq(2 + 2, 5);
    });
    assert_eq!(code, 1);
}

#[test]
fn test_passing_checks_let_body_continue() {
    let _g = LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let code = child_exit_code(|| {
        context::begin_test("pass_demo");
        memcheck::reset();
        assertions::check_true(true);
        assertions::check_eq("abc", "abc");
        unsafe { libc::_exit(0) }
    });
    assert_eq!(code, 0);
}

#[test]
fn test_fail_tip_does_not_change_outcome() {
    let _g = LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let code = child_exit_code(|| {
        context::begin_test("tip_demo");
        memcheck::reset();
        context::set_fail_tip("compare against the fixture table");
        assertions::check_false(true);
    });
    assert_eq!(code, 1);
}

#[test]
fn test_suppressed_details_still_fail() {
    let _g = LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let code = child_exit_code(|| {
        context::begin_test("no_details_demo");
        context::set_show_fail_details(false);
        memcheck::reset();
        assertions::check_ne(7, 7);
    });
    assert_eq!(code, 1);
}

#[test]
fn test_str_eq_free_releases_tracked_pointer() {
    let _g = LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let code = child_exit_code(|| {
        context::begin_test("free_demo");
        memcheck::reset();
        let ptr = memcheck::tracked_alloc(6) as *mut libc::c_char;
        unsafe {
            std::ptr::copy_nonoverlapping(c"hello".as_ptr(), ptr, 6);
            assertions::check_str_eq_free(ptr, "hello");
        }
        // The check freed the pointer, so the leak check must be clean
        memcheck::check_leaks_before_exit();
        unsafe { libc::_exit(0) }
    });
    assert_eq!(code, 0);
}

#[test]
fn test_failing_check_with_live_leak_reports_both() {
    let _g = LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let code = child_exit_code(|| {
        context::begin_test("fail_and_leak_demo");
        memcheck::reset();
        let _leaked = memcheck::tracked_alloc(32);
        assertions::check_true(false);
    });
    assert_eq!(code, 1);
}
