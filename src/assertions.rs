//! Assertion dispatch
//!
//! Every typed check funnels into the same pass/fail core: a pass prints
//! the success line for the current test and clears the pending fail tip;
//! a failure prints the failure marker plus test name, the "got X when
//! expecting Y" detail (unless suppressed), the one-shot tip, runs the
//! leak check and terminates the child with failure status. The tip is
//! cleared on every attempt regardless of outcome.

use std::fmt;
use std::process;

use crate::context;
use crate::memcheck;
use crate::style::{BRED, GRAY, GREEN, RED, RESET};

fn report_pass() {
    let _ = context::take_fail_tip();
    eprintln!("{GREEN}\u{2705} {}{RESET}", context::current_test_name());
}

fn report_fail(detail: fmt::Arguments<'_>) -> ! {
    let tip = context::take_fail_tip();
    eprint!("{BRED}\u{274c} {}{RED}", context::current_test_name());
    if context::show_fail_details() {
        eprint!("{GRAY}: {RED}{detail}");
    }
    if let Some(tip) = tip {
        eprint!("{GRAY} - {RED}{tip}");
    }
    eprintln!("{RESET}");
    memcheck::check_leaks_before_exit();
    process::exit(libc::EXIT_FAILURE);
}

fn dispatch(ok: bool, detail: fmt::Arguments<'_>) {
    if ok {
        report_pass();
    } else {
        report_fail(detail);
    }
}

pub fn check_true(actual: bool) {
    dispatch(actual, format_args!("Got FALSE when expecting TRUE"));
}

pub fn check_false(actual: bool) {
    dispatch(!actual, format_args!("Got TRUE when expecting FALSE"));
}

pub fn check_eq<T: PartialEq + fmt::Debug>(actual: T, expected: T) {
    let ok = actual == expected;
    dispatch(ok, format_args!("Got {actual:?} when expecting {expected:?}"));
}

pub fn check_ne<T: PartialEq + fmt::Debug>(actual: T, expected: T) {
    let ok = actual != expected;
    dispatch(
        ok,
        format_args!("Got {actual:?} when expecting NOT {expected:?}"),
    );
}

pub fn check_approx_eq(actual: f64, expected: f64, tolerance: f64) {
    let ok = (actual - expected).abs() <= tolerance;
    dispatch(
        ok,
        format_args!("Got {actual} when expecting {expected} \u{b1} {tolerance}"),
    );
}

pub fn check_null<T>(ptr: *const T) {
    dispatch(
        ptr.is_null(),
        format_args!("Got NOT NULL when expecting NULL"),
    );
}

pub fn check_not_null<T>(ptr: *const T) {
    dispatch(
        !ptr.is_null(),
        format_args!("Got NULL when expecting NOT NULL"),
    );
}

pub fn check_str_eq(actual: &str, expected: &str) {
    let ok = actual == expected;
    dispatch(
        ok,
        format_args!("Got \"{actual}\" when expecting \"{expected}\""),
    );
}

pub fn check_str_ne(actual: &str, expected: &str) {
    let ok = actual != expected;
    dispatch(
        ok,
        format_args!("Got \"{actual}\" when expecting NOT \"{expected}\""),
    );
}

/// Like [`check_str_eq`] for functions returning owned C strings: the
/// caller-supplied pointer is released through the tracked allocator
/// before the result is reported.
///
/// # Safety
///
/// `actual` must be null or a pointer to a NUL-terminated string obtained
/// from the tracked allocation API and not yet freed.
pub unsafe fn check_str_eq_free(actual: *mut libc::c_char, expected: &str) {
    let owned = read_owned(actual);
    memcheck::tracked_free(actual.cast());
    let ok = owned.as_deref() == Some(expected);
    dispatch(
        ok,
        format_args!(
            "Got {} when expecting \"{expected}\"",
            DisplayCStr(owned.as_deref())
        ),
    );
}

/// Negated counterpart of [`check_str_eq_free`]
///
/// # Safety
///
/// Same contract as [`check_str_eq_free`].
pub unsafe fn check_str_ne_free(actual: *mut libc::c_char, expected: &str) {
    let owned = read_owned(actual);
    memcheck::tracked_free(actual.cast());
    let ok = owned.as_deref() != Some(expected);
    dispatch(
        ok,
        format_args!(
            "Got {} when expecting NOT \"{expected}\"",
            DisplayCStr(owned.as_deref())
        ),
    );
}

unsafe fn read_owned(ptr: *const libc::c_char) -> Option<String> {
    if ptr.is_null() {
        None
    } else {
        Some(std::ffi::CStr::from_ptr(ptr).to_string_lossy().into_owned())
    }
}

struct DisplayCStr<'a>(Option<&'a str>);

impl fmt::Display for DisplayCStr<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(s) => write!(f, "\"{s}\""),
            None => write!(f, "NULL"),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // Passing checks return; failing checks exit the process and are
    // covered by the fork-based integration tests.

    #[test]
    fn test_passing_checks_return() {
        check_true(true);
        check_false(false);
        check_eq(4, 4);
        check_ne("a", "b");
        check_approx_eq(0.1 + 0.2, 0.3, 1e-9);
        check_null(std::ptr::null::<u8>());
        check_str_eq("same", "same");
    }

    #[test]
    fn test_pass_clears_fail_tip() {
        context::set_fail_tip("will not be needed");
        check_true(true);
        assert_eq!(context::take_fail_tip(), None);
    }

    #[test]
    fn test_str_eq_free_accepts_null_for_ne() {
        // NULL != "x" passes and must not attempt a free
        unsafe { check_str_ne_free(std::ptr::null_mut(), "x") };
    }
}
