//! Per-process test context
//!
//! Replaces the classic pile of mutable globals (current test name,
//! one-shot fail tip, detail toggle, on-test flag) with a single module
//! owning them. The model is single-threaded: the isolation child writes
//! the name once before the body runs, assertions and the crash handler
//! only read afterwards.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

static ON_TEST: AtomicBool = AtomicBool::new(false);
static SHOW_FAIL_DETAILS: AtomicBool = AtomicBool::new(true);
static TEST_NAME: Mutex<String> = Mutex::new(String::new());
static FAIL_TIP: Mutex<Option<String>> = Mutex::new(None);

/// Mark the current process as running `name`. Called by the isolation
/// child right after the fork, before the body is invoked.
pub fn begin_test(name: &str) {
    let mut current = TEST_NAME.lock().unwrap_or_else(|e| e.into_inner());
    name.clone_into(&mut current);
    ON_TEST.store(true, Ordering::SeqCst);
}

/// Name of the test currently running, or "" outside a test
pub fn current_test_name() -> String {
    TEST_NAME.lock().unwrap_or_else(|e| e.into_inner()).clone()
}

#[inline]
pub fn is_on_test() -> bool {
    ON_TEST.load(Ordering::SeqCst)
}

pub fn set_show_fail_details(show: bool) {
    SHOW_FAIL_DETAILS.store(show, Ordering::SeqCst);
}

pub fn show_fail_details() -> bool {
    SHOW_FAIL_DETAILS.load(Ordering::SeqCst)
}

/// Set the tip appended to the next assertion failure. One-shot: cleared
/// by the next assertion whether it passes or fails.
pub fn set_fail_tip(tip: impl Into<String>) {
    let mut slot = FAIL_TIP.lock().unwrap_or_else(|e| e.into_inner());
    *slot = Some(tip.into());
}

/// Take and clear the pending fail tip
pub fn take_fail_tip() -> Option<String> {
    FAIL_TIP.lock().unwrap_or_else(|e| e.into_inner()).take()
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // Context state is process-wide; serialize the tests that touch it.
    static LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_begin_test_sets_name_and_flag() {
        let _g = LOCK.lock().unwrap_or_else(|e| e.into_inner());
        begin_test("sample");
        assert!(is_on_test());
        assert_eq!(current_test_name(), "sample");
    }

    #[test]
    fn test_fail_tip_is_one_shot() {
        let _g = LOCK.lock().unwrap_or_else(|e| e.into_inner());
        set_fail_tip("check the fixture");
        assert_eq!(take_fail_tip().as_deref(), Some("check the fixture"));
        assert_eq!(take_fail_tip(), None);
    }

    #[test]
    fn test_detail_toggle_round_trip() {
        let _g = LOCK.lock().unwrap_or_else(|e| e.into_inner());
        set_show_fail_details(false);
        assert!(!show_fail_details());
        set_show_fail_details(true);
        assert!(show_fail_details());
    }
}
