//! Heap allocation tracking
//!
//! Two entry points share one record table keyed by pointer address:
//!
//! - The C-style `tracked_alloc` / `tracked_calloc` / `tracked_realloc` /
//!   `tracked_free` family wraps `libc` and is what code under test links
//!   against. A free of an untracked pointer is a double/invalid free and
//!   kills the test process on the spot.
//! - `TrackingAllocator` is a `GlobalAlloc` wrapper over `System` for pure
//!   Rust code under test. It records only while the isolated child is
//!   inside a test body, and a free of an untracked pointer passes through
//!   silently since runtime allocations predate the test.
//!
//! Bookkeeping allocations bypass interception through a thread-local
//! reentrancy guard. Each record carries the allocation-site backtrace,
//! resolved lazily when leaks are reported.

use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::Cell;
use std::collections::BTreeMap;
use std::os::raw::c_void;
use std::process;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::backtrace::Backtrace;
use crate::context;
use crate::style::{BRED, GRAY, RED, RESET};

struct AllocationRecord {
    size: usize,
    trace: Backtrace,
}

static ENABLED: AtomicBool = AtomicBool::new(true);
static FALLBACK_REGISTERED: AtomicBool = AtomicBool::new(false);
static RECORDS: Mutex<BTreeMap<usize, AllocationRecord>> = Mutex::new(BTreeMap::new());

thread_local! {
    static IN_TRACKER: Cell<bool> = const { Cell::new(false) };
}

pub fn set_enabled(enabled: bool) {
    ENABLED.store(enabled, Ordering::SeqCst);
}

pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::SeqCst)
}

fn guarded() -> bool {
    IN_TRACKER.with(Cell::get)
}

fn with_guard<R>(f: impl FnOnce() -> R) -> R {
    IN_TRACKER.with(|g| {
        let prev = g.replace(true);
        let out = f();
        g.set(prev);
        out
    })
}

/// Insert a record for `addr`. The guard is held while capturing the
/// allocation-site trace and touching the table, so the bookkeeping
/// itself is never tracked.
fn record(addr: usize, size: usize, skip: usize) {
    with_guard(|| {
        let trace = Backtrace::capture(skip + 1);
        let mut records = RECORDS.lock().unwrap_or_else(|e| e.into_inner());
        records.insert(addr, AllocationRecord { size, trace });
    });
}

/// Remove the record for `addr`; false when no record exists
fn forget(addr: usize) -> bool {
    with_guard(|| {
        let mut records = RECORDS.lock().unwrap_or_else(|e| e.into_inner());
        records.remove(&addr).is_some()
    })
}

fn is_tracked(addr: usize) -> bool {
    with_guard(|| {
        let records = RECORDS.lock().unwrap_or_else(|e| e.into_inner());
        records.contains_key(&addr)
    })
}

/// Number of live tracked allocations
pub fn live_count() -> usize {
    with_guard(|| RECORDS.lock().unwrap_or_else(|e| e.into_inner()).len())
}

fn invalid_free_abort() -> ! {
    let name = context::current_test_name();
    eprintln!("{BRED}\u{1f4a5} {name} {GRAY}-{RED} Double free or invalid free{RESET}");
    Backtrace::capture(2).print();
    unsafe { libc::_exit(libc::EXIT_FAILURE) }
}

// =============================================================================
// C-style tracked allocation API
// =============================================================================

/// Allocate `size` bytes through `libc::malloc`, recording pointer, size
/// and the call-site backtrace on success.
pub fn tracked_alloc(size: usize) -> *mut c_void {
    let ptr = unsafe { libc::malloc(size) };
    if !ptr.is_null() && is_enabled() {
        record(ptr as usize, size, 1);
    }
    ptr
}

/// `calloc` counterpart of [`tracked_alloc`]
pub fn tracked_calloc(nmemb: usize, size: usize) -> *mut c_void {
    let ptr = unsafe { libc::calloc(nmemb, size) };
    if !ptr.is_null() && is_enabled() {
        record(ptr as usize, nmemb * size, 1);
    }
    ptr
}

/// Free a tracked pointer. No-op on null. Freeing a pointer with no live
/// record is a double/invalid free: the test name and the backtrace of
/// the offending call are reported and the process terminates before any
/// further user code runs.
///
/// # Safety
///
/// `ptr` must be null or a pointer obtained from this module's allocation
/// functions and not yet freed.
pub unsafe fn tracked_free(ptr: *mut c_void) {
    if ptr.is_null() {
        return;
    }
    if is_enabled() && !forget(ptr as usize) {
        invalid_free_abort();
    }
    libc::free(ptr);
}

/// Reallocate a tracked pointer. A failed reallocation returns null and
/// leaves the original record intact.
///
/// # Safety
///
/// Same contract as [`tracked_free`] for the incoming pointer.
pub unsafe fn tracked_realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
    if ptr.is_null() {
        let fresh = libc::realloc(ptr::null_mut(), size);
        if !fresh.is_null() && size > 0 && is_enabled() {
            record(fresh as usize, size, 1);
        }
        return fresh;
    }
    if is_enabled() && !is_tracked(ptr as usize) {
        invalid_free_abort();
    }
    if size == 0 {
        if is_enabled() {
            forget(ptr as usize);
        }
        return libc::realloc(ptr, 0);
    }
    let moved = libc::realloc(ptr, size);
    if moved.is_null() {
        return moved;
    }
    if is_enabled() {
        forget(ptr as usize);
        record(moved as usize, size, 1);
    }
    moved
}

// =============================================================================
// Leak queries
// =============================================================================

/// True iff the live allocation set is non-empty
pub fn has_leaks() -> bool {
    live_count() != 0
}

/// List size and resolved allocation-site backtrace per live record plus
/// totals. Safe to call on an empty set.
pub fn print_leaks() {
    let snapshot: Vec<(usize, Backtrace)> = with_guard(|| {
        let records = RECORDS.lock().unwrap_or_else(|e| e.into_inner());
        records.values().map(|r| (r.size, r.trace)).collect()
    });
    if snapshot.is_empty() {
        return;
    }
    let name = context::current_test_name();
    eprintln!("{BRED}\u{1f4a7} {name} {GRAY}-{RED} Memory leaks detected{GRAY}:{RESET}");
    let mut total = 0usize;
    for (size, trace) in &snapshot {
        eprintln!("{GRAY}  - {BRED}{size} bytes{RED}, allocated at:{RESET}");
        trace.print();
        total += size;
    }
    eprintln!(
        "{BRED}  Total: {total} bytes in {} allocation(s){RESET}",
        snapshot.len()
    );
}

/// Drop every live record without reporting
pub fn reset() {
    with_guard(|| RECORDS.lock().unwrap_or_else(|e| e.into_inner()).clear());
}

/// Explicit enforcement point at test end: report leaks, drain the table
/// so the exit fallback cannot double-report, and fail the test.
pub fn check_leaks_before_exit() {
    if !is_enabled() {
        return;
    }
    if has_leaks() {
        print_leaks();
        reset();
        process::exit(libc::EXIT_FAILURE);
    }
}

/// Terminal fallback for exit paths that skipped the explicit check.
/// Idempotent; the child inherits the registration across fork.
pub fn install_exit_fallback() {
    if FALLBACK_REGISTERED.swap(true, Ordering::SeqCst) {
        return;
    }
    unsafe {
        libc::atexit(exit_fallback);
    }
}

extern "C" fn exit_fallback() {
    if is_enabled() && has_leaks() {
        print_leaks();
        reset();
    }
}

// =============================================================================
// Global allocator wrapper
// =============================================================================

/// Pluggable global allocator override for Rust code under test:
///
/// ```ignore
/// #[global_allocator]
/// static ALLOC: cst::memcheck::TrackingAllocator = cst::memcheck::TrackingAllocator;
/// ```
pub struct TrackingAllocator;

fn tracking_active() -> bool {
    is_enabled() && context::is_on_test() && !guarded()
}

unsafe impl GlobalAlloc for TrackingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = System.alloc(layout);
        if !ptr.is_null() && tracking_active() {
            record(ptr as usize, layout.size(), 2);
        }
        ptr
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = System.alloc_zeroed(layout);
        if !ptr.is_null() && tracking_active() {
            record(ptr as usize, layout.size(), 2);
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if !ptr.is_null() && is_enabled() && !guarded() {
            // Untracked pointers pass through: runtime allocations made
            // before the test are legitimate frees here.
            let _ = forget(ptr as usize);
        }
        System.dealloc(ptr, layout);
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let moved = System.realloc(ptr, layout, new_size);
        if !moved.is_null() && is_enabled() && !guarded() {
            let was_tracked = forget(ptr as usize);
            if was_tracked || tracking_active() {
                record(moved as usize, new_size, 2);
            }
        }
        moved
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // The record table is process-wide; serialize tests that touch it.
    static LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_alloc_free_round_trip() {
        let _g = LOCK.lock().unwrap_or_else(|e| e.into_inner());
        for size in [0usize, 1, 4096] {
            let before = live_count();
            let ptr = tracked_alloc(size);
            unsafe { tracked_free(ptr) };
            assert_eq!(live_count(), before, "size {size}");
        }
    }

    #[test]
    fn test_calloc_round_trip() {
        let _g = LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let before = live_count();
        let ptr = tracked_calloc(16, 8);
        assert!(!ptr.is_null());
        unsafe { tracked_free(ptr) };
        assert_eq!(live_count(), before);
    }

    #[test]
    fn test_leak_is_visible_and_reported() {
        let _g = LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let before = live_count();
        let ptr = tracked_alloc(32);
        assert!(!ptr.is_null());
        assert!(has_leaks());
        assert_eq!(live_count(), before + 1);
        print_leaks();
        reset();
        assert_eq!(live_count(), 0);
        unsafe { libc::free(ptr) };
    }

    #[test]
    fn test_realloc_moves_record() {
        let _g = LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let ptr = tracked_alloc(8);
        let moved = unsafe { tracked_realloc(ptr, 64) };
        assert!(!moved.is_null());
        assert!(is_tracked(moved as usize));
        if moved as usize != ptr as usize {
            assert!(!is_tracked(ptr as usize));
        }
        unsafe { tracked_free(moved) };
    }

    #[test]
    fn test_failed_realloc_preserves_record() {
        let _g = LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let ptr = tracked_alloc(8);
        // Larger than PTRDIFF_MAX: glibc refuses without touching the block
        let moved = unsafe { tracked_realloc(ptr, usize::MAX - 4096) };
        assert!(moved.is_null());
        assert!(is_tracked(ptr as usize));
        unsafe { tracked_free(ptr) };
    }

    #[test]
    fn test_realloc_to_zero_untracks() {
        let _g = LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let before = live_count();
        let ptr = tracked_alloc(8);
        let freed = unsafe { tracked_realloc(ptr, 0) };
        if !freed.is_null() {
            unsafe { libc::free(freed) };
        }
        assert_eq!(live_count(), before);
    }

    #[test]
    fn test_disabled_memcheck_tracks_nothing() {
        let _g = LOCK.lock().unwrap_or_else(|e| e.into_inner());
        set_enabled(false);
        let before = live_count();
        let ptr = tracked_alloc(128);
        assert_eq!(live_count(), before);
        unsafe { tracked_free(ptr) };
        set_enabled(true);
    }
}
