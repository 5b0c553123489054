//! Crash signal handling
//!
//! Armed once per process (install is idempotent) and inherited by every
//! isolated child across fork. Termination-class signals outside a test
//! print a harness termination notice and are suppressed inside one;
//! fault-class signals always print a crash notice with the current test
//! name plus a symbolized backtrace. Either way the process terminates
//! immediately with failure status, which the parent observes as a
//! failed test.

use anyhow::{Context, Result};
use nix::sys::signal::{signal, SigHandler, Signal};
use std::os::raw::c_int;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::backtrace::Backtrace;
use crate::context;
use crate::style::{BRED, GRAY, RED, RESET};

static ARMED: AtomicBool = AtomicBool::new(false);
static CRASH_BACKTRACE: AtomicBool = AtomicBool::new(true);

const FAULT_SIGNALS: [Signal; 5] = [
    Signal::SIGABRT,
    Signal::SIGFPE,
    Signal::SIGILL,
    Signal::SIGSEGV,
    Signal::SIGBUS,
];

const TERMINATION_SIGNALS: [Signal; 4] = [
    Signal::SIGINT,
    Signal::SIGTERM,
    Signal::SIGQUIT,
    Signal::SIGHUP,
];

/// Toggle the symbolized backtrace printed on fault signals
pub fn set_crash_backtrace(enabled: bool) {
    CRASH_BACKTRACE.store(enabled, Ordering::SeqCst);
}

/// Install the handler for all fault and termination signals. Idempotent.
pub fn install() -> Result<()> {
    if ARMED.swap(true, Ordering::SeqCst) {
        return Ok(());
    }
    for sig in FAULT_SIGNALS.iter().chain(&TERMINATION_SIGNALS) {
        unsafe { signal(*sig, SigHandler::Handler(on_signal)) }
            .with_context(|| format!("failed to install handler for {sig}"))?;
    }
    Ok(())
}

fn is_fault(signum: c_int) -> bool {
    matches!(
        signum,
        libc::SIGABRT | libc::SIGFPE | libc::SIGILL | libc::SIGSEGV | libc::SIGBUS
    )
}

/// Human-readable signal name, matching the classic runner output
pub fn signal_name(signum: c_int) -> &'static str {
    match signum {
        libc::SIGABRT => "SIGABRT",
        libc::SIGFPE => "SIGFPE",
        libc::SIGILL => "SIGILL",
        libc::SIGINT => "SIGINT",
        libc::SIGSEGV => "SIGSEGV / Segmentation fault",
        libc::SIGTERM => "SIGTERM",
        libc::SIGBUS => "SIGBUS",
        libc::SIGQUIT => "SIGQUIT",
        libc::SIGHUP => "SIGHUP",
        _ => "???",
    }
}

extern "C" fn on_signal(signum: c_int) {
    if !is_fault(signum) {
        if !context::is_on_test() {
            eprintln!(
                "{BRED}\u{274c} CST terminated by signal {signum} ({}){RESET}",
                signal_name(signum)
            );
        }
    } else {
        let name = context::current_test_name();
        eprintln!(
            "{BRED}\u{1f4a5} {name} {GRAY}-{RED} Crashed with signal {signum} ({}){RESET}",
            signal_name(signum)
        );
        if CRASH_BACKTRACE.load(Ordering::SeqCst) {
            // Skip the handler and the kernel trampoline frames
            Backtrace::capture(2).print();
        }
    }
    unsafe { libc::_exit(libc::EXIT_FAILURE) }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_names() {
        assert_eq!(signal_name(libc::SIGABRT), "SIGABRT");
        assert_eq!(signal_name(libc::SIGSEGV), "SIGSEGV / Segmentation fault");
        assert_eq!(signal_name(9999), "???");
    }

    #[test]
    fn test_fault_classification() {
        for sig in [libc::SIGABRT, libc::SIGFPE, libc::SIGILL, libc::SIGSEGV, libc::SIGBUS] {
            assert!(is_fault(sig));
        }
        for sig in [libc::SIGINT, libc::SIGTERM, libc::SIGQUIT, libc::SIGHUP] {
            assert!(!is_fault(sig));
        }
    }
}
