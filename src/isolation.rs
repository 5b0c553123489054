//! Process-per-test isolation and timeout enforcement
//!
//! Each test body runs in a freshly forked child so crashes, heap
//! corruption and hangs cannot reach the scheduler or other tests. The
//! child marks itself on-test, runs the body, performs the final leak
//! check and reports its outcome through the exit status. The parent
//! either blocks on the child or, when a timeout applies, polls at a
//! short fixed interval and force-kills on deadline expiry.

use anyhow::{Context, Result};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, ForkResult};
use std::io::Write;
use std::process;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::RunConfig;
use crate::context;
use crate::memcheck;
use crate::registry::TestCase;
use crate::style::{BRED, GRAY, RED, RESET};

/// Outcome of one isolated run, as observed by the parent
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TestOutcome {
    Passed,
    Failed,
    TimedOut(i64),
}

impl TestOutcome {
    pub fn passed(self) -> bool {
        self == TestOutcome::Passed
    }
}

const POLL_INTERVAL: Duration = Duration::from_micros(50);

/// Fork and run one test. Fork or wait failures are fatal to the whole
/// run; everything the child does wrong is just a failed test.
pub fn run_isolated(test: &TestCase, config: &RunConfig) -> Result<TestOutcome> {
    // Buffered output would be duplicated into the child
    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();

    match unsafe { fork() }.context("fork failed")? {
        ForkResult::Child => {
            context::begin_test(&test.name);
            memcheck::reset();
            (test.body)();
            memcheck::check_leaks_before_exit();
            process::exit(0);
        }
        ForkResult::Parent { child } => {
            let timeout_ms = test.timeout_ms.unwrap_or(config.default_timeout_ms);
            if timeout_ms <= 0 {
                let status = waitpid(child, None).context("waitpid failed")?;
                return Ok(outcome_of(status));
            }

            let deadline = Instant::now() + Duration::from_millis(timeout_ms as u64);
            loop {
                match waitpid(child, Some(WaitPidFlag::WNOHANG)).context("waitpid failed")? {
                    WaitStatus::StillAlive => {}
                    status => return Ok(outcome_of(status)),
                }
                if Instant::now() >= deadline {
                    let _ = kill(child, Signal::SIGKILL);
                    waitpid(child, None).context("waitpid failed")?;
                    println!(
                        "{BRED}\u{274c} {} {GRAY}-{RED} Timed out ({timeout_ms} ms){RESET}",
                        test.name
                    );
                    return Ok(TestOutcome::TimedOut(timeout_ms));
                }
                thread::sleep(POLL_INTERVAL);
            }
        }
    }
}

fn outcome_of(status: WaitStatus) -> TestOutcome {
    match status {
        WaitStatus::Exited(_, 0) => TestOutcome::Passed,
        _ => TestOutcome::Failed,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::Pid;

    #[test]
    fn test_outcome_mapping() {
        let pid = Pid::from_raw(1);
        assert_eq!(outcome_of(WaitStatus::Exited(pid, 0)), TestOutcome::Passed);
        assert_eq!(outcome_of(WaitStatus::Exited(pid, 1)), TestOutcome::Failed);
        assert_eq!(
            outcome_of(WaitStatus::Signaled(pid, Signal::SIGSEGV, false)),
            TestOutcome::Failed
        );
    }

    #[test]
    fn test_passed_helper() {
        assert!(TestOutcome::Passed.passed());
        assert!(!TestOutcome::Failed.passed());
        assert!(!TestOutcome::TimedOut(50).passed());
    }
}
