//! CST Core Library
//!
//! Unit-test runner for native code: tests and lifecycle hooks are
//! registered explicitly from the entry point, then every test runs in
//! its own forked process with timeout enforcement, heap allocation
//! tracking and crash-signal reporting.
//!
//! ```ignore
//! fn main() {
//!     let mut registry = cst::Registry::new();
//!     registry.test("Math", "addition", || cst::check_eq(2 + 2, 4));
//!     std::process::exit(cst::run(registry));
//! }
//! ```

pub mod assertions;
pub mod backtrace;
pub mod config;
pub mod context;
pub mod isolation;
pub mod memcheck;
pub mod registry;
pub mod scheduler;
pub mod signals;
pub mod style;

pub use assertions::{
    check_approx_eq, check_eq, check_false, check_ne, check_not_null, check_null, check_str_eq,
    check_str_ne, check_true,
};
pub use config::RunConfig;
pub use registry::{HookKind, Registry};
pub use scheduler::RunStats;

use config::{EXIT_CONFIG_ERROR, EXIT_INTERNAL_ERROR, MAX_FAILURE_EXIT};
use style::{BRED, GRAY, RED, RESET};

/// Parse the process arguments and run every registered test. Returns
/// the process exit code: 0 when everything passed, the failed-test
/// count otherwise, or a reserved code for configuration and internal
/// errors.
pub fn run(registry: Registry) -> i32 {
    match RunConfig::parse() {
        Ok(config) => run_with_config(registry, config),
        Err(err) => {
            print_fatal(&format!("{err}"));
            EXIT_CONFIG_ERROR
        }
    }
}

/// Run with an explicit configuration (bypasses CLI parsing)
pub fn run_with_config(mut registry: Registry, config: RunConfig) -> i32 {
    if registry.is_empty() {
        print_fatal("No tests to run");
        return EXIT_CONFIG_ERROR;
    }

    context::set_show_fail_details(config.show_fail_details);
    memcheck::set_enabled(config.memcheck);
    signals::set_crash_backtrace(config.crash_backtrace);
    if config.memcheck {
        memcheck::install_exit_fallback();
    }
    if config.sighandler {
        if let Err(err) = signals::install() {
            print_fatal(&format!("{err:#}"));
            return EXIT_INTERNAL_ERROR;
        }
    }

    match scheduler::run(&mut registry, &config) {
        Ok(stats) => stats.failed.min(MAX_FAILURE_EXIT) as i32,
        Err(err) => {
            print_fatal(&format!("{err:#}"));
            EXIT_INTERNAL_ERROR
        }
    }
}

fn print_fatal(message: &str) {
    println!("{RED}CST Error{GRAY}: {BRED}{message}{RESET}");
}
