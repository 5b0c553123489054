//! Run configuration
//! - CLI argument parsing with clap
//! - Process exit code layout

use anyhow::{anyhow, Result};
use clap::error::{ContextKind, ContextValue, ErrorKind};
use clap::Parser;
use std::ffi::OsString;

use crate::style::{BYELLOW, GRAY, RESET, YELLOW};

/// All tests passed
pub const EXIT_OK: i32 = 0;
/// Configuration error: no tests registered, invalid flag value
pub const EXIT_CONFIG_ERROR: i32 = 101;
/// Internal fatal error: fork or wait primitive failed
pub const EXIT_INTERNAL_ERROR: i32 = 102;
/// Reserved for internal allocation failure
pub const EXIT_ALLOC_ERROR: i32 = 103;

/// Failure counts above this are clamped so the exit code stays clear of
/// the reserved range.
pub const MAX_FAILURE_EXIT: usize = 100;

/// CST - unit test runner for native code
#[derive(Parser)]
#[command(name = "cst", version, about = "Process-isolating unit test runner")]
struct Cli {
    /// Disable heap allocation tracking (leak / double-free detection)
    #[arg(long = "no-memcheck", alias = "nomem")]
    no_memcheck: bool,

    /// Disable the crash signal handler
    #[arg(long = "no-sighandler", alias = "nosig")]
    no_sighandler: bool,

    /// Disable the symbolized backtrace on crash
    #[arg(long = "no-backtrace")]
    no_backtrace: bool,

    /// Global default test timeout in ms (0 = unbounded)
    #[arg(long, value_name = "MS", allow_negative_numbers = true)]
    timeout: Option<i64>,
}

/// Parsed once at start; read-only afterwards
#[derive(Clone, Debug)]
pub struct RunConfig {
    pub memcheck: bool,
    pub sighandler: bool,
    pub crash_backtrace: bool,
    /// <= 0 means unbounded
    pub default_timeout_ms: i64,
    pub show_fail_details: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            memcheck: true,
            sighandler: true,
            crash_backtrace: true,
            default_timeout_ms: 0,
            show_fail_details: true,
        }
    }
}

impl RunConfig {
    /// Parse from the process arguments
    pub fn parse() -> Result<Self> {
        Self::from_args(std::env::args_os())
    }

    /// Parse from an explicit argument list. Unknown arguments are warned
    /// about and dropped; a malformed --timeout value is fatal.
    pub fn from_args<I, T>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString>,
    {
        let mut argv: Vec<OsString> = args.into_iter().map(Into::into).collect();
        loop {
            match Cli::try_parse_from(&argv) {
                Ok(cli) => return Ok(Self::from_cli(cli)),
                Err(err) if err.kind() == ErrorKind::UnknownArgument => {
                    let unknown = match err.get(ContextKind::InvalidArg) {
                        Some(ContextValue::String(s)) => s.clone(),
                        _ => return Err(anyhow!("unrecognized argument")),
                    };
                    println!(
                        "{GRAY}[{BYELLOW}CST{GRAY}] {YELLOW}Ignored unknown argument{GRAY}: {BYELLOW}{unknown}{RESET}"
                    );
                    let before = argv.len();
                    argv.retain(|a| {
                        let s = a.to_string_lossy();
                        s != unknown.as_str() && !s.starts_with(&format!("{unknown}="))
                    });
                    if argv.len() == before {
                        return Err(anyhow!("unrecognized argument: {unknown}"));
                    }
                }
                Err(err)
                    if err.kind() == ErrorKind::DisplayHelp
                        || err.kind() == ErrorKind::DisplayVersion =>
                {
                    err.exit()
                }
                Err(err)
                    if err.kind() == ErrorKind::ValueValidation
                        || err.kind() == ErrorKind::InvalidValue =>
                {
                    return Err(anyhow!(
                        "Invalid --timeout value. Zero or a positive number is required"
                    ))
                }
                Err(err) => return Err(anyhow!(err.to_string())),
            }
        }
    }

    fn from_cli(cli: Cli) -> Self {
        Self {
            memcheck: !cli.no_memcheck,
            sighandler: !cli.no_sighandler,
            crash_backtrace: !cli.no_backtrace,
            default_timeout_ms: cli.timeout.unwrap_or(0).max(0),
            show_fail_details: true,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = RunConfig::from_args(["cst"]).unwrap();
        assert!(cfg.memcheck);
        assert!(cfg.sighandler);
        assert!(cfg.crash_backtrace);
        assert_eq!(cfg.default_timeout_ms, 0);
    }

    #[test]
    fn test_disable_flags() {
        let cfg = RunConfig::from_args(["cst", "--no-memcheck", "--no-sighandler"]).unwrap();
        assert!(!cfg.memcheck);
        assert!(!cfg.sighandler);
        assert!(cfg.crash_backtrace);
    }

    #[test]
    fn test_short_aliases() {
        let cfg = RunConfig::from_args(["cst", "--nomem", "--nosig"]).unwrap();
        assert!(!cfg.memcheck);
        assert!(!cfg.sighandler);
    }

    #[test]
    fn test_timeout_value() {
        let cfg = RunConfig::from_args(["cst", "--timeout", "250"]).unwrap();
        assert_eq!(cfg.default_timeout_ms, 250);
    }

    #[test]
    fn test_negative_timeout_clamped() {
        let cfg = RunConfig::from_args(["cst", "--timeout", "-5"]).unwrap();
        assert_eq!(cfg.default_timeout_ms, 0);
    }

    #[test]
    fn test_non_numeric_timeout_is_fatal() {
        assert!(RunConfig::from_args(["cst", "--timeout", "soon"]).is_err());
    }

    #[test]
    fn test_unknown_argument_warned_not_fatal() {
        let cfg = RunConfig::from_args(["cst", "--frobnicate", "--no-memcheck"]).unwrap();
        assert!(!cfg.memcheck);
    }
}
