//! ANSI color palette for runner output

pub const RED: &str = "\x1b[0;31m";
pub const BRED: &str = "\x1b[1;31m";
pub const GREEN: &str = "\x1b[0;32m";
pub const BGREEN: &str = "\x1b[1;32m";
pub const YELLOW: &str = "\x1b[0;33m";
pub const BYELLOW: &str = "\x1b[1;33m";
pub const BLUE: &str = "\x1b[0;36m";
pub const BBLUE: &str = "\x1b[1;36m";
pub const GRAY: &str = "\x1b[0;30m";
pub const RESET: &str = "\x1b[0m";
