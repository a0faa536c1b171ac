//! Bridge log categories
//!
//! Messages are tagged with one [`LogFlags`] category and forwarded to the
//! `log` facade only while that category is enabled in the process-wide
//! mask. Each category maps to a level and a target:
//!
//! | flag      | level   | target            |
//! |-----------|---------|-------------------|
//! | `DEBUG`   | debug   | `tallow`          |
//! | `ERROR`   | error   | `tallow`          |
//! | `FATAL`   | error   | `tallow::fatal`   |
//! | `GC`      | trace   | `tallow::gc`      |
//! | `NETWORK` | info    | `tallow::network` |

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::sync::atomic::{AtomicU32, Ordering};
use tallow_core::ScriptState;

/// Set of log categories
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LogFlags(u32);

impl LogFlags {
    /// General diagnostics
    pub const DEBUG: LogFlags = LogFlags(1 << 0);
    /// Recoverable failures
    pub const ERROR: LogFlags = LogFlags(1 << 1);
    /// Failures that leave the bridge unusable
    pub const FATAL: LogFlags = LogFlags(1 << 2);
    /// Proxy finalization
    pub const GC: LogFlags = LogFlags(1 << 5);
    /// Module downloads and other network traffic
    pub const NETWORK: LogFlags = LogFlags(1 << 6);

    /// No categories
    pub const fn empty() -> Self {
        LogFlags(0)
    }

    /// Every category
    pub const fn all() -> Self {
        LogFlags(Self::DEBUG.0 | Self::ERROR.0 | Self::FATAL.0 | Self::GC.0 | Self::NETWORK.0)
    }

    /// Raw bits
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Mask from raw bits, dropping unknown ones
    pub const fn from_bits_truncate(bits: u32) -> Self {
        LogFlags(bits & Self::all().0)
    }

    /// Whether every category in `other` is set
    pub const fn contains(self, other: LogFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether no category is set
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Category by its configuration name (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "debug" => Some(Self::DEBUG),
            "error" => Some(Self::ERROR),
            "fatal" => Some(Self::FATAL),
            "gc" => Some(Self::GC),
            "network" => Some(Self::NETWORK),
            _ => None,
        }
    }

    fn level(self) -> (log::Level, &'static str) {
        if self.contains(Self::FATAL) {
            (log::Level::Error, "tallow::fatal")
        } else if self.contains(Self::ERROR) {
            (log::Level::Error, "tallow")
        } else if self.contains(Self::NETWORK) {
            (log::Level::Info, "tallow::network")
        } else if self.contains(Self::GC) {
            (log::Level::Trace, "tallow::gc")
        } else {
            (log::Level::Debug, "tallow")
        }
    }
}

impl BitOr for LogFlags {
    type Output = LogFlags;

    fn bitor(self, rhs: LogFlags) -> LogFlags {
        LogFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for LogFlags {
    fn bitor_assign(&mut self, rhs: LogFlags) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for LogFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(LogFlags, &str); 5] = [
            (LogFlags::DEBUG, "DEBUG"),
            (LogFlags::ERROR, "ERROR"),
            (LogFlags::FATAL, "FATAL"),
            (LogFlags::GC, "GC"),
            (LogFlags::NETWORK, "NETWORK"),
        ];
        let mut first = true;
        f.write_str("LogFlags(")?;
        for (flag, name) in NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str(" | ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        f.write_str(")")
    }
}

/// Categories enabled at startup
pub const DEFAULT_LOG_FLAGS: LogFlags = LogFlags(LogFlags::FATAL.0 | LogFlags::ERROR.0 | LogFlags::DEBUG.0);

static LOG_FLAGS: AtomicU32 = AtomicU32::new(DEFAULT_LOG_FLAGS.0);

/// Replace the process-wide category mask, returning the previous one
pub fn set_log_flags(flags: LogFlags) -> LogFlags {
    LogFlags(LOG_FLAGS.swap(flags.0, Ordering::Relaxed))
}

/// Current category mask
pub fn log_flags() -> LogFlags {
    LogFlags(LOG_FLAGS.load(Ordering::Relaxed))
}

/// Whether any category in `flag` is enabled
pub fn is_enabled(flag: LogFlags) -> bool {
    log_flags().0 & flag.0 != 0
}

/// Forward a message in category `flag` to the `log` facade
///
/// Prefer the [`bridge_log!`](crate::bridge_log) macro.
pub fn bridge_log(flag: LogFlags, args: fmt::Arguments<'_>) {
    if !is_enabled(flag) {
        return;
    }
    let (level, target) = flag.level();
    log::log!(target: target, level, "{}", args);
}

/// Log through a bridge category
///
/// ```ignore
/// bridge_log!(LogFlags::ERROR, "module {} failed: {}", name, err);
/// ```
#[macro_export]
macro_rules! bridge_log {
    ($flag:expr, $($arg:tt)+) => {
        $crate::logging::bridge_log($flag, format_args!($($arg)+))
    };
}

/// Log the script stack in the `DEBUG` category
pub fn dump_stack(state: &ScriptState) {
    if is_enabled(LogFlags::DEBUG) {
        bridge_log(LogFlags::DEBUG, format_args!("{}", state.dump_stack()));
    }
}
