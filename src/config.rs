//! Compile-time configuration.

use log::LevelFilter;

/// Number of entries in the global descriptor table:
/// null, kernel code, kernel data, user code, user data, TSS.
pub const GDT_LENGTH: usize = 6;

/// Slot of the task-state segment descriptor.
pub const TSS_INDEX: usize = 5;

/// Capacity of the process table.
pub const MAX_PROCESS: usize = 1024;

/// Pids are handed out from `[0, MAX_PID)`.
pub const MAX_PID: u32 = (MAX_PROCESS * 2) as u32;

/// Longest process name kept, in bytes.
pub const PROCESS_NAME_LEN: usize = 15;

#[cfg(feature = "no_logs")]
pub const DEFAULT_LOG_LEVEL: LevelFilter = LevelFilter::Off;
#[cfg(all(feature = "log_error", not(feature = "no_logs")))]
pub const DEFAULT_LOG_LEVEL: LevelFilter = LevelFilter::Error;
#[cfg(all(
    feature = "log_info",
    not(any(feature = "no_logs", feature = "log_error"))
))]
pub const DEFAULT_LOG_LEVEL: LevelFilter = LevelFilter::Info;
#[cfg(not(any(feature = "no_logs", feature = "log_error", feature = "log_info")))]
pub const DEFAULT_LOG_LEVEL: LevelFilter = LevelFilter::Trace;
