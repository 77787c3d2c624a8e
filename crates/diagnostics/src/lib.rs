//! Logging setup shared by the archivist crates
//!
//! Every crate logs through the macros exported here so that a single
//! environment variable controls what reaches the terminal.
//!
//! Usage:
//! - `ARCHIVIST_LOG=info` (default) - stage progress and run outcome
//! - `ARCHIVIST_LOG=debug` - state transitions, process arguments, byte counts
//! - `ARCHIVIST_LOG=warn` / `error` - problems only
//! - `ARCHIVIST_LOG=off` - nothing

use std::sync::Once;

// Re-export emit so macros can use it
pub use emit;

/// Environment variable consulted by [`init_diagnostics`].
pub const LOG_ENV: &str = "ARCHIVIST_LOG";

static INIT: Once = Once::new();

/// Outcome of interpreting a log level setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelSetting {
    Off,
    Min(emit::Level),
    /// Unrecognised value, logged at the default level.
    Unknown,
}

/// Interpret a level name. An unset variable means `info`.
#[must_use]
pub fn parse_level(value: Option<&str>) -> LevelSetting {
    match value.map(str::trim) {
        None | Some("") | Some("info") => LevelSetting::Min(emit::Level::Info),
        Some("off") => LevelSetting::Off,
        Some("debug") => LevelSetting::Min(emit::Level::Debug),
        Some("warn") => LevelSetting::Min(emit::Level::Warn),
        Some("error") => LevelSetting::Min(emit::Level::Error),
        Some(_) => LevelSetting::Unknown,
    }
}

/// Initialize diagnostics based on the `ARCHIVIST_LOG` environment variable
///
/// This should be called once at application startup. It's safe to call
/// multiple times - subsequent calls will be ignored.
pub fn init_diagnostics() {
    INIT.call_once(|| {
        let raw = std::env::var(LOG_ENV).ok();

        let min = match parse_level(raw.as_deref()) {
            LevelSetting::Off => return,
            LevelSetting::Min(level) => level,
            LevelSetting::Unknown => {
                // Bootstrap warning, emitted before the logger exists
                #[allow(clippy::print_stderr)]
                {
                    eprintln!(
                        "Warning: Unknown {} value '{}', using 'info'",
                        LOG_ENV,
                        raw.unwrap_or_default()
                    );
                }
                emit::Level::Info
            }
        };

        let rt = emit::setup()
            .emit_to(emit_term::stderr())
            .emit_when(emit::level::min_filter(min))
            .init();

        // The runtime must outlive every log call, which means the whole process.
        std::mem::forget(rt);
    });
}

/// Log basic operations (stage start, upload finished, restore applied)
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::emit::info!($($arg)*)
    };
}

/// Log detailed diagnostics (state transitions, process arguments, byte counts)
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::emit::debug!($($arg)*)
    };
}

/// Log warning conditions (discarded cleanup errors, retained staging files)
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::emit::warn!($($arg)*)
    };
}

/// Log error conditions (a failed run and its error chain)
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::emit::error!($($arg)*)
    };
}

/// Short form of [`log_info!`]
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        $crate::emit::info!($($arg)*)
    };
}

/// Short form of [`log_debug!`]
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        $crate::emit::debug!($($arg)*)
    };
}

/// Short form of [`log_warn!`]
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        $crate::emit::warn!($($arg)*)
    };
}

/// Short form of [`log_error!`]
/// Using "error" instead of "fatal" for consistency with emit-rs
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {
        $crate::emit::error!($($arg)*)
    };
}

/// Re-export the init function for convenience
pub use init_diagnostics as init;
