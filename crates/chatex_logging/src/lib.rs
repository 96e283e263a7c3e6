#![deny(missing_docs)]
//! Shared logging utilities for the chatex workspace.
//!
//! The `chatex_*` macros forward to the `log` facade. While an export runs,
//! every line is prefixed with `[export N]` so interleaved runs can be told
//! apart in `chatex.log`.

use std::cell::Cell;

thread_local! {
    /// Thread-local storage for the current export run number.
    static EXPORT_RUN: Cell<u64> = const { Cell::new(0) };
}

/// Records the export run number for the current thread; 0 clears it.
pub fn set_export_run(run: u64) {
    EXPORT_RUN.with(|v| v.set(run));
}

/// The export run active on this thread, or 0.
pub fn export_run() -> u64 {
    EXPORT_RUN.with(|v| v.get())
}

/// Emits one record at `$level`, tagged with the current export run when
/// one is active. Invoked by the level macros below.
#[doc(hidden)]
#[macro_export]
macro_rules! __chatex_log {
    ($level:expr, $($arg:tt)*) => {{
        match $crate::export_run() {
            0 => log::log!($level, $($arg)*),
            run => log::log!($level, "[export {}] {}", run, format_args!($($arg)*)),
        }
    }};
}

/// Logs a trace-level message using the global logging facade.
#[macro_export]
macro_rules! chatex_trace {
    ($($arg:tt)*) => {{
        $crate::__chatex_log!(log::Level::Trace, $($arg)*);
    }};
}

/// Logs a debug-level message using the global logging facade.
#[macro_export]
macro_rules! chatex_debug {
    ($($arg:tt)*) => {{
        $crate::__chatex_log!(log::Level::Debug, $($arg)*);
    }};
}

/// Logs an info-level message using the global logging facade.
#[macro_export]
macro_rules! chatex_info {
    ($($arg:tt)*) => {{
        $crate::__chatex_log!(log::Level::Info, $($arg)*);
    }};
}

/// Logs a warn-level message using the global logging facade.
#[macro_export]
macro_rules! chatex_warn {
    ($($arg:tt)*) => {{
        $crate::__chatex_log!(log::Level::Warn, $($arg)*);
    }};
}

/// Logs an error-level message using the global logging facade.
#[macro_export]
macro_rules! chatex_error {
    ($($arg:tt)*) => {{
        $crate::__chatex_log!(log::Level::Error, $($arg)*);
    }};
}

/// Initializes a simple terminal logger for use in unit tests.
///
/// This safely no-ops if another logger has already been initialized.
pub fn initialize_for_tests() {
    use simplelog::{ColorChoice, CombinedLogger, Config, TermLogger, TerminalMode};

    let level = if cfg!(debug_assertions) {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    // Ignore the error if a logger was already set by another test.
    let _ = CombinedLogger::init(vec![TermLogger::new(
        level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_run_is_thread_local() {
        set_export_run(3);
        assert_eq!(export_run(), 3);
        let other = std::thread::spawn(export_run).join().unwrap();
        assert_eq!(other, 0);
        set_export_run(0);
        assert_eq!(export_run(), 0);
    }

    #[test]
    fn macros_accept_inline_and_positional_arguments() {
        initialize_for_tests();
        let name = "chat.pdf";
        chatex_info!("wrote {name}");
        set_export_run(7);
        chatex_warn!("{} image(s) failed for {}", 2, name);
        set_export_run(0);
    }
}
