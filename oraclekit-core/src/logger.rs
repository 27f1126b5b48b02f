//! Forwards the crate's `log` records to a logger supplied by the host.

use std::sync::{Arc, OnceLock};

/// Receives log messages from the library on the host side.
///
/// It is exported via `UniFFI` for use in foreign languages.
///
/// # Examples
///
/// ```rust
/// use oraclekit_core::logger::{LogLevel, Logger};
///
/// struct StdoutLogger;
///
/// impl Logger for StdoutLogger {
///     fn log(&self, level: LogLevel, message: String) {
///         println!("[{level:?}] {message}");
///     }
/// }
/// ```
///
/// ## Kotlin
///
/// ```kotlin
/// object OracleKitLogcat : Logger {
///     override fun log(level: LogLevel, message: String) {
///         Log.println(level.toPriority(), "OracleKit", message)
///     }
/// }
///
/// // Application.onCreate, once
/// setLogger(OracleKitLogcat)
/// ```
#[uniffi::export(with_foreign)]
pub trait Logger: Sync + Send {
    /// Logs `message` at `level`.
    fn log(&self, level: LogLevel, message: String);
}

/// Severity of a log message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum LogLevel {
    /// Very detailed tracing.
    Trace,
    /// Debugging information.
    Debug,
    /// Normal progress, e.g. "Service started".
    Info,
    /// Recoverable problems such as a failed poll.
    Warn,
    /// Failures that need attention.
    Error,
}

/// Forwards `log` records to the host `Logger`.
struct ForeignLogger;

impl log::Log for ForeignLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        should_forward(metadata.level(), metadata.target())
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        match LOGGER_INSTANCE.get() {
            Some(host) => host.log(log_level(record.level()), record.args().to_string()),
            None => eprintln!("[oraclekit] {}", record.args()),
        }
    }

    fn flush(&self) {}
}

/// Debug and trace records are only forwarded from this crate; dependencies
/// like `reqwest` and `rustls` are far too chatty at those levels.
fn should_forward(level: log::Level, target: &str) -> bool {
    target.starts_with("oraclekit") || level <= log::Level::Info
}

const fn log_level(level: log::Level) -> LogLevel {
    match level {
        log::Level::Error => LogLevel::Error,
        log::Level::Warn => LogLevel::Warn,
        log::Level::Info => LogLevel::Info,
        log::Level::Debug => LogLevel::Debug,
        log::Level::Trace => LogLevel::Trace,
    }
}

static LOGGER_INSTANCE: OnceLock<Arc<dyn Logger>> = OnceLock::new();

/// Sets the host logger. Only the first call has an effect.
#[uniffi::export]
pub fn set_logger(logger: Arc<dyn Logger>) {
    if LOGGER_INSTANCE.set(logger).is_err() {
        log::warn!("host logger already installed, ignoring");
        return;
    }
    if let Err(err) = init_logger() {
        eprintln!("[oraclekit] another `log` backend is active: {err}");
    }
}

fn init_logger() -> Result<(), log::SetLoggerError> {
    static LOGGER: ForeignLogger = ForeignLogger;
    log::set_logger(&LOGGER)?;
    log::set_max_level(log::LevelFilter::Trace);
    Ok(())
}
