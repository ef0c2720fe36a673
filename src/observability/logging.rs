//! Leveled logging with a console sink and a file sink.
//!
//! # Responsibilities
//! - Gate records by a process-wide minimum level and an enabled toggle
//! - Write every record to the file sink (plain) and the console sink (colored)
//! - Provide the log-then-abort PANIC primitive
//!
//! # Record layout
//! ```text
//! file:    2024/05/01 12:00:00 startup.rs:88: [INFO] Listening signal for gracefully shutdown
//! console: 2024/05/01 12:00:00 startup.rs:88: \x1b[32m[INFO] Listening signal ...\x1b[0m
//! ```
//!
//! # Design Decisions
//! - One long-lived [`Logger`], installed once through [`install`]
//! - A record is rendered before a sink lock is taken and written with a
//!   single `write_all`, so concurrent records interleave but never split
//! - File first, console second; both happen before `emit` returns

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::panic::Location;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use chrono::Local;

use crate::config::LoggingConfig;
use crate::error::Fatal;
use crate::observability::metrics;

/// Environment variable holding the minimum level override.
pub const LOG_LEVEL_ENV: &str = "LOG_LEVEL";

/// ANSI sequence terminating a colored console record.
pub const COLOR_RESET: &str = "\x1b[0m";

/// Severity of a log record, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum Level {
    #[default]
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    /// Log, then abort the calling path.
    Panic = 5,
}

impl Level {
    pub const ALL: [Level; 5] = [
        Level::Debug,
        Level::Info,
        Level::Warn,
        Level::Error,
        Level::Panic,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
            Level::Panic => "PANIC",
        }
    }

    /// ANSI color opening a console record of this level.
    pub fn color(self) -> &'static str {
        match self {
            Level::Debug => "\x1b[34m",
            Level::Info => "\x1b[32m",
            Level::Warn => "\x1b[33m",
            Level::Error | Level::Panic => "\x1b[31m",
        }
    }

    /// Minimum level from `LOG_LEVEL`, `Debug` when unset or unrecognized.
    pub fn from_env() -> Self {
        Self::from_env_value(std::env::var(LOG_LEVEL_ENV).ok().as_deref())
    }

    pub fn from_env_value(value: Option<&str>) -> Self {
        value.and_then(|v| v.parse().ok()).unwrap_or_default()
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => Level::Debug,
            2 => Level::Info,
            3 => Level::Warn,
            4 => Level::Error,
            _ => Level::Panic,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when text does not name a level.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown log level '{0}'")]
pub struct ParseLevelError(pub String);

impl FromStr for Level {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(Level::Debug),
            "INFO" => Ok(Level::Info),
            "WARN" => Ok(Level::Warn),
            "ERROR" => Ok(Level::Error),
            "PANIC" => Ok(Level::Panic),
            _ => Err(ParseLevelError(s.to_string())),
        }
    }
}

/// Errors raised while setting up logging. All of them are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("can't create logs directory {}: {source}", path.display())]
    CreateDirectory { path: PathBuf, source: io::Error },
    #[error("can't open log file {}: {source}", path.display())]
    OpenFile { path: PathBuf, source: io::Error },
    #[error("a logger is already installed for this process")]
    AlreadyInstalled,
    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}

/// Unwind payload of [`Logger::panic`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FatalPanic {
    /// The record text, level tag included.
    pub message: String,
}

impl fmt::Display for FatalPanic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

type Sink = Mutex<Box<dyn Write + Send>>;

struct Inner {
    min_level: AtomicU8,
    enabled: AtomicBool,
    console: Sink,
    file: Sink,
}

/// Process logging state: filter settings plus the two sinks.
///
/// Clones share the same state.
#[derive(Clone)]
pub struct Logger {
    inner: Arc<Inner>,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("min_level", &self.min_level())
            .field("enabled", &self.is_enabled())
            .finish_non_exhaustive()
    }
}

impl Logger {
    /// Create the log directory, open the log file for appending and log
    /// to stdout. The minimum level comes from `LOG_LEVEL`.
    pub fn open(config: &LoggingConfig) -> Result<Self, LoggingError> {
        let directory = Path::new(&config.directory);
        fs::create_dir_all(directory).map_err(|source| LoggingError::CreateDirectory {
            path: directory.to_path_buf(),
            source,
        })?;

        let path = directory.join(&config.file_name);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| LoggingError::OpenFile { path, source })?;

        let logger = Self::with_sinks(Box::new(io::stdout()), Box::new(file), Level::from_env());
        logger.set_enabled(config.enabled);
        Ok(logger)
    }

    /// Build a logger over arbitrary writers.
    pub fn with_sinks(
        console: Box<dyn Write + Send>,
        file: Box<dyn Write + Send>,
        min_level: Level,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                min_level: AtomicU8::new(min_level as u8),
                enabled: AtomicBool::new(true),
                console: Mutex::new(console),
                file: Mutex::new(file),
            }),
        }
    }

    pub fn configure(&self, min_level: Level, enabled: bool) {
        self.inner.min_level.store(min_level as u8, Ordering::Relaxed);
        self.inner.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn set_min_level(&self, min_level: Level) {
        self.inner.min_level.store(min_level as u8, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Relaxed)
    }

    pub fn min_level(&self) -> Level {
        Level::from_u8(self.inner.min_level.load(Ordering::Relaxed))
    }

    pub fn should_log(&self, level: Level) -> bool {
        self.is_enabled() && level >= self.min_level()
    }

    /// Write a record attributed to the caller's source location.
    #[track_caller]
    pub fn emit(&self, level: Level, args: fmt::Arguments<'_>) {
        let location = Location::caller();
        self.emit_at(level, location.file(), location.line(), args);
    }

    /// Write a record attributed to an explicit source location.
    pub fn emit_at(&self, level: Level, file: &str, line: u32, args: fmt::Arguments<'_>) {
        if !self.should_log(level) {
            return;
        }

        let prefix = format!(
            "{} {}:{}: ",
            Local::now().format("%Y/%m/%d %H:%M:%S"),
            short_file(file),
            line
        );
        let message = format!("[{level}] {args}");

        write_line(&self.inner.file, &format!("{prefix}{message}\n"));
        write_line(
            &self.inner.console,
            &format!("{prefix}{}{message}{COLOR_RESET}\n", level.color()),
        );

        metrics::record_log_record(level);
    }

    #[track_caller]
    pub fn debug(&self, args: fmt::Arguments<'_>) {
        self.emit(Level::Debug, args);
    }

    #[track_caller]
    pub fn info(&self, args: fmt::Arguments<'_>) {
        self.emit(Level::Info, args);
    }

    #[track_caller]
    pub fn warn(&self, args: fmt::Arguments<'_>) {
        self.emit(Level::Warn, args);
    }

    #[track_caller]
    pub fn error(&self, args: fmt::Arguments<'_>) {
        self.emit(Level::Error, args);
    }

    /// Write a PANIC record, then unwind with a [`FatalPanic`] payload.
    ///
    /// The unwind happens even when logging is disabled.
    #[track_caller]
    pub fn panic(&self, args: fmt::Arguments<'_>) -> ! {
        let message = args.to_string();
        self.emit(Level::Panic, format_args!("{message}"));
        std::panic::panic_any(FatalPanic {
            message: format!("[{}] {message}", Level::Panic),
        })
    }

    /// Write `fatal` at PANIC level to both sinks. The caller ends the
    /// process afterwards.
    #[track_caller]
    pub fn fatal(&self, fatal: &Fatal) {
        self.emit(Level::Panic, format_args!("{fatal}"));
    }
}

fn write_line(sink: &Sink, line: &str) {
    let mut writer = sink.lock().unwrap_or_else(PoisonError::into_inner);
    // sink failures have nowhere to be reported
    let _ = writer.write_all(line.as_bytes());
    let _ = writer.flush();
}

fn short_file(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

static GLOBAL: OnceLock<Logger> = OnceLock::new();

/// Make `logger` the process logger. Fails if one is already installed.
pub fn install(logger: Logger) -> Result<(), LoggingError> {
    GLOBAL.set(logger).map_err(|_| LoggingError::AlreadyInstalled)
}

/// The process logger, once [`install`] has run.
pub fn global() -> Option<&'static Logger> {
    GLOBAL.get()
}

/// In-memory writer whose clones share one buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        let buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&buffer).into_owned()
    }

    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_string).collect()
    }
}

impl Write for MemorySink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    fn capture(level: Level) -> (Logger, MemorySink, MemorySink) {
        let console = MemorySink::new();
        let file = MemorySink::new();
        let logger = Logger::with_sinks(Box::new(console.clone()), Box::new(file.clone()), level);
        (logger, console, file)
    }

    #[test]
    fn test_level_order_gates_output() {
        for min in Level::ALL {
            for level in Level::ALL.into_iter().filter(|l| *l != Level::Panic) {
                let (logger, console, file) = capture(min);
                logger.emit(level, format_args!("m"));

                let expected = usize::from(level >= min);
                assert_eq!(console.lines().len(), expected, "min={min} level={level}");
                assert_eq!(file.lines().len(), expected, "min={min} level={level}");
            }
        }
    }

    #[test]
    fn test_disabled_suppresses_everything() {
        let (logger, console, file) = capture(Level::Debug);
        logger.configure(Level::Debug, false);

        logger.error(format_args!("nope"));
        logger.info(format_args!("nope"));

        assert!(console.contents().is_empty());
        assert!(file.contents().is_empty());
    }

    #[test]
    fn test_warn_threshold_scenario() {
        let (logger, console, file) = capture(Level::Debug);
        logger.configure(Level::Warn, true);

        logger.info(format_args!("x"));
        assert!(file.contents().is_empty());
        assert!(console.contents().is_empty());

        logger.error(format_args!("{}", "y"));
        let file_line = file.lines().pop().unwrap();
        let console_line = console.lines().pop().unwrap();

        assert!(file_line.ends_with("[ERROR] y"), "{file_line}");
        assert!(console_line.ends_with("\x1b[31m[ERROR] y\x1b[0m"), "{console_line}");
    }

    #[test]
    fn test_console_brackets_message_with_one_color_pair() {
        let (logger, console, file) = capture(Level::Debug);
        for level in [Level::Debug, Level::Info, Level::Warn, Level::Error] {
            logger.emit(level, format_args!("payload"));
        }

        for line in file.lines() {
            assert!(!line.contains('\x1b'), "escape in file sink: {line:?}");
        }
        for (line, level) in console.lines().iter().zip([Level::Debug, Level::Info, Level::Warn, Level::Error]) {
            assert_eq!(line.matches(level.color()).count(), 1);
            assert_eq!(line.matches(COLOR_RESET).count(), 1);
            assert!(line.ends_with(&format!("{}[{level}] payload{COLOR_RESET}", level.color())));
        }
    }

    #[test]
    fn test_record_carries_timestamp_and_location() {
        let (logger, _console, file) = capture(Level::Debug);
        let line = line!() + 1;
        logger.info(format_args!("here"));

        let record = file.lines().pop().unwrap();
        assert!(record.contains(&format!("logging.rs:{line}: [INFO] here")), "{record}");
        // "YYYY/MM/DD HH:MM:SS "
        let date = &record[..19];
        assert_eq!(date.as_bytes()[4], b'/');
        assert_eq!(date.as_bytes()[13], b':');
    }

    #[test]
    fn test_panic_writes_both_sinks_before_unwinding() {
        let (logger, console, file) = capture(Level::Debug);

        let result = catch_unwind(AssertUnwindSafe(|| {
            logger.panic(format_args!("Invalid plugin storage type: {}", "floppy"));
        }));

        let payload = result.unwrap_err();
        let fatal = payload.downcast_ref::<FatalPanic>().unwrap();
        assert_eq!(fatal.message, "[PANIC] Invalid plugin storage type: floppy");
        assert!(file.contents().contains("[PANIC] Invalid plugin storage type: floppy"));
        assert!(console
            .contents()
            .contains("\x1b[31m[PANIC] Invalid plugin storage type: floppy\x1b[0m"));
    }

    #[test]
    fn test_panic_unwinds_even_when_disabled() {
        let (logger, _console, file) = capture(Level::Debug);
        logger.set_enabled(false);

        let result = catch_unwind(AssertUnwindSafe(|| logger.panic(format_args!("gone"))));
        assert!(result.is_err());
        assert!(file.contents().is_empty());
    }

    #[test]
    fn test_level_parsing() {
        assert_eq!("warn".parse::<Level>().unwrap(), Level::Warn);
        assert_eq!(" Error ".parse::<Level>().unwrap(), Level::Error);
        assert!("verbose".parse::<Level>().is_err());

        assert_eq!(Level::from_env_value(Some("iNfO")), Level::Info);
        assert_eq!(Level::from_env_value(Some("loud")), Level::Debug);
        assert_eq!(Level::from_env_value(None), Level::Debug);
    }

    #[test]
    fn test_open_creates_directory_and_appends() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            enabled: true,
            directory: dir.path().join("logs").to_string_lossy().into_owned(),
            file_name: "app.log".into(),
        };

        for round in ["first", "second"] {
            let logger = Logger::open(&config).unwrap();
            logger.configure(Level::Debug, true);
            logger.error(format_args!("{round}"));
        }

        let written = fs::read_to_string(dir.path().join("logs/app.log")).unwrap();
        assert!(written.contains("[ERROR] first"));
        assert!(written.contains("[ERROR] second"));
        assert!(!written.contains('\x1b'));
    }

    #[test]
    fn test_open_fails_when_directory_is_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("logs");
        fs::write(&blocker, b"not a dir").unwrap();

        let config = LoggingConfig {
            directory: blocker.to_string_lossy().into_owned(),
            ..LoggingConfig::default()
        };
        let err = Logger::open(&config).unwrap_err();
        assert!(matches!(err, LoggingError::CreateDirectory { .. }));
    }

    #[test]
    fn test_concurrent_records_never_split() {
        let (logger, console, file) = capture(Level::Debug);

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let logger = logger.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        logger.info(format_args!("thread={t} seq={i}"));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let lines = file.lines();
        assert_eq!(lines.len(), 400);
        assert!(lines.iter().all(|l| l.contains("[INFO] thread=")));
        assert!(console.lines().iter().all(|l| l.ends_with(COLOR_RESET)));
    }
}
