//! Process-wide logger behind the `log` facade.
//!
//! Lines are timestamped, optionally echoed to stderr and kept in a bounded
//! in-memory buffer so a front end can show the recent history.

use chrono::Local;
use log::{LevelFilter, Log, Metadata, Record};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

const LOG_CAPACITY: usize = 500;

pub type LogBuffer = Arc<Mutex<VecDeque<String>>>;

struct SharedLogger {
    level: LevelFilter,
    buffer: LogBuffer,
    echo_stderr: bool,
}

fn lock(buffer: &LogBuffer) -> MutexGuard<'_, VecDeque<String>> {
    buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn push_line(buffer: &LogBuffer, line: String) {
    let mut lines = lock(buffer);
    if lines.len() >= LOG_CAPACITY {
        lines.pop_front();
    }
    lines.push_back(line);
}

impl Log for SharedLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let line = format!(
            "{} [{}] {}",
            Local::now().format("%H:%M:%S%.3f"),
            record.level(),
            record.args()
        );
        if self.echo_stderr {
            eprintln!("{}", line);
        }
        push_line(&self.buffer, line);
    }

    fn flush(&self) {}
}

static LOG_BUFFER: OnceLock<LogBuffer> = OnceLock::new();
static LOGGER: OnceLock<SharedLogger> = OnceLock::new();

/// Level from `RUST_LOG` (error, warn, info, debug, trace); info otherwise.
pub fn level_from_env() -> LevelFilter {
    match std::env::var("RUST_LOG") {
        Ok(level) => parse_level(&level),
        Err(_) => LevelFilter::Info,
    }
}

fn parse_level(level: &str) -> LevelFilter {
    match level.trim().to_lowercase().as_str() {
        "off" => LevelFilter::Off,
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    }
}

/// Install the logger. Safe to call more than once; later calls return the
/// same buffer and leave the first configuration in place.
pub fn init(echo_stderr: bool) -> LogBuffer {
    let buffer = LOG_BUFFER
        .get_or_init(|| Arc::new(Mutex::new(VecDeque::with_capacity(LOG_CAPACITY))))
        .clone();

    let level = level_from_env();
    let logger = LOGGER.get_or_init(|| SharedLogger {
        level,
        buffer: buffer.clone(),
        echo_stderr,
    });
    if log::set_logger(logger).is_ok() {
        log::set_max_level(level);
    }

    buffer
}

pub fn snapshot(buffer: &LogBuffer) -> Vec<String> {
    lock(buffer).iter().cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_levels_case_insensitively() {
        assert_eq!(parse_level("DEBUG"), LevelFilter::Debug);
        assert_eq!(parse_level(" warn "), LevelFilter::Warn);
        assert_eq!(parse_level("off"), LevelFilter::Off);
        assert_eq!(parse_level("chatty"), LevelFilter::Info);
    }

    #[test]
    fn buffer_is_bounded() {
        let buffer: LogBuffer = Arc::new(Mutex::new(VecDeque::new()));
        for i in 0..LOG_CAPACITY + 10 {
            push_line(&buffer, format!("line {}", i));
        }
        let lines = snapshot(&buffer);
        assert_eq!(lines.len(), LOG_CAPACITY);
        assert_eq!(lines[0], "line 10");
    }

    #[test]
    fn logger_records_into_buffer() {
        let logger = SharedLogger {
            level: LevelFilter::Info,
            buffer: Arc::new(Mutex::new(VecDeque::new())),
            echo_stderr: false,
        };
        logger.log(
            &Record::builder()
                .level(log::Level::Warn)
                .args(format_args!("cut beyond source"))
                .build(),
        );
        logger.log(
            &Record::builder()
                .level(log::Level::Debug)
                .args(format_args!("hidden"))
                .build(),
        );
        let lines = snapshot(&logger.buffer);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with("[WARN] cut beyond source"));
    }
}
