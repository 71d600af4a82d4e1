use super::Logger;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    const ALL: [LogLevel; 5] = [
        LogLevel::Trace,
        LogLevel::Debug,
        LogLevel::Info,
        LogLevel::Warn,
        LogLevel::Error,
    ];

    fn from_index(index: u8) -> Self {
        Self::ALL
            .get(usize::from(index))
            .copied()
            .unwrap_or(LogLevel::Error)
    }

    fn index(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        f.write_str(name)
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level '{other}'")),
        }
    }
}

/// Forwards module log lines to the host's `tracing` subscriber
#[derive(Debug)]
pub struct LoggerService {
    min_level: AtomicU8,
}

impl LoggerService {
    #[must_use]
    pub fn new(min_level: LogLevel) -> Self {
        Self {
            min_level: AtomicU8::new(min_level.index()),
        }
    }

    #[must_use]
    pub fn enabled(&self, level: LogLevel) -> bool {
        level >= self.min_level()
    }
}

impl Default for LoggerService {
    fn default() -> Self {
        Self::new(LogLevel::default())
    }
}

impl Logger for LoggerService {
    fn log(&self, level: LogLevel, tag: &str, message: &str) {
        if !self.enabled(level) {
            return;
        }
        match level {
            LogLevel::Trace => trace!(tag, "{}", message),
            LogLevel::Debug => debug!(tag, "{}", message),
            LogLevel::Info => info!(tag, "{}", message),
            LogLevel::Warn => warn!(tag, "{}", message),
            LogLevel::Error => error!(tag, "{}", message),
        }
    }

    fn min_level(&self) -> LogLevel {
        LogLevel::from_index(self.min_level.load(Ordering::Relaxed))
    }

    fn set_min_level(&self, level: LogLevel) {
        self.min_level.store(level.index(), Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_filter() {
        let logger = LoggerService::new(LogLevel::Warn);
        assert!(!logger.enabled(LogLevel::Info));
        assert!(logger.enabled(LogLevel::Error));

        logger.set_min_level(LogLevel::Trace);
        assert_eq!(logger.min_level(), LogLevel::Trace);
        assert!(logger.enabled(LogLevel::Debug));
        logger.info("test", "forwarded");
    }

    #[test]
    fn test_parse_level() {
        assert_eq!("WARNING".parse::<LogLevel>(), Ok(LogLevel::Warn));
        assert_eq!(LogLevel::Debug.to_string(), "debug");
        assert!("loud".parse::<LogLevel>().is_err());
    }
}
