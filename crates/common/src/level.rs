use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Task-facing log level, ordered from most to least verbose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    /// Auditable events emitted by tasks; logged at info with `audit = true`.
    Audit,
    Warn,
    Error,
    Fatal,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Audit => "audit",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Fatal => "fatal",
        };
        f.write_str(s)
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "audit" => Ok(Self::Audit),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            "fatal" => Ok(Self::Fatal),
            other => Err(format!("unknown log level: {other}")),
        }
    }
}

impl LogLevel {
    /// Emit `message` through `tracing` at the matching level.
    pub fn emit(self, task: &str, message: &str) {
        match self {
            Self::Trace => tracing::trace!(task, "{message}"),
            Self::Debug => tracing::debug!(task, "{message}"),
            Self::Info => tracing::info!(task, "{message}"),
            Self::Audit => tracing::info!(task, audit = true, "{message}"),
            Self::Warn => tracing::warn!(task, "{message}"),
            Self::Error => tracing::error!(task, "{message}"),
            Self::Fatal => tracing::error!(task, fatal = true, "{message}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_warning_alias() {
        assert_eq!("warning".parse::<LogLevel>(), Ok(LogLevel::Warn));
        assert_eq!("DEBUG".parse::<LogLevel>(), Ok(LogLevel::Debug));
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn ordering_is_verbosity() {
        assert!(LogLevel::Trace < LogLevel::Info);
        assert!(LogLevel::Audit < LogLevel::Warn);
    }
}
