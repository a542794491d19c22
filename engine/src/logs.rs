//! Pipeline progress logging.
//!
//! Step messages are modelled as [`LogEntry`] values and emitted as
//! `tracing` events, so the same call sites work under any subscriber.

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Default filter directive when `RUST_LOG` is unset.
pub const DEFAULT_DIRECTIVE: &str = "rred=info";

/// Log level of a pipeline step message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// A single step message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    /// Nesting depth for sub-steps.
    #[serde(default)]
    pub indent: u8,
}

impl LogEntry {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: LogLevel::Info,
            message: message.into(),
            indent: 0,
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: LogLevel::Success,
            message: message.into(),
            indent: 0,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: LogLevel::Warning,
            message: message.into(),
            indent: 0,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: LogLevel::Error,
            message: message.into(),
            indent: 0,
        }
    }

    pub fn with_indent(mut self, indent: u8) -> Self {
        self.indent = indent;
        self
    }

    /// Message with its indentation and level marker applied.
    pub fn rendered(&self) -> String {
        let marker = match self.level {
            LogLevel::Info => "",
            LogLevel::Success => "✓ ",
            LogLevel::Warning => "⚠ ",
            LogLevel::Error => "✗ ",
        };
        format!("{}{}{}", "   ".repeat(self.indent as usize), marker, self.message)
    }

    /// Emit this entry as a `tracing` event at the matching level.
    pub fn emit(&self) {
        let text = self.rendered();
        match self.level {
            LogLevel::Info | LogLevel::Success => tracing::info!(target: "rred", "{text}"),
            LogLevel::Warning => tracing::warn!(target: "rred", "{text}"),
            LogLevel::Error => tracing::error!(target: "rred", "{text}"),
        }
    }
}

pub fn log_info(msg: impl Into<String>) {
    LogEntry::info(msg).emit();
}

pub fn log_success(msg: impl Into<String>) {
    LogEntry::success(msg).emit();
}

pub fn log_warning(msg: impl Into<String>) {
    LogEntry::warning(msg).emit();
}

pub fn log_error(msg: impl Into<String>) {
    LogEntry::error(msg).emit();
}

pub fn log_info_indent(msg: impl Into<String>, indent: u8) {
    LogEntry::info(msg).with_indent(indent).emit();
}

pub fn log_success_indent(msg: impl Into<String>, indent: u8) {
    LogEntry::success(msg).with_indent(indent).emit();
}

/// Install the global subscriber: human-readable output on stderr,
/// filtered by `RUST_LOG` or [`DEFAULT_DIRECTIVE`].
///
/// Calling this twice is harmless; the second call is ignored.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rendered_indent_and_marker() {
        let entry = LogEntry::warning("4 issues found").with_indent(1);
        assert_eq!(entry.rendered(), "   ⚠ 4 issues found");
        assert_eq!(LogEntry::info("Reading").rendered(), "Reading");
        assert_eq!(
            LogEntry::error("Dispatch list rejected").rendered(),
            "✗ Dispatch list rejected"
        );
    }

    #[test]
    fn test_entry_serialises_lowercase_level() {
        let json = serde_json::to_string(&LogEntry::success("done")).unwrap();
        assert!(json.contains("\"level\":\"success\""));
        assert!(json.contains("\"indent\":0"));
    }

    #[test]
    fn test_init_logging_twice() {
        init_logging();
        init_logging();
        log_info("still fine");
    }
}
