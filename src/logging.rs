//! Diagnostic logging for kira.
//!
//! Logging is off unless a level is requested through `--log-level` or
//! `KIRA_LOG_LEVEL`. Diagnostics go to stderr or to an append-only file and
//! never to stdout, which is reserved for the `latest` report.

use std::path::PathBuf;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Log level configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Parse a log level from a string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "trace" => Some(Self::Trace),
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_filter_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "text" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Configuration for the logging system.
#[derive(Debug, Default, PartialEq)]
pub struct LogConfig {
    /// Log level (None means logging is disabled).
    pub level: Option<LogLevel>,
    /// Output file path (None means stderr).
    pub file: Option<PathBuf>,
    pub format: LogFormat,
}

impl LogConfig {
    /// Filter directive limiting output to this crate.
    fn filter(&self) -> Option<EnvFilter> {
        self.level
            .map(|level| EnvFilter::new(format!("kira={}", level.as_filter_str())))
    }
}

/// Guard that must be held to ensure logs are flushed.
///
/// When this guard is dropped, all pending log messages are flushed.
pub struct LogGuard {
    _guard: WorkerGuard,
}

/// Initialize the logging system.
///
/// Returns `None` when logging is disabled or the log file cannot be opened.
///
/// # Example
///
/// ```rust,no_run
/// use kira::logging::{LogConfig, LogLevel, LogFormat, init_logging};
///
/// let config = LogConfig {
///     level: Some(LogLevel::Debug),
///     file: None,
///     format: LogFormat::Text,
/// };
///
/// let _guard = init_logging(config);
/// ```
#[must_use = "the returned guard must be held until application exit"]
pub fn init_logging(config: LogConfig) -> Option<LogGuard> {
    let filter = config.filter()?;

    let (writer, guard, to_file) = match &config.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            (writer, guard, true)
        }
        None => {
            let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());
            (writer, guard, false)
        }
    };

    install_subscriber(filter, writer, config.format, to_file);
    Some(LogGuard { _guard: guard })
}

fn install_subscriber(filter: EnvFilter, writer: NonBlocking, format: LogFormat, to_file: bool) {
    match format {
        LogFormat::Json => {
            let layer = fmt::layer()
                .with_writer(writer)
                .json()
                .with_span_events(FmtSpan::CLOSE)
                .with_file(to_file)
                .with_line_number(to_file);

            tracing_subscriber::registry()
                .with(filter)
                .with(layer)
                .init();
        }
        LogFormat::Text if to_file => {
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_level(true)
                .with_file(true)
                .with_line_number(true);

            tracing_subscriber::registry()
                .with(filter)
                .with(layer)
                .init();
        }
        LogFormat::Text => {
            let layer = fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_level(true)
                .compact();

            tracing_subscriber::registry()
                .with(filter)
                .with(layer)
                .init();
        }
    }
}

/// Parse logging configuration from command-line arguments and environment.
///
/// Runs before clap so that logging is active while the rest of the
/// configuration is resolved. Precedence: CLI args > `KIRA_LOG_*` variables.
#[must_use]
pub fn parse_early_log_config(args: &[String]) -> LogConfig {
    let level_str =
        extract_arg_value(args, "--log-level").or_else(|| std::env::var("KIRA_LOG_LEVEL").ok());
    let file_str =
        extract_arg_value(args, "--log-file").or_else(|| std::env::var("KIRA_LOG_FILE").ok());
    let format_str =
        extract_arg_value(args, "--log-format").or_else(|| std::env::var("KIRA_LOG_FORMAT").ok());

    LogConfig {
        level: level_str.and_then(|s| LogLevel::parse(&s)),
        file: file_str.filter(|s| !s.is_empty()).map(PathBuf::from),
        format: format_str
            .and_then(|s| LogFormat::parse(&s))
            .unwrap_or_default(),
    }
}

/// Extract the value of `--flag value` or `--flag=value`.
fn extract_arg_value(args: &[String], flag: &str) -> Option<String> {
    let prefix = format!("{}=", flag);
    args.iter().enumerate().find_map(|(i, arg)| {
        if arg == flag {
            args.get(i + 1).cloned()
        } else {
            arg.strip_prefix(&prefix).map(str::to_string)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::file_serial;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    /// # Test: Log Level Parsing
    ///
    /// ## Test Scenario
    /// - Parse valid log level strings (case-insensitive)
    /// - Parse invalid log level strings
    ///
    /// ## Expected Outcome
    /// - Valid strings return the corresponding LogLevel
    /// - Invalid strings return None
    #[test]
    fn test_log_level_parsing() {
        assert_eq!(LogLevel::parse("trace"), Some(LogLevel::Trace));
        assert_eq!(LogLevel::parse("DEBUG"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::parse(" info "), Some(LogLevel::Info));
        assert_eq!(LogLevel::parse("warning"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("error"), Some(LogLevel::Error));
        assert_eq!(LogLevel::parse("verbose"), None);
        assert_eq!(LogLevel::parse(""), None);
    }

    #[test]
    fn test_log_format_parsing() {
        assert_eq!(LogFormat::parse("text"), Some(LogFormat::Text));
        assert_eq!(LogFormat::parse("JSON"), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse("ndjson"), None);
    }

    /// # Test: Early Config Parsing from Args
    ///
    /// ## Test Scenario
    /// - Parse args using both `--flag value` and `--flag=value` forms
    ///
    /// ## Expected Outcome
    /// - Every flag is extracted regardless of its position relative to the subcommand
    #[test]
    #[file_serial(env_tests)]
    fn test_early_config_parsing_from_args() {
        let config = parse_early_log_config(&args(&[
            "kira",
            "--log-level",
            "debug",
            "latest",
            "--log-file=/tmp/kira.log",
            "--log-format",
            "json",
        ]));
        assert_eq!(config.level, Some(LogLevel::Debug));
        assert_eq!(config.file, Some(PathBuf::from("/tmp/kira.log")));
        assert_eq!(config.format, LogFormat::Json);
    }

    /// # Test: Environment Fallback
    ///
    /// ## Test Scenario
    /// - KIRA_LOG_LEVEL and KIRA_LOG_FORMAT are set
    /// - The command line overrides only the level
    ///
    /// ## Expected Outcome
    /// - CLI level wins, format falls back to the environment
    #[test]
    #[file_serial(env_tests)]
    fn test_early_config_env_fallback() {
        unsafe {
            std::env::set_var("KIRA_LOG_LEVEL", "trace");
            std::env::set_var("KIRA_LOG_FORMAT", "json");
        }

        let from_env = parse_early_log_config(&args(&["kira", "latest"]));
        assert_eq!(from_env.level, Some(LogLevel::Trace));
        assert_eq!(from_env.format, LogFormat::Json);

        let overridden = parse_early_log_config(&args(&["kira", "--log-level", "warn", "latest"]));
        assert_eq!(overridden.level, Some(LogLevel::Warn));
        assert_eq!(overridden.format, LogFormat::Json);

        unsafe {
            std::env::remove_var("KIRA_LOG_LEVEL");
            std::env::remove_var("KIRA_LOG_FORMAT");
        }
    }

    /// # Test: Logging Disabled by Default
    ///
    /// ## Test Scenario
    /// - No level on the command line or in the environment
    ///
    /// ## Expected Outcome
    /// - No filter is built and init_logging would return None
    #[test]
    #[file_serial(env_tests)]
    fn test_logging_disabled_by_default() {
        let config = parse_early_log_config(&args(&["kira", "latest"]));
        assert!(config.level.is_none());
        assert!(config.filter().is_none());
    }

    #[test]
    fn test_extract_arg_value() {
        let list = args(&["kira", "--flag", "value"]);
        assert_eq!(extract_arg_value(&list, "--flag"), Some("value".to_string()));
        assert_eq!(extract_arg_value(&list, "--other"), None);

        // Flag at the end without a value
        let list = args(&["kira", "--flag"]);
        assert_eq!(extract_arg_value(&list, "--flag"), None);

        let list = args(&["kira", "--flag=inline"]);
        assert_eq!(extract_arg_value(&list, "--flag"), Some("inline".to_string()));
    }
}
