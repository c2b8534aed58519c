//! Logging configuration for the launcher
//!
//! Uses log4rs with appenders:
//! 1. ConsoleAppender - stdout output
//! 2. RollingFileAppender - log files with rotation (only with a log directory)

use anyhow::Context;
use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::append::rolling_file::policy::compound::roll::fixed_window::FixedWindowRoller;
use log4rs::append::rolling_file::policy::compound::trigger::size::SizeTrigger;
use log4rs::append::rolling_file::policy::compound::CompoundPolicy;
use log4rs::append::rolling_file::RollingFileAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use std::path::PathBuf;

/// Rotate the log file at 10 MB
const LOG_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Number of rotated log files kept
const LOG_FILE_COUNT: u32 = 5;

#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    /// Directory for rolling log files, console only when unset
    pub dir: Option<PathBuf>,
    /// Debug level instead of info
    pub verbose: bool,
    /// The terminal will be in raw mode, lines need an explicit carriage return
    pub raw_terminal: bool,
}

impl LogOptions {
    pub fn level(&self) -> LevelFilter {
        if self.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        }
    }
}

/// Console line pattern
pub fn console_pattern(raw_terminal: bool) -> &'static str {
    if raw_terminal {
        "{d(%H:%M:%S)} [{l}] {t} - {m}\r{n}"
    } else {
        "{d(%H:%M:%S)} [{l}] {t} - {m}{n}"
    }
}

/// Initialize log4rs with a console appender and, with a log directory,
/// a rolling file appender
///
/// # Log File Configuration
/// - File: `{dir}/launcher.1.log`
/// - Max size: 10 MB per file
/// - Max count: 5 files (rotation)
/// - Pattern: `{timestamp} [{level}] {target} - {message}`
pub fn init_logger(options: &LogOptions) -> anyhow::Result<log4rs::Handle> {
    let config = build_config(options)?;
    log4rs::init_config(config).context("Failed to install logger")
}

fn build_config(options: &LogOptions) -> anyhow::Result<Config> {
    let console = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(console_pattern(
            options.raw_terminal,
        ))))
        .build();

    let mut builder =
        Config::builder().appender(Appender::builder().build("console", Box::new(console)));
    let mut root = Root::builder().appender("console");

    if let Some(dir) = &options.dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create log dir {}", dir.display()))?;

        let log_file = dir.join("launcher.1.log");
        let log_pattern = dir.join("launcher.{}.log");
        let log_pattern = log_pattern
            .to_str()
            .with_context(|| format!("Log dir {} is not valid UTF-8", dir.display()))?;

        let roller = FixedWindowRoller::builder()
            .base(1)
            .build(log_pattern, LOG_FILE_COUNT)?;
        let trigger = SizeTrigger::new(LOG_FILE_SIZE);
        let policy = CompoundPolicy::new(Box::new(trigger), Box::new(roller));

        let logfile = RollingFileAppender::builder()
            .encoder(Box::new(PatternEncoder::new(
                "{d(%Y-%m-%d %H:%M:%S)} [{l}] {t} - {m}{n}",
            )))
            .build(log_file, Box::new(policy))
            .context("Failed to open log file")?;

        builder = builder.appender(Appender::builder().build("logfile", Box::new(logfile)));
        root = root.appender("logfile");
    }

    Ok(builder.build(root.build(options.level()))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_console_pattern() {
        assert!(console_pattern(true).ends_with("\r{n}"));
        assert!(!console_pattern(false).contains('\r'));
    }

    #[test]
    fn test_level() {
        assert_eq!(LogOptions::default().level(), LevelFilter::Info);
        let verbose = LogOptions {
            verbose: true,
            ..Default::default()
        };
        assert_eq!(verbose.level(), LevelFilter::Debug);
    }

    #[test]
    fn test_build_config_with_log_dir() {
        let dir = TempDir::new().unwrap();
        let options = LogOptions {
            dir: Some(dir.path().join("logs")),
            ..Default::default()
        };

        let config = build_config(&options).unwrap();
        assert_eq!(config.appenders().len(), 2);
        assert!(dir.path().join("logs").is_dir());
    }

    #[test]
    fn test_build_config_console_only() {
        let config = build_config(&LogOptions::default()).unwrap();
        assert_eq!(config.appenders().len(), 1);
        assert_eq!(config.root().level(), LevelFilter::Info);
    }
}
