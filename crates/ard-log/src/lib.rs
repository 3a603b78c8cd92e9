use std::path::PathBuf;

use chrono::{DateTime, Utc};
// Re-export logging functions for convenience.
pub use log::*;
use log4rs::{
    append::{console::ConsoleAppender, file::FileAppender},
    config::{runtime::ConfigErrors, Appender, Root},
    encode::pattern::PatternEncoder,
    Config,
};
use thiserror::Error;

/// Describes where logs go and how much of them is kept.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Removes all logs below this level.
    pub filter: LevelFilter,
    /// Directory that receives a log file for each run. `None` only logs to the console.
    pub log_dir: Option<PathBuf>,
    /// `log4rs` pattern used to format each line.
    pub pattern: String,
}

#[derive(Debug, Error)]
pub enum LogInitError {
    #[error("unable to open log file: {0}")]
    File(#[from] std::io::Error),
    #[error("invalid logging configuration: {0}")]
    Config(#[from] ConfigErrors),
    #[error("a logger has already been installed: {0}")]
    AlreadyInstalled(#[from] SetLoggerError),
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: LevelFilter::Info,
            log_dir: Some(PathBuf::from("./logs")),
            pattern: String::from("{d} - {l} - {t} - {m}{n}"),
        }
    }
}

/// Name of the log file for a run started at `now`.
pub fn log_file_name(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d %H-%M-%S.txt").to_string()
}

/// Builds the `log4rs` configuration described by `config` without installing it.
pub fn build_config(config: &LogConfig) -> Result<Config, LogInitError> {
    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(&config.pattern)))
        .build();

    let mut builder =
        Config::builder().appender(Appender::builder().build("stdout", Box::new(stdout)));
    let mut root = Root::builder().appender("stdout");

    if let Some(dir) = &config.log_dir {
        let log_file = FileAppender::builder()
            .encoder(Box::new(PatternEncoder::new(&config.pattern)))
            .build(dir.join(log_file_name(Utc::now())))?;

        builder = builder.appender(Appender::builder().build("log_file", Box::new(log_file)));
        root = root.appender("log_file");
    }

    Ok(builder.build(root.build(config.filter))?)
}

/// Initializes logging. Should be called before any other logging functions.
///
/// Panics are routed through the logger as well, so contract violations end up in the log file
/// before the process goes down.
pub fn init(config: &LogConfig) -> Result<(), LogInitError> {
    log4rs::init_config(build_config(config)?)?;
    log_panics::init();
    Ok(())
}
